//! Crate-wide error type and the mapping to the wire-level status codes of
//! the client protocol (spec.md §6/§7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  #[error("already exists: {0}")]
  AlreadyExists(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("unknown condition")]
  UnknownCondition,

  #[error("already subscribed")]
  AlreadySubscribed,

  #[error("communication error: {0}")]
  Communication(String),

  #[error("resource exhausted: {0}")]
  ResourceExhausted(String),

  #[error("fatal internal error: {0}")]
  Fatal(String),

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Status codes carried on the client protocol (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum StatusCode {
  Ok = 0,
  InvalidArg = -1,
  AlreadySubscribed = -2,
  UnknownCondition = -3,
  Closed = -4,
  NotificationsDropped = -5,
}

impl From<&EngineError> for StatusCode {
  fn from(e: &EngineError) -> Self {
    match e {
      EngineError::InvalidArgument(_) => StatusCode::InvalidArg,
      EngineError::AlreadyExists(_) => StatusCode::InvalidArg,
      EngineError::NotFound(_) => StatusCode::InvalidArg,
      EngineError::UnknownCondition => StatusCode::UnknownCondition,
      EngineError::AlreadySubscribed => StatusCode::AlreadySubscribed,
      EngineError::Communication(_) => StatusCode::Closed,
      EngineError::ResourceExhausted(_) => StatusCode::NotificationsDropped,
      EngineError::Fatal(_) => StatusCode::Closed,
      EngineError::Io(_) => StatusCode::Closed,
    }
  }
}

/// `lttng_error_code`-equivalent surfaced by command handlers (spec.md §4.4/§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandReplyCode {
  Ok,
  TriggerExists,
  TriggerNotFound,
  ChannelNotFound,
  InvalidArgument,
  ResourceExhausted,
}

impl From<&EngineError> for CommandReplyCode {
  fn from(e: &EngineError) -> Self {
    match e {
      EngineError::AlreadyExists(_) => CommandReplyCode::TriggerExists,
      EngineError::NotFound(_) => CommandReplyCode::TriggerNotFound,
      EngineError::InvalidArgument(_) => CommandReplyCode::InvalidArgument,
      EngineError::ResourceExhausted(_) => CommandReplyCode::ResourceExhausted,
      _ => CommandReplyCode::InvalidArgument,
    }
  }
}
