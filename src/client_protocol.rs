//! C5: the client↔engine wire framing (spec.md §4.4).
//!
//! Every message is `{u8 type, u32 size, size bytes payload}`. Grounded on
//! spec.md §4.4's client/engine framing and on the teacher's
//! message-framing style in `src/messages/submessages/gap.rs` (fixed
//! header, then body by declared length).

use std::io::{self, Read, Write};

use crate::{
  codec::{Reader, WireCodec, Writer},
  error::StatusCode,
  object_model::{condition::Condition, notification::Notification},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
  Subscribe = 0,
  Unsubscribe = 1,
  CommandReply = 2,
  Notification = 3,
}

impl MessageType {
  fn from_u8(v: u8) -> Option<Self> {
    Some(match v {
      0 => MessageType::Subscribe,
      1 => MessageType::Unsubscribe,
      2 => MessageType::CommandReply,
      3 => MessageType::Notification,
      _ => return None,
    })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
  Subscribe(Condition),
  Unsubscribe(Condition),
  CommandReply(StatusCode),
  Notification(Notification),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
  #[error("connection closed")]
  Closed,
  #[error("short read")]
  ShortRead,
  #[error("zero-byte payload on subscribe/unsubscribe")]
  EmptyPayload,
  #[error("unknown message type: {0}")]
  UnknownType(u8),
  #[error(transparent)]
  Codec(#[from] crate::codec::CodecError),
  #[error(transparent)]
  Io(#[from] io::Error),
}

/// Reads one length-delimited frame and decodes it. A short read, EOF, or
/// a zero-byte payload on subscribe/unsubscribe are protocol errors: the
/// caller must disconnect the client without sending a reply (spec.md
/// §4.4).
pub fn read_message(stream: &mut impl Read) -> Result<Message, ProtocolError> {
  let mut header = [0u8; 5];
  read_exact_or_eof(stream, &mut header)?;
  let msg_type = MessageType::from_u8(header[0]).ok_or(ProtocolError::UnknownType(header[0]))?;
  let size = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;

  if size == 0 && matches!(msg_type, MessageType::Subscribe | MessageType::Unsubscribe) {
    return Err(ProtocolError::EmptyPayload);
  }

  let mut payload = vec![0u8; size];
  stream.read_exact(&mut payload).map_err(|_| ProtocolError::ShortRead)?;
  let mut r = Reader::new(&payload);

  Ok(match msg_type {
    MessageType::Subscribe => Message::Subscribe(Condition::deserialize_tagged(&mut r)?),
    MessageType::Unsubscribe => Message::Unsubscribe(Condition::deserialize_tagged(&mut r)?),
    MessageType::CommandReply => {
      let code = r.read_i8()?;
      Message::CommandReply(status_code_from_i8(code).ok_or(ProtocolError::UnknownType(header[0]))?)
    }
    MessageType::Notification => Message::Notification(Notification::deserialize_tagged(&mut r)?),
  })
}

fn read_exact_or_eof(stream: &mut impl Read, buf: &mut [u8]) -> Result<(), ProtocolError> {
  match stream.read_exact(buf) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(ProtocolError::Closed),
    Err(_) => Err(ProtocolError::ShortRead),
  }
}

fn status_code_from_i8(v: i8) -> Option<StatusCode> {
  Some(match v {
    0 => StatusCode::Ok,
    -1 => StatusCode::InvalidArg,
    -2 => StatusCode::AlreadySubscribed,
    -3 => StatusCode::UnknownCondition,
    -4 => StatusCode::Closed,
    -5 => StatusCode::NotificationsDropped,
    _ => return None,
  })
}

/// Serializes the message's body to learn its byte length, then writes
/// the framed header and body in one call (spec.md §4.4 "Dispatch").
pub fn write_message(stream: &mut impl Write, message: &Message) -> io::Result<()> {
  let (msg_type, w) = match message {
    Message::Subscribe(c) => (MessageType::Subscribe, serialize(c)),
    Message::Unsubscribe(c) => (MessageType::Unsubscribe, serialize(c)),
    Message::CommandReply(code) => {
      let mut w = Writer::new();
      w.write_i8(*code as i8);
      (MessageType::CommandReply, w)
    }
    Message::Notification(n) => (MessageType::Notification, serialize(n)),
  };
  let body = w.into_bytes();
  let mut frame = Vec::with_capacity(5 + body.len());
  frame.push(msg_type as u8);
  frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
  frame.extend_from_slice(&body);
  stream.write_all(&frame)
}

fn serialize<T: WireCodec>(value: &T) -> Writer {
  let mut w = Writer::new();
  value.serialize(&mut w);
  w
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    domain::Domain,
    object_model::{
      condition::{BufferUsageVariant, Threshold},
      evaluation::Evaluation,
    },
  };
  use std::io::Cursor;

  #[test]
  fn subscribe_round_trips() {
    let condition =
      Condition::buffer_usage(BufferUsageVariant::High, "s", "c", Domain::User, Threshold::Bytes(10))
        .unwrap();
    let message = Message::Subscribe(condition);
    let mut buf = Vec::new();
    write_message(&mut buf, &message).unwrap();
    let mut cursor = Cursor::new(buf);
    assert_eq!(read_message(&mut cursor).unwrap(), message);
  }

  #[test]
  fn notification_round_trips() {
    let condition = Condition::session_consumed_size("s", 1024).unwrap();
    let evaluation = Evaluation::BufferUsage { used_bytes: 10, capacity: 100 };
    let message = Message::Notification(Notification::new(condition, evaluation));
    let mut buf = Vec::new();
    write_message(&mut buf, &message).unwrap();
    let mut cursor = Cursor::new(buf);
    assert_eq!(read_message(&mut cursor).unwrap(), message);
  }

  #[test]
  fn zero_byte_subscribe_payload_is_a_protocol_error() {
    let mut buf = vec![MessageType::Subscribe as u8];
    buf.extend_from_slice(&0u32.to_le_bytes());
    let mut cursor = Cursor::new(buf);
    assert!(matches!(read_message(&mut cursor), Err(ProtocolError::EmptyPayload)));
  }

  #[test]
  fn truncated_payload_is_a_protocol_error() {
    let mut buf = vec![MessageType::CommandReply as u8];
    buf.extend_from_slice(&4u32.to_le_bytes());
    buf.push(0); // only one of the 4 declared bytes present
    let mut cursor = Cursor::new(buf);
    assert!(matches!(read_message(&mut cursor), Err(ProtocolError::ShortRead)));
  }

  #[test]
  fn empty_stream_is_closed_not_short_read() {
    let mut cursor = Cursor::new(Vec::<u8>::new());
    assert!(matches!(read_message(&mut cursor), Err(ProtocolError::Closed)));
  }
}
