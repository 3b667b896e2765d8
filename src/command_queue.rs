//! C4: the mutex-protected command queue the notification thread drains
//! on its event-fd wakeup (spec.md §4.4).
//!
//! Grounded on `original_source/src/bin/lttng-sessiond/notification-thread-commands.c`
//! (`notification_thread_command` + the `futex`/eventfd wake discipline)
//! and on the teacher's own self-pipe usage for cross-thread wakeups
//! (`src/dds/statusevents.rs` uses `mio::Waker`; here we use
//! `mio::unix::pipe` directly so a single byte write is observable as
//! `POLLIN`, matching the source's eventfd semantics more literally).

use std::{
  collections::VecDeque,
  io::Write,
  os::unix::io::RawFd,
  sync::{Arc, Condvar, Mutex},
};

use mio::unix::pipe;

use crate::{
  domain::Domain,
  error::{CommandReplyCode, EngineResult},
  notification_thread::channel::{ChannelInfo, ChannelKey},
  object_model::{condition::Condition, trigger::Trigger},
};

/// `AddApplication`/`RemoveApplication` carry the application's
/// event-trigger source pipe itself (not just a domain tag), so the
/// notification thread's event loop has something to register with its
/// `Poll` (SPEC_FULL.md's Command queue supplement, grounded on
/// `notification_thread_command_add_application` in
/// `notification-thread-commands.h`, which takes the pipe directly).
/// `pipe::Receiver` is neither `Clone` nor (usefully) `Debug`, so
/// `CommandKind` gets a hand-written `Debug` below instead of a derive.
pub enum CommandKind {
  RegisterTrigger(Trigger),
  UnregisterTrigger(String),
  AddChannel(ChannelInfo),
  RemoveChannel(ChannelKey),
  SessionRotationOngoing { session_name: String, chunk_id: Option<u64> },
  SessionRotationCompleted { session_name: String, chunk_id: Option<u64>, archive_path: Option<String> },
  AddApplication { domain: Domain, pipe: pipe::Receiver },
  RemoveApplication { domain: Domain, fd: RawFd },
  GetTokens,
  ListTriggers,
  Quit,
}

impl std::fmt::Debug for CommandKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CommandKind::RegisterTrigger(t) => f.debug_tuple("RegisterTrigger").field(t).finish(),
      CommandKind::UnregisterTrigger(n) => f.debug_tuple("UnregisterTrigger").field(n).finish(),
      CommandKind::AddChannel(c) => f.debug_tuple("AddChannel").field(c).finish(),
      CommandKind::RemoveChannel(k) => f.debug_tuple("RemoveChannel").field(k).finish(),
      CommandKind::SessionRotationOngoing { session_name, chunk_id } => f
        .debug_struct("SessionRotationOngoing")
        .field("session_name", session_name)
        .field("chunk_id", chunk_id)
        .finish(),
      CommandKind::SessionRotationCompleted { session_name, chunk_id, archive_path } => f
        .debug_struct("SessionRotationCompleted")
        .field("session_name", session_name)
        .field("chunk_id", chunk_id)
        .field("archive_path", archive_path)
        .finish(),
      CommandKind::AddApplication { domain, .. } => {
        f.debug_struct("AddApplication").field("domain", domain).finish()
      }
      CommandKind::RemoveApplication { domain, fd } => {
        f.debug_struct("RemoveApplication").field("domain", domain).field("fd", fd).finish()
      }
      CommandKind::GetTokens => write!(f, "GetTokens"),
      CommandKind::ListTriggers => write!(f, "ListTriggers"),
      CommandKind::Quit => write!(f, "Quit"),
    }
  }
}

/// The reply payload a `submit`-ted command's waiter observes.
#[derive(Debug, Clone)]
pub enum CommandReply {
  Code(CommandReplyCode),
  Tokens(Vec<u64>),
  Triggers(Vec<Trigger>),
}

struct Waiter {
  reply: Mutex<Option<CommandReply>>,
  condvar: Condvar,
}

struct QueuedCommand {
  kind: CommandKind,
  waiter: Option<Arc<Waiter>>,
}

struct Inner {
  queue: Mutex<VecDeque<QueuedCommand>>,
}

/// `enqueue` appends and writes a single byte to the wake pipe; `submit`
/// additionally blocks the caller on a condvar-backed waiter until the
/// notification thread posts a reply (spec.md §4.4). Cloning shares the
/// same underlying queue and the same wake-pipe sender: only one sending
/// fd is needed to wake the poller from any number of caller threads.
#[derive(Clone)]
pub struct CommandQueue {
  inner: Arc<Inner>,
  wake_writer: Arc<Mutex<pipe::Sender>>,
}

pub struct CommandQueueHandle {
  inner: Arc<Inner>,
  pub wake_receiver: pipe::Receiver,
}

impl CommandQueue {
  /// Builds a paired `(CommandQueue, CommandQueueHandle)`: the former is
  /// cloned across caller threads, the latter is owned by the
  /// notification thread's event loop and registered with its `Poll`.
  pub fn new() -> std::io::Result<(Self, CommandQueueHandle)> {
    let (sender, receiver) = pipe::new()?;
    let inner = Arc::new(Inner { queue: Mutex::new(VecDeque::new()) });
    Ok((
      CommandQueue { inner: Arc::clone(&inner), wake_writer: Arc::new(Mutex::new(sender)) },
      CommandQueueHandle { inner, wake_receiver: receiver },
    ))
  }

  fn push(&self, kind: CommandKind, waiter: Option<Arc<Waiter>>) {
    self.inner.queue.lock().unwrap().push_back(QueuedCommand { kind, waiter });
    // A full pipe (extremely unlikely for single-byte wakeups) means the
    // reader is already behind and will drain on its next wakeup anyway.
    let _ = self.wake_writer.lock().unwrap().write(&[1]);
  }

  pub fn enqueue(&self, kind: CommandKind) {
    self.push(kind, None);
  }

  /// Enqueues `kind` and blocks until the notification thread posts a
  /// reply.
  pub fn submit(&self, kind: CommandKind) -> CommandReply {
    let waiter = Arc::new(Waiter { reply: Mutex::new(None), condvar: Condvar::new() });
    self.push(kind, Some(Arc::clone(&waiter)));
    let mut guard = waiter.reply.lock().unwrap();
    while guard.is_none() {
      guard = waiter.condvar.wait(guard).unwrap();
    }
    guard.take().unwrap()
  }
}

impl CommandQueueHandle {
  /// Drains every queued command, invoking `handle` for each and posting
  /// its reply to any waiter (spec.md §4.4). Returns `true` if a `Quit`
  /// command was drained.
  pub fn drain(&self, mut handle: impl FnMut(CommandKind) -> CommandReply) -> bool {
    let mut saw_quit = false;
    loop {
      let next = self.inner.queue.lock().unwrap().pop_front();
      let Some(cmd) = next else { break };
      let is_quit = matches!(cmd.kind, CommandKind::Quit);
      let reply = handle(cmd.kind);
      if let Some(waiter) = cmd.waiter {
        *waiter.reply.lock().unwrap() = Some(reply);
        waiter.condvar.notify_one();
      }
      saw_quit |= is_quit;
    }
    saw_quit
  }
}

pub fn reply_ok_on(result: EngineResult<()>) -> CommandReply {
  match result {
    Ok(()) => CommandReply::Code(CommandReplyCode::Ok),
    Err(e) => CommandReply::Code(CommandReplyCode::from(&e)),
  }
}
