//! The notification thread's `mio`-based event loop (spec.md §4.3).
//!
//! Grounded on `original_source/src/bin/lttng-sessiond/notification-thread.c`'s
//! `thread_notification` poll loop (quit pipe, command queue, listening
//! socket, per-client sockets, per-tracer channel pipes, trigger-hit pipe)
//! and on the teacher's `mio_08`/`Token`-keyed registration style in
//! `src/dds/statusevents.rs`, collapsed here onto the crate's single
//! `mio` 0.8 dependency.

use std::{
  io::ErrorKind,
  os::unix::io::AsRawFd,
};

use log::{info, warn};
use mio::{net::UnixListener, unix::pipe, Events, Interest, Poll, Token};

use crate::{
  client_protocol::{read_message, write_message, Message, ProtocolError},
  command_queue::{CommandKind, CommandQueueHandle, CommandReply},
  error::{CommandReplyCode, EngineError, StatusCode},
  notification_thread::{
    channel::ChannelSample,
    client::{Client, ClientId},
    state::NotificationThreadState,
  },
  object_model::{
    condition::{Condition, SessionRotationVariant},
    evaluation::{Evaluation, TraceArchiveLocation},
    notification::Notification,
    trigger::Trigger,
  },
};

const QUIT: Token = Token(0);
const COMMAND_QUEUE: Token = Token(1);
const LISTENER: Token = Token(2);
const CLIENT_TOKEN_BASE: usize = 16;

/// Collaborator hook the notification thread polls for raw channel
/// samples; implemented by the per-tracer-flavor pipe in a real daemon,
/// and by an in-memory fake in tests (spec.md §1 "channel-sample source"
/// external collaborator).
pub trait ChannelSampleSource {
  fn try_recv(&mut self) -> Option<(crate::notification_thread::channel::ChannelKey, ChannelSample)>;
}

/// Collaborator hook for the trigger-hit pipe: one tracer hit, its
/// routing token, and an optional raw capture payload (spec.md §4.3
/// "trigger-hit pipe"; §4.5 "Event-rule-hit evaluations").
pub trait TriggerHitSource {
  fn try_recv(&mut self) -> Option<(u64, Option<crate::capture_payload::RawValue>)>;
}

pub struct NotificationThread<S: ChannelSampleSource, H: TriggerHitSource> {
  poll: Poll,
  listener: UnixListener,
  quit_receiver: pipe::Receiver,
  command_queue: CommandQueueHandle,
  state: NotificationThreadState,
  samples: S,
  hits: H,
  next_client_token: usize,
  client_tokens: std::collections::HashMap<Token, i32>,
  /// Registered application event-trigger pipes, keyed by their `Poll`
  /// token; kept alive here so the registration survives past the
  /// `AddApplication` command handler that creates it (SPEC_FULL.md's
  /// Command queue supplement).
  app_pipes: std::collections::HashMap<Token, pipe::Receiver>,
  app_pipe_tokens: std::collections::HashMap<i32, Token>,
}

impl<S: ChannelSampleSource, H: TriggerHitSource> NotificationThread<S, H> {
  pub fn new(
    mut listener: UnixListener,
    mut quit_receiver: pipe::Receiver,
    mut command_queue: CommandQueueHandle,
    samples: S,
    hits: H,
  ) -> std::io::Result<Self> {
    let poll = Poll::new()?;
    poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;
    poll.registry().register(&mut quit_receiver, QUIT, Interest::READABLE)?;
    poll.registry().register(&mut command_queue.wake_receiver, COMMAND_QUEUE, Interest::READABLE)?;
    Ok(Self {
      poll,
      listener,
      quit_receiver,
      command_queue,
      state: NotificationThreadState::new(),
      samples,
      hits,
      next_client_token: CLIENT_TOKEN_BASE,
      client_tokens: std::collections::HashMap::new(),
      app_pipes: std::collections::HashMap::new(),
      app_pipe_tokens: std::collections::HashMap::new(),
    })
  }

  /// Runs until a `Quit` command or a byte on the quit pipe is observed
  /// (spec.md §4.3 event 13).
  pub fn run(&mut self) -> std::io::Result<()> {
    let mut events = Events::with_capacity(128);
    loop {
      self.poll.poll(&mut events, None)?;
      let mut quit = false;
      for event in events.iter() {
        match event.token() {
          QUIT => quit = true,
          COMMAND_QUEUE => self.drain_commands(&mut quit),
          LISTENER => self.accept_clients(),
          token => self.handle_client_event(token),
        }
      }
      self.drain_channel_samples();
      self.drain_trigger_hits();
      if quit {
        self.quit();
        return Ok(());
      }
    }
  }

  fn drain_commands(&mut self, quit: &mut bool) {
    let poll = &self.poll;
    let state = &mut self.state;
    let app_pipes = &mut self.app_pipes;
    let app_pipe_tokens = &mut self.app_pipe_tokens;
    let next_token = &mut self.next_client_token;
    let saw_quit = self.command_queue.drain(|cmd| match cmd {
      CommandKind::AddApplication { domain, mut pipe } => {
        let token = Token(*next_token);
        *next_token += 1;
        match poll.registry().register(&mut pipe, token, Interest::READABLE) {
          Ok(()) => {
            app_pipe_tokens.insert(pipe.as_raw_fd(), token);
            app_pipes.insert(token, pipe);
            info!("registered application pipe for domain {domain:?}");
            CommandReply::Code(CommandReplyCode::Ok)
          }
          Err(e) => {
            warn!("failed to register application pipe: {e}");
            CommandReply::Code(CommandReplyCode::from(&EngineError::Communication(e.to_string())))
          }
        }
      }
      CommandKind::RemoveApplication { domain, fd } => {
        if let Some(token) = app_pipe_tokens.remove(&fd) {
          if let Some(mut pipe) = app_pipes.remove(&token) {
            let _ = poll.registry().deregister(&mut pipe);
          }
          info!("removed application pipe for domain {domain:?}");
        }
        CommandReply::Code(CommandReplyCode::Ok)
      }
      other => handle_command(state, other),
    });
    *quit |= saw_quit;
  }

  fn accept_clients(&mut self) {
    loop {
      match self.listener.accept() {
        Ok((mut stream, _addr)) => {
          let fd = stream.as_raw_fd();
          let uid_gid = peer_credentials(fd);
          let id = self.state.allocate_client_id();
          let token = Token(self.next_client_token);
          self.next_client_token += 1;
          if let Err(e) = self.poll.registry().register(
            &mut stream,
            token,
            Interest::READABLE,
          ) {
            warn!("failed to register new client: {e}");
            continue;
          }
          self.client_tokens.insert(token, fd);
          let (uid, gid) = uid_gid.unwrap_or((0, 0));
          self.state.client_connect(Client::new(id, fd, stream, uid, gid));
        }
        Err(e) if e.kind() == ErrorKind::WouldBlock => break,
        Err(e) => {
          warn!("accept failed: {e}");
          break;
        }
      }
    }
  }

  fn handle_client_event(&mut self, token: Token) {
    let Some(&fd) = self.client_tokens.get(&token) else { return };
    let Some(client_id) = self.state.client_by_fd(fd) else { return };
    let client_id = ClientId(client_id);

    let result = {
      let mut client = match self.state.clients.get_mut(&client_id.0) {
        Some(c) => c,
        None => return,
      };
      read_message(&mut client.stream)
    };

    match result {
      Ok(Message::Subscribe(condition)) => {
        let status = match self.state.subscribe(client_id, condition) {
          Ok(()) => StatusCode::Ok,
          Err(e) => StatusCode::from(&e),
        };
        self.reply_to_client(client_id, status);
      }
      Ok(Message::Unsubscribe(condition)) => {
        let status = match self.state.unsubscribe(client_id, &condition) {
          Ok(()) => StatusCode::Ok,
          Err(e) => StatusCode::from(&e),
        };
        self.reply_to_client(client_id, status);
      }
      Ok(Message::CommandReply(_)) | Ok(Message::Notification(_)) => {
        // Clients never send these; ignore rather than disconnect, since
        // it's not the malformed-framing case spec.md singles out.
      }
      Err(ProtocolError::Closed) => self.disconnect_client(token, client_id),
      Err(e) => {
        warn!("protocol error from client {client_id:?}: {e}");
        self.disconnect_client(token, client_id);
      }
    }
  }

  fn reply_to_client(&mut self, client_id: ClientId, status: StatusCode) {
    if let Some(mut client) = self.state.clients.get_mut(&client_id.0) {
      if let Err(e) = write_message(&mut client.stream, &Message::CommandReply(status)) {
        warn!("failed to reply to client {client_id:?}: {e}");
      }
    }
  }

  fn disconnect_client(&mut self, token: Token, client_id: ClientId) {
    self.client_tokens.remove(&token);
    if let Some(mut client) = self.state.clients.get_mut(&client_id.0) {
      let _ = self.poll.registry().deregister(&mut client.stream);
    }
    self.state.client_disconnect(client_id);
  }

  /// Dispatches every pending channel sample's resulting notifications
  /// (spec.md §4.5). A per-client send failure is logged; it does not
  /// abort the dispatch loop, and does not implicitly disconnect the
  /// client unless its poll state independently reports `HUP`.
  fn drain_channel_samples(&mut self) {
    while let Some((key, sample)) = self.samples.try_recv() {
      let dispatch = self.state.process_channel_sample(key, sample);
      for (targets, condition, evaluation) in dispatch {
        let notification = crate::object_model::notification::Notification::new(condition, evaluation);
        for target in targets {
          if let Some(mut client) = self.state.clients.get_mut(&target.0) {
            if let Err(e) =
              write_message(&mut client.stream, &Message::Notification(notification.clone()))
            {
              warn!("dispatch to client {target:?} failed: {e}");
            }
          }
        }
      }
    }
  }

  /// Dispatches event-rule-hit evaluations resolved by token lookup
  /// (spec.md §4.3 "Applicability", §4.5 "Event-rule-hit evaluations").
  /// Every subscribed client currently opts into decoding; a future
  /// per-client decode preference would thread through here.
  fn drain_trigger_hits(&mut self) {
    while let Some((token, payload)) = self.hits.try_recv() {
      let Some((targets, condition, evaluation)) = self.state.process_trigger_hit(token, payload, true)
      else {
        continue;
      };
      let notification = crate::object_model::notification::Notification::new(condition, evaluation);
      for target in targets {
        if let Some(mut client) = self.state.clients.get_mut(&target.0) {
          if let Err(e) =
            write_message(&mut client.stream, &Message::Notification(notification.clone()))
          {
            warn!("dispatch to client {target:?} failed: {e}");
          }
        }
      }
    }
  }

  /// Closes every client and unregisters every trigger (spec.md §4.3
  /// event 13).
  fn quit(&mut self) {
    let client_ids: Vec<ClientId> = self.state.clients.iter().map(|e| ClientId(*e.key())).collect();
    for id in client_ids {
      self.state.client_disconnect(id);
    }
    let triggers: Vec<Trigger> = self.state.list_triggers();
    for trigger in triggers {
      let _ = self.state.unregister_trigger(&trigger.name);
    }
    info!("notification thread exiting");
  }
}

fn handle_command(state: &mut NotificationThreadState, cmd: CommandKind) -> CommandReply {
  match cmd {
    CommandKind::RegisterTrigger(trigger) => match state.register_trigger(trigger) {
      Ok(_) => CommandReply::Code(CommandReplyCode::Ok),
      Err(e) => CommandReply::Code(CommandReplyCode::from(&e)),
    },
    CommandKind::UnregisterTrigger(name) => match state.unregister_trigger(&name) {
      Ok(_) => CommandReply::Code(CommandReplyCode::Ok),
      Err(e) => CommandReply::Code(CommandReplyCode::from(&e)),
    },
    CommandKind::AddChannel(info) => {
      state.add_channel(info);
      CommandReply::Code(CommandReplyCode::Ok)
    }
    CommandKind::RemoveChannel(key) => match state.remove_channel(key) {
      Ok(()) => CommandReply::Code(CommandReplyCode::Ok),
      Err(e) => CommandReply::Code(CommandReplyCode::from(&e)),
    },
    CommandKind::SessionRotationOngoing { session_name, chunk_id } => {
      dispatch_session_rotation(state, SessionRotationVariant::Ongoing, session_name, chunk_id, None);
      CommandReply::Code(CommandReplyCode::Ok)
    }
    CommandKind::SessionRotationCompleted { session_name, chunk_id, archive_path } => {
      dispatch_session_rotation(
        state,
        SessionRotationVariant::Completed,
        session_name,
        chunk_id,
        archive_path,
      );
      CommandReply::Code(CommandReplyCode::Ok)
    }
    CommandKind::AddApplication { .. } | CommandKind::RemoveApplication { .. } => {
      unreachable!("pollset registration is handled in drain_commands before reaching here")
    }
    CommandKind::GetTokens => CommandReply::Tokens(state.get_tokens()),
    CommandKind::ListTriggers => CommandReply::Triggers(state.list_triggers()),
    CommandKind::Quit => CommandReply::Code(CommandReplyCode::Ok),
  }
}

/// Builds the `SessionRotation` evaluation for a rotation state transition
/// and dispatches it to every client subscribed to the matching condition
/// (spec.md §4.3 events 5, 6). A session with no matching
/// `SessionRotation` condition registered (so no client can be
/// subscribed) is a no-op, matching the "skip the evaluation entirely
/// when the client list is empty" discipline §4.5 applies elsewhere.
fn dispatch_session_rotation(
  state: &NotificationThreadState,
  variant: SessionRotationVariant,
  session_name: String,
  chunk_id: Option<u64>,
  archive_path: Option<String>,
) {
  let Ok(condition) = Condition::session_rotation(variant, session_name) else {
    return;
  };
  let targets = state.clients_for_condition(&condition);
  if targets.is_empty() {
    return;
  }
  let location = archive_path.map(|absolute_path| TraceArchiveLocation::Local { absolute_path });
  let evaluation = Evaluation::SessionRotation { id: chunk_id.unwrap_or(0), location };
  let notification = Notification::new(condition, evaluation);
  for target in targets {
    if let Some(mut client) = state.clients.get_mut(&target.0) {
      if let Err(e) = write_message(&mut client.stream, &Message::Notification(notification.clone())) {
        warn!("dispatch to client {target:?} failed: {e}");
      }
    }
  }
}

#[cfg(unix)]
fn peer_credentials(fd: i32) -> Option<(u32, u32)> {
  use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};
  use std::os::unix::io::BorrowedFd;
  let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
  getsockopt(&borrowed, PeerCredentials).ok().map(|c| (c.uid(), c.gid()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{notification_thread::channel::ChannelKey, object_model::condition::Condition};
  use std::collections::VecDeque;

  struct FakeSampleSource(VecDeque<(ChannelKey, ChannelSample)>);

  impl ChannelSampleSource for FakeSampleSource {
    fn try_recv(&mut self) -> Option<(ChannelKey, ChannelSample)> {
      self.0.pop_front()
    }
  }

  #[test]
  fn handle_command_register_then_list() {
    use crate::{domain::Domain, object_model::{action::Action, condition::{BufferUsageVariant, Threshold}}};
    let mut state = NotificationThreadState::new();
    let condition =
      Condition::buffer_usage(BufferUsageVariant::High, "s", "c", Domain::User, Threshold::Bytes(1))
        .unwrap();
    let trigger = Trigger::new(condition, Action::Notify, "t".into()).unwrap();
    let reply = handle_command(&mut state, CommandKind::RegisterTrigger(trigger));
    assert!(matches!(reply, CommandReply::Code(CommandReplyCode::Ok)));
    let reply = handle_command(&mut state, CommandKind::ListTriggers);
    match reply {
      CommandReply::Triggers(triggers) => assert_eq!(triggers.len(), 1),
      _ => panic!("expected Triggers reply"),
    }
  }

  #[test]
  fn session_rotation_completed_dispatches_to_subscribed_client() {
    use crate::object_model::condition::SessionRotationVariant;
    use std::os::unix::io::AsRawFd;

    let mut state = NotificationThreadState::new();
    let (ours, theirs) = std::os::unix::net::UnixStream::pair().unwrap();
    let stream = mio::net::UnixStream::from_std(theirs);
    let fd = stream.as_raw_fd();
    let id = state.allocate_client_id();
    state.client_connect(Client::new(id, fd, stream, 1000, 1000));

    let condition =
      Condition::session_rotation(SessionRotationVariant::Completed, "sess").unwrap();
    state.subscribe(id, condition).unwrap();

    let reply = handle_command(
      &mut state,
      CommandKind::SessionRotationCompleted {
        session_name: "sess".into(),
        chunk_id: Some(7),
        archive_path: Some("/archive/sess-7".into()),
      },
    );
    assert!(matches!(reply, CommandReply::Code(CommandReplyCode::Ok)));

    let mut ours = ours;
    match read_message(&mut ours).unwrap() {
      Message::Notification(n) => match n.evaluation {
        Evaluation::SessionRotation { id, location: Some(TraceArchiveLocation::Local { absolute_path }) } => {
          assert_eq!(id, 7);
          assert_eq!(absolute_path, "/archive/sess-7");
        }
        other => panic!("unexpected evaluation: {other:?}"),
      },
      other => panic!("expected a Notification, got {other:?}"),
    }
  }

  #[test]
  fn session_rotation_with_no_subscriber_is_a_no_op() {
    use crate::object_model::condition::SessionRotationVariant;

    let mut state = NotificationThreadState::new();
    let reply = handle_command(
      &mut state,
      CommandKind::SessionRotationOngoing { session_name: "sess".into(), chunk_id: None },
    );
    assert!(matches!(reply, CommandReply::Code(CommandReplyCode::Ok)));
    // Nothing registered to assert against beyond "did not panic" — there
    // is no subscribed client, so dispatch_session_rotation's empty-target
    // early return is what's under test here.
    let _ = SessionRotationVariant::Ongoing;
  }

  #[test]
  fn fake_sample_source_drains_in_order() {
    let key = ChannelKey { channel_key: 1, domain: crate::domain::Domain::User };
    let sample = ChannelSample { highest_usage: 10, lowest_usage: 0 };
    let mut source = FakeSampleSource(VecDeque::from([(key, sample)]));
    assert!(source.try_recv().is_some());
    assert!(source.try_recv().is_none());
  }
}
