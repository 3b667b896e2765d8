//! Client bookkeeping for the notification thread (spec.md §3 "Client").

use std::os::unix::io::RawFd;

use mio::net::UnixStream;

use crate::object_model::Condition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

/// A connected subscriber: its socket plus the peer credentials captured
/// at accept time (spec.md §6 "peer credentials are read once, at
/// accept, and never re-validated").
pub struct Client {
  pub id: ClientId,
  pub fd: RawFd,
  pub stream: UnixStream,
  pub uid: u32,
  pub gid: u32,
  pub subscribed: Vec<Condition>,
}

impl Client {
  pub fn new(id: ClientId, fd: RawFd, stream: UnixStream, uid: u32, gid: u32) -> Self {
    Self { id, fd, stream, uid, gid, subscribed: Vec::new() }
  }

  pub fn subscribe(&mut self, condition: Condition) -> bool {
    if self.subscribed.contains(&condition) {
      return false;
    }
    self.subscribed.push(condition);
    true
  }

  pub fn unsubscribe(&mut self, condition: &Condition) -> bool {
    let before = self.subscribed.len();
    self.subscribed.retain(|c| c != condition);
    self.subscribed.len() != before
  }

  pub fn is_subscribed(&self, condition: &Condition) -> bool {
    self.subscribed.contains(condition)
  }
}

impl std::fmt::Debug for Client {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Client")
      .field("id", &self.id)
      .field("fd", &self.fd)
      .field("uid", &self.uid)
      .field("gid", &self.gid)
      .field("subscribed", &self.subscribed.len())
      .finish()
  }
}

/// Clients currently subscribed to a given condition, indexed by the
/// condition's hash (spec.md §4.3 "notification_trigger_clients").
#[derive(Debug, Clone, Default)]
pub struct ClientList {
  pub client_ids: Vec<ClientId>,
}

impl ClientList {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&mut self, id: ClientId) {
    if !self.client_ids.contains(&id) {
      self.client_ids.push(id);
    }
  }

  pub fn remove(&mut self, id: ClientId) {
    self.client_ids.retain(|c| *c != id);
  }
}
