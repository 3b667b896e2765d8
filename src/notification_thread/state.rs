//! Notification-thread state: the five-plus index tables of spec.md §4.3,
//! plus the `session_triggers` index this crate's expanded spec adds
//! (grounded on `notification-thread.h`'s `session_triggers_ht`).
//!
//! Grounded on `original_source/src/bin/lttng-sessiond/notification-thread.h`
//! and `notification-thread-events.c` for the table shapes and the per-event
//! update recipe; `DashMap` stands in for the source's RCU hash tables per
//! spec.md §9 design note (a).

use std::{
  collections::hash_map::DefaultHasher,
  hash::{Hash, Hasher},
};

use dashmap::DashMap;
use log::{info, warn};

use crate::{
  capture_payload::{decode_capture_payload, EventFieldValue, RawValue},
  domain::Domain,
  error::{EngineError, EngineResult},
  notification_thread::{
    channel::{ChannelInfo, ChannelKey, ChannelSample, ChannelTriggerList},
    client::{Client, ClientId, ClientList},
  },
  object_model::{
    condition::Condition,
    evaluation::Evaluation,
    trigger::{Trigger, TriggerIdAllocator},
  },
};

/// `hash(condition)`, the key used by `triggers` and
/// `notification_trigger_clients` (spec.md §4.3).
pub fn condition_hash(condition: &Condition) -> u64 {
  let mut hasher = DefaultHasher::new();
  condition.hash(&mut hasher);
  hasher.finish()
}

pub struct NotificationThreadState {
  pub clients: DashMap<u64, Client>,
  client_ids_by_fd: DashMap<i32, u64>,
  pub channels: DashMap<ChannelKey, ChannelInfo>,
  pub channel_triggers: DashMap<ChannelKey, ChannelTriggerList>,
  pub channel_state: DashMap<ChannelKey, ChannelSample>,
  pub notification_trigger_clients: DashMap<u64, ClientList>,
  pub triggers: DashMap<u64, Trigger>,
  triggers_by_name: DashMap<String, u64>,
  trigger_tokens: DashMap<u64, u64>,
  /// Supplement over spec.md §4.3: back-references from a session name to
  /// every trigger whose condition applies to that session
  /// (`SessionConsumedSize`, `SessionRotation`), mirroring how
  /// `channel_triggers` tracks per-channel back-references.
  pub session_triggers: DashMap<String, Vec<u64>>,
  ids: TriggerIdAllocator,
  next_client_id: u64,
}

impl Default for NotificationThreadState {
  fn default() -> Self {
    Self::new()
  }
}

impl NotificationThreadState {
  pub fn new() -> Self {
    Self {
      clients: DashMap::new(),
      client_ids_by_fd: DashMap::new(),
      channels: DashMap::new(),
      channel_triggers: DashMap::new(),
      channel_state: DashMap::new(),
      notification_trigger_clients: DashMap::new(),
      triggers: DashMap::new(),
      triggers_by_name: DashMap::new(),
      trigger_tokens: DashMap::new(),
      session_triggers: DashMap::new(),
      ids: TriggerIdAllocator::new(),
      next_client_id: 0,
    }
  }

  // -- Client connection / disconnection (events 8, 10) -----------------

  pub fn client_connect(&mut self, client: Client) -> ClientId {
    let id = client.id;
    self.client_ids_by_fd.insert(client.fd, id.0);
    self.clients.insert(id.0, client);
    id
  }

  /// Removes the client from both indexes and from every `ClientList`
  /// that references it (spec.md §4.3 event 10).
  pub fn client_disconnect(&mut self, id: ClientId) {
    if let Some((_, client)) = self.clients.remove(&id.0) {
      self.client_ids_by_fd.remove(&client.fd);
    }
    for mut entry in self.notification_trigger_clients.iter_mut() {
      entry.remove(id);
    }
  }

  pub fn client_by_fd(&self, fd: i32) -> Option<u64> {
    self.client_ids_by_fd.get(&fd).map(|v| *v)
  }

  // -- Channel lifecycle (events 1, 2) -----------------------------------

  /// Attaches every trigger whose condition applies to this channel
  /// (spec.md §4.3 event 1).
  pub fn add_channel(&mut self, info: ChannelInfo) {
    let key = info.key;
    let mut list = ChannelTriggerList::new();
    for entry in self.triggers.iter() {
      if entry.condition.applies_to_channel(&info.session_name, &info.channel_name, key.domain) {
        list.trigger_hashes.push(*entry.key());
      }
    }
    self.channels.insert(key, info);
    self.channel_triggers.insert(key, list);
  }

  /// Asserts the channel is present, frees its trigger-list entries and
  /// stored sample (spec.md §4.3 event 2).
  pub fn remove_channel(&mut self, key: ChannelKey) -> EngineResult<()> {
    self
      .channels
      .remove(&key)
      .ok_or_else(|| EngineError::Fatal("remove_channel: channel not present".into()))?;
    self.channel_triggers.remove(&key);
    self.channel_state.remove(&key);
    Ok(())
  }

  // -- Trigger registration (events 3, 4) --------------------------------

  /// Returns `AlreadyExists` if an equivalent condition is already
  /// registered; otherwise inserts the trigger, builds a fresh
  /// `ClientList` by scanning connected clients, attaches it to every
  /// matching channel and session, and allocates a token if needed
  /// (spec.md §4.3 event 3).
  pub fn register_trigger(&mut self, mut trigger: Trigger) -> EngineResult<Trigger> {
    let hash = condition_hash(&trigger.condition);
    if self.triggers.contains_key(&hash) {
      return Err(EngineError::AlreadyExists("equivalent condition already registered".into()));
    }
    if trigger.name.is_empty() {
      trigger.name = self.ids.generate_name();
    }
    if trigger.needs_token() {
      trigger.key = Some(self.ids.allocate_token());
    }

    let mut list = ClientList::new();
    for client in self.clients.iter() {
      if client.is_subscribed(&trigger.condition) {
        list.add(client.id);
      }
    }
    self.notification_trigger_clients.insert(hash, list);

    for mut entry in self.channel_triggers.iter_mut() {
      let key = *entry.key();
      let applies = self
        .channels
        .get(&key)
        .map(|c| trigger.condition.applies_to_channel(&c.session_name, &c.channel_name, key.domain))
        .unwrap_or(false);
      if applies {
        entry.trigger_hashes.push(hash);
      }
    }

    if let Some(session_name) = applicable_session(&trigger.condition) {
      self.session_triggers.entry(session_name).or_default().push(hash);
    }

    self.triggers_by_name.insert(trigger.name.clone(), hash);
    if let Some(token) = trigger.key {
      self.trigger_tokens.insert(token, hash);
    }
    self.triggers.insert(hash, trigger.clone());
    info!("registered trigger {}", trigger.name);
    Ok(trigger)
  }

  /// Reverses registration: visits `channel_triggers` (and
  /// `session_triggers`) to remove every back-reference before dropping
  /// the trigger (spec.md §4.3 event 4).
  pub fn unregister_trigger(&mut self, name: &str) -> EngineResult<Trigger> {
    let hash = self
      .triggers_by_name
      .remove(name)
      .map(|(_, h)| h)
      .ok_or_else(|| EngineError::NotFound(format!("no trigger named {name}")))?;
    let (_, trigger) = self
      .triggers
      .remove(&hash)
      .ok_or_else(|| EngineError::Fatal("triggers_by_name pointed at a missing trigger".into()))?;

    for mut entry in self.channel_triggers.iter_mut() {
      entry.remove(hash);
    }
    for mut entry in self.session_triggers.iter_mut() {
      entry.retain(|h| *h != hash);
    }
    self.notification_trigger_clients.remove(&hash);
    if let Some(token) = trigger.key {
      self.trigger_tokens.remove(&token);
    }
    Ok(trigger)
  }

  pub fn list_triggers(&self) -> Vec<Trigger> {
    self.triggers.iter().map(|e| e.value().clone()).collect()
  }

  /// Returns a snapshot of the currently allocated event-rule tokens
  /// (spec.md §4.3 event 11; the caller owns the snapshot, no lock to hold
  /// past this call in this implementation since `DashMap` iteration
  /// already takes its own shard locks).
  pub fn get_tokens(&self) -> Vec<u64> {
    self.trigger_tokens.iter().map(|e| *e.key()).collect()
  }

  pub fn trigger_by_token(&self, token: u64) -> Option<Trigger> {
    let hash = *self.trigger_tokens.get(&token)?;
    self.triggers.get(&hash).map(|e| e.value().clone())
  }

  // -- Subscribe / unsubscribe (client protocol, spec.md §4.4) -----------

  pub fn subscribe(&mut self, client_id: ClientId, condition: Condition) -> EngineResult<()> {
    let mut client =
      self.clients.get_mut(&client_id.0).ok_or_else(|| EngineError::Fatal("unknown client".into()))?;
    if !client.subscribe(condition.clone()) {
      return Err(EngineError::AlreadySubscribed);
    }
    drop(client);
    let hash = condition_hash(&condition);
    self.notification_trigger_clients.entry(hash).or_default().add(client_id);
    Ok(())
  }

  pub fn unsubscribe(&mut self, client_id: ClientId, condition: &Condition) -> EngineResult<()> {
    let mut client =
      self.clients.get_mut(&client_id.0).ok_or_else(|| EngineError::Fatal("unknown client".into()))?;
    if !client.unsubscribe(condition) {
      return Err(EngineError::UnknownCondition);
    }
    drop(client);
    let hash = condition_hash(condition);
    if let Some(mut list) = self.notification_trigger_clients.get_mut(&hash) {
      list.remove(client_id);
    }
    Ok(())
  }

  // -- Session-rotation commands (events 5, 6) ---------------------------

  /// Clients whose subscription matches `condition` exactly, the target
  /// set for a session-rotation dispatch (spec.md §4.3 events 5, 6). The
  /// caller pairs this with `evaluation` to build the `Notification`.
  pub fn clients_for_condition(&self, condition: &Condition) -> Vec<ClientId> {
    let hash = condition_hash(condition);
    self.notification_trigger_clients.get(&hash).map(|l| l.client_ids.clone()).unwrap_or_default()
  }

  // -- Channel-sample ingestion (event 7, delegated evaluation) ----------

  /// Drains one channel sample: looks up `channels`, updates
  /// `channel_state`, and for every attached trigger whose `ClientList` is
  /// non-empty, evaluates the edge-triggered condition and returns the
  /// notifications that must be dispatched (spec.md §4.5). A missing
  /// channel (remove-channel raced) silently drops the sample.
  pub fn process_channel_sample(
    &mut self,
    key: ChannelKey,
    sample: ChannelSample,
  ) -> Vec<(Vec<ClientId>, Condition, Evaluation)> {
    let Some(channel) = self.channels.get(&key) else {
      warn!("dropping channel sample for unknown channel {key:?}");
      return Vec::new();
    };
    let capacity = channel.capacity_bytes;
    drop(channel);

    let previous = self.channel_state.insert(key, sample);

    let Some(attached) = self.channel_triggers.get(&key) else {
      return Vec::new();
    };
    let hashes = attached.trigger_hashes.clone();
    drop(attached);

    let mut out = Vec::new();
    for hash in hashes {
      let Some(trigger) = self.triggers.get(&hash) else { continue };
      let condition = trigger.condition.clone();
      drop(trigger);

      let clients = match self.notification_trigger_clients.get(&hash) {
        Some(list) if !list.client_ids.is_empty() => list.client_ids.clone(),
        _ => continue,
      };

      let prev_eval = previous.and_then(|p| super::evaluation_engine::evaluate(&condition, p, capacity));
      let latest_eval = super::evaluation_engine::evaluate(&condition, sample, capacity);
      let prev_satisfied = prev_eval.is_some();
      let latest_satisfied = latest_eval.is_some();

      if latest_satisfied && prev_satisfied != latest_satisfied {
        if let Some(evaluation) = latest_eval {
          out.push((clients, condition, evaluation));
        }
      }
    }
    out
  }

  /// Resolves a tracer hit by token lookup (spec.md §4.3 "Applicability":
  /// "an `EventRuleHit` trigger ... is dispatched via token lookup upon a
  /// hit event"), decoding the capture payload when present and when the
  /// caller indicates the client has opted into decoding (spec.md §4.5).
  /// A missing token is silently dropped: the tracer may race an
  /// unregister.
  pub fn process_trigger_hit(
    &self,
    token: u64,
    capture_payload: Option<RawValue>,
    decode_for_client: bool,
  ) -> Option<(Vec<ClientId>, Condition, Evaluation)> {
    let trigger = self.trigger_by_token(token)?;
    let hash = condition_hash(&trigger.condition);
    let clients = self.notification_trigger_clients.get(&hash)?.client_ids.clone();
    if clients.is_empty() {
      return None;
    }

    let Condition::EventRuleHit { capture_descriptors, .. } = &trigger.condition else {
      return None;
    };

    let captured_values = match (capture_payload, decode_for_client) {
      (Some(raw), true) => decode_values(&raw, capture_descriptors.len()),
      _ => None,
    };

    let evaluation = Evaluation::EventRuleHit { trigger_name: trigger.name.clone(), captured_values };
    Some((clients, trigger.condition, evaluation))
  }

  pub fn channel_capacity(&self, key: ChannelKey) -> Option<u64> {
    self.channels.get(&key).map(|c| c.capacity_bytes)
  }

  pub fn allocate_client_id(&mut self) -> ClientId {
    let id = ClientId(self.next_client_id);
    self.next_client_id += 1;
    id
  }
}

/// Decodes a capture payload into the descriptor-indexed tree, dropping
/// (returning `None`) rather than forwarding raw bytes on a decode
/// failure: `Evaluation::EventRuleHit` only carries the typed tree, so a
/// client that declined decoding or hit a malformed payload simply gets
/// no captured values for that hit.
fn decode_values(raw: &RawValue, descriptor_count: usize) -> Option<Vec<EventFieldValue>> {
  decode_capture_payload(raw, descriptor_count).ok()
}

/// The session a non-channel condition applies to, if any (spec.md §4.3
/// "Applicability").
fn applicable_session(condition: &Condition) -> Option<String> {
  match condition {
    Condition::SessionConsumedSize { session_name, .. } => Some(session_name.clone()),
    Condition::SessionRotation { session_name, .. } => Some(session_name.clone()),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::object_model::{
    action::Action,
    condition::{BufferUsageVariant, Threshold},
  };

  fn sample_condition() -> Condition {
    Condition::buffer_usage(BufferUsageVariant::High, "s", "c", Domain::User, Threshold::Bytes(100))
      .unwrap()
  }

  #[test]
  fn register_trigger_rejects_equivalent_condition() {
    let mut state = NotificationThreadState::new();
    let t1 = Trigger::new(sample_condition(), Action::Notify, String::new()).unwrap();
    state.register_trigger(t1).unwrap();
    let t2 = Trigger::new(sample_condition(), Action::Notify, String::new()).unwrap();
    assert!(matches!(state.register_trigger(t2), Err(EngineError::AlreadyExists(_))));
  }

  #[test]
  fn register_then_unregister_leaves_indexes_empty() {
    let mut state = NotificationThreadState::new();
    let trigger = Trigger::new(sample_condition(), Action::Notify, "t0".into()).unwrap();
    state.register_trigger(trigger).unwrap();
    state.unregister_trigger("t0").unwrap();
    assert!(state.triggers.is_empty());
    assert!(state.notification_trigger_clients.is_empty());
  }

  #[test]
  fn add_channel_attaches_matching_triggers() {
    let mut state = NotificationThreadState::new();
    let trigger = Trigger::new(sample_condition(), Action::Notify, "t0".into()).unwrap();
    state.register_trigger(trigger).unwrap();

    let key = ChannelKey { channel_key: 1, domain: Domain::User };
    state.add_channel(ChannelInfo {
      key,
      session_name: "s".into(),
      channel_name: "c".into(),
      capacity_bytes: 1000,
    });
    let list = state.channel_triggers.get(&key).unwrap();
    assert_eq!(list.trigger_hashes.len(), 1);
  }

  #[test]
  fn unrelated_conditions_do_not_cross_notify() {
    let mut state = NotificationThreadState::new();
    let a = sample_condition();
    let b = Condition::session_consumed_size("other", 10).unwrap();
    assert_ne!(condition_hash(&a), condition_hash(&b));
  }

  #[test]
  fn trigger_hit_resolves_by_token_and_decodes_payload() {
    use crate::{
      capture_payload::RawValue,
      object_model::{capture_descriptor::CaptureExpr, event_rule::{EventRule, EventRuleKind}},
    };

    let mut state = NotificationThreadState::new();
    let rule = EventRule::new(EventRuleKind::Tracepoint {
      domain: Domain::User,
      pattern: "app:event".into(),
      filter: None,
      loglevel_spec: None,
      exclusions: Vec::new(),
    })
    .unwrap();
    let condition = Condition::event_rule_hit(rule, vec![CaptureExpr::EventPayloadField("field".into())]);
    let trigger = Trigger::new(condition, Action::Notify, "hit".into()).unwrap();
    let registered = state.register_trigger(trigger).unwrap();
    let token = registered.key.expect("event-rule-hit trigger must get a token");

    // No subscribed clients yet: the hit resolves to an empty list and is
    // skipped by the caller (matches "if that list is empty skip the
    // evaluation entirely", spec.md §4.3 applied uniformly to hits).
    assert!(state.process_trigger_hit(token, None, false).is_none());

    let (_fake_sender, fake_receiver) = std::os::unix::net::UnixStream::pair().unwrap();
    let stream = mio::net::UnixStream::from_std(fake_receiver);
    let client_id = state.allocate_client_id();
    let mut client = Client::new(client_id, 99, stream, 0, 0);
    client.subscribe(registered.condition.clone());
    state.client_connect(client);
    state.notification_trigger_clients.entry(condition_hash(&registered.condition)).or_default().add(client_id);

    let payload = RawValue::Array(vec![RawValue::Unsigned(42)]);
    let (clients, _condition, evaluation) =
      state.process_trigger_hit(token, Some(payload), true).unwrap();
    assert_eq!(clients, vec![client_id]);
    match evaluation {
      Evaluation::EventRuleHit { captured_values, .. } => {
        assert_eq!(captured_values, Some(vec![crate::capture_payload::EventFieldValue::Unsigned(42)]));
      }
      _ => panic!("expected EventRuleHit evaluation"),
    }
  }
}
