//! Per-channel state owned by the notification thread (spec.md §3).

use crate::domain::Domain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelKey {
  pub channel_key: u64,
  pub domain: Domain,
}

#[derive(Debug, Clone)]
pub struct ChannelInfo {
  pub key: ChannelKey,
  pub session_name: String,
  pub channel_name: String,
  pub capacity_bytes: u64,
}

/// Back-references into `triggers`, keyed by each trigger's condition
/// hash, rather than owning pointers (spec.md §9: indices replace the
/// source's weak-pointer discipline).
#[derive(Debug, Clone, Default)]
pub struct ChannelTriggerList {
  pub trigger_hashes: Vec<u64>,
}

impl ChannelTriggerList {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn remove(&mut self, trigger_hash: u64) {
    self.trigger_hashes.retain(|h| *h != trigger_hash);
  }
}

/// Last sample observed on a channel, kept to implement edge-triggered
/// conditions (spec.md §3 "ChannelSample").
#[derive(Debug, Clone, Copy)]
pub struct ChannelSample {
  pub highest_usage: u64,
  pub lowest_usage: u64,
}
