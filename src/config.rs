//! `EngineConfig`: constructed programmatically by the embedding daemon
//! (spec.md §1 "session/channel CRUD and CLI parsing" are out of scope).
//! The harness binary under `src/bin/` is the only place CLI parsing
//! happens, via `clap`.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct EngineConfig {
  pub socket_path: PathBuf,
  /// Unix permission bits applied to the listening socket after bind.
  pub socket_mode: u32,
  /// Number of per-tracer channel-monitor pipes to multiplex (one per
  /// tracer flavor, spec.md §4.3).
  pub channel_monitor_pipe_count: usize,
  /// Hint used to pre-size index tables; purely a performance knob.
  pub expected_channel_capacity: usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      socket_path: PathBuf::from("/var/run/tracenotify/client.sock"),
      socket_mode: 0o660,
      channel_monitor_pipe_count: 1,
      expected_channel_capacity: 64,
    }
  }
}

impl EngineConfig {
  pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.socket_path = path.into();
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_socket_mode_is_group_readable_writable() {
    assert_eq!(EngineConfig::default().socket_mode, 0o660);
  }

  #[test]
  fn with_socket_path_overrides_default() {
    let cfg = EngineConfig::default().with_socket_path("/tmp/custom.sock");
    assert_eq!(cfg.socket_path, PathBuf::from("/tmp/custom.sock"));
  }
}
