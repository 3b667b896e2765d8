use serde_repr::{Deserialize_repr, Serialize_repr};

/// Tracing domain an event rule or channel belongs to (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Domain {
  Kernel = 0,
  User = 1,
  Jul = 2,
  Log4j = 3,
  Python = 4,
}

impl Domain {
  pub fn from_tag(tag: u8) -> Option<Self> {
    match tag {
      0 => Some(Domain::Kernel),
      1 => Some(Domain::User),
      2 => Some(Domain::Jul),
      3 => Some(Domain::Log4j),
      4 => Some(Domain::Python),
      _ => None,
    }
  }

  pub fn tag(self) -> u8 {
    self as u8
  }

  /// Agent domains get loglevel-predicate rewriting (spec.md §3 EventRule
  /// invariant: "loglevel range is permitted only for tracepoints in agent
  /// or user domains").
  pub fn is_agent(self) -> bool {
    matches!(self, Domain::Jul | Domain::Log4j | Domain::Python)
  }
}
