//! `Trigger`: a `(condition, action)` pair with a generated or
//! client-supplied name and an optional tracer-identification token
//! (spec.md §3).

use crate::{
  error::EngineResult,
  object_model::{action::Action, condition::Condition},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
  pub condition: Condition,
  pub action: Action,
  pub name: String,
  /// Non-zero `u64` token used to route tracer hits back to this trigger.
  /// Only assigned when `condition` is an `EventRuleHit` (spec.md §3).
  pub key: Option<u64>,
}

impl Trigger {
  /// Rejects a `Group` action that nests another `Group` (spec.md §3).
  pub fn new(condition: Condition, action: Action, name: String) -> EngineResult<Self> {
    action.validate()?;
    Ok(Self { condition, action, name, key: None })
  }

  pub fn is_notify(&self) -> bool {
    action_is_notify(&self.action)
  }

  pub fn needs_token(&self) -> bool {
    matches!(self.condition, Condition::EventRuleHit { .. })
  }
}

/// `Notify` alone or nested inside a (non-nestable) `Group` counts as a
/// notify-emitting trigger for the purposes of the
/// `notification_trigger_clients` index (spec.md §4.3 event 3).
fn action_is_notify(action: &Action) -> bool {
  match action {
    Action::Notify => true,
    Action::Group(actions) => actions.iter().any(action_is_notify),
    _ => false,
  }
}

/// Monotonic name/token allocation, owned by the notification thread
/// state (spec.md §3: "names are unique across the registry"; §9 open
/// question: tokens are monotonic and never reused within a process).
#[derive(Debug, Default)]
pub struct TriggerIdAllocator {
  next_name_offset: u64,
  next_token: u64,
}

impl TriggerIdAllocator {
  pub fn new() -> Self {
    Self { next_name_offset: 0, next_token: 0 }
  }

  pub fn generate_name(&mut self) -> String {
    let offset = self.next_name_offset;
    self.next_name_offset += 1;
    format!("trigger_{offset}")
  }

  /// Tokens are non-zero and never reused.
  pub fn allocate_token(&mut self) -> u64 {
    self.next_token += 1;
    self.next_token
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn generated_names_are_monotonic_and_unique() {
    let mut alloc = TriggerIdAllocator::new();
    let a = alloc.generate_name();
    let b = alloc.generate_name();
    assert_ne!(a, b);
    assert_eq!(a, "trigger_0");
    assert_eq!(b, "trigger_1");
  }

  #[test]
  fn tokens_are_nonzero_and_monotonic() {
    let mut alloc = TriggerIdAllocator::new();
    let t1 = alloc.allocate_token();
    let t2 = alloc.allocate_token();
    assert_ne!(t1, 0);
    assert!(t2 > t1);
  }

  #[test]
  fn notify_nested_in_group_counts() {
    let action = Action::Group(vec![Action::StartSession { name: "s".into() }, Action::Notify]);
    let trigger =
      Trigger::new(Condition::session_consumed_size("s", 10).unwrap(), action, "t".into()).unwrap();
    assert!(trigger.is_notify());
  }

  #[test]
  fn nested_group_action_rejected_at_construction() {
    let action = Action::Group(vec![Action::Group(vec![Action::Notify])]);
    let result = Trigger::new(Condition::session_consumed_size("s", 10).unwrap(), action, "t".into());
    assert!(result.is_err());
  }
}
