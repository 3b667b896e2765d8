//! Tagged hierarchies for `Condition`, `EventRule`, `Action`, `Trigger`,
//! `Evaluation`, and `Notification`, with their length-prefixed binary
//! codec (spec.md §4.1, C1).

pub mod action;
pub mod capture_bytecode;
pub mod capture_descriptor;
pub mod condition;
pub mod event_rule;
pub mod evaluation;
pub mod notification;
pub mod trigger;

pub use action::Action;
pub use condition::Condition;
pub use event_rule::{EventRule, EventRuleKind};
pub use evaluation::Evaluation;
pub use notification::Notification;
pub use trigger::Trigger;
