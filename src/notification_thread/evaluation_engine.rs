//! Pure edge-triggered buffer-usage evaluation (C6, spec.md §4.5).
//!
//! Grounded on `original_source/src/common/buffer-usage.c` and
//! `notification-thread-events.c`'s `evaluate_buffer_usage_condition`: a
//! `Low` condition is satisfied when `highest_usage <= threshold`, a
//! `High` condition when `highest_usage >= threshold`; ratio thresholds
//! are resolved to bytes against the channel's capacity before
//! comparison, in `u64` space. A ratio of 0.0 is a degenerate threshold
//! that the byte comparison alone gets wrong in one direction (spec.md
//! §4.5): it must always satisfy `Low` and never satisfy `High`,
//! regardless of the sample, so it is special-cased ahead of the byte
//! comparison rather than folded into `threshold_bytes`.

use crate::{
  notification_thread::channel::ChannelSample,
  object_model::{
    condition::{BufferUsageVariant, Condition, Threshold},
    evaluation::Evaluation,
  },
};

fn threshold_bytes(threshold: Threshold, capacity: u64) -> u64 {
  match threshold {
    Threshold::Bytes(b) => b,
    Threshold::Ratio(r) => ((r * capacity as f64).round() as u64).min(capacity),
  }
}

/// Returns `Some(evaluation)` iff `condition` is satisfied by `sample`
/// against `capacity`. Only meaningful for `BufferUsage` conditions; other
/// condition kinds are not sample-driven and always return `None` here.
pub fn evaluate(condition: &Condition, sample: ChannelSample, capacity: u64) -> Option<Evaluation> {
  let Condition::BufferUsage { variant, threshold, .. } = condition else {
    return None;
  };
  let satisfied = match (variant, threshold) {
    (BufferUsageVariant::Low, Threshold::Ratio(r)) if *r == 0.0 => true,
    (BufferUsageVariant::High, Threshold::Ratio(r)) if *r == 0.0 => false,
    _ => {
      let threshold_bytes = threshold_bytes(*threshold, capacity);
      match variant {
        BufferUsageVariant::Low => sample.highest_usage <= threshold_bytes,
        BufferUsageVariant::High => sample.highest_usage >= threshold_bytes,
      }
    }
  };
  satisfied.then_some(Evaluation::BufferUsage { used_bytes: sample.highest_usage, capacity })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::Domain;
  use test_case::test_case;

  fn high(threshold: Threshold) -> Condition {
    Condition::buffer_usage(BufferUsageVariant::High, "s", "c", Domain::User, threshold).unwrap()
  }

  fn low(threshold: Threshold) -> Condition {
    Condition::buffer_usage(BufferUsageVariant::Low, "s", "c", Domain::User, threshold).unwrap()
  }

  #[test_case(BufferUsageVariant::High, 800, 800, true; "high fires at threshold")]
  #[test_case(BufferUsageVariant::High, 800, 799, false; "high does not fire just below threshold")]
  #[test_case(BufferUsageVariant::High, 800, 1000, true; "high fires above threshold")]
  #[test_case(BufferUsageVariant::Low, 200, 200, true; "low fires at threshold")]
  #[test_case(BufferUsageVariant::Low, 200, 201, false; "low does not fire just above threshold")]
  #[test_case(BufferUsageVariant::Low, 200, 0, true; "low fires below threshold")]
  fn threshold_boundary_cases(variant: BufferUsageVariant, threshold_bytes: u64, highest_usage: u64, expected: bool) {
    let cond = Condition::buffer_usage(variant, "s", "c", Domain::User, Threshold::Bytes(threshold_bytes)).unwrap();
    let sample = ChannelSample { highest_usage, lowest_usage: 0 };
    assert_eq!(evaluate(&cond, sample, 1000).is_some(), expected);
  }

  #[test]
  fn ratio_zero_always_satisfies_low() {
    let cond = low(Threshold::Ratio(0.0));
    let sample = ChannelSample { highest_usage: 50, lowest_usage: 0 };
    assert!(evaluate(&cond, sample, 1000).is_some());
  }

  #[test]
  fn ratio_zero_never_satisfies_high() {
    let cond = high(Threshold::Ratio(0.0));
    let nonzero = ChannelSample { highest_usage: 1, lowest_usage: 0 };
    assert!(evaluate(&cond, nonzero, 1000).is_none());
    let zero = ChannelSample { highest_usage: 0, lowest_usage: 0 };
    assert!(evaluate(&cond, zero, 1000).is_none());
  }

  #[test]
  fn ratio_one_high_requires_completely_full() {
    let cond = high(Threshold::Ratio(1.0));
    let almost_full = ChannelSample { highest_usage: 999, lowest_usage: 0 };
    assert!(evaluate(&cond, almost_full, 1000).is_none());
    let full = ChannelSample { highest_usage: 1000, lowest_usage: 0 };
    assert!(evaluate(&cond, full, 1000).is_some());
  }

  #[test]
  fn worked_example_from_spec() {
    // Two samples on an 8-channel: high@0.5 must fire once on the rising
    // edge and not re-fire while it stays satisfied.
    let cond = high(Threshold::Ratio(0.5));
    let capacity = 1000;
    let below = ChannelSample { highest_usage: 400, lowest_usage: 0 };
    let at = ChannelSample { highest_usage: 500, lowest_usage: 0 };
    let still_high = ChannelSample { highest_usage: 600, lowest_usage: 0 };
    assert!(evaluate(&cond, below, capacity).is_none());
    assert!(evaluate(&cond, at, capacity).is_some());
    assert!(evaluate(&cond, still_high, capacity).is_some());
    // Edge-triggering itself (no re-notify while steady) is the state
    // machine's job, exercised in notification_thread::state tests via
    // process_channel_sample, not this pure function.
  }
}
