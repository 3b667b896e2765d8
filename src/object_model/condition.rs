//! `Condition` tagged hierarchy (spec.md §3), the hash/equality key for
//! the trigger/channel/client indexes throughout the notification thread
//! (spec.md §4.3).

use std::hash::{Hash, Hasher};

use crate::{
  codec::{CodecError, CodecResult, Reader, WireCodec, Writer},
  domain::Domain,
  error::{EngineError, EngineResult},
  object_model::{capture_descriptor::CaptureExpr, event_rule::EventRule},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsageVariant {
  Low,
  High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionRotationVariant {
  Ongoing,
  Completed,
}

/// `Bytes(u64) | Ratio(f64 ∈ [0,1])` (spec.md §3). Manual `Eq`/`Hash`
/// because `f64` carries neither; ratio thresholds used here are always
/// finite and constructed through `Condition::buffer_usage`, which
/// rejects NaN, so the usual float-Eq pitfalls don't apply.
#[derive(Debug, Clone, Copy)]
pub enum Threshold {
  Bytes(u64),
  Ratio(f64),
}

impl PartialEq for Threshold {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Threshold::Bytes(a), Threshold::Bytes(b)) => a == b,
      (Threshold::Ratio(a), Threshold::Ratio(b)) => a.to_bits() == b.to_bits(),
      _ => false,
    }
  }
}
impl Eq for Threshold {}

impl Hash for Threshold {
  fn hash<H: Hasher>(&self, state: &mut H) {
    match self {
      Threshold::Bytes(b) => {
        state.write_u8(0);
        b.hash(state);
      }
      Threshold::Ratio(r) => {
        state.write_u8(1);
        r.to_bits().hash(state);
      }
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Condition {
  BufferUsage {
    variant: BufferUsageVariant,
    session_name: String,
    channel_name: String,
    domain: Domain,
    threshold: Threshold,
  },
  SessionConsumedSize {
    session_name: String,
    threshold_bytes: u64,
  },
  SessionRotation {
    variant: SessionRotationVariant,
    session_name: String,
  },
  EventRuleHit {
    rule: EventRule,
    capture_descriptors: Vec<CaptureExpr>,
  },
}

impl Condition {
  pub fn buffer_usage(
    variant: BufferUsageVariant,
    session_name: impl Into<String>,
    channel_name: impl Into<String>,
    domain: Domain,
    threshold: Threshold,
  ) -> EngineResult<Self> {
    let session_name = session_name.into();
    let channel_name = channel_name.into();
    if session_name.is_empty() || channel_name.is_empty() {
      return Err(EngineError::InvalidArgument("name fields must be non-empty".into()));
    }
    if let Threshold::Ratio(r) = threshold {
      if !(0.0..=1.0).contains(&r) {
        return Err(EngineError::InvalidArgument("ratio threshold out of [0,1]".into()));
      }
    }
    Ok(Condition::BufferUsage { variant, session_name, channel_name, domain, threshold })
  }

  pub fn session_consumed_size(
    session_name: impl Into<String>,
    threshold_bytes: u64,
  ) -> EngineResult<Self> {
    let session_name = session_name.into();
    if session_name.is_empty() {
      return Err(EngineError::InvalidArgument("session_name must be non-empty".into()));
    }
    Ok(Condition::SessionConsumedSize { session_name, threshold_bytes })
  }

  pub fn session_rotation(
    variant: SessionRotationVariant,
    session_name: impl Into<String>,
  ) -> EngineResult<Self> {
    let session_name = session_name.into();
    if session_name.is_empty() {
      return Err(EngineError::InvalidArgument("session_name must be non-empty".into()));
    }
    Ok(Condition::SessionRotation { variant, session_name })
  }

  pub fn event_rule_hit(rule: EventRule, capture_descriptors: Vec<CaptureExpr>) -> Self {
    Condition::EventRuleHit { rule, capture_descriptors }
  }

  /// Applies to a channel iff the triple matches (spec.md §4.3
  /// "Applicability").
  pub fn applies_to_channel(&self, session: &str, channel: &str, domain: Domain) -> bool {
    matches!(self,
      Condition::BufferUsage { session_name, channel_name, domain: d, .. }
        if session_name == session && channel_name == channel && *d == domain
    )
  }

  pub fn applies_to_session(&self, session: &str) -> bool {
    match self {
      Condition::SessionConsumedSize { session_name, .. } => session_name == session,
      _ => false,
    }
  }
}

impl WireCodec for Condition {
  const TAG: u8 = 0;

  fn write_payload(&self, w: &mut Writer) {
    match self {
      Condition::BufferUsage { variant, session_name, channel_name, domain, threshold } => {
        w.write_u8(0);
        w.write_u8(match variant {
          BufferUsageVariant::Low => 0,
          BufferUsageVariant::High => 1,
        });
        w.write_str(session_name);
        w.write_str(channel_name);
        w.write_u8(domain.tag());
        match threshold {
          Threshold::Bytes(b) => {
            w.write_u8(0);
            w.write_u64(*b);
          }
          Threshold::Ratio(r) => {
            w.write_u8(1);
            w.write_f64(*r);
          }
        }
      }
      Condition::SessionConsumedSize { session_name, threshold_bytes } => {
        w.write_u8(1);
        w.write_str(session_name);
        w.write_u64(*threshold_bytes);
      }
      Condition::SessionRotation { variant, session_name } => {
        w.write_u8(2);
        w.write_u8(match variant {
          SessionRotationVariant::Ongoing => 0,
          SessionRotationVariant::Completed => 1,
        });
        w.write_str(session_name);
      }
      Condition::EventRuleHit { rule, capture_descriptors } => {
        w.write_u8(3);
        rule.serialize(w);
        w.write_u32(capture_descriptors.len() as u32);
        for d in capture_descriptors {
          d.write(w);
        }
      }
    }
  }

  fn read_payload(r: &mut Reader) -> CodecResult<Self> {
    let invalid = |e: EngineError| CodecError::InvalidField(e.to_string());
    Ok(match r.read_u8()? {
      0 => {
        let variant = match r.read_u8()? {
          0 => BufferUsageVariant::Low,
          1 => BufferUsageVariant::High,
          t => return Err(CodecError::UnknownTag(t)),
        };
        let session_name = r.read_str()?;
        let channel_name = r.read_str()?;
        let domain = Domain::from_tag(r.read_u8()?).ok_or(CodecError::BadString)?;
        let threshold = match r.read_u8()? {
          0 => Threshold::Bytes(r.read_u64()?),
          1 => Threshold::Ratio(r.read_f64()?),
          t => return Err(CodecError::UnknownTag(t)),
        };
        Condition::buffer_usage(variant, session_name, channel_name, domain, threshold).map_err(invalid)?
      }
      1 => {
        let session_name = r.read_str()?;
        let threshold_bytes = r.read_u64()?;
        Condition::session_consumed_size(session_name, threshold_bytes).map_err(invalid)?
      }
      2 => {
        let variant = match r.read_u8()? {
          0 => SessionRotationVariant::Ongoing,
          1 => SessionRotationVariant::Completed,
          t => return Err(CodecError::UnknownTag(t)),
        };
        let session_name = r.read_str()?;
        Condition::session_rotation(variant, session_name).map_err(invalid)?
      }
      3 => {
        let rule = EventRule::deserialize_tagged(r)?;
        let n = r.read_u32()?;
        let mut capture_descriptors = Vec::with_capacity(n as usize);
        for _ in 0..n {
          capture_descriptors.push(CaptureExpr::read(r)?);
        }
        Condition::event_rule_hit(rule, capture_descriptors)
      }
      t => return Err(CodecError::UnknownTag(t)),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ratio_and_bytes_are_never_equal() {
    let a = Condition::buffer_usage(
      BufferUsageVariant::High,
      "s",
      "c",
      Domain::Kernel,
      Threshold::Bytes(100),
    )
    .unwrap();
    let b = Condition::buffer_usage(
      BufferUsageVariant::High,
      "s",
      "c",
      Domain::Kernel,
      Threshold::Ratio(100.0),
    );
    // Ratio out of range is rejected; build directly to compare forms.
    assert!(b.is_err());
    let c = Condition::BufferUsage {
      variant: BufferUsageVariant::High,
      session_name: "s".into(),
      channel_name: "c".into(),
      domain: Domain::Kernel,
      threshold: Threshold::Ratio(1.0),
    };
    assert_ne!(a, c);
  }

  #[test]
  fn round_trips() {
    let cond = Condition::session_consumed_size("sess", 1024).unwrap();
    let mut w = Writer::new();
    cond.serialize(&mut w);
    let bytes = w.into_bytes();
    let mut r = Reader::new(&bytes);
    assert_eq!(Condition::deserialize_tagged(&mut r).unwrap(), cond);
  }

  #[test]
  fn empty_name_rejected() {
    assert!(Condition::session_rotation(SessionRotationVariant::Ongoing, "").is_err());
  }
}
