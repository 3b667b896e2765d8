//! `Notification`: a `(condition, evaluation)` pair delivered to
//! subscribed clients over the client protocol (spec.md §3/§6).

use crate::{
  codec::{Reader, WireCodec, Writer},
  object_model::{condition::Condition, evaluation::Evaluation},
};

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
  pub condition: Condition,
  pub evaluation: Evaluation,
}

impl Notification {
  pub fn new(condition: Condition, evaluation: Evaluation) -> Self {
    Self { condition, evaluation }
  }
}

impl WireCodec for Notification {
  const TAG: u8 = 0;

  fn write_payload(&self, w: &mut Writer) {
    self.condition.serialize(w);
    self.evaluation.serialize(w);
  }

  fn read_payload(r: &mut Reader) -> crate::codec::CodecResult<Self> {
    let condition = Condition::deserialize_tagged(r)?;
    let evaluation = Evaluation::deserialize_tagged(r)?;
    Ok(Notification { condition, evaluation })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::object_model::condition::{BufferUsageVariant, Threshold};
  use crate::domain::Domain;

  #[test]
  fn round_trips() {
    let condition = Condition::buffer_usage(
      BufferUsageVariant::High,
      "sess",
      "chan",
      Domain::User,
      Threshold::Ratio(0.8),
    )
    .unwrap();
    let evaluation = Evaluation::BufferUsage { used_bytes: 900, capacity: 1000 };
    let notification = Notification::new(condition, evaluation);

    let mut w = Writer::new();
    notification.serialize(&mut w);
    let bytes = w.into_bytes();
    let mut r = Reader::new(&bytes);
    assert_eq!(Notification::deserialize_tagged(&mut r).unwrap(), notification);
  }
}
