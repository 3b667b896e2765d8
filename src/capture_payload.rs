//! Capture payload decoder (C8, spec.md §4.8): decodes an opaque
//! self-describing serialized object graph into a typed
//! `EventFieldValue` tree, one entry per capture descriptor.

use crate::{
  codec::{CodecError, CodecResult, Reader, Writer},
  error::{EngineError, EngineResult},
};

/// The opaque self-describing wire value a tracer hit's capture payload
/// decodes to before typing (spec.md §4.8 "Input"). Exposed so tests can
/// construct payloads without going through a tracer.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
  Nil,
  Unsigned(u64),
  Signed(i64),
  Real(f64),
  String(Vec<u8>),
  Array(Vec<RawValue>),
  Map(Vec<(String, RawValue)>),
}

impl RawValue {
  pub fn write(&self, w: &mut Writer) {
    match self {
      RawValue::Nil => w.write_u8(0),
      RawValue::Unsigned(v) => {
        w.write_u8(1);
        w.write_u64(*v);
      }
      RawValue::Signed(v) => {
        w.write_u8(2);
        w.write_i64(*v);
      }
      RawValue::Real(v) => {
        w.write_u8(3);
        w.write_f64(*v);
      }
      RawValue::String(bytes) => {
        w.write_u8(4);
        w.write_bytes(bytes);
      }
      RawValue::Array(items) => {
        w.write_u8(5);
        w.write_u32(items.len() as u32);
        for item in items {
          item.write(w);
        }
      }
      RawValue::Map(entries) => {
        w.write_u8(6);
        w.write_u32(entries.len() as u32);
        for (k, v) in entries {
          w.write_str(k);
          v.write(w);
        }
      }
    }
  }

  pub fn read(r: &mut Reader) -> CodecResult<Self> {
    Ok(match r.read_u8()? {
      0 => RawValue::Nil,
      1 => RawValue::Unsigned(r.read_u64()?),
      2 => RawValue::Signed(r.read_i64()?),
      3 => RawValue::Real(r.read_f64()?),
      4 => RawValue::String(r.read_bytes()?),
      5 => {
        let n = r.read_u32()?;
        let mut items = Vec::with_capacity(n as usize);
        for _ in 0..n {
          items.push(RawValue::read(r)?);
        }
        RawValue::Array(items)
      }
      6 => {
        let n = r.read_u32()?;
        let mut entries = Vec::with_capacity(n as usize);
        for _ in 0..n {
          entries.push((r.read_str()?, RawValue::read(r)?));
        }
        RawValue::Map(entries)
      }
      t => return Err(CodecError::UnknownTag(t)),
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnumValue {
  Signed(i64),
  Unsigned(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventFieldValue {
  Unsigned(u64),
  Signed(i64),
  Real(f64),
  String(Vec<u8>),
  Array(Vec<EventFieldValue>),
  Enum { value: EnumValue, labels: Option<Vec<String>> },
  /// A `Nil` payload slot (spec.md §4.8: "`Nil` means `Unavailable`").
  Unavailable,
}

impl EventFieldValue {
  /// Wire encoding for embedding a decoded capture tree inside an
  /// `Evaluation::EventRuleHit` notification (spec.md §4.5).
  pub fn write(&self, w: &mut Writer) {
    match self {
      EventFieldValue::Unsigned(v) => {
        w.write_u8(0);
        w.write_u64(*v);
      }
      EventFieldValue::Signed(v) => {
        w.write_u8(1);
        w.write_i64(*v);
      }
      EventFieldValue::Real(v) => {
        w.write_u8(2);
        w.write_f64(*v);
      }
      EventFieldValue::String(bytes) => {
        w.write_u8(3);
        w.write_bytes(bytes);
      }
      EventFieldValue::Array(items) => {
        w.write_u8(4);
        w.write_u32(items.len() as u32);
        for item in items {
          item.write(w);
        }
      }
      EventFieldValue::Enum { value, labels } => {
        w.write_u8(5);
        match value {
          EnumValue::Signed(v) => {
            w.write_u8(0);
            w.write_i64(*v);
          }
          EnumValue::Unsigned(v) => {
            w.write_u8(1);
            w.write_u64(*v);
          }
        }
        match labels {
          None => w.write_bool(false),
          Some(labels) => {
            w.write_bool(true);
            w.write_u32(labels.len() as u32);
            for label in labels {
              w.write_str(label);
            }
          }
        }
      }
      EventFieldValue::Unavailable => w.write_u8(6),
    }
  }

  pub fn read(r: &mut Reader) -> CodecResult<Self> {
    Ok(match r.read_u8()? {
      0 => EventFieldValue::Unsigned(r.read_u64()?),
      1 => EventFieldValue::Signed(r.read_i64()?),
      2 => EventFieldValue::Real(r.read_f64()?),
      3 => EventFieldValue::String(r.read_bytes()?),
      4 => {
        let n = r.read_u32()?;
        let mut items = Vec::with_capacity(n as usize);
        for _ in 0..n {
          items.push(EventFieldValue::read(r)?);
        }
        EventFieldValue::Array(items)
      }
      5 => {
        let value = match r.read_u8()? {
          0 => EnumValue::Signed(r.read_i64()?),
          1 => EnumValue::Unsigned(r.read_u64()?),
          t => return Err(CodecError::UnknownTag(t)),
        };
        let labels = if r.read_bool()? {
          let n = r.read_u32()?;
          let mut labels = Vec::with_capacity(n as usize);
          for _ in 0..n {
            labels.push(r.read_str()?);
          }
          Some(labels)
        } else {
          None
        };
        EventFieldValue::Enum { value, labels }
      }
      6 => EventFieldValue::Unavailable,
      t => return Err(CodecError::UnknownTag(t)),
    })
  }
}

/// Decodes one capture payload slot.
pub fn decode_value(raw: &RawValue) -> EngineResult<EventFieldValue> {
  match raw {
    RawValue::Nil => Ok(EventFieldValue::Unavailable),
    RawValue::Unsigned(v) => Ok(EventFieldValue::Unsigned(*v)),
    RawValue::Signed(v) => Ok(EventFieldValue::Signed(*v)),
    RawValue::Real(v) => Ok(EventFieldValue::Real(*v)),
    RawValue::String(bytes) => Ok(EventFieldValue::String(bytes.clone())),
    RawValue::Array(items) => {
      let decoded = items.iter().map(decode_value).collect::<EngineResult<Vec<_>>>()?;
      Ok(EventFieldValue::Array(decoded))
    }
    RawValue::Map(entries) => decode_enum_map(entries),
  }
}

fn decode_enum_map(entries: &[(String, RawValue)]) -> EngineResult<EventFieldValue> {
  let allowed: &[&str] = &["type", "value", "labels"];
  for (k, _) in entries {
    if !allowed.contains(&k.as_str()) {
      return Err(EngineError::InvalidArgument(format!("unexpected capture map key: {k}")));
    }
  }

  let type_ok = entries
    .iter()
    .find(|(k, _)| k == "type")
    .map(|(_, v)| matches!(v, RawValue::String(b) if b == b"enum"))
    .unwrap_or(false);
  if !type_ok {
    return Err(EngineError::InvalidArgument(
      "capture map must have type == \"enum\"".into(),
    ));
  }

  let value = entries
    .iter()
    .find(|(k, _)| k == "value")
    .map(|(_, v)| v)
    .ok_or_else(|| EngineError::InvalidArgument("capture enum map missing 'value'".into()))?;
  let value = match value {
    RawValue::Unsigned(v) => EnumValue::Unsigned(*v),
    RawValue::Signed(v) => EnumValue::Signed(*v),
    _ => return Err(EngineError::InvalidArgument("capture enum 'value' must be an integer".into())),
  };

  let labels = match entries.iter().find(|(k, _)| k == "labels") {
    None => None,
    Some((_, RawValue::Array(items))) => {
      let mut labels = Vec::with_capacity(items.len());
      for item in items {
        match item {
          RawValue::String(bytes) => labels.push(
            String::from_utf8(bytes.clone())
              .map_err(|_| EngineError::InvalidArgument("label is not valid UTF-8".into()))?,
          ),
          _ => return Err(EngineError::InvalidArgument("label entry must be a string".into())),
        }
      }
      Some(labels)
    }
    Some(_) => return Err(EngineError::InvalidArgument("'labels' must be an array".into())),
  };

  Ok(EventFieldValue::Enum { value, labels })
}

/// Decodes a full capture payload: the root must be an array, and each
/// capture descriptor in order selects the root array element at its
/// position (spec.md §4.8 "Decoding rules").
pub fn decode_capture_payload(
  root: &RawValue,
  descriptor_count: usize,
) -> EngineResult<Vec<EventFieldValue>> {
  let items = match root {
    RawValue::Array(items) => items,
    _ => return Err(EngineError::InvalidArgument("capture payload root must be an array".into())),
  };
  if items.len() < descriptor_count {
    return Err(EngineError::InvalidArgument(
      "capture payload has fewer elements than capture descriptors".into(),
    ));
  }
  items.iter().take(descriptor_count).map(decode_value).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn nil_becomes_unavailable() {
    assert_eq!(decode_value(&RawValue::Nil).unwrap(), EventFieldValue::Unavailable);
  }

  #[test]
  fn array_with_nil_entries_preserves_unavailable() {
    let raw = RawValue::Array(vec![RawValue::Unsigned(1), RawValue::Nil]);
    let decoded = decode_value(&raw).unwrap();
    assert_eq!(
      decoded,
      EventFieldValue::Array(vec![EventFieldValue::Unsigned(1), EventFieldValue::Unavailable])
    );
  }

  #[test]
  fn enum_map_decodes_with_labels() {
    let raw = RawValue::Map(vec![
      ("type".into(), RawValue::String(b"enum".to_vec())),
      ("value".into(), RawValue::Unsigned(2)),
      (
        "labels".into(),
        RawValue::Array(vec![
          RawValue::String(b"RED".to_vec()),
          RawValue::String(b"GREEN".to_vec()),
          RawValue::String(b"BLUE".to_vec()),
        ]),
      ),
    ]);
    let decoded = decode_value(&raw).unwrap();
    assert_eq!(
      decoded,
      EventFieldValue::Enum {
        value: EnumValue::Unsigned(2),
        labels: Some(vec!["RED".into(), "GREEN".into(), "BLUE".into()]),
      }
    );
  }

  #[test]
  fn non_enum_map_shape_is_rejected() {
    let raw = RawValue::Map(vec![("foo".into(), RawValue::Unsigned(1))]);
    assert!(decode_value(&raw).is_err());
  }

  #[test]
  fn root_must_be_array() {
    assert!(decode_capture_payload(&RawValue::Unsigned(1), 1).is_err());
  }

  #[test]
  fn selects_one_element_per_descriptor_in_order() {
    let raw = RawValue::Array(vec![
      RawValue::Unsigned(10),
      RawValue::Signed(-5),
      RawValue::String(b"x".to_vec()),
    ]);
    let decoded = decode_capture_payload(&raw, 2).unwrap();
    assert_eq!(decoded, vec![EventFieldValue::Unsigned(10), EventFieldValue::Signed(-5)]);
  }

  #[test]
  fn raw_value_round_trips() {
    let raw = RawValue::Map(vec![
      ("type".into(), RawValue::String(b"enum".to_vec())),
      ("value".into(), RawValue::Signed(-1)),
    ]);
    let mut w = Writer::new();
    raw.write(&mut w);
    let bytes = w.into_bytes();
    let mut r = Reader::new(&bytes);
    assert_eq!(RawValue::read(&mut r).unwrap(), raw);
  }
}
