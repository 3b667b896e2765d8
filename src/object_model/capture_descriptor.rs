//! Capture descriptors: l-value event-expressions named by
//! `EventRuleHit` conditions (spec.md §3). Each one identifies where, in
//! the decoded payload of a hit event, a captured value lives.

use serde::{Deserialize, Serialize};

use crate::codec::{CodecError, CodecResult, Reader, Writer};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaptureExpr {
  /// A field of the event's own payload, e.g. `msg`.
  EventPayloadField { field_name: String },
  /// A per-channel context field, e.g. `cpu_id`.
  ChannelContextField { field_name: String },
  /// An application-specific context field, keyed by `(provider, type)`.
  AppSpecificContextField { provider_name: String, type_name: String },
  /// An element of an array-valued field: `parent[index]`.
  ArrayFieldElement { parent: Box<CaptureExpr>, index: u32 },
}

impl CaptureExpr {
  pub fn write(&self, w: &mut Writer) {
    match self {
      CaptureExpr::EventPayloadField { field_name } => {
        w.write_u8(0);
        w.write_str(field_name);
      }
      CaptureExpr::ChannelContextField { field_name } => {
        w.write_u8(1);
        w.write_str(field_name);
      }
      CaptureExpr::AppSpecificContextField { provider_name, type_name } => {
        w.write_u8(2);
        w.write_str(provider_name);
        w.write_str(type_name);
      }
      CaptureExpr::ArrayFieldElement { parent, index } => {
        w.write_u8(3);
        parent.write(w);
        w.write_u32(*index);
      }
    }
  }

  pub fn read(r: &mut Reader) -> CodecResult<Self> {
    Ok(match r.read_u8()? {
      0 => CaptureExpr::EventPayloadField { field_name: r.read_str()? },
      1 => CaptureExpr::ChannelContextField { field_name: r.read_str()? },
      2 => CaptureExpr::AppSpecificContextField {
        provider_name: r.read_str()?,
        type_name: r.read_str()?,
      },
      3 => {
        let parent = Box::new(CaptureExpr::read(r)?);
        let index = r.read_u32()?;
        CaptureExpr::ArrayFieldElement { parent, index }
      }
      t => return Err(CodecError::UnknownTag(t)),
    })
  }
}
