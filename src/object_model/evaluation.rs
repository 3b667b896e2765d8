//! `Evaluation`: the concrete datum that witnessed a condition becoming
//! true (spec.md §3).

use crate::{
  capture_payload::EventFieldValue,
  codec::{CodecError, CodecResult, Reader, WireCodec, Writer},
};

#[derive(Debug, Clone, PartialEq)]
pub enum TraceArchiveLocation {
  Local {
    absolute_path: String,
  },
  Relay {
    protocol: String,
    host: String,
    ctrl_port: u16,
    data_port: u16,
    relative_path: String,
  },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
  BufferUsage {
    used_bytes: u64,
    capacity: u64,
  },
  SessionRotation {
    id: u64,
    location: Option<TraceArchiveLocation>,
  },
  EventRuleHit {
    trigger_name: String,
    captured_values: Option<Vec<EventFieldValue>>,
  },
}

impl WireCodec for Evaluation {
  const TAG: u8 = 0;

  fn write_payload(&self, w: &mut Writer) {
    match self {
      Evaluation::BufferUsage { used_bytes, capacity } => {
        w.write_u8(0);
        w.write_u64(*used_bytes);
        w.write_u64(*capacity);
      }
      Evaluation::SessionRotation { id, location } => {
        w.write_u8(1);
        w.write_u64(*id);
        match location {
          None => w.write_u8(0),
          Some(TraceArchiveLocation::Local { absolute_path }) => {
            w.write_u8(1);
            w.write_str(absolute_path);
          }
          Some(TraceArchiveLocation::Relay { protocol, host, ctrl_port, data_port, relative_path }) => {
            w.write_u8(2);
            w.write_str(protocol);
            w.write_str(host);
            w.write_u32(*ctrl_port as u32);
            w.write_u32(*data_port as u32);
            w.write_str(relative_path);
          }
        }
      }
      Evaluation::EventRuleHit { trigger_name, captured_values } => {
        w.write_u8(2);
        w.write_str(trigger_name);
        match captured_values {
          None => w.write_bool(false),
          Some(values) => {
            w.write_bool(true);
            w.write_u32(values.len() as u32);
            for v in values {
              v.write(w);
            }
          }
        }
      }
    }
  }

  fn read_payload(r: &mut Reader) -> CodecResult<Self> {
    Ok(match r.read_u8()? {
      0 => Evaluation::BufferUsage { used_bytes: r.read_u64()?, capacity: r.read_u64()? },
      1 => {
        let id = r.read_u64()?;
        let location = match r.read_u8()? {
          0 => None,
          1 => Some(TraceArchiveLocation::Local { absolute_path: r.read_str()? }),
          2 => Some(TraceArchiveLocation::Relay {
            protocol: r.read_str()?,
            host: r.read_str()?,
            ctrl_port: r.read_u32()? as u16,
            data_port: r.read_u32()? as u16,
            relative_path: r.read_str()?,
          }),
          t => return Err(CodecError::UnknownTag(t)),
        };
        Evaluation::SessionRotation { id, location }
      }
      2 => {
        let trigger_name = r.read_str()?;
        let captured_values = if r.read_bool()? {
          let n = r.read_u32()?;
          let mut values = Vec::with_capacity(n as usize);
          for _ in 0..n {
            values.push(EventFieldValue::read(r)?);
          }
          Some(values)
        } else {
          None
        };
        Evaluation::EventRuleHit { trigger_name, captured_values }
      }
      t => return Err(CodecError::UnknownTag(t)),
    })
  }
}
