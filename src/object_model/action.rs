//! `Action` tagged hierarchy (spec.md §3).

use crate::{
  codec::{CodecError, CodecResult, Reader, WireCodec, Writer},
  error::{EngineError, EngineResult},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SnapshotUrl {
  Single(String),
  ControlData { control_url: String, data_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SnapshotOutput {
  pub name: Option<String>,
  pub max_size: Option<u64>,
  pub url: Option<SnapshotUrl>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
  Notify,
  StartSession { name: String },
  StopSession { name: String },
  RotateSession { name: String },
  SnapshotSession { name: String, output: Option<SnapshotOutput> },
  /// Not nestable: a `Group` may not contain another `Group` (spec.md §3).
  Group(Vec<Action>),
}

impl Action {
  /// Validates the non-nestable invariant on `Group`.
  pub fn validate(&self) -> EngineResult<()> {
    if let Action::Group(actions) = self {
      for a in actions {
        if matches!(a, Action::Group(_)) {
          return Err(EngineError::InvalidArgument("action groups are not nestable".into()));
        }
      }
    }
    Ok(())
  }
}

impl WireCodec for Action {
  const TAG: u8 = 0;

  fn write_payload(&self, w: &mut Writer) {
    match self {
      Action::Notify => w.write_u8(0),
      Action::StartSession { name } => {
        w.write_u8(1);
        w.write_str(name);
      }
      Action::StopSession { name } => {
        w.write_u8(2);
        w.write_str(name);
      }
      Action::RotateSession { name } => {
        w.write_u8(3);
        w.write_str(name);
      }
      Action::SnapshotSession { name, output } => {
        w.write_u8(4);
        w.write_str(name);
        match output {
          None => w.write_bool(false),
          Some(out) => {
            w.write_bool(true);
            w.write_opt_str(out.name.as_deref());
            match out.max_size {
              None => w.write_bool(false),
              Some(v) => {
                w.write_bool(true);
                w.write_u64(v);
              }
            }
            match &out.url {
              None => w.write_u8(0),
              Some(SnapshotUrl::Single(u)) => {
                w.write_u8(1);
                w.write_str(u);
              }
              Some(SnapshotUrl::ControlData { control_url, data_url }) => {
                w.write_u8(2);
                w.write_str(control_url);
                w.write_str(data_url);
              }
            }
          }
        }
      }
      Action::Group(actions) => {
        w.write_u8(5);
        w.write_u32(actions.len() as u32);
        for a in actions {
          a.serialize(w);
        }
      }
    }
  }

  fn read_payload(r: &mut Reader) -> CodecResult<Self> {
    Ok(match r.read_u8()? {
      0 => Action::Notify,
      1 => Action::StartSession { name: r.read_str()? },
      2 => Action::StopSession { name: r.read_str()? },
      3 => Action::RotateSession { name: r.read_str()? },
      4 => {
        let name = r.read_str()?;
        let output = if r.read_bool()? {
          let out_name = r.read_opt_str()?;
          let max_size = if r.read_bool()? { Some(r.read_u64()?) } else { None };
          let url = match r.read_u8()? {
            0 => None,
            1 => Some(SnapshotUrl::Single(r.read_str()?)),
            2 => Some(SnapshotUrl::ControlData {
              control_url: r.read_str()?,
              data_url: r.read_str()?,
            }),
            t => return Err(CodecError::UnknownTag(t)),
          };
          Some(SnapshotOutput { name: out_name, max_size, url })
        } else {
          None
        };
        Action::SnapshotSession { name, output }
      }
      5 => {
        let n = r.read_u32()?;
        let mut actions = Vec::with_capacity(n as usize);
        for _ in 0..n {
          actions.push(Action::deserialize_tagged(r)?);
        }
        Action::Group(actions)
      }
      t => return Err(CodecError::UnknownTag(t)),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn nested_group_rejected() {
    let inner = Action::Group(vec![Action::Notify]);
    let outer = Action::Group(vec![inner]);
    assert!(outer.validate().is_err());
  }

  #[test]
  fn round_trips_snapshot_action() {
    let action = Action::SnapshotSession {
      name: "sess".into(),
      output: Some(SnapshotOutput {
        name: Some("out".into()),
        max_size: Some(4096),
        url: Some(SnapshotUrl::ControlData {
          control_url: "tcp://localhost:5342".into(),
          data_url: "tcp://localhost:5343".into(),
        }),
      }),
    };
    let mut w = Writer::new();
    action.serialize(&mut w);
    let bytes = w.into_bytes();
    let mut r = Reader::new(&bytes);
    assert_eq!(Action::deserialize_tagged(&mut r).unwrap(), action);
  }
}
