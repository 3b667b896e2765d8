//! `EventRule` tagged hierarchy (spec.md §3), grounded on
//! `original_source/src/common/event-rule-tracepoint.c` and
//! `src/common/conditions/event-rule.c` for the validate/populate
//! contract: exclusions only on user tracepoints, loglevel predicates
//! only on agent/user domains, and the agent-filter rewrite that joins
//! the user's filter with a `logger_name == pattern` clause.

use serde::{Deserialize, Serialize};

use crate::{
  codec::{CodecError, CodecResult, Reader, WireCodec, Writer},
  domain::Domain,
  error::{EngineError, EngineResult},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogLevelSpec {
  AtLeast(i32),
  Exactly(i32),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KprobeLocation {
  SymbolOffset { symbol: String, offset: u64 },
  Address(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UProbeLocation {
  Elf { binary_path: String, function_name: String },
  Sdt { binary_path: String, provider_name: String, probe_name: String },
}

/// An event rule before compilation: the user-supplied shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventRuleKind {
  Tracepoint {
    domain: Domain,
    pattern: String,
    filter: Option<String>,
    loglevel_spec: Option<LogLevelSpec>,
    exclusions: Vec<String>,
  },
  Kprobe {
    name: String,
    location: KprobeLocation,
  },
  UProbe {
    name: String,
    location: UProbeLocation,
  },
  Syscall {
    pattern: String,
    filter: Option<String>,
  },
}

/// A fully constructed event rule: `kind` plus the compiled artifacts
/// produced by `populate()` (spec.md §3 "After construction an event rule
/// is populated with...").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventRule {
  pub kind: EventRuleKind,
  compiled_filter: Option<Vec<u8>>,
  rewritten_agent_filter: Option<Vec<u8>>,
}

impl EventRule {
  /// Construct + validate, but do not yet populate. Mirrors the
  /// construct → validate step of spec.md §4.1; callers must call
  /// `populate()` before using `compiled_filter()`.
  pub fn new(kind: EventRuleKind) -> EngineResult<Self> {
    Self::validate(&kind)?;
    Ok(Self { kind, compiled_filter: None, rewritten_agent_filter: None })
  }

  fn validate(kind: &EventRuleKind) -> EngineResult<()> {
    match kind {
      EventRuleKind::Tracepoint { domain, pattern, loglevel_spec, exclusions, .. } => {
        if pattern.is_empty() {
          return Err(EngineError::InvalidArgument("tracepoint pattern is empty".into()));
        }
        if !exclusions.is_empty() && *domain != Domain::User {
          return Err(EngineError::InvalidArgument(
            "exclusions are only permitted on user-tracepoint rules".into(),
          ));
        }
        if loglevel_spec.is_some() && !(domain.is_agent() || *domain == Domain::User) {
          return Err(EngineError::InvalidArgument(
            "loglevel range is only permitted for tracepoints in agent or user domains".into(),
          ));
        }
        Ok(())
      }
      EventRuleKind::Kprobe { name, .. } | EventRuleKind::UProbe { name, .. } => {
        if name.is_empty() {
          return Err(EngineError::InvalidArgument("event rule name is empty".into()));
        }
        Ok(())
      }
      EventRuleKind::Syscall { pattern, .. } => {
        if pattern.is_empty() {
          return Err(EngineError::InvalidArgument("syscall pattern is empty".into()));
        }
        Ok(())
      }
    }
  }

  /// Compiles the filter bytecode (and, for agent domains, the rewritten
  /// filter joining `logger_name == pattern` and the loglevel predicate).
  /// Idempotent; safe to call more than once.
  pub fn populate(&mut self) {
    let filter_src = match &self.kind {
      EventRuleKind::Tracepoint { filter, .. } => filter.as_deref(),
      EventRuleKind::Syscall { filter, .. } => filter.as_deref(),
      _ => None,
    };
    self.compiled_filter = filter_src.map(compile_filter_bytecode);

    if let EventRuleKind::Tracepoint { domain, pattern, filter, loglevel_spec, .. } = &self.kind {
      if domain.is_agent() {
        let mut expr = format!("logger_name == \"{pattern}\"");
        if let Some(user_filter) = filter {
          expr = format!("({user_filter}) && ({expr})");
        }
        if let Some(spec) = loglevel_spec {
          let level_expr = match spec {
            LogLevelSpec::AtLeast(level) => format!("loglevel <= {level}"),
            LogLevelSpec::Exactly(level) => format!("loglevel == {level}"),
          };
          expr = format!("({expr}) && ({level_expr})");
        }
        self.rewritten_agent_filter = Some(compile_filter_bytecode(&expr));
      }
    }
  }

  pub fn compiled_filter(&self) -> Option<&[u8]> {
    self.compiled_filter.as_deref()
  }

  pub fn rewritten_agent_filter(&self) -> Option<&[u8]> {
    self.rewritten_agent_filter.as_deref()
  }
}

/// Opaque bytecode lowering for filter expressions. Not a full filter
/// language VM: it tokenizes comparisons/boolean connectives into a
/// small stack-machine opcode stream, which is enough to give every
/// unique expression a distinct, deterministic, shareable compiled form
/// (the property the capture-bytecode dedup set in
/// `object_model::capture_bytecode` and the invariants in spec.md §4.1
/// actually depend on).
pub fn compile_filter_bytecode(expr: &str) -> Vec<u8> {
  const OP_PUSH_IDENT: u8 = 1;
  const OP_PUSH_STR: u8 = 2;
  const OP_PUSH_NUM: u8 = 3;
  const OP_CMP_EQ: u8 = 4;
  const OP_CMP_LE: u8 = 5;
  const OP_AND: u8 = 6;
  const OP_PAREN: u8 = 7;

  let mut out = Vec::new();
  for token in tokenize(expr) {
    match token.as_str() {
      "==" => out.push(OP_CMP_EQ),
      "<=" => out.push(OP_CMP_LE),
      "&&" => out.push(OP_AND),
      "(" | ")" => out.push(OP_PAREN),
      t if t.starts_with('"') => {
        out.push(OP_PUSH_STR);
        out.extend_from_slice(t.trim_matches('"').as_bytes());
        out.push(0);
      }
      t if t.chars().all(|c| c.is_ascii_digit() || c == '-') && !t.is_empty() => {
        out.push(OP_PUSH_NUM);
        out.extend_from_slice(&t.parse::<i64>().unwrap_or(0).to_le_bytes());
      }
      t => {
        out.push(OP_PUSH_IDENT);
        out.extend_from_slice(t.as_bytes());
        out.push(0);
      }
    }
  }
  out
}

fn tokenize(expr: &str) -> Vec<String> {
  let mut tokens = Vec::new();
  let mut chars = expr.chars().peekable();
  while let Some(&c) = chars.peek() {
    match c {
      ' ' | '\t' => {
        chars.next();
      }
      '(' | ')' => {
        tokens.push(c.to_string());
        chars.next();
      }
      '"' => {
        let mut s = String::from("\"");
        chars.next();
        for c in chars.by_ref() {
          if c == '"' {
            break;
          }
          s.push(c);
        }
        s.push('"');
        tokens.push(s);
      }
      '=' | '<' | '&' => {
        let mut s = String::new();
        s.push(c);
        chars.next();
        if let Some(&next) = chars.peek() {
          if next == '=' || next == '&' {
            s.push(next);
            chars.next();
          }
        }
        tokens.push(s);
      }
      _ => {
        let mut s = String::new();
        while let Some(&c) = chars.peek() {
          if c.is_whitespace() || "()=<&".contains(c) {
            break;
          }
          s.push(c);
          chars.next();
        }
        tokens.push(s);
      }
    }
  }
  tokens
}

impl WireCodec for EventRule {
  const TAG: u8 = 0;

  fn write_payload(&self, w: &mut Writer) {
    match &self.kind {
      EventRuleKind::Tracepoint { domain, pattern, filter, loglevel_spec, exclusions } => {
        w.write_u8(0);
        w.write_u8(domain.tag());
        w.write_str(pattern);
        w.write_opt_str(filter.as_deref());
        match loglevel_spec {
          None => w.write_u8(0),
          Some(LogLevelSpec::AtLeast(level)) => {
            w.write_u8(1);
            w.write_i64(*level as i64);
          }
          Some(LogLevelSpec::Exactly(level)) => {
            w.write_u8(2);
            w.write_i64(*level as i64);
          }
        }
        w.write_u32(exclusions.len() as u32);
        for e in exclusions {
          w.write_str(e);
        }
      }
      EventRuleKind::Kprobe { name, location } => {
        w.write_u8(1);
        w.write_str(name);
        match location {
          KprobeLocation::SymbolOffset { symbol, offset } => {
            w.write_u8(0);
            w.write_str(symbol);
            w.write_u64(*offset);
          }
          KprobeLocation::Address(addr) => {
            w.write_u8(1);
            w.write_u64(*addr);
          }
        }
      }
      EventRuleKind::UProbe { name, location } => {
        w.write_u8(2);
        w.write_str(name);
        match location {
          UProbeLocation::Elf { binary_path, function_name } => {
            w.write_u8(0);
            w.write_str(binary_path);
            w.write_str(function_name);
          }
          UProbeLocation::Sdt { binary_path, provider_name, probe_name } => {
            w.write_u8(1);
            w.write_str(binary_path);
            w.write_str(provider_name);
            w.write_str(probe_name);
          }
        }
      }
      EventRuleKind::Syscall { pattern, filter } => {
        w.write_u8(3);
        w.write_str(pattern);
        w.write_opt_str(filter.as_deref());
      }
    }
  }

  fn read_payload(r: &mut Reader) -> CodecResult<Self> {
    let variant = r.read_u8()?;
    let kind = match variant {
      0 => {
        let domain = Domain::from_tag(r.read_u8()?).ok_or(CodecError::BadString)?;
        let pattern = r.read_str()?;
        let filter = r.read_opt_str()?;
        let loglevel_spec = match r.read_u8()? {
          0 => None,
          1 => Some(LogLevelSpec::AtLeast(r.read_i64()? as i32)),
          2 => Some(LogLevelSpec::Exactly(r.read_i64()? as i32)),
          t => return Err(CodecError::UnknownTag(t)),
        };
        let n = r.read_u32()?;
        let mut exclusions = Vec::with_capacity(n as usize);
        for _ in 0..n {
          exclusions.push(r.read_str()?);
        }
        EventRuleKind::Tracepoint { domain, pattern, filter, loglevel_spec, exclusions }
      }
      1 => {
        let name = r.read_str()?;
        let location = match r.read_u8()? {
          0 => KprobeLocation::SymbolOffset { symbol: r.read_str()?, offset: r.read_u64()? },
          1 => KprobeLocation::Address(r.read_u64()?),
          t => return Err(CodecError::UnknownTag(t)),
        };
        EventRuleKind::Kprobe { name, location }
      }
      2 => {
        let name = r.read_str()?;
        let location = match r.read_u8()? {
          0 => UProbeLocation::Elf { binary_path: r.read_str()?, function_name: r.read_str()? },
          1 => UProbeLocation::Sdt {
            binary_path: r.read_str()?,
            provider_name: r.read_str()?,
            probe_name: r.read_str()?,
          },
          t => return Err(CodecError::UnknownTag(t)),
        };
        EventRuleKind::UProbe { name, location }
      }
      3 => EventRuleKind::Syscall { pattern: r.read_str()?, filter: r.read_opt_str()? },
      t => return Err(CodecError::UnknownTag(t)),
    };
    let mut rule = EventRule::new(kind).map_err(|e| CodecError::InvalidField(e.to_string()))?;
    rule.populate();
    Ok(rule)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn exclusions_rejected_outside_user_domain() {
    let kind = EventRuleKind::Tracepoint {
      domain: Domain::Kernel,
      pattern: "sched_*".into(),
      filter: None,
      loglevel_spec: None,
      exclusions: vec!["sched_switch".into()],
    };
    assert!(EventRule::new(kind).is_err());
  }

  #[test]
  fn loglevel_rejected_outside_agent_and_user() {
    let kind = EventRuleKind::Tracepoint {
      domain: Domain::Kernel,
      pattern: "sched_*".into(),
      filter: None,
      loglevel_spec: Some(LogLevelSpec::AtLeast(3)),
      exclusions: vec![],
    };
    assert!(EventRule::new(kind).is_err());
  }

  #[test]
  fn agent_domain_gets_rewritten_filter() {
    let kind = EventRuleKind::Tracepoint {
      domain: Domain::Jul,
      pattern: "org.example.*".into(),
      filter: Some("msg == \"boot\"".into()),
      loglevel_spec: Some(LogLevelSpec::AtLeast(400)),
      exclusions: vec![],
    };
    let mut rule = EventRule::new(kind).unwrap();
    assert!(rule.rewritten_agent_filter().is_none());
    rule.populate();
    assert!(rule.rewritten_agent_filter().is_some());
    assert!(rule.compiled_filter().is_some());
  }

  #[test]
  fn kernel_rule_has_no_filter_field_to_reject() {
    let kind =
      EventRuleKind::Kprobe { name: "my_probe".into(), location: KprobeLocation::Address(0x1000) };
    assert!(EventRule::new(kind).is_ok());
  }

  #[test]
  fn round_trips_through_codec() {
    let kind = EventRuleKind::Syscall { pattern: "read".into(), filter: Some("fd == 3".into()) };
    let mut rule = EventRule::new(kind).unwrap();
    rule.populate();
    let mut w = Writer::new();
    rule.serialize(&mut w);
    let bytes = w.into_bytes();
    let mut r = Reader::new(&bytes);
    let decoded = EventRule::deserialize_tagged(&mut r).unwrap();
    assert_eq!(decoded.kind, rule.kind);
    assert_eq!(decoded.compiled_filter(), rule.compiled_filter());
  }
}
