//! The self-describing, little-endian, length-prefixed binary wire format
//! of spec.md §4.1.
//!
//! Every polymorphic object (`Condition`, `Action`, `Evaluation`,
//! `EventRule`, `Notification`) is encoded as `{u8 tag, payload...}`.
//! Variable-length fields (strings, nested objects, byte blobs) are
//! `{u32 length, bytes}`; fixed-width integers (u8/u32/u64/f64) are used
//! directly for everything else. Strings carry their terminating NUL
//! inside the declared length.

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
  #[error("unexpected end of buffer")]
  Eof,
  #[error("unknown tag: {0}")]
  UnknownTag(u8),
  #[error("string is not NUL-terminated exactly once")]
  BadString,
  #[error("invalid field value: {0}")]
  InvalidField(String),
  #[error(transparent)]
  Io(#[from] std::io::Error),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Anything in the object model that can round-trip through the wire
/// format (spec.md §4.1's construct → populate → validate → serialize →
/// equal contract, minus construct/populate/validate which are type
/// specific).
pub trait WireCodec: Sized {
  const TAG: u8;

  fn write_payload(&self, w: &mut Writer);
  fn read_payload(r: &mut Reader) -> CodecResult<Self>;

  fn serialize(&self, w: &mut Writer) {
    w.write_u8(Self::TAG);
    self.write_payload(w);
  }

  fn deserialize_tagged(r: &mut Reader) -> CodecResult<Self> {
    let tag = r.read_u8()?;
    if tag != Self::TAG {
      return Err(CodecError::UnknownTag(tag));
    }
    Self::read_payload(r)
  }
}

/// Growable little-endian output buffer. Separated from `Vec<u8>` so call
/// sites read like the teacher's CDR writer: `w.write_u32(...)`, not raw
/// byte-fiddling.
#[derive(Debug, Default)]
pub struct Writer {
  buf: Vec<u8>,
}

impl Writer {
  pub fn new() -> Self {
    Self { buf: Vec::new() }
  }

  pub fn into_bytes(self) -> Vec<u8> {
    self.buf
  }

  pub fn as_slice(&self) -> &[u8] {
    &self.buf
  }

  pub fn len(&self) -> usize {
    self.buf.len()
  }

  pub fn is_empty(&self) -> bool {
    self.buf.is_empty()
  }

  pub fn write_u8(&mut self, v: u8) {
    self.buf.push(v);
  }

  pub fn write_i8(&mut self, v: i8) {
    self.buf.push(v as u8);
  }

  pub fn write_u32(&mut self, v: u32) {
    self.buf.write_u32::<LE>(v).expect("Vec write is infallible");
  }

  pub fn write_u64(&mut self, v: u64) {
    self.buf.write_u64::<LE>(v).expect("Vec write is infallible");
  }

  pub fn write_i64(&mut self, v: i64) {
    self.buf.write_i64::<LE>(v).expect("Vec write is infallible");
  }

  pub fn write_f64(&mut self, v: f64) {
    self.buf.write_f64::<LE>(v).expect("Vec write is infallible");
  }

  pub fn write_bool(&mut self, v: bool) {
    self.write_u8(if v { 1 } else { 0 });
  }

  /// `{u32 length, bytes}` with no implied terminator; used for raw blobs
  /// (capture payloads, compiled bytecode).
  pub fn write_bytes(&mut self, bytes: &[u8]) {
    self.write_u32(bytes.len() as u32);
    self.buf.extend_from_slice(bytes);
  }

  /// Strings include their terminating NUL in the declared length
  /// (spec.md §4.1).
  pub fn write_str(&mut self, s: &str) {
    self.write_u32(s.len() as u32 + 1);
    self.buf.extend_from_slice(s.as_bytes());
    self.buf.push(0);
  }

  pub fn write_opt_str(&mut self, s: Option<&str>) {
    match s {
      Some(s) => {
        self.write_bool(true);
        self.write_str(s);
      }
      None => self.write_bool(false),
    }
  }
}

/// Cursor over a borrowed byte slice for decoding.
pub struct Reader<'a> {
  buf: &'a [u8],
  pos: usize,
}

impl<'a> Reader<'a> {
  pub fn new(buf: &'a [u8]) -> Self {
    Self { buf, pos: 0 }
  }

  pub fn remaining(&self) -> usize {
    self.buf.len() - self.pos
  }

  pub fn is_empty(&self) -> bool {
    self.pos >= self.buf.len()
  }

  fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
    if self.remaining() < n {
      return Err(CodecError::Eof);
    }
    let s = &self.buf[self.pos..self.pos + n];
    self.pos += n;
    Ok(s)
  }

  pub fn read_u8(&mut self) -> CodecResult<u8> {
    Ok(self.take(1)?[0])
  }

  pub fn read_i8(&mut self) -> CodecResult<i8> {
    Ok(self.take(1)?[0] as i8)
  }

  pub fn read_u32(&mut self) -> CodecResult<u32> {
    Ok(self.take(4)?.read_u32::<LE>()?)
  }

  pub fn read_u64(&mut self) -> CodecResult<u64> {
    Ok(self.take(8)?.read_u64::<LE>()?)
  }

  pub fn read_i64(&mut self) -> CodecResult<i64> {
    Ok(self.take(8)?.read_i64::<LE>()?)
  }

  pub fn read_f64(&mut self) -> CodecResult<f64> {
    Ok(self.take(8)?.read_f64::<LE>()?)
  }

  pub fn read_bool(&mut self) -> CodecResult<bool> {
    Ok(self.read_u8()? != 0)
  }

  pub fn read_bytes(&mut self) -> CodecResult<Vec<u8>> {
    let len = self.read_u32()? as usize;
    Ok(self.take(len)?.to_vec())
  }

  /// Rejects a payload that is not zero-terminated exactly once at the end
  /// (spec.md §4.1).
  pub fn read_str(&mut self) -> CodecResult<String> {
    let len = self.read_u32()? as usize;
    if len == 0 {
      return Err(CodecError::BadString);
    }
    let raw = self.take(len)?;
    let (last, body) = raw.split_last().ok_or(CodecError::BadString)?;
    if *last != 0 || body.contains(&0) {
      return Err(CodecError::BadString);
    }
    String::from_utf8(body.to_vec()).map_err(|_| CodecError::BadString)
  }

  pub fn read_opt_str(&mut self) -> CodecResult<Option<String>> {
    if self.read_bool()? {
      Ok(Some(self.read_str()?))
    } else {
      Ok(None)
    }
  }
}

/// `serialize(x)` then `deserialize(serialize(x)) == x` (spec.md §8 law 5).
pub fn round_trip<T: WireCodec + PartialEq>(value: &T) -> CodecResult<bool> {
  let mut w = Writer::new();
  value.serialize(&mut w);
  let bytes = w.into_bytes();
  let mut r = Reader::new(&bytes);
  let decoded = T::deserialize_tagged(&mut r)?;
  Ok(decoded == *value && r.is_empty())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn string_round_trips_with_nul_terminator() {
    let mut w = Writer::new();
    w.write_str("hello");
    let bytes = w.into_bytes();
    assert_eq!(bytes.len(), 4 + 6);
    let mut r = Reader::new(&bytes);
    assert_eq!(r.read_str().unwrap(), "hello");
  }

  #[test]
  fn empty_length_string_is_rejected() {
    let mut w = Writer::new();
    w.write_u32(0);
    let bytes = w.into_bytes();
    let mut r = Reader::new(&bytes);
    assert!(matches!(r.read_str(), Err(CodecError::BadString)));
  }

  #[test]
  fn embedded_nul_is_rejected() {
    let mut w = Writer::new();
    w.write_u32(3);
    w.buf.extend_from_slice(&[0, b'a', 0]);
    let bytes = w.into_bytes();
    let mut r = Reader::new(&bytes);
    assert!(matches!(r.read_str(), Err(CodecError::BadString)));
  }

  #[test]
  fn u64_is_written_little_endian() {
    let mut w = Writer::new();
    w.write_u64(0x0102_0304_0506_0708);
    assert_eq!(w.into_bytes(), hex_literal::hex!("08 07 06 05 04 03 02 01"));
  }

  #[test]
  fn opt_str_round_trips_none_and_some() {
    let mut w = Writer::new();
    w.write_opt_str(None);
    w.write_opt_str(Some("x"));
    let bytes = w.into_bytes();
    let mut r = Reader::new(&bytes);
    assert_eq!(r.read_opt_str().unwrap(), None);
    assert_eq!(r.read_opt_str().unwrap(), Some("x".to_owned()));
  }
}
