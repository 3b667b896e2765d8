//! Trace-chunk registry (C2, spec.md §4.2).
//!
//! Grounded on `original_source/src/common/trace-chunk.c`: credential-
//! scoped directory creation, close-order (session-output handle before
//! chunk handle), and the add-unique publish discipline where two
//! concurrent publishers of an equivalent chunk must observe exactly one
//! surviving element.

use std::{
  fs,
  path::{Path, PathBuf},
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
  },
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkCredentials {
  UseCurrentUser,
  Explicit { uid: u32, gid: u32 },
}

/// A scope-bound directory handle: a path plus a guarantee that `close()`
/// (or `Drop`) releases it exactly once, mirroring the teacher's "every
/// resource is a scope-bound owner that releases on drop" discipline
/// (spec.md §9 "Resource scoping").
#[derive(Debug)]
pub struct DirHandle {
  path: PathBuf,
  open: bool,
}

impl DirHandle {
  pub fn open(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into(), open: true }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn close(&mut self) {
    self.open = false;
  }

  pub fn is_open(&self) -> bool {
    self.open
  }
}

#[derive(Debug)]
pub struct TraceChunk {
  pub id: Option<u64>,
  pub created_at: DateTime<Utc>,
  pub credentials: ChunkCredentials,
  pub session_output_dir: DirHandle,
  pub chunk_dir: DirHandle,
  name: String,
  refcount: Arc<AtomicU64>,
}

impl TraceChunk {
  pub fn new(
    id: Option<u64>,
    created_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    credentials: ChunkCredentials,
    session_output_dir: DirHandle,
    chunk_dir: DirHandle,
  ) -> Self {
    let name = match id {
      Some(id) => match ended_at {
        Some(end) => format!(
          "{}-{}-{id}",
          created_at.format("%Y%m%dT%H%M%S"),
          end.format("%Y%m%dT%H%M%S")
        ),
        None => format!("{}-{id}", created_at.format("%Y%m%dT%H%M%S")),
      },
      None => String::new(),
    };
    Self {
      id,
      created_at,
      credentials,
      session_output_dir,
      chunk_dir,
      name,
      refcount: Arc::new(AtomicU64::new(1)),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn refcount(&self) -> u64 {
    self.refcount.load(Ordering::Acquire)
  }

  /// Acquires a new strong reference, unless the chunk has already hit
  /// zero (spec.md §8 invariant 6: "the trace-chunk registry never
  /// returns a chunk whose strong refcount has reached zero").
  fn try_acquire(&self) -> bool {
    loop {
      let current = self.refcount.load(Ordering::Acquire);
      if current == 0 {
        return false;
      }
      if self
        .refcount
        .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
      {
        return true;
      }
    }
  }

  fn release(&self) -> u64 {
    self.refcount.fetch_sub(1, Ordering::AcqRel) - 1
  }

  /// Creates a subdirectory under `chunk_dir`, assuming the chunk's
  /// credentials for the operation. Requires credentials to already be
  /// set (mirrors the original's "credentials must be set before a
  /// subdirectory is created" fatal-error path).
  pub fn create_subdirectory(&self, relative: impl AsRef<Path>) -> EngineResult<PathBuf> {
    let target = self.chunk_dir.path().join(relative);
    match self.credentials {
      ChunkCredentials::UseCurrentUser => {
        fs::create_dir_all(&target)?;
      }
      ChunkCredentials::Explicit { uid, gid } => {
        fs::create_dir_all(&target)?;
        assume_credentials_for_directory(&target, uid, gid)?;
      }
    }
    Ok(target)
  }

  /// Clears the session-output directory handle first, then the chunk
  /// directory handle (spec.md §4.2 "Chunk *close*").
  pub fn close(&mut self) {
    self.session_output_dir.close();
    self.chunk_dir.close();
  }
}

#[cfg(unix)]
fn assume_credentials_for_directory(path: &Path, uid: u32, gid: u32) -> EngineResult<()> {
  use std::os::unix::fs::chown;
  chown(path, Some(uid), Some(gid))
    .map_err(|e| EngineError::Fatal(format!("failed to chown {}: {e}", path.display())))
}

#[cfg(not(unix))]
fn assume_credentials_for_directory(_path: &Path, _uid: u32, _gid: u32) -> EngineResult<()> {
  Ok(())
}

/// Identifies a chunk within a session; `chunk_id = None` is a distinct
/// key slot for anonymous chunks (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkKey {
  pub session_id: u64,
  pub chunk_id: Option<u64>,
}

/// Structural equivalence used by `publish`'s add-unique discipline: two
/// chunks with the same key and name are considered the same chunk.
fn chunks_equivalent(a: &TraceChunk, b: &TraceChunk) -> bool {
  a.id == b.id && a.name() == b.name()
}

#[derive(Default)]
pub struct TraceChunkRegistry {
  published: DashMap<ChunkKey, Arc<TraceChunk>>,
}

impl TraceChunkRegistry {
  pub fn new() -> Self {
    Self { published: DashMap::new() }
  }

  /// Publishes `chunk` under `key`, or returns a reference to an
  /// equivalent chunk already published there. If a racing publisher's
  /// entry can't have its reference acquired (it raced the final
  /// release), retries the insertion with our own chunk (spec.md §4.2).
  pub fn publish(&self, key: ChunkKey, chunk: Arc<TraceChunk>) -> Arc<TraceChunk> {
    loop {
      match self.published.entry(key) {
        dashmap::mapref::entry::Entry::Vacant(slot) => {
          slot.insert(Arc::clone(&chunk));
          return chunk;
        }
        dashmap::mapref::entry::Entry::Occupied(mut slot) => {
          let existing = slot.get().clone();
          if chunks_equivalent(&existing, &chunk) {
            if existing.try_acquire() {
              return existing;
            }
            // Racing release already dropped this slot to zero; replace
            // it with our copy and retry the loop to re-check races.
            slot.insert(Arc::clone(&chunk));
            return chunk;
          }
          // Different chunk occupies this key: not expected under the
          // (session_id, chunk_id) keying discipline, but surface the
          // existing entry rather than silently clobbering it.
          return existing;
        }
      }
    }
  }

  pub fn lookup(&self, key: &ChunkKey) -> Option<Arc<TraceChunk>> {
    let entry = self.published.get(key)?;
    if entry.try_acquire() {
      Some(Arc::clone(&entry))
    } else {
      None
    }
  }

  /// Drops the registry's own reference to the chunk at `key`, removing
  /// the slot if the refcount reaches zero.
  pub fn unpublish(&self, key: &ChunkKey) {
    let should_remove = match self.published.get(key) {
      Some(entry) => entry.release() == 0,
      None => false,
    };
    if should_remove {
      self.published.remove(key);
    }
  }

  pub fn len(&self) -> usize {
    self.published.len()
  }

  pub fn is_empty(&self) -> bool {
    self.published.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn make_chunk(id: Option<u64>) -> Arc<TraceChunk> {
    make_chunk_at(id, Utc::now())
  }

  fn make_chunk_at(id: Option<u64>, created_at: DateTime<Utc>) -> Arc<TraceChunk> {
    let dir = tempfile::tempdir().expect("tempdir");
    Arc::new(TraceChunk::new(
      id,
      created_at,
      None,
      ChunkCredentials::UseCurrentUser,
      DirHandle::open(dir.path()),
      DirHandle::open(dir.path().join("chunk")),
    ))
  }

  #[test]
  fn anonymous_chunk_has_empty_name() {
    let chunk = make_chunk(None);
    assert_eq!(chunk.name(), "");
  }

  #[test]
  fn named_chunk_embeds_timestamp_and_id() {
    let chunk = make_chunk(Some(3));
    assert!(chunk.name().ends_with("-3"));
  }

  #[test]
  fn concurrent_publish_of_equivalent_chunk_yields_one_survivor() {
    let registry = TraceChunkRegistry::new();
    let key = ChunkKey { session_id: 7, chunk_id: Some(3) };
    let now = Utc::now();
    let a = make_chunk_at(Some(3), now);
    let b = make_chunk_at(Some(3), now);

    let published_a = registry.publish(key, a);
    let published_b = registry.publish(key, b);

    assert!(Arc::ptr_eq(&published_a, &published_b));
    assert_eq!(published_a.refcount(), 2);
    assert_eq!(registry.len(), 1);
  }

  #[test]
  fn close_clears_session_dir_before_chunk_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut chunk = TraceChunk::new(
      Some(1),
      Utc::now(),
      None,
      ChunkCredentials::UseCurrentUser,
      DirHandle::open(dir.path()),
      DirHandle::open(dir.path().join("b")),
    );
    chunk.close();
    assert!(!chunk.session_output_dir.is_open());
    assert!(!chunk.chunk_dir.is_open());
  }

  #[test]
  fn distinct_chunk_id_is_a_distinct_key_slot() {
    let registry = TraceChunkRegistry::new();
    let anon_key = ChunkKey { session_id: 1, chunk_id: None };
    let id_key = ChunkKey { session_id: 1, chunk_id: Some(0) };
    registry.publish(anon_key, make_chunk(None));
    registry.publish(id_key, make_chunk(Some(0)));
    assert_eq!(registry.len(), 2);
  }

  #[test]
  fn refcount_never_returns_a_freed_chunk() {
    let registry = TraceChunkRegistry::new();
    let key = ChunkKey { session_id: 1, chunk_id: Some(1) };
    let chunk = make_chunk(Some(1));
    registry.publish(key, chunk);
    registry.unpublish(&key); // drop registry's own ref -> refcount 0, removed
    assert!(registry.lookup(&key).is_none());
  }
}
