//! The rotation thread's job queue (spec.md §4.6): a distinct queue from
//! `CommandQueue` since jobs are dedup'd by `(type, session_id)` rather
//! than delivered in submit/reply pairs.
//!
//! Grounded on `original_source/src/bin/lttng-sessiond/rotation-thread.c`'s
//! `handle_job_queue`/`enqueue_job`, which checks for a duplicate job
//! under the queue's lock before waking the worker.

use std::{
  collections::VecDeque,
  io::Write,
  sync::Mutex,
};

use mio::unix::pipe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
  ScheduledRotation,
  CheckPendingRotation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
  pub kind: JobKind,
  pub session_id: u64,
}

struct Inner {
  queue: Mutex<VecDeque<Job>>,
}

pub struct RotationJobQueue {
  inner: std::sync::Arc<Inner>,
  wake_writer: Mutex<pipe::Sender>,
}

pub struct RotationJobQueueHandle {
  inner: std::sync::Arc<Inner>,
  pub wake_receiver: pipe::Receiver,
}

impl RotationJobQueue {
  pub fn new() -> std::io::Result<(Self, RotationJobQueueHandle)> {
    let (sender, receiver) = pipe::new()?;
    let inner = std::sync::Arc::new(Inner { queue: Mutex::new(VecDeque::new()) });
    Ok((
      RotationJobQueue { inner: std::sync::Arc::clone(&inner), wake_writer: Mutex::new(sender) },
      RotationJobQueueHandle { inner, wake_receiver: receiver },
    ))
  }

  /// Drops duplicate `(kind, session_id)` jobs under the queue's lock
  /// (spec.md §4.6 "Enqueue discipline"). Timer handlers must not block:
  /// a full wake pipe is tolerated silently, since the worker will drain
  /// the queue on its next wakeup regardless.
  pub fn enqueue(&self, job: Job) {
    let mut queue = self.inner.queue.lock().unwrap();
    if queue.iter().any(|j| *j == job) {
      return;
    }
    queue.push_back(job);
    drop(queue);
    let mut writer = self.wake_writer.lock().unwrap();
    match writer.write(&[1]) {
      Ok(_) => {}
      Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
      Err(e) => log::warn!("rotation job wake write failed: {e}"),
    }
  }
}

impl RotationJobQueueHandle {
  pub fn drain(&self) -> Vec<Job> {
    let mut queue = self.inner.queue.lock().unwrap();
    queue.drain(..).collect()
  }
}
