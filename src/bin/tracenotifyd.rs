//! Thin daemon harness around the notification engine, for manual runs
//! and integration tests (spec.md §1 Configuration module). Session/
//! channel CRUD and CLI parsing beyond the socket path are out of scope;
//! this binary exists to give the library a runnable entry point the way
//! the teacher's own example drivers do.

use std::path::PathBuf;

use clap::Parser;
use log::info;
use mio::{net::UnixListener, unix::pipe};
use tracenotify::{
  command_queue::CommandQueue,
  config::EngineConfig,
  notification_thread::event_loop::{ChannelSampleSource, NotificationThread, TriggerHitSource},
};

#[derive(Parser, Debug)]
#[command(name = "tracenotifyd", about = "Notification/trigger engine harness")]
struct Args {
  /// Unix-domain socket path notification clients connect to.
  #[arg(long, default_value = "/tmp/tracenotify/client.sock")]
  socket_path: PathBuf,
}

/// No channel-sample or trigger-hit sources are wired up in the harness
/// binary: it exists to exercise the client protocol and command queue,
/// not to connect to a real tracer.
struct NoSamples;
impl ChannelSampleSource for NoSamples {
  fn try_recv(&mut self) -> Option<(tracenotify::notification_thread::channel::ChannelKey, tracenotify::notification_thread::channel::ChannelSample)> {
    None
  }
}

struct NoHits;
impl TriggerHitSource for NoHits {
  fn try_recv(&mut self) -> Option<(u64, Option<tracenotify::capture_payload::RawValue>)> {
    None
  }
}

fn main() -> std::io::Result<()> {
  env_logger::init();
  let args = Args::parse();
  let _config = EngineConfig::default().with_socket_path(args.socket_path.clone());

  if let Some(parent) = args.socket_path.parent() {
    std::fs::create_dir_all(parent)?;
  }
  let _ = std::fs::remove_file(&args.socket_path);
  let listener = UnixListener::bind(&args.socket_path)?;

  let (_command_queue, command_queue_handle) = CommandQueue::new()?;
  let (_quit_sender, quit_receiver) = pipe::new()?;

  info!("tracenotifyd listening on {}", args.socket_path.display());
  let mut thread = NotificationThread::new(listener, quit_receiver, command_queue_handle, NoSamples, NoHits)?;
  thread.run()
}
