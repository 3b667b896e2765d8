//! The notification thread (C3): state/indexes, the edge-triggered
//! evaluation engine, and the mio-based event loop (spec.md §4.3–§4.5).

pub mod channel;
pub mod client;
pub mod evaluation_engine;
pub mod event_loop;
pub mod state;

pub use state::{condition_hash, NotificationThreadState};
