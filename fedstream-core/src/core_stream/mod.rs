//! Stream log & notifier
//!
//! Every stream id gets an append-only ordered log (the backlog) and a
//! live channel, both created on first use.

pub mod errors;
pub mod key;
pub mod log;
pub mod notifier;
pub mod service;

pub use errors::{StreamError, StreamResult};
pub use key::OrderingKeyGenerator;
pub use log::{MemoryStreamLog, SqlStreamLog, StreamLog};
pub use notifier::{BroadcastNotifier, StreamNotifier, Subscription};
pub use service::{BacklogCursor, StreamService};
