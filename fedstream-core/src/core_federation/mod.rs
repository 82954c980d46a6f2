//! Federation registry
//!
//! Identity / host directory shared between independently operated hosts
//! through periodic pull-based sync.

pub mod errors;
pub mod registry;
pub mod sync;

pub use errors::{FederationError, FederationResult};
pub use registry::{ApplyOutcome, EntityRegistry};
pub use sync::{LocalPeerClient, PeerClient, SyncReport, SyncRound, SyncWorker};
