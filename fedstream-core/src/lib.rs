//! fedstream core
//!
//! Signed-object distribution for a federated host: signature-gated
//! authoring, per-stream ordered logs with live fan-out, and an identity
//! registry that peers replicate by polling.

pub mod config;
pub mod core_authoring;
pub mod core_federation;
pub mod core_model;
pub mod core_signature;
pub mod core_store;
pub mod core_stream;
pub mod logging;
pub mod metrics;
pub mod shutdown;

pub use config::Config;
pub use core_authoring::{Authored, AuthoringError, AuthoringService};
pub use core_federation::{EntityRegistry, SyncWorker};
pub use core_stream::StreamService;
pub use logging::{init_logging, LogLevel};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _ = LogLevel::Info;
        let _ = Config::default();
    }
}
