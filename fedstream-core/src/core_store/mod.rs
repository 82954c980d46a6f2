/*
    core_store - Durable, transactional object storage

    Holds messages, associations, registry entities and federation
    cursors. Services depend on the ObjectStore / EntityStore contracts;
    SqlStore is the SQLite implementation.
*/

pub mod errors;
pub mod migrations;
pub mod sql_store;
pub mod traits;

pub use errors::{StoreError, StoreResult};
pub use sql_store::SqlStore;
pub use traits::{EntityStore, ObjectStore};
