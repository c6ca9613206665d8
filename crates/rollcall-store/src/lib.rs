//! rollcall-store — SQLite persistence for the attendance engine.
//!
//! Two repositories over a borrowed [`rusqlite::Connection`]: the
//! identity registry (owns identities and their descriptors) and the
//! attendance ledger (owns per-day presence records). The daemon runs
//! them through tokio-rusqlite; tests use them directly.

pub mod error;
pub mod ledger;
pub mod registry;
pub mod schema;

pub use error::{StoreError, StoreResult};
