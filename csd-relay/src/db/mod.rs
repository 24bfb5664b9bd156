//! Database access for csd-relay

pub mod mapping_history;
pub mod submissions;

pub use submissions::{StoreError, StoreResult};
