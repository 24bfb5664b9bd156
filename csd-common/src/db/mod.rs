//! Database initialization and write helpers

pub mod init;
pub mod retry;

pub use init::*;
pub use retry::retry_on_lock;
