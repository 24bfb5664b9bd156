//! # CSD Relay Common Library
//!
//! Shared code for the CSD relay service:
//! - Error and result types
//! - Bootstrap configuration helpers (root folder, TOML loading, logging)
//! - SQLite initialization and schema
//! - Lock-contention retry for database writes
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
