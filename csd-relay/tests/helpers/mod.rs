//! Test helpers for csd-relay integration tests
//!
//! - FakePortal: scripted `PortalClient` that counts calls and concurrency
//! - TestRelay: full router over a temporary database and mapping file

#![allow(dead_code)]

pub mod fake_portal;
pub mod test_relay;

pub use fake_portal::{rejected, success, transient, FakePortal};
pub use test_relay::{complete_payload, webhook_body, TestRelay, TEST_MAPPING};
