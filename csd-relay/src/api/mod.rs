//! HTTP API handlers for csd-relay

pub mod health;
pub mod mapping;
pub mod submissions;
pub mod webhook;

pub use health::health_routes;
pub use mapping::mapping_routes;
pub use submissions::submission_routes;
pub use webhook::webhook_routes;
