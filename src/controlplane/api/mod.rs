//! Operator API
//!
//! HTTP surface for health, metrics and workflow task state.

pub mod rest;
pub mod server;

pub use rest::{ApiErrorResponse, ReadinessResponse, RestRouter};
pub use server::OpsServer;
