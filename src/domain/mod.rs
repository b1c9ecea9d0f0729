//! Domain layer - Entities, wire protocol and port definitions
//!
//! Ports are the traits adapters implement (metadata store, dock transport,
//! dock service), following hexagonal architecture principles.

pub mod model;
pub mod ports;
pub mod protocol;

pub use model::*;
pub use ports::*;
pub use protocol::*;
