//! Metadata persistence
//!
//! Key layout, the in-memory store, the typed [`Catalog`] used by every
//! control plane component, and the dock route seed file.

pub mod catalog;
pub mod keys;
pub mod memory;
pub mod route_file;

pub use catalog::Catalog;
pub use memory::MemoryStore;
pub use route_file::{DockRouteFile, DEFAULT_DOCK_ROUTE_FILE};
