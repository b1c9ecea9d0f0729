//! SDS Controller - Storage Control Plane
//!
//! The controller sits between a northbound API server and the dock agents
//! that drive storage backends. It resolves profiles, classifies their tags
//! into provisioning features and lifecycle operations, places resources on
//! pools, dispatches backend work to the owning dock and runs the lifecycle
//! workflows.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │            API server (northbound, ControllerRequest)            │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ framed RPC
//! ┌───────────────────────────────┴──────────────────────────────────┐
//! │                          Orchestrator                            │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────────┐  │
//! │  │   Profile    │  │    Policy    │  │  Placement Scheduler   │  │
//! │  │   Registry   │  │    Engine    │  │                        │  │
//! │  └──────────────┘  └──────┬───────┘  └────────────────────────┘  │
//! │                     ┌─────┴──────┐   ┌────────────────────────┐  │
//! │                     │ Task Queue │   │     Dock Registry      │  │
//! │                     └────────────┘   └────────────────────────┘  │
//! ├──────────────────────────────────────────────────────────────────┤
//! │               Catalog over the MetadataStore port                │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ framed RPC (DockRequest)
//! ┌───────────────────────────────┴──────────────────────────────────┐
//! │                   Dock agents (DockService)                      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: registries, policy, placement, orchestration, transports
//! - [`domain`]: entities, wire protocol and ports
//! - [`store`]: key layout, in-memory store, typed catalog
//! - [`config`]: layered controller configuration
//! - [`error`]: error types and wire error kinds

pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod store;

// Re-export commonly used types
pub use config::{ControllerConfig, WorkflowConfig};

pub use controlplane::{
    ControllerClient, ControllerMetrics, ControllerServer, DockRegistry, DockServer, OpsServer,
    Orchestrator, PlacementScheduler, PolicyEngine, ProfileRegistry, RestRouter, RpcDockClient,
    TaskQueue,
};

pub use domain::model::{Dock, Pool, Profile, Share, Volume, VolumeAttachment, VolumeSnapshot};
pub use domain::ports::{DockClient, DockService, MetadataStore};
pub use domain::protocol::{ControllerRequest, DockRequest, RpcResponse};

pub use error::{Error, ErrorKind, Result};

pub use store::{Catalog, MemoryStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
