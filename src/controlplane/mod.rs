//! Controller Control Plane
//!
//! Registries, policy engine, placement, orchestration and the transports
//! around them.

pub mod api;
pub mod dock_registry;
pub mod metrics;
pub mod orchestrator;
pub mod policy;
pub mod profile_registry;
pub mod rpc;
pub mod scheduler;
pub mod tasks;

pub use api::{OpsServer, RestRouter};
pub use dock_registry::{Deregistration, DockEvent, DockRegistry, RegistryStatsSnapshot};
pub use metrics::ControllerMetrics;
pub use orchestrator::Orchestrator;
pub use policy::{Classified, PolicyEngine, RetryPolicy, TagClass, Workflow};
pub use profile_registry::{ProfileLease, ProfileRegistry, DEFAULT_PROFILE_NAME};
pub use rpc::{ControllerClient, ControllerServer, DockServer, RpcDockClient};
pub use scheduler::PlacementScheduler;
pub use tasks::{TaskInfo, TaskQueue, TaskState, WorkflowFailure};
