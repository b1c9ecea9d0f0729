//! Controller and Dock Transport
//!
//! Length-prefixed frames carrying schema-tagged JSON envelopes over TCP.

pub mod client;
pub mod codec;
pub mod server;

pub use client::{ControllerClient, RpcDockClient};
pub use codec::{Envelope, SchemaId, MAX_FRAME_LEN, PROTOCOL_VERSION};
pub use server::{dispatch_controller_request, dispatch_dock_request, ControllerServer, DockServer};
