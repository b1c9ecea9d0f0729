//! Domain Ports - Core trait definitions for the controller
//!
//! These traits define the boundaries between orchestration logic and
//! external systems: the metadata store, the transport towards dock agents,
//! and the operation set every dock agent must serve.

use super::model::{Share, ShareAttachment, Volume, VolumeAttachment, VolumeSnapshot};
use super::protocol::*;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

// =============================================================================
// Metadata Store Port
// =============================================================================

/// A stored value together with its revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: Bytes,
    /// Revision of the last write; strictly increasing per store
    pub version: u64,
}

/// Durable key/value persistence addressed by URL-style keys
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Read a key
    async fn get(&self, key: &str) -> Result<Option<Versioned>>;

    /// Unconditional write; returns the new revision
    async fn put(&self, key: &str, value: Bytes) -> Result<u64>;

    /// Write only if the current revision equals `expected`
    ///
    /// `None` means the key must not exist. A mismatch fails with
    /// [`crate::Error::StoreConflict`].
    async fn compare_and_set(&self, key: &str, expected: Option<u64>, value: Bytes)
        -> Result<u64>;

    /// Remove a key; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// All entries whose key starts with `prefix`, in key order
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Versioned)>>;

    /// Check store reachability
    async fn health_check(&self) -> Result<bool>;
}

// =============================================================================
// Dock Transport Port
// =============================================================================

/// Transport adapter towards dock agents
///
/// Implementations open a stream to `endpoint`, issue the request and return
/// the response envelope. Transport failures surface as
/// [`crate::Error::DockUnavailable`].
#[async_trait]
pub trait DockClient: Send + Sync {
    async fn send(&self, endpoint: &str, request: DockRequest) -> Result<RpcResponse>;
}

// =============================================================================
// Dock Service Port
// =============================================================================

/// Operations every dock agent must implement
#[async_trait]
pub trait DockService: Send + Sync {
    // Volumes
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume>;
    async fn get_volume(&self, req: VolumeRef) -> Result<Volume>;
    async fn list_volumes(&self, req: DockRef) -> Result<Vec<Volume>>;
    async fn delete_volume(&self, req: DeleteVolumeRequest) -> Result<()>;

    // Volume attachments
    async fn create_volume_attachment(
        &self,
        req: CreateAttachmentRequest,
    ) -> Result<VolumeAttachment>;
    async fn get_volume_attachment(&self, req: AttachmentRef) -> Result<VolumeAttachment>;
    async fn list_volume_attachments(&self, req: VolumeRef) -> Result<Vec<VolumeAttachment>>;
    async fn update_volume_attachment(
        &self,
        req: UpdateAttachmentRequest,
    ) -> Result<VolumeAttachment>;
    async fn delete_volume_attachment(&self, req: AttachmentRef) -> Result<()>;

    // Snapshots
    async fn create_volume_snapshot(&self, req: CreateSnapshotRequest) -> Result<VolumeSnapshot>;
    async fn get_volume_snapshot(&self, req: SnapshotRef) -> Result<VolumeSnapshot>;
    async fn list_volume_snapshots(&self, req: VolumeRef) -> Result<Vec<VolumeSnapshot>>;
    async fn delete_volume_snapshot(&self, req: SnapshotRef) -> Result<()>;

    // Shares
    async fn create_share(&self, req: CreateShareRequest) -> Result<Share>;
    async fn get_share(&self, req: ShareRef) -> Result<Share>;
    async fn list_shares(&self, req: DockRef) -> Result<Vec<Share>>;
    async fn delete_share(&self, req: ShareRef) -> Result<()>;
    async fn attach_share(&self, req: AttachShareRequest) -> Result<ShareAttachment>;
    async fn detach_share(&self, req: ShareAttachmentRef) -> Result<()>;
    async fn mount_share(&self, req: MountShareRequest) -> Result<ShareAttachment>;
    async fn unmount_share(&self, req: ShareAttachmentRef) -> Result<ShareAttachment>;
}

// =============================================================================
// Type Aliases for Dependency Injection
// =============================================================================

pub type MetadataStoreRef = Arc<dyn MetadataStore>;
pub type DockClientRef = Arc<dyn DockClient>;
pub type DockServiceRef = Arc<dyn DockService>;
