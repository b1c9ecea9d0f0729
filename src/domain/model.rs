//! Domain Entities
//!
//! Persistent records shared between the orchestrator (writer) and readers
//! through the metadata store. All records serialize as camelCase JSON.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tag map carried by profiles and pools
pub type TagMap = BTreeMap<String, String>;

// =============================================================================
// Lifecycle Stage
// =============================================================================

/// Lifecycle stage a request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStage {
    Create,
    Get,
    List,
    Delete,
}

impl std::fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleStage::Create => write!(f, "create"),
            LifecycleStage::Get => write!(f, "get"),
            LifecycleStage::List => write!(f, "list"),
            LifecycleStage::Delete => write!(f, "delete"),
        }
    }
}

// =============================================================================
// Dock & Pool
// =============================================================================

/// Health of a dock agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DockStatus {
    Available,
    Down,
}

impl std::fmt::Display for DockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DockStatus::Available => write!(f, "available"),
            DockStatus::Down => write!(f, "down"),
        }
    }
}

/// A dock agent co-located with backend storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dock {
    pub id: String,
    pub endpoint: String,
    pub availability_zone: String,
    /// Backend drivers hosted by this dock
    pub backends: Vec<String>,
    pub status: DockStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Dock {
    /// Whether the dock hosts the named backend driver
    pub fn hosts(&self, backend: &str) -> bool {
        self.backends.iter().any(|b| b == backend)
    }

    pub fn is_available(&self) -> bool {
        self.status == DockStatus::Available
    }
}

/// A unit of capacity exposed by a dock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    pub id: String,
    pub name: String,
    pub dock_id: String,
    pub availability_zone: String,
    pub total_capacity_gib: u64,
    pub free_capacity_gib: u64,
    /// Capability tags, e.g. `thinProvision: "true"`
    #[serde(default)]
    pub tags: TagMap,
}

impl Pool {
    /// Whether every `(k, v)` in `required` is present with the same value
    pub fn satisfies(&self, required: &TagMap) -> bool {
        required
            .iter()
            .all(|(k, v)| self.tags.get(k).map(|pv| pv == v).unwrap_or(false))
    }

    /// Allocated capacity in GiB
    pub fn allocated_gib(&self) -> u64 {
        self.total_capacity_gib.saturating_sub(self.free_capacity_gib)
    }
}

// =============================================================================
// Profile
// =============================================================================

/// Named policy bundling feature and operation tags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: TagMap,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Volume
// =============================================================================

/// Volume lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeStatus {
    Creating,
    Available,
    InUse,
    Error,
    Deleting,
}

impl VolumeStatus {
    /// Check whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: VolumeStatus) -> bool {
        use VolumeStatus::*;
        match (self, next) {
            (_, Error) => true,
            (a, b) if *a == b => true,
            (Creating, Available) => true,
            (Available, InUse) | (InUse, Available) => true,
            (Available, Deleting) | (Error, Deleting) => true,
            // A failed precondition on the delete path hands the volume back
            (Deleting, Available) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for VolumeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeStatus::Creating => write!(f, "creating"),
            VolumeStatus::Available => write!(f, "available"),
            VolumeStatus::InUse => write!(f, "in-use"),
            VolumeStatus::Error => write!(f, "error"),
            VolumeStatus::Deleting => write!(f, "deleting"),
        }
    }
}

/// Block volume record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub id: String,
    pub name: String,
    pub size_gib: u64,
    pub status: VolumeStatus,
    pub pool_id: String,
    pub profile_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_volume_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_snapshot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Volume {
    /// Move to `next`, rejecting transitions outside the state machine
    pub fn transition(&mut self, next: VolumeStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidState {
                resource: "volume".into(),
                id: self.id.clone(),
                reason: format!("cannot move from {} to {}", self.status, next),
            });
        }
        self.status = next;
        Ok(())
    }
}

// =============================================================================
// Attachments
// =============================================================================

/// Host descriptor for an attachment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub os_type: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub initiator: String,
}

/// Attachment lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentStatus {
    Attaching,
    Available,
    Error,
    Detaching,
}

impl AttachmentStatus {
    pub fn can_transition_to(&self, next: AttachmentStatus) -> bool {
        use AttachmentStatus::*;
        matches!(
            (self, next),
            (_, Error) | (Attaching, Available) | (Available, Detaching) | (Error, Detaching)
        ) || *self == next
    }
}

impl std::fmt::Display for AttachmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttachmentStatus::Attaching => write!(f, "attaching"),
            AttachmentStatus::Available => write!(f, "available"),
            AttachmentStatus::Error => write!(f, "error"),
            AttachmentStatus::Detaching => write!(f, "detaching"),
        }
    }
}

/// Connection between a volume and a host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAttachment {
    pub id: String,
    pub volume_id: String,
    pub host: HostInfo,
    #[serde(default)]
    pub access_protocol: String,
    /// Opaque backend-populated connection data
    #[serde(default)]
    pub connection_info: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_type: Option<String>,
    pub status: AttachmentStatus,
}

// =============================================================================
// Snapshot
// =============================================================================

/// Snapshot lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Creating,
    Available,
    Error,
    Deleting,
}

impl std::fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotStatus::Creating => write!(f, "creating"),
            SnapshotStatus::Available => write!(f, "available"),
            SnapshotStatus::Error => write!(f, "error"),
            SnapshotStatus::Deleting => write!(f, "deleting"),
        }
    }
}

/// Point-in-time copy of a volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshot {
    pub id: String,
    pub volume_id: String,
    #[serde(default)]
    pub name: String,
    pub size_gib: u64,
    pub status: SnapshotStatus,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub force: bool,
}

// =============================================================================
// Shares
// =============================================================================

/// File protocol of a share
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ShareProtocol {
    Nfs,
    Smb,
    CephFs,
    Hdfs,
}

impl std::fmt::Display for ShareProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShareProtocol::Nfs => write!(f, "NFS"),
            ShareProtocol::Smb => write!(f, "SMB"),
            ShareProtocol::CephFs => write!(f, "CEPHFS"),
            ShareProtocol::Hdfs => write!(f, "HDFS"),
        }
    }
}

/// Shares follow the volume state machine
pub type ShareStatus = VolumeStatus;

/// File share record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Share {
    pub id: String,
    pub name: String,
    pub size_gib: u64,
    pub protocol: ShareProtocol,
    pub status: ShareStatus,
    pub pool_id: String,
    pub profile_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub export_locations: Vec<String>,
}

/// Connection between a share and a host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareAttachment {
    pub id: String,
    pub share_id: String,
    pub host: HostInfo,
    #[serde(default)]
    pub access_protocol: String,
    #[serde(default)]
    pub connection_info: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_dir: Option<String>,
    #[serde(default)]
    pub mounted: bool,
    pub status: AttachmentStatus,
}
