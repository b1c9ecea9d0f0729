//! Controller and Dock Protocol
//!
//! One request type per operation. [`DockRequest`] is the southbound
//! envelope (controller to dock), [`ControllerRequest`] the northbound one
//! (API server or dock agent to controller). Both are answered with an
//! [`RpcResponse`].

use super::model::{HostInfo, Pool, Profile, ShareProtocol, TagMap};
use crate::error::{Error, ErrorKind, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// =============================================================================
// Southbound: Dock Requests
// =============================================================================

/// Resource family a dock request acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceType {
    Volume,
    VolumeAttachment,
    VolumeSnapshot,
    Share,
    ShareAttachment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVolumeRequest {
    pub dock_id: String,
    pub pool_id: String,
    pub volume_id: String,
    pub name: String,
    pub size_gib: u64,
    pub profile: Profile,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    pub availability_zone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRef {
    pub dock_id: String,
    pub volume_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockRef {
    pub dock_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteVolumeRequest {
    pub dock_id: String,
    pub volume_id: String,
    pub profile: Profile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAttachmentRequest {
    pub dock_id: String,
    pub attachment_id: String,
    pub volume_id: String,
    pub host: HostInfo,
    #[serde(default)]
    pub access_protocol: String,
    #[serde(default)]
    pub do_local_attach: bool,
    #[serde(default)]
    pub multi_path: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    pub dock_id: String,
    pub volume_id: String,
    pub attachment_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAttachmentRequest {
    pub dock_id: String,
    pub volume_id: String,
    pub attachment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSnapshotRequest {
    pub dock_id: String,
    pub snapshot_id: String,
    pub volume_id: String,
    pub name: String,
    pub size_gib: u64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRef {
    pub dock_id: String,
    pub volume_id: String,
    pub snapshot_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShareRequest {
    pub dock_id: String,
    pub pool_id: String,
    pub share_id: String,
    pub name: String,
    pub size_gib: u64,
    pub protocol: ShareProtocol,
    pub profile: Profile,
    #[serde(default)]
    pub description: String,
    pub availability_zone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRef {
    pub dock_id: String,
    pub share_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachShareRequest {
    pub dock_id: String,
    pub share_id: String,
    pub attachment_id: String,
    pub host: HostInfo,
    #[serde(default)]
    pub access_protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareAttachmentRef {
    pub dock_id: String,
    pub share_id: String,
    pub attachment_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountShareRequest {
    pub dock_id: String,
    pub share_id: String,
    pub attachment_id: String,
    pub mount_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_type: Option<String>,
}

/// Southbound request envelope, one variant per dock operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "body", rename_all = "camelCase")]
pub enum DockRequest {
    CreateVolume(CreateVolumeRequest),
    GetVolume(VolumeRef),
    ListVolumes(DockRef),
    DeleteVolume(DeleteVolumeRequest),
    CreateVolumeAttachment(CreateAttachmentRequest),
    GetVolumeAttachment(AttachmentRef),
    ListVolumeAttachments(VolumeRef),
    UpdateVolumeAttachment(UpdateAttachmentRequest),
    DeleteVolumeAttachment(AttachmentRef),
    CreateVolumeSnapshot(CreateSnapshotRequest),
    GetVolumeSnapshot(SnapshotRef),
    ListVolumeSnapshots(VolumeRef),
    DeleteVolumeSnapshot(SnapshotRef),
    CreateShare(CreateShareRequest),
    GetShare(ShareRef),
    ListShares(DockRef),
    DeleteShare(ShareRef),
    AttachShare(AttachShareRequest),
    DetachShare(ShareAttachmentRef),
    MountShare(MountShareRequest),
    UnmountShare(ShareAttachmentRef),
}

impl DockRequest {
    /// Operation name used in logs and metrics
    pub fn operation(&self) -> &'static str {
        match self {
            DockRequest::CreateVolume(_) => "CreateVolume",
            DockRequest::GetVolume(_) => "GetVolume",
            DockRequest::ListVolumes(_) => "ListVolumes",
            DockRequest::DeleteVolume(_) => "DeleteVolume",
            DockRequest::CreateVolumeAttachment(_) => "CreateVolumeAttachment",
            DockRequest::GetVolumeAttachment(_) => "GetVolumeAttachment",
            DockRequest::ListVolumeAttachments(_) => "ListVolumeAttachments",
            DockRequest::UpdateVolumeAttachment(_) => "UpdateVolumeAttachment",
            DockRequest::DeleteVolumeAttachment(_) => "DeleteVolumeAttachment",
            DockRequest::CreateVolumeSnapshot(_) => "CreateVolumeSnapshot",
            DockRequest::GetVolumeSnapshot(_) => "GetVolumeSnapshot",
            DockRequest::ListVolumeSnapshots(_) => "ListVolumeSnapshots",
            DockRequest::DeleteVolumeSnapshot(_) => "DeleteVolumeSnapshot",
            DockRequest::CreateShare(_) => "CreateShare",
            DockRequest::GetShare(_) => "GetShare",
            DockRequest::ListShares(_) => "ListShares",
            DockRequest::DeleteShare(_) => "DeleteShare",
            DockRequest::AttachShare(_) => "AttachShare",
            DockRequest::DetachShare(_) => "DetachShare",
            DockRequest::MountShare(_) => "MountShare",
            DockRequest::UnmountShare(_) => "UnmountShare",
        }
    }

    /// Resource family of this request
    pub fn resource_type(&self) -> ResourceType {
        match self {
            DockRequest::CreateVolume(_)
            | DockRequest::GetVolume(_)
            | DockRequest::ListVolumes(_)
            | DockRequest::DeleteVolume(_) => ResourceType::Volume,
            DockRequest::CreateVolumeAttachment(_)
            | DockRequest::GetVolumeAttachment(_)
            | DockRequest::ListVolumeAttachments(_)
            | DockRequest::UpdateVolumeAttachment(_)
            | DockRequest::DeleteVolumeAttachment(_) => ResourceType::VolumeAttachment,
            DockRequest::CreateVolumeSnapshot(_)
            | DockRequest::GetVolumeSnapshot(_)
            | DockRequest::ListVolumeSnapshots(_)
            | DockRequest::DeleteVolumeSnapshot(_) => ResourceType::VolumeSnapshot,
            DockRequest::CreateShare(_)
            | DockRequest::GetShare(_)
            | DockRequest::ListShares(_)
            | DockRequest::DeleteShare(_) => ResourceType::Share,
            DockRequest::AttachShare(_)
            | DockRequest::DetachShare(_)
            | DockRequest::MountShare(_)
            | DockRequest::UnmountShare(_) => ResourceType::ShareAttachment,
        }
    }

    /// Dock the request is addressed to
    pub fn dock_id(&self) -> &str {
        match self {
            DockRequest::CreateVolume(r) => &r.dock_id,
            DockRequest::GetVolume(r) | DockRequest::ListVolumeAttachments(r) => &r.dock_id,
            DockRequest::ListVolumeSnapshots(r) => &r.dock_id,
            DockRequest::ListVolumes(r) | DockRequest::ListShares(r) => &r.dock_id,
            DockRequest::DeleteVolume(r) => &r.dock_id,
            DockRequest::CreateVolumeAttachment(r) => &r.dock_id,
            DockRequest::GetVolumeAttachment(r) | DockRequest::DeleteVolumeAttachment(r) => {
                &r.dock_id
            }
            DockRequest::UpdateVolumeAttachment(r) => &r.dock_id,
            DockRequest::CreateVolumeSnapshot(r) => &r.dock_id,
            DockRequest::GetVolumeSnapshot(r) | DockRequest::DeleteVolumeSnapshot(r) => {
                &r.dock_id
            }
            DockRequest::CreateShare(r) => &r.dock_id,
            DockRequest::GetShare(r) | DockRequest::DeleteShare(r) => &r.dock_id,
            DockRequest::AttachShare(r) => &r.dock_id,
            DockRequest::DetachShare(r) | DockRequest::UnmountShare(r) => &r.dock_id,
            DockRequest::MountShare(r) => &r.dock_id,
        }
    }

    /// Get/List/Delete may be reissued safely after a transport failure
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self,
            DockRequest::GetVolume(_)
                | DockRequest::ListVolumes(_)
                | DockRequest::DeleteVolume(_)
                | DockRequest::GetVolumeAttachment(_)
                | DockRequest::ListVolumeAttachments(_)
                | DockRequest::DeleteVolumeAttachment(_)
                | DockRequest::GetVolumeSnapshot(_)
                | DockRequest::ListVolumeSnapshots(_)
                | DockRequest::DeleteVolumeSnapshot(_)
                | DockRequest::GetShare(_)
                | DockRequest::ListShares(_)
                | DockRequest::DeleteShare(_)
        )
    }
}

impl std::fmt::Display for DockRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(dock={})", self.operation(), self.dock_id())
    }
}

// =============================================================================
// Response Envelope
// =============================================================================

/// Outcome of an RPC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Success,
    Failure,
}

/// Structured error carried by a failed response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Uniform response envelope
///
/// `message` carries the JSON-serialized view of the created or fetched
/// object on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
    #[serde(default)]
    pub message: String,
}

impl RpcResponse {
    /// Successful response carrying `value` as JSON
    pub fn success<T: Serialize>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(message) => Self {
                status: ResponseStatus::Success,
                error: None,
                message,
            },
            Err(e) => Self::failure(&Error::Internal(format!("encode response: {}", e))),
        }
    }

    /// Successful response passing `message` through unchanged
    pub fn raw(message: String) -> Self {
        Self {
            status: ResponseStatus::Success,
            error: None,
            message,
        }
    }

    /// Failed response classified from `err`
    pub fn failure(err: &Error) -> Self {
        Self {
            status: ResponseStatus::Failure,
            error: Some(WireError {
                kind: err.kind(),
                message: match err {
                    // Backend sub-messages travel verbatim
                    Error::BackendError { message } => message.clone(),
                    other => other.to_string(),
                },
            }),
            message: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Convert into the success payload or a classified error
    ///
    /// A failure without a structured error means the dock could not say
    /// what went wrong, which is reported as [`Error::DockUnavailable`].
    pub fn into_result(self, dock: &str) -> Result<String> {
        match (self.status, self.error) {
            (ResponseStatus::Success, _) => Ok(self.message),
            (ResponseStatus::Failure, Some(err)) => Err(Error::from_wire(err.kind, err.message)),
            (ResponseStatus::Failure, None) => Err(Error::DockUnavailable {
                dock: dock.to_string(),
                reason: if self.message.is_empty() {
                    "dock returned failure without detail".into()
                } else {
                    self.message
                },
            }),
        }
    }

    /// Decode the success payload into `T`
    pub fn decode<T: DeserializeOwned>(self, dock: &str) -> Result<T> {
        let message = self.into_result(dock)?;
        Ok(serde_json::from_str(&message)?)
    }
}

// =============================================================================
// Northbound: Controller Requests
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVolumeParams {
    pub name: String,
    pub size_gib: u64,
    /// Profile name; `default` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAttachmentParams {
    pub volume_id: String,
    pub host: HostInfo,
    #[serde(default)]
    pub access_protocol: String,
    #[serde(default)]
    pub do_local_attach: bool,
    #[serde(default)]
    pub multi_path: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAttachmentParams {
    pub attachment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSnapshotParams {
    pub volume_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShareParams {
    pub name: String,
    pub size_gib: u64,
    pub protocol: ShareProtocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachShareParams {
    pub share_id: String,
    pub host: HostInfo,
    #[serde(default)]
    pub access_protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountShareParams {
    pub attachment_id: String,
    pub mount_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDockParams {
    pub endpoint: String,
    pub backends: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: TagMap,
}

/// Partial update of a profile; absent fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<TagMap>,
}

/// Northbound request envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "op",
    content = "body",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ControllerRequest {
    // Volumes
    CreateVolume(CreateVolumeParams),
    GetVolume { volume_id: String },
    ListVolumes { dock_id: String },
    DeleteVolume { volume_id: String },
    CreateVolumeAttachment(CreateAttachmentParams),
    GetVolumeAttachment { attachment_id: String },
    ListVolumeAttachments { volume_id: String },
    UpdateVolumeAttachment(UpdateAttachmentParams),
    DeleteVolumeAttachment { attachment_id: String },
    CreateVolumeSnapshot(CreateSnapshotParams),
    GetVolumeSnapshot { snapshot_id: String },
    ListVolumeSnapshots { volume_id: String },
    DeleteVolumeSnapshot { snapshot_id: String },
    // Shares
    CreateShare(CreateShareParams),
    GetShare { share_id: String },
    ListShares { dock_id: String },
    DeleteShare { share_id: String },
    AttachShare(AttachShareParams),
    DetachShare { attachment_id: String },
    MountShare(MountShareParams),
    UnmountShare { attachment_id: String },
    // Docks
    RegisterDock(RegisterDockParams),
    DeregisterDock { endpoint: String },
    DockHeartbeat { dock_id: String },
    ReportPools { dock_id: String, pools: Vec<Pool> },
    ListDocks,
    // Profiles
    CreateProfile(ProfileSpec),
    GetProfile { profile_id: String },
    ListProfiles,
    UpdateProfile { profile_id: String, patch: ProfilePatch },
    DeleteProfile { profile_id: String },
    AddProfileTag { profile_id: String, key: String, value: String },
    RemoveProfileTag { profile_id: String, key: String },
}

impl ControllerRequest {
    pub fn operation(&self) -> &'static str {
        match self {
            ControllerRequest::CreateVolume(_) => "CreateVolume",
            ControllerRequest::GetVolume { .. } => "GetVolume",
            ControllerRequest::ListVolumes { .. } => "ListVolumes",
            ControllerRequest::DeleteVolume { .. } => "DeleteVolume",
            ControllerRequest::CreateVolumeAttachment(_) => "CreateVolumeAttachment",
            ControllerRequest::GetVolumeAttachment { .. } => "GetVolumeAttachment",
            ControllerRequest::ListVolumeAttachments { .. } => "ListVolumeAttachments",
            ControllerRequest::UpdateVolumeAttachment(_) => "UpdateVolumeAttachment",
            ControllerRequest::DeleteVolumeAttachment { .. } => "DeleteVolumeAttachment",
            ControllerRequest::CreateVolumeSnapshot(_) => "CreateVolumeSnapshot",
            ControllerRequest::GetVolumeSnapshot { .. } => "GetVolumeSnapshot",
            ControllerRequest::ListVolumeSnapshots { .. } => "ListVolumeSnapshots",
            ControllerRequest::DeleteVolumeSnapshot { .. } => "DeleteVolumeSnapshot",
            ControllerRequest::CreateShare(_) => "CreateShare",
            ControllerRequest::GetShare { .. } => "GetShare",
            ControllerRequest::ListShares { .. } => "ListShares",
            ControllerRequest::DeleteShare { .. } => "DeleteShare",
            ControllerRequest::AttachShare(_) => "AttachShare",
            ControllerRequest::DetachShare { .. } => "DetachShare",
            ControllerRequest::MountShare(_) => "MountShare",
            ControllerRequest::UnmountShare { .. } => "UnmountShare",
            ControllerRequest::RegisterDock(_) => "RegisterDock",
            ControllerRequest::DeregisterDock { .. } => "DeregisterDock",
            ControllerRequest::DockHeartbeat { .. } => "DockHeartbeat",
            ControllerRequest::ReportPools { .. } => "ReportPools",
            ControllerRequest::ListDocks => "ListDocks",
            ControllerRequest::CreateProfile(_) => "CreateProfile",
            ControllerRequest::GetProfile { .. } => "GetProfile",
            ControllerRequest::ListProfiles => "ListProfiles",
            ControllerRequest::UpdateProfile { .. } => "UpdateProfile",
            ControllerRequest::DeleteProfile { .. } => "DeleteProfile",
            ControllerRequest::AddProfileTag { .. } => "AddProfileTag",
            ControllerRequest::RemoveProfileTag { .. } => "RemoveProfileTag",
        }
    }
}

/// Northbound call with an optional caller deadline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
    pub request: ControllerRequest,
}

/// Marker returned by idempotent delete/deregister operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RemovalOutcome {
    Removed,
    NotFound,
}
