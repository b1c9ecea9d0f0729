//! Orchestrator - The "Brain"
//!
//! One entry point per operation. Provisioning composes profile lookup,
//! tag classification, placement, dock dispatch and the asynchronous
//! workflow; mutations resolve the dock from the resource's recorded pool.
//!
//! Every entry point takes the caller's cancellation token. Dock calls abort
//! when it fires and asynchronous workflows run under a child token, so a
//! lapsed deadline stops them at their next poll boundary.

use super::dock_registry::{Deregistration, DockRegistry};
use super::metrics::ControllerMetrics;
use super::policy::{
    delete_snapshot_policy_enabled, ExecutorContext, PolicyEngine, TAG_DELETE_SNAPSHOT_POLICY,
};
use super::profile_registry::ProfileRegistry;
use super::scheduler::PlacementScheduler;
use super::tasks::TaskQueue;
use crate::domain::model::{
    AttachmentStatus, Dock, LifecycleStage, Share, ShareAttachment, SnapshotStatus, Volume,
    VolumeAttachment, VolumeSnapshot, VolumeStatus,
};
use crate::domain::ports::DockClientRef;
use crate::domain::protocol::{
    AttachShareParams, AttachShareRequest, AttachmentRef, CreateAttachmentParams,
    CreateAttachmentRequest, CreateShareParams, CreateShareRequest, CreateSnapshotParams,
    CreateSnapshotRequest, CreateVolumeParams, CreateVolumeRequest, DeleteVolumeRequest, DockRef,
    DockRequest, MountShareParams, MountShareRequest, RemovalOutcome, ShareAttachmentRef,
    ShareRef, SnapshotRef, UpdateAttachmentParams, UpdateAttachmentRequest, VolumeRef,
};
use crate::error::{Error, Result};
use crate::store::Catalog;
use chrono::Utc;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// =============================================================================
// Orchestrator
// =============================================================================

/// Public entry point for every storage operation
pub struct Orchestrator {
    catalog: Catalog,
    docks: Arc<DockRegistry>,
    profiles: Arc<ProfileRegistry>,
    policy: PolicyEngine,
    scheduler: PlacementScheduler,
    dock_client: DockClientRef,
    tasks: Arc<TaskQueue>,
    metrics: Arc<ControllerMetrics>,
}

impl Orchestrator {
    pub fn new(
        catalog: Catalog,
        docks: Arc<DockRegistry>,
        profiles: Arc<ProfileRegistry>,
        policy: PolicyEngine,
        dock_client: DockClientRef,
        tasks: Arc<TaskQueue>,
        metrics: Arc<ControllerMetrics>,
    ) -> Arc<Self> {
        let scheduler = PlacementScheduler::new(catalog.clone(), docks.clone());
        Arc::new(Self {
            catalog,
            docks,
            profiles,
            policy,
            scheduler,
            dock_client,
            tasks,
            metrics,
        })
    }

    pub fn docks(&self) -> &Arc<DockRegistry> {
        &self.docks
    }

    pub fn profiles(&self) -> &Arc<ProfileRegistry> {
        &self.profiles
    }

    pub fn tasks(&self) -> &Arc<TaskQueue> {
        &self.tasks
    }

    pub fn metrics(&self) -> &Arc<ControllerMetrics> {
        &self.metrics
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    // =========================================================================
    // Volumes
    // =========================================================================

    /// Provision a volume on the best pool for its profile
    ///
    /// The asynchronous workflow is enqueued after the record is persisted;
    /// its failures never fail this call.
    pub async fn create_volume(
        &self,
        params: CreateVolumeParams,
        cancel: &CancellationToken,
    ) -> Result<Volume> {
        if params.size_gib == 0 {
            return Err(Error::Validation("volume size must be positive".into()));
        }
        let (profile, lease) = self.profiles.lease(params.profile.as_deref()).await?;
        let classified = self.policy.classify(&profile.tags, LifecycleStage::Create)?;

        let pool = self
            .scheduler
            .pick_pool(
                &classified.sync,
                params.size_gib,
                params.availability_zone.as_deref(),
            )
            .await?;
        let dock = self.docks.find_by_pool(&pool.id).await?;
        self.catalog.reserve_capacity(&pool.id, params.size_gib).await?;

        let volume_id = Uuid::new_v4().to_string();
        let request = DockRequest::CreateVolume(CreateVolumeRequest {
            dock_id: dock.id.clone(),
            pool_id: pool.id.clone(),
            volume_id: volume_id.clone(),
            name: params.name.clone(),
            size_gib: params.size_gib,
            profile: profile.clone(),
            description: params.description.clone(),
            snapshot_id: params.snapshot_id.clone(),
            availability_zone: pool.availability_zone.clone(),
        });

        let created = match self.dispatch(&dock, request, cancel).await {
            Ok(raw) => parse::<Volume>(&raw),
            Err(e) => Err(e),
        };
        let mut volume = match created {
            Ok(volume) => volume,
            Err(e) => {
                self.catalog.release_capacity(&pool.id, params.size_gib).await?;
                return Err(e);
            }
        };
        volume.id = volume_id;
        volume.pool_id = pool.id.clone();
        volume.profile_id = profile.id.clone();
        if volume.created_at.is_none() {
            volume.created_at = Some(Utc::now());
        }
        if let Err(e) = self.catalog.put_volume(&volume).await {
            error!(
                "Volume {} exists on dock {} but could not be recorded: {}",
                volume.id, dock.id, e
            );
            self.release_after_failure(&pool.id, params.size_gib).await;
            return Err(e);
        }
        drop(lease);
        info!(
            "Created volume {} ({} GiB) on pool {} via dock {}",
            volume.id, volume.size_gib, pool.id, dock.id
        );

        if !classified.asynchronous.is_empty() {
            let token = cancel.child_token();
            let ctx = ExecutorContext::new(
                self.catalog.clone(),
                self.dock_client.clone(),
                dock,
                volume.clone(),
                self.policy.retry_policy(),
                token.clone(),
            );
            let label = format!("CreateVolume {}", volume.id);
            match self.policy.compile(label, &classified.asynchronous, &ctx).await {
                Ok(workflow) => {
                    self.tasks
                        .enqueue("CreateVolume", &volume.id, workflow, token);
                }
                Err(e) => {
                    self.metrics.record_workflow("failed");
                    error!("Workflow for volume {} not scheduled: {}", volume.id, e);
                }
            }
        }
        Ok(volume)
    }

    pub async fn get_volume(&self, volume_id: &str, cancel: &CancellationToken) -> Result<String> {
        let volume = self.catalog.require_volume(volume_id).await?;
        let dock = self.docks.find_by_pool(&volume.pool_id).await?;
        let request = DockRequest::GetVolume(VolumeRef {
            dock_id: dock.id.clone(),
            volume_id: volume_id.to_string(),
        });
        self.dispatch(&dock, request, cancel).await
    }

    pub async fn list_volumes(&self, dock_id: &str, cancel: &CancellationToken) -> Result<String> {
        let dock = self.docks.get(dock_id)?;
        let request = DockRequest::ListVolumes(DockRef {
            dock_id: dock.id.clone(),
        });
        self.dispatch(&dock, request, cancel).await
    }

    /// Delete a volume after its delete-stage workflow has drained
    ///
    /// Deleting an unknown volume is a no-op reported as
    /// [`RemovalOutcome::NotFound`].
    pub async fn delete_volume(
        &self,
        volume_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RemovalOutcome> {
        let volume = match self.catalog.get_volume(volume_id).await? {
            Some(volume) => volume,
            None => {
                debug!("Delete of unknown volume {}", volume_id);
                return Ok(RemovalOutcome::NotFound);
            }
        };
        let profile = match self.profiles.get(&volume.profile_id).await {
            Ok(profile) => profile,
            Err(Error::ProfileNotFound { .. }) => {
                warn!(
                    "Profile {} of volume {} no longer exists; deleting under the default profile",
                    volume.profile_id, volume_id
                );
                self.profiles.resolve(None).await?
            }
            Err(e) => return Err(e),
        };
        let classified = self.policy.classify(&profile.tags, LifecycleStage::Delete)?;
        let dock = self.docks.find_by_pool(&volume.pool_id).await?;

        let attached = self
            .catalog
            .list_attachments(volume_id)
            .await?
            .iter()
            .filter(|a| a.status == AttachmentStatus::Available)
            .count();
        if attached > 0 {
            return Err(invalid_volume(
                volume_id,
                format!("{} attachment(s) still available", attached),
            ));
        }
        let snapshots = self.catalog.list_snapshots_for_volume(volume_id).await?;
        // A source volume stays out of deleting while a snapshot of it is in flight
        let in_flight = snapshots
            .iter()
            .filter(|s| s.status == SnapshotStatus::Creating)
            .count();
        if in_flight > 0 {
            return Err(invalid_volume(
                volume_id,
                format!("{} snapshot(s) still creating", in_flight),
            ));
        }
        let drains_snapshots = classified
            .asynchronous
            .get(TAG_DELETE_SNAPSHOT_POLICY)
            .map_or(false, |v| delete_snapshot_policy_enabled(v));
        if !drains_snapshots {
            let live = snapshots
                .iter()
                .filter(|s| s.status == SnapshotStatus::Available)
                .count();
            if live > 0 {
                return Err(invalid_volume(
                    volume_id,
                    format!("{} snapshot(s) still available", live),
                ));
            }
        }

        let mut previous = volume.status;
        if previous == VolumeStatus::Creating {
            // Provisioning never confirmed; tear it down as a failed volume
            warn!("Volume {} still creating; marking it error before delete", volume_id);
            self.catalog
                .set_volume_status(volume_id, VolumeStatus::Error)
                .await?;
            previous = VolumeStatus::Error;
        }
        self.catalog
            .set_volume_status(volume_id, VolumeStatus::Deleting)
            .await?;

        if !classified.asynchronous.is_empty() {
            let token = cancel.child_token();
            let ctx = ExecutorContext::new(
                self.catalog.clone(),
                self.dock_client.clone(),
                dock.clone(),
                volume.clone(),
                self.policy.retry_policy(),
                token.clone(),
            );
            let label = format!("DeleteVolume {}", volume_id);
            let drained = match self.policy.compile(label, &classified.asynchronous, &ctx).await {
                Ok(workflow) => {
                    self.tasks
                        .run_to_completion("DeleteVolume", volume_id, workflow, token)
                        .await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = drained {
                warn!("Delete of volume {} stopped by workflow: {}", volume_id, e);
                self.catalog.set_volume_status(volume_id, previous).await?;
                return Err(e);
            }
        }

        let request = DockRequest::DeleteVolume(DeleteVolumeRequest {
            dock_id: dock.id.clone(),
            volume_id: volume_id.to_string(),
            profile,
        });
        match self.dispatch(&dock, request, cancel).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                debug!("Dock {} no longer knows volume {}", dock.id, volume_id)
            }
            Err(e) => {
                let status = match e {
                    Error::BackendError { .. } => VolumeStatus::Error,
                    _ => previous,
                };
                self.catalog.set_volume_status(volume_id, status).await?;
                return Err(e);
            }
        }

        for attachment in self.catalog.list_attachments(volume_id).await? {
            self.catalog
                .delete_attachment(volume_id, &attachment.id)
                .await?;
        }
        self.catalog.delete_volume(volume_id).await?;
        self.catalog
            .release_capacity(&volume.pool_id, volume.size_gib)
            .await?;
        info!("Deleted volume {} from pool {}", volume_id, volume.pool_id);
        Ok(RemovalOutcome::Removed)
    }

    // =========================================================================
    // Volume Attachments
    // =========================================================================

    pub async fn create_volume_attachment(
        &self,
        params: CreateAttachmentParams,
        cancel: &CancellationToken,
    ) -> Result<VolumeAttachment> {
        let volume = self.catalog.require_volume(&params.volume_id).await?;
        if !matches!(volume.status, VolumeStatus::Available | VolumeStatus::InUse) {
            return Err(invalid_volume(
                &volume.id,
                format!("cannot attach a volume in status {}", volume.status),
            ));
        }
        let dock = self.docks.find_by_pool(&volume.pool_id).await?;

        let attachment_id = Uuid::new_v4().to_string();
        let mut pending = VolumeAttachment {
            id: attachment_id.clone(),
            volume_id: volume.id.clone(),
            host: params.host.clone(),
            access_protocol: params.access_protocol.clone(),
            connection_info: BTreeMap::new(),
            mount_dir: None,
            device: None,
            fs_type: None,
            status: AttachmentStatus::Attaching,
        };
        self.catalog.put_attachment(&pending).await?;

        let request = DockRequest::CreateVolumeAttachment(CreateAttachmentRequest {
            dock_id: dock.id.clone(),
            attachment_id: attachment_id.clone(),
            volume_id: volume.id.clone(),
            host: params.host,
            access_protocol: params.access_protocol,
            do_local_attach: params.do_local_attach,
            multi_path: params.multi_path,
        });
        let attached = match self.dispatch(&dock, request, cancel).await {
            Ok(raw) => parse::<VolumeAttachment>(&raw),
            Err(e) => Err(e),
        };
        let mut attachment = match attached {
            Ok(attachment) => attachment,
            Err(e) => {
                pending.status = AttachmentStatus::Error;
                self.catalog.put_attachment(&pending).await?;
                return Err(e);
            }
        };
        attachment.id = attachment_id;
        attachment.volume_id = volume.id.clone();
        self.catalog.put_attachment(&attachment).await?;

        if attachment.status == AttachmentStatus::Available && volume.status != VolumeStatus::InUse
        {
            self.catalog
                .set_volume_status(&volume.id, VolumeStatus::InUse)
                .await?;
        }
        info!(
            "Attached volume {} to {} ({})",
            volume.id, attachment.host.host, attachment.id
        );
        Ok(attachment)
    }

    pub async fn get_volume_attachment(
        &self,
        attachment_id: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let attachment = self.catalog.require_attachment(attachment_id).await?;
        let dock = self.dock_for_volume(&attachment.volume_id).await?;
        let request = DockRequest::GetVolumeAttachment(AttachmentRef {
            dock_id: dock.id.clone(),
            volume_id: attachment.volume_id,
            attachment_id: attachment_id.to_string(),
        });
        self.dispatch(&dock, request, cancel).await
    }

    pub async fn list_volume_attachments(
        &self,
        volume_id: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let dock = self.dock_for_volume(volume_id).await?;
        let request = DockRequest::ListVolumeAttachments(VolumeRef {
            dock_id: dock.id.clone(),
            volume_id: volume_id.to_string(),
        });
        self.dispatch(&dock, request, cancel).await
    }

    pub async fn update_volume_attachment(
        &self,
        params: UpdateAttachmentParams,
        cancel: &CancellationToken,
    ) -> Result<VolumeAttachment> {
        let current = self.catalog.require_attachment(&params.attachment_id).await?;
        let dock = self.dock_for_volume(&current.volume_id).await?;
        let request = DockRequest::UpdateVolumeAttachment(UpdateAttachmentRequest {
            dock_id: dock.id.clone(),
            volume_id: current.volume_id.clone(),
            attachment_id: current.id.clone(),
            mount_dir: params.mount_dir,
            device: params.device,
            fs_type: params.fs_type,
        });
        let mut attachment: VolumeAttachment = parse(&self.dispatch(&dock, request, cancel).await?)?;
        attachment.id = current.id;
        attachment.volume_id = current.volume_id;
        self.catalog.put_attachment(&attachment).await?;
        debug!("Updated attachment {}", attachment.id);
        Ok(attachment)
    }

    /// Detach and forget an attachment; the volume returns to `available`
    /// once its last attachment is gone
    pub async fn delete_volume_attachment(
        &self,
        attachment_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RemovalOutcome> {
        let mut attachment = match self.catalog.find_attachment(attachment_id).await? {
            Some(attachment) => attachment,
            None => return Ok(RemovalOutcome::NotFound),
        };
        let dock = self.dock_for_volume(&attachment.volume_id).await?;
        let previous = attachment.status;
        if !previous.can_transition_to(AttachmentStatus::Detaching) {
            return Err(Error::InvalidState {
                resource: "attachment".into(),
                id: attachment_id.to_string(),
                reason: format!("cannot detach while {}", previous),
            });
        }
        attachment.status = AttachmentStatus::Detaching;
        self.catalog.put_attachment(&attachment).await?;

        let request = DockRequest::DeleteVolumeAttachment(AttachmentRef {
            dock_id: dock.id.clone(),
            volume_id: attachment.volume_id.clone(),
            attachment_id: attachment_id.to_string(),
        });
        match self.dispatch(&dock, request, cancel).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                attachment.status = match e {
                    Error::BackendError { .. } => AttachmentStatus::Error,
                    _ => previous,
                };
                self.catalog.put_attachment(&attachment).await?;
                return Err(e);
            }
        }

        let volume_id = attachment.volume_id.as_str();
        self.catalog.delete_attachment(volume_id, attachment_id).await?;
        let still_attached = self
            .catalog
            .list_attachments(volume_id)
            .await?
            .iter()
            .any(|a| a.status == AttachmentStatus::Available);
        if !still_attached {
            if let Some(volume) = self.catalog.get_volume(volume_id).await? {
                if volume.status == VolumeStatus::InUse {
                    self.catalog
                        .set_volume_status(volume_id, VolumeStatus::Available)
                        .await?;
                }
            }
        }
        info!("Detached attachment {} from volume {}", attachment_id, volume_id);
        Ok(RemovalOutcome::Removed)
    }

    // =========================================================================
    // Volume Snapshots
    // =========================================================================

    /// Snapshot a volume; a source in `error` or `deleting` is rejected
    /// without contacting the dock
    pub async fn create_volume_snapshot(
        &self,
        params: CreateSnapshotParams,
        cancel: &CancellationToken,
    ) -> Result<VolumeSnapshot> {
        let volume = self.catalog.require_volume(&params.volume_id).await?;
        if matches!(volume.status, VolumeStatus::Error | VolumeStatus::Deleting) {
            return Err(Error::BackendError {
                message: format!(
                    "volume {} is {}, snapshot not allowed",
                    volume.id, volume.status
                ),
            });
        }
        let dock = self.docks.find_by_pool(&volume.pool_id).await?;

        let snapshot_id = Uuid::new_v4().to_string();
        let name = if params.name.is_empty() {
            format!("snapshot-{}", snapshot_id)
        } else {
            params.name
        };
        let request = DockRequest::CreateVolumeSnapshot(CreateSnapshotRequest {
            dock_id: dock.id.clone(),
            snapshot_id: snapshot_id.clone(),
            volume_id: volume.id.clone(),
            name,
            size_gib: volume.size_gib,
            description: params.description,
            force: params.force,
        });
        let mut snapshot: VolumeSnapshot = parse(&self.dispatch(&dock, request, cancel).await?)?;
        snapshot.id = snapshot_id;
        snapshot.volume_id = volume.id.clone();
        self.catalog.put_snapshot(&snapshot).await?;
        info!("Created snapshot {} of volume {}", snapshot.id, volume.id);
        Ok(snapshot)
    }

    pub async fn get_volume_snapshot(
        &self,
        snapshot_id: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let snapshot = self.catalog.require_snapshot(snapshot_id).await?;
        let dock = self.dock_for_volume(&snapshot.volume_id).await?;
        let request = DockRequest::GetVolumeSnapshot(SnapshotRef {
            dock_id: dock.id.clone(),
            volume_id: snapshot.volume_id,
            snapshot_id: snapshot_id.to_string(),
        });
        self.dispatch(&dock, request, cancel).await
    }

    pub async fn list_volume_snapshots(
        &self,
        volume_id: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let dock = self.dock_for_volume(volume_id).await?;
        let request = DockRequest::ListVolumeSnapshots(VolumeRef {
            dock_id: dock.id.clone(),
            volume_id: volume_id.to_string(),
        });
        self.dispatch(&dock, request, cancel).await
    }

    pub async fn delete_volume_snapshot(
        &self,
        snapshot_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RemovalOutcome> {
        let snapshot = match self.catalog.get_snapshot(snapshot_id).await? {
            Some(snapshot) => snapshot,
            None => return Ok(RemovalOutcome::NotFound),
        };
        let dock = self.dock_for_volume(&snapshot.volume_id).await?;
        let request = DockRequest::DeleteVolumeSnapshot(SnapshotRef {
            dock_id: dock.id.clone(),
            volume_id: snapshot.volume_id.clone(),
            snapshot_id: snapshot_id.to_string(),
        });
        match self.dispatch(&dock, request, cancel).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.catalog.delete_snapshot(snapshot_id).await?;
        info!("Deleted snapshot {} of volume {}", snapshot_id, snapshot.volume_id);
        Ok(RemovalOutcome::Removed)
    }

    // =========================================================================
    // Shares
    // =========================================================================

    /// Provision a share; placement follows the volume path
    pub async fn create_share(
        &self,
        params: CreateShareParams,
        cancel: &CancellationToken,
    ) -> Result<Share> {
        if params.size_gib == 0 {
            return Err(Error::Validation("share size must be positive".into()));
        }
        let (profile, lease) = self.profiles.lease(params.profile.as_deref()).await?;
        let classified = self.policy.classify(&profile.tags, LifecycleStage::Create)?;
        for tag in classified.asynchronous.keys() {
            warn!("Operation tag {} is not scheduled for shares", tag);
        }

        let pool = self
            .scheduler
            .pick_pool(
                &classified.sync,
                params.size_gib,
                params.availability_zone.as_deref(),
            )
            .await?;
        let dock = self.docks.find_by_pool(&pool.id).await?;
        self.catalog.reserve_capacity(&pool.id, params.size_gib).await?;

        let share_id = Uuid::new_v4().to_string();
        let request = DockRequest::CreateShare(CreateShareRequest {
            dock_id: dock.id.clone(),
            pool_id: pool.id.clone(),
            share_id: share_id.clone(),
            name: params.name,
            size_gib: params.size_gib,
            protocol: params.protocol,
            profile: profile.clone(),
            description: params.description,
            availability_zone: pool.availability_zone.clone(),
        });
        let created = match self.dispatch(&dock, request, cancel).await {
            Ok(raw) => parse::<Share>(&raw),
            Err(e) => Err(e),
        };
        let mut share = match created {
            Ok(share) => share,
            Err(e) => {
                self.catalog.release_capacity(&pool.id, params.size_gib).await?;
                return Err(e);
            }
        };
        share.id = share_id;
        share.pool_id = pool.id.clone();
        share.profile_id = profile.id;
        if let Err(e) = self.catalog.put_share(&share).await {
            error!(
                "Share {} exists on dock {} but could not be recorded: {}",
                share.id, dock.id, e
            );
            self.release_after_failure(&pool.id, params.size_gib).await;
            return Err(e);
        }
        drop(lease);
        info!(
            "Created {} share {} ({} GiB) on pool {}",
            share.protocol, share.id, share.size_gib, pool.id
        );
        Ok(share)
    }

    pub async fn get_share(&self, share_id: &str, cancel: &CancellationToken) -> Result<String> {
        let share = self.catalog.require_share(share_id).await?;
        let dock = self.docks.find_by_pool(&share.pool_id).await?;
        let request = DockRequest::GetShare(ShareRef {
            dock_id: dock.id.clone(),
            share_id: share_id.to_string(),
        });
        self.dispatch(&dock, request, cancel).await
    }

    pub async fn list_shares(&self, dock_id: &str, cancel: &CancellationToken) -> Result<String> {
        let dock = self.docks.get(dock_id)?;
        let request = DockRequest::ListShares(DockRef {
            dock_id: dock.id.clone(),
        });
        self.dispatch(&dock, request, cancel).await
    }

    pub async fn delete_share(
        &self,
        share_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RemovalOutcome> {
        let share = match self.catalog.get_share(share_id).await? {
            Some(share) => share,
            None => return Ok(RemovalOutcome::NotFound),
        };
        let attachments = self.catalog.list_share_attachments(share_id).await?;
        if attachments
            .iter()
            .any(|a| a.status == AttachmentStatus::Available)
        {
            return Err(Error::InvalidState {
                resource: "share".into(),
                id: share_id.to_string(),
                reason: "share still attached".into(),
            });
        }
        let dock = self.docks.find_by_pool(&share.pool_id).await?;

        let previous = share.status;
        self.catalog
            .set_share_status(share_id, VolumeStatus::Deleting)
            .await?;
        let request = DockRequest::DeleteShare(ShareRef {
            dock_id: dock.id.clone(),
            share_id: share_id.to_string(),
        });
        match self.dispatch(&dock, request, cancel).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                let status = match e {
                    Error::BackendError { .. } => VolumeStatus::Error,
                    _ => previous,
                };
                self.catalog.set_share_status(share_id, status).await?;
                return Err(e);
            }
        }

        for attachment in attachments {
            self.catalog
                .delete_share_attachment(share_id, &attachment.id)
                .await?;
        }
        self.catalog.delete_share(share_id).await?;
        self.catalog
            .release_capacity(&share.pool_id, share.size_gib)
            .await?;
        info!("Deleted share {}", share_id);
        Ok(RemovalOutcome::Removed)
    }

    pub async fn attach_share(
        &self,
        params: AttachShareParams,
        cancel: &CancellationToken,
    ) -> Result<ShareAttachment> {
        let share = self.catalog.require_share(&params.share_id).await?;
        if !matches!(share.status, VolumeStatus::Available | VolumeStatus::InUse) {
            return Err(Error::InvalidState {
                resource: "share".into(),
                id: share.id.clone(),
                reason: format!("cannot attach a share in status {}", share.status),
            });
        }
        let dock = self.docks.find_by_pool(&share.pool_id).await?;

        let attachment_id = Uuid::new_v4().to_string();
        let mut pending = ShareAttachment {
            id: attachment_id.clone(),
            share_id: share.id.clone(),
            host: params.host.clone(),
            access_protocol: params.access_protocol.clone(),
            connection_info: BTreeMap::new(),
            mount_dir: None,
            mounted: false,
            status: AttachmentStatus::Attaching,
        };
        self.catalog.put_share_attachment(&pending).await?;

        let request = DockRequest::AttachShare(AttachShareRequest {
            dock_id: dock.id.clone(),
            share_id: share.id.clone(),
            attachment_id: attachment_id.clone(),
            host: params.host,
            access_protocol: params.access_protocol,
        });
        let attached = match self.dispatch(&dock, request, cancel).await {
            Ok(raw) => parse::<ShareAttachment>(&raw),
            Err(e) => Err(e),
        };
        let mut attachment = match attached {
            Ok(attachment) => attachment,
            Err(e) => {
                pending.status = AttachmentStatus::Error;
                self.catalog.put_share_attachment(&pending).await?;
                return Err(e);
            }
        };
        attachment.id = attachment_id;
        attachment.share_id = share.id.clone();
        self.catalog.put_share_attachment(&attachment).await?;

        if attachment.status == AttachmentStatus::Available && share.status != VolumeStatus::InUse {
            self.catalog
                .set_share_status(&share.id, VolumeStatus::InUse)
                .await?;
        }
        info!("Attached share {} ({})", share.id, attachment.id);
        Ok(attachment)
    }

    pub async fn detach_share(
        &self,
        attachment_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RemovalOutcome> {
        let mut attachment = match self.catalog.require_share_attachment(attachment_id).await {
            Ok(attachment) => attachment,
            Err(Error::AttachmentNotFound { .. }) => return Ok(RemovalOutcome::NotFound),
            Err(e) => return Err(e),
        };
        let share = self.catalog.require_share(&attachment.share_id).await?;
        let dock = self.docks.find_by_pool(&share.pool_id).await?;
        let previous = attachment.status;
        attachment.status = AttachmentStatus::Detaching;
        self.catalog.put_share_attachment(&attachment).await?;

        let request = DockRequest::DetachShare(ShareAttachmentRef {
            dock_id: dock.id.clone(),
            share_id: share.id.clone(),
            attachment_id: attachment_id.to_string(),
        });
        match self.dispatch(&dock, request, cancel).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                attachment.status = match e {
                    Error::BackendError { .. } => AttachmentStatus::Error,
                    _ => previous,
                };
                self.catalog.put_share_attachment(&attachment).await?;
                return Err(e);
            }
        }

        self.catalog
            .delete_share_attachment(&share.id, attachment_id)
            .await?;
        let still_attached = self
            .catalog
            .list_share_attachments(&share.id)
            .await?
            .iter()
            .any(|a| a.status == AttachmentStatus::Available);
        if !still_attached && share.status == VolumeStatus::InUse {
            self.catalog
                .set_share_status(&share.id, VolumeStatus::Available)
                .await?;
        }
        info!("Detached share {} ({})", share.id, attachment_id);
        Ok(RemovalOutcome::Removed)
    }

    pub async fn mount_share(
        &self,
        params: MountShareParams,
        cancel: &CancellationToken,
    ) -> Result<ShareAttachment> {
        let current = self
            .catalog
            .require_share_attachment(&params.attachment_id)
            .await?;
        let dock = self.dock_for_share(&current.share_id).await?;
        let request = DockRequest::MountShare(MountShareRequest {
            dock_id: dock.id.clone(),
            share_id: current.share_id.clone(),
            attachment_id: current.id.clone(),
            mount_dir: params.mount_dir,
            fs_type: params.fs_type,
        });
        let mut attachment: ShareAttachment =
            parse(&self.dispatch(&dock, request, cancel).await?)?;
        attachment.id = current.id;
        attachment.share_id = current.share_id;
        self.catalog.put_share_attachment(&attachment).await?;
        Ok(attachment)
    }

    pub async fn unmount_share(
        &self,
        attachment_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ShareAttachment> {
        let current = self.catalog.require_share_attachment(attachment_id).await?;
        let dock = self.dock_for_share(&current.share_id).await?;
        let request = DockRequest::UnmountShare(ShareAttachmentRef {
            dock_id: dock.id.clone(),
            share_id: current.share_id.clone(),
            attachment_id: current.id.clone(),
        });
        let mut attachment: ShareAttachment =
            parse(&self.dispatch(&dock, request, cancel).await?)?;
        attachment.id = current.id;
        attachment.share_id = current.share_id;
        self.catalog.put_share_attachment(&attachment).await?;
        Ok(attachment)
    }

    // =========================================================================
    // Dock Administration
    // =========================================================================

    pub async fn deregister_dock(&self, endpoint: &str) -> Result<RemovalOutcome> {
        Ok(match self.docks.deregister(endpoint).await? {
            Deregistration::Removed { .. } => RemovalOutcome::Removed,
            Deregistration::NotFound => RemovalOutcome::NotFound,
        })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Return a reservation after a failure that is already being reported
    async fn release_after_failure(&self, pool_id: &str, size_gib: u64) {
        if let Err(e) = self.catalog.release_capacity(pool_id, size_gib).await {
            error!("Failed to release {} GiB on pool {}: {}", size_gib, pool_id, e);
        }
    }

    async fn dock_for_volume(&self, volume_id: &str) -> Result<Dock> {
        let pool_id = self.scheduler.pick_pool_by_volume(volume_id).await?;
        self.docks.find_by_pool(&pool_id).await
    }

    async fn dock_for_share(&self, share_id: &str) -> Result<Dock> {
        let share = self.catalog.require_share(share_id).await?;
        self.docks.find_by_pool(&share.pool_id).await
    }

    /// Send `request` to `dock`, observing cancellation
    ///
    /// Idempotent requests are reissued once after a transport failure.
    async fn dispatch(
        &self,
        dock: &Dock,
        request: DockRequest,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let operation = request.operation();
        let max_attempts = if request.is_idempotent() { 2 } else { 1 };
        let mut attempt = 0;

        loop {
            attempt += 1;
            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::cancelled(operation)),
                resp = self.dock_client.send(&dock.endpoint, request.clone()) => {
                    resp.and_then(|r| r.into_result(&dock.endpoint))
                }
            };
            self.metrics
                .record_dock_rpc(operation, started.elapsed().as_secs_f64());

            match result {
                Ok(message) => {
                    debug!("{} answered by dock {}", request, dock.id);
                    return Ok(message);
                }
                Err(e) => {
                    if !matches!(e, Error::Cancelled { .. }) {
                        self.metrics
                            .record_dock_failure(operation, &e.kind().to_string());
                    }
                    if e.is_transient() && attempt < max_attempts {
                        warn!("{} failed on dock {}, retrying once: {}", request, dock.id, e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }
}

fn parse<T: DeserializeOwned>(raw: &str) -> Result<T> {
    Ok(serde_json::from_str(raw)?)
}

fn invalid_volume(volume_id: &str, reason: String) -> Error {
    Error::InvalidState {
        resource: "volume".into(),
        id: volume_id.to_string(),
        reason,
    }
}
