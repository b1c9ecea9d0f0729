//! Workflow Executors
//!
//! One executor per operation tag. Executors must converge when reissued
//! against the same target, since the workflow runner retries them.

use super::{delete_snapshot_policy_enabled, RetryPolicy, TAG_DELETE_SNAPSHOT_POLICY, TAG_INTERVAL_SNAPSHOT};
use crate::config::parse_duration;
use crate::domain::model::{Dock, SnapshotStatus, Volume, VolumeSnapshot, VolumeStatus};
use crate::domain::ports::DockClientRef;
use crate::domain::protocol::{CreateSnapshotRequest, DockRequest, SnapshotRef, VolumeRef};
use crate::error::{Error, Result};
use crate::store::Catalog;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

// =============================================================================
// Executor Contract
// =============================================================================

/// A single step of an asynchronous workflow
#[async_trait]
pub trait Executor: Send + Sync {
    /// Tag this executor implements
    fn name(&self) -> &'static str;

    /// Capture the context and validate the tag value
    async fn init(&mut self, ctx: &ExecutorContext) -> Result<()>;

    /// Perform the operation once
    async fn run(&self) -> Result<()>;
}

/// Everything an executor needs to act on one resource
#[derive(Clone)]
pub struct ExecutorContext {
    pub catalog: Catalog,
    pub dock_client: DockClientRef,
    /// Dock that owns the target volume
    pub dock: Dock,
    pub volume: Volume,
    /// Value of the tag being executed
    pub tag_value: String,
    pub retry: RetryPolicy,
    pub cancel: CancellationToken,
}

impl ExecutorContext {
    pub fn new(
        catalog: Catalog,
        dock_client: DockClientRef,
        dock: Dock,
        volume: Volume,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            catalog,
            dock_client,
            dock,
            volume,
            tag_value: String::new(),
            retry,
            cancel,
        }
    }

    pub fn with_tag_value(&self, value: &str) -> Self {
        Self {
            tag_value: value.to_string(),
            ..self.clone()
        }
    }

    /// Issue a request to the owning dock, aborting on cancellation
    pub async fn call(&self, request: DockRequest) -> Result<String> {
        let operation = request.operation();
        let endpoint = self.dock.endpoint.as_str();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::cancelled(operation)),
            resp = self.dock_client.send(endpoint, request) => resp?.into_result(endpoint),
        }
    }

    /// Wait one retry interval; this is a poll boundary
    pub async fn pause(&self) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::cancelled("workflow poll")),
            _ = tokio::time::sleep(self.retry.interval) => Ok(()),
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::cancelled("workflow step"));
        }
        Ok(())
    }

    fn volume_ref(&self) -> VolumeRef {
        VolumeRef {
            dock_id: self.dock.id.clone(),
            volume_id: self.volume.id.clone(),
        }
    }

    async fn list_dock_snapshots(&self) -> Result<Vec<VolumeSnapshot>> {
        let raw = self
            .call(DockRequest::ListVolumeSnapshots(self.volume_ref()))
            .await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

fn not_initialized(name: &str) -> Error {
    Error::Internal(format!("executor {} used before init", name))
}

// =============================================================================
// deleteSnapshotPolicy
// =============================================================================

/// Deletes every snapshot of the target volume and waits for the dock to
/// confirm they are gone
#[derive(Default)]
pub struct DeleteSnapshotPolicyExecutor {
    ctx: Option<ExecutorContext>,
    enabled: bool,
}

#[async_trait]
impl Executor for DeleteSnapshotPolicyExecutor {
    fn name(&self) -> &'static str {
        TAG_DELETE_SNAPSHOT_POLICY
    }

    async fn init(&mut self, ctx: &ExecutorContext) -> Result<()> {
        if ctx.volume.id.is_empty() {
            return Err(Error::Validation(
                "snapshot cleanup requires a volume id".to_string(),
            ));
        }
        self.enabled = delete_snapshot_policy_enabled(&ctx.tag_value);
        self.ctx = Some(ctx.clone());
        Ok(())
    }

    async fn run(&self) -> Result<()> {
        let ctx = self.ctx.as_ref().ok_or_else(|| not_initialized(self.name()))?;
        if !self.enabled {
            debug!(
                "Snapshot cleanup disabled ({}) for volume {}",
                ctx.tag_value, ctx.volume.id
            );
            return Ok(());
        }

        let volume_id = ctx.volume.id.as_str();
        let recorded = ctx.catalog.list_snapshots_for_volume(volume_id).await?;
        let reported: Vec<VolumeSnapshot> = ctx
            .list_dock_snapshots()
            .await?
            .into_iter()
            .filter(|s| s.volume_id == volume_id)
            .collect();

        // Snapshots still being taken are waited out through the runner's retries
        if let Some(pending) = recorded
            .iter()
            .chain(reported.iter())
            .find(|s| s.status == SnapshotStatus::Creating)
        {
            return Err(Error::InvalidState {
                resource: "snapshot".into(),
                id: pending.id.clone(),
                reason: format!("still creating from volume {}", volume_id),
            });
        }

        let targets: BTreeSet<String> = recorded
            .into_iter()
            .chain(reported)
            .map(|s| s.id)
            .collect();

        for snapshot_id in &targets {
            ctx.ensure_active()?;
            let request = DockRequest::DeleteVolumeSnapshot(SnapshotRef {
                dock_id: ctx.dock.id.clone(),
                volume_id: volume_id.to_string(),
                snapshot_id: snapshot_id.clone(),
            });
            match ctx.call(request).await {
                Ok(_) => debug!("Requested deletion of snapshot {}", snapshot_id),
                Err(e) if e.is_not_found() => debug!("Snapshot {} already gone", snapshot_id),
                Err(e) => return Err(e),
            }
        }

        let max_polls = ctx.retry.max_attempts.max(1);
        for poll in 1..=max_polls {
            let remaining = ctx
                .list_dock_snapshots()
                .await?
                .into_iter()
                .filter(|s| s.volume_id == volume_id)
                .count();
            if remaining == 0 {
                for snapshot_id in &targets {
                    ctx.catalog.delete_snapshot(snapshot_id).await?;
                }
                info!(
                    "Drained {} snapshot(s) of volume {}",
                    targets.len(),
                    volume_id
                );
                return Ok(());
            }
            debug!(
                "Volume {} still has {} snapshot(s) (poll {}/{})",
                volume_id, remaining, poll, max_polls
            );
            if poll < max_polls {
                ctx.pause().await?;
            }
        }

        // The poll budget is the retry budget; the runner must not restart the drain
        Err(Error::WorkflowFailed {
            executor: self.name().to_string(),
            reason: format!(
                "volume {} still has snapshots after {} polls",
                volume_id, max_polls
            ),
        })
    }
}

// =============================================================================
// intervalSnapshot
// =============================================================================

/// Takes one snapshot per interval slot
#[derive(Default)]
pub struct IntervalSnapshotExecutor {
    ctx: Option<ExecutorContext>,
    interval: Duration,
}

impl IntervalSnapshotExecutor {
    /// Slot index of `unix_secs` for an interval
    pub fn slot(unix_secs: i64, interval: Duration) -> u64 {
        let secs = interval.as_secs().max(1);
        unix_secs.max(0) as u64 / secs
    }

    /// Name of the snapshot taken for `slot`
    pub fn slot_name(volume_id: &str, slot: u64) -> String {
        format!("{}-interval-{}", volume_id, slot)
    }
}

#[async_trait]
impl Executor for IntervalSnapshotExecutor {
    fn name(&self) -> &'static str {
        TAG_INTERVAL_SNAPSHOT
    }

    async fn init(&mut self, ctx: &ExecutorContext) -> Result<()> {
        let interval = parse_duration(&ctx.tag_value)?;
        if interval.as_secs() == 0 {
            return Err(Error::Validation(format!(
                "{} must be at least one second",
                TAG_INTERVAL_SNAPSHOT
            )));
        }
        self.interval = interval;
        self.ctx = Some(ctx.clone());
        Ok(())
    }

    async fn run(&self) -> Result<()> {
        let ctx = self.ctx.as_ref().ok_or_else(|| not_initialized(self.name()))?;
        let volume_id = ctx.volume.id.as_str();

        if let Some(current) = ctx.catalog.get_volume(volume_id).await? {
            if matches!(current.status, VolumeStatus::Error | VolumeStatus::Deleting) {
                return Err(Error::InvalidState {
                    resource: "volume".into(),
                    id: volume_id.to_string(),
                    reason: format!("cannot snapshot a volume in status {}", current.status),
                });
            }
        }

        let slot = Self::slot(Utc::now().timestamp(), self.interval);
        let name = Self::slot_name(volume_id, slot);

        let known = ctx.catalog.list_snapshots_for_volume(volume_id).await?;
        if known.iter().any(|s| s.name == name) {
            debug!("Interval snapshot {} already taken", name);
            return Ok(());
        }
        // The dock may have completed an earlier attempt we never recorded
        if let Some(found) = ctx
            .list_dock_snapshots()
            .await?
            .into_iter()
            .find(|s| s.name == name)
        {
            ctx.catalog.put_snapshot(&found).await?;
            return Ok(());
        }

        ctx.ensure_active()?;
        let request = DockRequest::CreateVolumeSnapshot(CreateSnapshotRequest {
            dock_id: ctx.dock.id.clone(),
            snapshot_id: Uuid::new_v4().to_string(),
            volume_id: volume_id.to_string(),
            name: name.clone(),
            size_gib: ctx.volume.size_gib,
            description: format!("interval snapshot ({})", ctx.tag_value),
            force: false,
        });
        let snapshot: VolumeSnapshot = serde_json::from_str(&ctx.call(request).await?)?;
        ctx.catalog.put_snapshot(&snapshot).await?;
        info!("Took interval snapshot {} of volume {}", name, volume_id);
        Ok(())
    }
}
