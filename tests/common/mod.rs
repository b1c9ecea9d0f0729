//! Shared fixtures: an in-memory dock agent, an in-process dock transport
//! and a fully wired orchestrator.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use sds_controller::controlplane::policy::{PolicyEngine, RetryPolicy};
use sds_controller::controlplane::rpc::dispatch_dock_request;
use sds_controller::domain::model::{
    AttachmentStatus, Pool, Profile, Share, ShareAttachment, SnapshotStatus, TagMap, Volume,
    VolumeAttachment, VolumeSnapshot, VolumeStatus,
};
use sds_controller::domain::ports::{DockClient, DockClientRef, DockService};
use sds_controller::domain::protocol::{
    AttachShareRequest, AttachmentRef, CreateAttachmentRequest, CreateShareRequest,
    CreateSnapshotRequest, CreateVolumeRequest, DeleteVolumeRequest, DockRef, DockRequest,
    MountShareRequest, ProfileSpec, RpcResponse, ShareAttachmentRef, ShareRef, SnapshotRef,
    UpdateAttachmentRequest, VolumeRef,
};
use sds_controller::{
    Catalog, ControllerMetrics, DockRegistry, Error, MemoryStore, Orchestrator, ProfileRegistry,
    Result, TaskQueue,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DOCK_ENDPOINT: &str = "10.0.0.1:50050";

pub fn tags(pairs: &[(&str, &str)]) -> TagMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// =============================================================================
// Fake Dock
// =============================================================================

#[derive(Default)]
struct DockState {
    volumes: BTreeMap<String, Volume>,
    attachments: BTreeMap<String, VolumeAttachment>,
    snapshots: BTreeMap<String, VolumeSnapshot>,
    /// Deleted snapshots still reported by the next listing
    draining: BTreeMap<String, VolumeSnapshot>,
    shares: BTreeMap<String, Share>,
    share_attachments: BTreeMap<String, ShareAttachment>,
}

/// Dock agent keeping every resource in memory
#[derive(Default)]
pub struct FakeDock {
    state: Mutex<DockState>,
    /// Operations that answer with a backend error
    failing: Mutex<HashMap<&'static str, String>>,
    /// Every operation received, in order
    journal: Mutex<Vec<&'static str>>,
    /// Report deleted snapshots once more before they disappear
    lagging_snapshot_deletes: std::sync::atomic::AtomicBool,
    /// Accept snapshot deletes but keep the snapshots
    sticky_snapshots: std::sync::atomic::AtomicBool,
    /// Status reported for new volumes instead of `available`
    new_volume_status: Mutex<Option<VolumeStatus>>,
    /// Status reported for new snapshots instead of `available`
    new_snapshot_status: Mutex<Option<SnapshotStatus>>,
}

impl FakeDock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, operation: &'static str, message: &str) {
        self.failing.lock().insert(operation, message.to_string());
    }

    pub fn heal(&self, operation: &'static str) {
        self.failing.lock().remove(operation);
    }

    pub fn lag_snapshot_deletes(&self) {
        self.lagging_snapshot_deletes.store(true, Ordering::Relaxed);
    }

    pub fn stick_snapshots(&self) {
        self.sticky_snapshots.store(true, Ordering::Relaxed);
    }

    pub fn create_volumes_as(&self, status: VolumeStatus) {
        *self.new_volume_status.lock() = Some(status);
    }

    pub fn create_snapshots_as(&self, status: SnapshotStatus) {
        *self.new_snapshot_status.lock() = Some(status);
    }

    pub fn journal(&self) -> Vec<&'static str> {
        self.journal.lock().clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.journal.lock().iter().filter(|op| **op == operation).count()
    }

    pub fn volume_count(&self) -> usize {
        self.state.lock().volumes.len()
    }

    pub fn snapshot_count(&self) -> usize {
        self.state.lock().snapshots.len()
    }

    /// Plant a snapshot the controller never recorded
    pub fn plant_snapshot(&self, volume_id: &str, snapshot_id: &str) {
        self.state.lock().snapshots.insert(
            snapshot_id.to_string(),
            VolumeSnapshot {
                id: snapshot_id.to_string(),
                volume_id: volume_id.to_string(),
                name: snapshot_id.to_string(),
                size_gib: 1,
                status: SnapshotStatus::Available,
                description: String::new(),
                force: false,
            },
        );
    }

    fn enter(&self, operation: &'static str) -> Result<()> {
        self.journal.lock().push(operation);
        match self.failing.lock().get(operation) {
            Some(message) => Err(Error::BackendError {
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

fn missing(what: &str, id: &str) -> Error {
    Error::NotFound(format!("{} {}", what, id))
}

#[async_trait]
impl DockService for FakeDock {
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume> {
        self.enter("CreateVolume")?;
        let volume = Volume {
            id: req.volume_id.clone(),
            name: req.name,
            size_gib: req.size_gib,
            status: self
                .new_volume_status
                .lock()
                .unwrap_or(VolumeStatus::Available),
            pool_id: req.pool_id,
            profile_id: req.profile.id,
            description: req.description,
            source_volume_id: None,
            source_snapshot_id: req.snapshot_id,
            created_at: None,
        };
        self.state
            .lock()
            .volumes
            .insert(req.volume_id, volume.clone());
        Ok(volume)
    }

    async fn get_volume(&self, req: VolumeRef) -> Result<Volume> {
        self.enter("GetVolume")?;
        self.state
            .lock()
            .volumes
            .get(&req.volume_id)
            .cloned()
            .ok_or_else(|| missing("volume", &req.volume_id))
    }

    async fn list_volumes(&self, _req: DockRef) -> Result<Vec<Volume>> {
        self.enter("ListVolumes")?;
        Ok(self.state.lock().volumes.values().cloned().collect())
    }

    async fn delete_volume(&self, req: DeleteVolumeRequest) -> Result<()> {
        self.enter("DeleteVolume")?;
        match self.state.lock().volumes.remove(&req.volume_id) {
            Some(_) => Ok(()),
            None => Err(missing("volume", &req.volume_id)),
        }
    }

    async fn create_volume_attachment(
        &self,
        req: CreateAttachmentRequest,
    ) -> Result<VolumeAttachment> {
        self.enter("CreateVolumeAttachment")?;
        let mut connection_info = BTreeMap::new();
        connection_info.insert("targetIqn".to_string(), serde_json::json!("iqn.fake:vol"));
        let attachment = VolumeAttachment {
            id: req.attachment_id.clone(),
            volume_id: req.volume_id,
            host: req.host,
            access_protocol: req.access_protocol,
            connection_info,
            mount_dir: None,
            device: None,
            fs_type: None,
            status: AttachmentStatus::Available,
        };
        self.state
            .lock()
            .attachments
            .insert(req.attachment_id, attachment.clone());
        Ok(attachment)
    }

    async fn get_volume_attachment(&self, req: AttachmentRef) -> Result<VolumeAttachment> {
        self.enter("GetVolumeAttachment")?;
        self.state
            .lock()
            .attachments
            .get(&req.attachment_id)
            .cloned()
            .ok_or_else(|| missing("attachment", &req.attachment_id))
    }

    async fn list_volume_attachments(&self, req: VolumeRef) -> Result<Vec<VolumeAttachment>> {
        self.enter("ListVolumeAttachments")?;
        Ok(self
            .state
            .lock()
            .attachments
            .values()
            .filter(|a| a.volume_id == req.volume_id)
            .cloned()
            .collect())
    }

    async fn update_volume_attachment(
        &self,
        req: UpdateAttachmentRequest,
    ) -> Result<VolumeAttachment> {
        self.enter("UpdateVolumeAttachment")?;
        let mut state = self.state.lock();
        let attachment = state
            .attachments
            .get_mut(&req.attachment_id)
            .ok_or_else(|| missing("attachment", &req.attachment_id))?;
        if req.mount_dir.is_some() {
            attachment.mount_dir = req.mount_dir;
        }
        if req.device.is_some() {
            attachment.device = req.device;
        }
        if req.fs_type.is_some() {
            attachment.fs_type = req.fs_type;
        }
        Ok(attachment.clone())
    }

    async fn delete_volume_attachment(&self, req: AttachmentRef) -> Result<()> {
        self.enter("DeleteVolumeAttachment")?;
        match self.state.lock().attachments.remove(&req.attachment_id) {
            Some(_) => Ok(()),
            None => Err(missing("attachment", &req.attachment_id)),
        }
    }

    async fn create_volume_snapshot(&self, req: CreateSnapshotRequest) -> Result<VolumeSnapshot> {
        self.enter("CreateVolumeSnapshot")?;
        let snapshot = VolumeSnapshot {
            id: req.snapshot_id.clone(),
            volume_id: req.volume_id,
            name: req.name,
            size_gib: req.size_gib,
            status: self
                .new_snapshot_status
                .lock()
                .unwrap_or(SnapshotStatus::Available),
            description: req.description,
            force: req.force,
        };
        self.state
            .lock()
            .snapshots
            .insert(req.snapshot_id, snapshot.clone());
        Ok(snapshot)
    }

    async fn get_volume_snapshot(&self, req: SnapshotRef) -> Result<VolumeSnapshot> {
        self.enter("GetVolumeSnapshot")?;
        self.state
            .lock()
            .snapshots
            .get(&req.snapshot_id)
            .cloned()
            .ok_or_else(|| missing("snapshot", &req.snapshot_id))
    }

    async fn list_volume_snapshots(&self, req: VolumeRef) -> Result<Vec<VolumeSnapshot>> {
        self.enter("ListVolumeSnapshots")?;
        let mut state = self.state.lock();
        let draining = std::mem::take(&mut state.draining);
        Ok(state
            .snapshots
            .values()
            .chain(draining.values())
            .filter(|s| s.volume_id == req.volume_id)
            .cloned()
            .collect())
    }

    async fn delete_volume_snapshot(&self, req: SnapshotRef) -> Result<()> {
        self.enter("DeleteVolumeSnapshot")?;
        let mut state = self.state.lock();
        if self.sticky_snapshots.load(Ordering::Relaxed) {
            if state.snapshots.contains_key(&req.snapshot_id) {
                return Ok(());
            }
            return Err(missing("snapshot", &req.snapshot_id));
        }
        match state.snapshots.remove(&req.snapshot_id) {
            Some(mut snapshot) => {
                if self.lagging_snapshot_deletes.load(Ordering::Relaxed) {
                    snapshot.status = SnapshotStatus::Deleting;
                    state.draining.insert(req.snapshot_id, snapshot);
                }
                Ok(())
            }
            None => Err(missing("snapshot", &req.snapshot_id)),
        }
    }

    async fn create_share(&self, req: CreateShareRequest) -> Result<Share> {
        self.enter("CreateShare")?;
        let share = Share {
            id: req.share_id.clone(),
            name: req.name,
            size_gib: req.size_gib,
            protocol: req.protocol,
            status: VolumeStatus::Available,
            pool_id: req.pool_id,
            profile_id: req.profile.id,
            description: req.description,
            export_locations: vec![format!("{}:/shares/{}", DOCK_ENDPOINT, req.share_id)],
        };
        self.state.lock().shares.insert(req.share_id, share.clone());
        Ok(share)
    }

    async fn get_share(&self, req: ShareRef) -> Result<Share> {
        self.enter("GetShare")?;
        self.state
            .lock()
            .shares
            .get(&req.share_id)
            .cloned()
            .ok_or_else(|| missing("share", &req.share_id))
    }

    async fn list_shares(&self, _req: DockRef) -> Result<Vec<Share>> {
        self.enter("ListShares")?;
        Ok(self.state.lock().shares.values().cloned().collect())
    }

    async fn delete_share(&self, req: ShareRef) -> Result<()> {
        self.enter("DeleteShare")?;
        match self.state.lock().shares.remove(&req.share_id) {
            Some(_) => Ok(()),
            None => Err(missing("share", &req.share_id)),
        }
    }

    async fn attach_share(&self, req: AttachShareRequest) -> Result<ShareAttachment> {
        self.enter("AttachShare")?;
        let attachment = ShareAttachment {
            id: req.attachment_id.clone(),
            share_id: req.share_id,
            host: req.host,
            access_protocol: req.access_protocol,
            connection_info: BTreeMap::new(),
            mount_dir: None,
            mounted: false,
            status: AttachmentStatus::Available,
        };
        self.state
            .lock()
            .share_attachments
            .insert(req.attachment_id, attachment.clone());
        Ok(attachment)
    }

    async fn detach_share(&self, req: ShareAttachmentRef) -> Result<()> {
        self.enter("DetachShare")?;
        match self.state.lock().share_attachments.remove(&req.attachment_id) {
            Some(_) => Ok(()),
            None => Err(missing("share attachment", &req.attachment_id)),
        }
    }

    async fn mount_share(&self, req: MountShareRequest) -> Result<ShareAttachment> {
        self.enter("MountShare")?;
        let mut state = self.state.lock();
        let attachment = state
            .share_attachments
            .get_mut(&req.attachment_id)
            .ok_or_else(|| missing("share attachment", &req.attachment_id))?;
        attachment.mount_dir = Some(req.mount_dir);
        attachment.mounted = true;
        Ok(attachment.clone())
    }

    async fn unmount_share(&self, req: ShareAttachmentRef) -> Result<ShareAttachment> {
        self.enter("UnmountShare")?;
        let mut state = self.state.lock();
        let attachment = state
            .share_attachments
            .get_mut(&req.attachment_id)
            .ok_or_else(|| missing("share attachment", &req.attachment_id))?;
        attachment.mount_dir = None;
        attachment.mounted = false;
        Ok(attachment.clone())
    }
}

// =============================================================================
// In-Process Transport
// =============================================================================

/// Routes requests to fake docks by endpoint without opening sockets
#[derive(Default)]
pub struct LocalDockClient {
    docks: Mutex<HashMap<String, Arc<FakeDock>>>,
    /// Upcoming sends that fail as if the connection dropped
    transport_failures: AtomicUsize,
    /// Artificial latency per send
    latency: Mutex<Option<Duration>>,
    sends: AtomicUsize,
}

impl LocalDockClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, endpoint: &str, dock: Arc<FakeDock>) {
        self.docks.lock().insert(endpoint.to_string(), dock);
    }

    pub fn drop_next(&self, count: usize) {
        self.transport_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DockClient for LocalDockClient {
    async fn send(&self, endpoint: &str, request: DockRequest) -> Result<RpcResponse> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        let dropped = self
            .transport_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if dropped {
            return Err(Error::DockUnavailable {
                dock: endpoint.to_string(),
                reason: "connection reset".into(),
            });
        }
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let dock = self.docks.lock().get(endpoint).cloned();
        match dock {
            Some(dock) => Ok(dispatch_dock_request(dock.as_ref(), request).await),
            None => Err(Error::DockUnavailable {
                dock: endpoint.to_string(),
                reason: "connection refused".into(),
            }),
        }
    }
}

// =============================================================================
// Wired Controller
// =============================================================================

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<MemoryStore>,
    pub catalog: Catalog,
    pub docks: Arc<DockRegistry>,
    pub profiles: Arc<ProfileRegistry>,
    pub tasks: Arc<TaskQueue>,
    pub metrics: Arc<ControllerMetrics>,
    pub dock: Arc<FakeDock>,
    pub dock_id: String,
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        interval: Duration::from_millis(10),
    }
}

impl Harness {
    /// Controller with one dock and one untagged 100 GiB pool `pool-a`
    pub async fn new() -> Self {
        Self::with_client(LocalDockClient::new()).await
    }

    pub async fn with_client(client: Arc<LocalDockClient>) -> Self {
        let dock = FakeDock::new();
        client.route(DOCK_ENDPOINT, dock.clone());
        Self::wire(client, dock, DOCK_ENDPOINT).await
    }

    /// Wire a controller whose dock is reached through `client` at `endpoint`
    pub async fn wire(client: DockClientRef, dock: Arc<FakeDock>, endpoint: &str) -> Self {
        let store = Arc::new(MemoryStore::new());
        let catalog = Catalog::new(store.clone());
        let docks = DockRegistry::new(catalog.clone(), None);
        let policy = PolicyEngine::new(fast_retry());
        let profiles = ProfileRegistry::new(catalog.clone(), policy.clone());
        profiles
            .ensure_default()
            .await
            .expect("seed default profile");
        let metrics = ControllerMetrics::new().expect("metrics registry");
        let tasks = TaskQueue::new(16, metrics.clone());
        let orchestrator = Orchestrator::new(
            catalog.clone(),
            docks.clone(),
            profiles.clone(),
            policy,
            client,
            tasks.clone(),
            metrics.clone(),
        );

        let dock_id = docks
            .register(endpoint, vec!["lvm".to_string()])
            .await
            .expect("register dock");
        let harness = Self {
            orchestrator,
            store,
            catalog,
            docks,
            profiles,
            tasks,
            metrics,
            dock,
            dock_id,
        };
        harness.add_pool("pool-a", 100, &[]).await;
        harness
    }

    pub async fn add_pool(&self, id: &str, free_gib: u64, pool_tags: &[(&str, &str)]) {
        let mut pools = self.catalog.list_pools().await.expect("list pools");
        pools.retain(|p| p.dock_id == self.dock_id);
        pools.push(Pool {
            id: id.to_string(),
            name: id.to_string(),
            dock_id: self.dock_id.clone(),
            availability_zone: "default".to_string(),
            total_capacity_gib: free_gib,
            free_capacity_gib: free_gib,
            tags: tags(pool_tags),
        });
        self.docks
            .report_pools(&self.dock_id, pools)
            .await
            .expect("report pools");
    }

    pub async fn profile(&self, name: &str, profile_tags: &[(&str, &str)]) -> Profile {
        self.profiles
            .create(ProfileSpec {
                name: name.to_string(),
                description: String::new(),
                tags: tags(profile_tags),
            })
            .await
            .expect("create profile")
    }

    pub async fn pool(&self, id: &str) -> Pool {
        self.catalog
            .get_pool(id)
            .await
            .expect("read pool")
            .expect("pool exists")
    }
}
