//! Dock Registry
//!
//! Assigns stable identifiers to dock agents and answers "which dock serves
//! backend X" and "which dock owns pool P". Records live in the metadata
//! store; the in-memory table is a write-through cache rebuilt by
//! [`DockRegistry::init`].
//!
//! Two docks claiming the same endpoint are resolved last-writer-wins: the
//! newer claim keeps the endpoint and the displaced record is dropped with a
//! warning.

use crate::domain::model::{Dock, DockStatus, Pool};
use crate::error::{Error, Result};
use crate::store::{Catalog, DockRouteFile};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_AVAILABILITY_ZONE: &str = "default";

// =============================================================================
// Registry Events
// =============================================================================

/// Events emitted by the dock registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DockEvent {
    /// A new dock was registered
    Registered {
        dock_id: String,
        endpoint: String,
        backends: Vec<String>,
    },

    /// A dock was deregistered together with its pools
    Deregistered { dock_id: String, endpoint: String },

    /// A dock went down or came back
    StatusChanged { dock_id: String, status: DockStatus },

    /// A dock moved to a new endpoint
    EndpointChanged {
        dock_id: String,
        old_endpoint: String,
        new_endpoint: String,
    },

    /// A dock reported its pool inventory
    PoolsReported { dock_id: String, pool_count: usize },
}

impl DockEvent {
    /// Get the dock ID associated with this event
    pub fn dock_id(&self) -> &str {
        match self {
            DockEvent::Registered { dock_id, .. } => dock_id,
            DockEvent::Deregistered { dock_id, .. } => dock_id,
            DockEvent::StatusChanged { dock_id, .. } => dock_id,
            DockEvent::EndpointChanged { dock_id, .. } => dock_id,
            DockEvent::PoolsReported { dock_id, .. } => dock_id,
        }
    }
}

/// Result of an idempotent deregistration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Deregistration {
    Removed { dock_id: String },
    NotFound,
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct RegistryStats {
    registrations: AtomicU64,
    deregistrations: AtomicU64,
    heartbeats: AtomicU64,
    endpoint_conflicts: AtomicU64,
}

/// Snapshot of registry statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStatsSnapshot {
    pub total_docks: u64,
    pub available_docks: u64,
    pub registrations: u64,
    pub deregistrations: u64,
    pub heartbeats: u64,
    pub endpoint_conflicts: u64,
}

// =============================================================================
// Dock Table
// =============================================================================

#[derive(Debug, Default)]
struct DockTable {
    docks: BTreeMap<String, Dock>,
    by_endpoint: HashMap<String, String>,
}

impl DockTable {
    /// Insert or replace a dock; returns a dock displaced from the endpoint
    fn upsert(&mut self, dock: Dock) -> Option<Dock> {
        let displaced = match self.by_endpoint.get(&dock.endpoint) {
            Some(owner) if *owner != dock.id => self.docks.remove(owner.as_str()),
            _ => None,
        };
        if let Some(previous) = self.docks.get(&dock.id) {
            if previous.endpoint != dock.endpoint {
                self.by_endpoint.remove(&previous.endpoint);
            }
        }
        self.by_endpoint.insert(dock.endpoint.clone(), dock.id.clone());
        self.docks.insert(dock.id.clone(), dock);
        displaced
    }

    fn remove(&mut self, dock_id: &str) -> Option<Dock> {
        let dock = self.docks.remove(dock_id)?;
        if self.by_endpoint.get(&dock.endpoint).map(String::as_str) == Some(dock_id) {
            self.by_endpoint.remove(&dock.endpoint);
        }
        Some(dock)
    }
}

fn last_write(dock: &Dock) -> DateTime<Utc> {
    dock.updated_at.unwrap_or(dock.created_at)
}

// =============================================================================
// Dock Registry
// =============================================================================

/// Process-wide registry of dock agents
pub struct DockRegistry {
    catalog: Catalog,
    route_file: Option<DockRouteFile>,
    table: RwLock<DockTable>,
    stats: RegistryStats,
    event_sender: broadcast::Sender<DockEvent>,
}

impl DockRegistry {
    /// Create a registry backed by `catalog`, optionally seeded from a route file
    pub fn new(catalog: Catalog, route_file: Option<DockRouteFile>) -> Arc<Self> {
        let (event_sender, _) = broadcast::channel(1024);
        Arc::new(Self {
            catalog,
            route_file,
            table: RwLock::new(DockTable::default()),
            stats: RegistryStats::default(),
            event_sender,
        })
    }

    /// Get an event receiver
    pub fn subscribe(&self) -> broadcast::Receiver<DockEvent> {
        self.event_sender.subscribe()
    }

    /// Load docks from the store, importing seed records it does not know yet
    ///
    /// Returns the number of docks in the registry afterwards.
    pub async fn init(&self) -> Result<usize> {
        let mut docks = self.catalog.list_docks().await?;

        if let Some(file) = &self.route_file {
            let known: BTreeSet<String> = docks.iter().map(|d| d.id.clone()).collect();
            for seed in file.load().await? {
                if known.contains(&seed.id) {
                    continue;
                }
                match self.catalog.create_dock(&seed).await {
                    Ok(()) => {
                        info!("Importing dock {} ({}) from route file", seed.id, seed.endpoint);
                        docks.push(seed);
                    }
                    // Stored concurrently; the store copy wins over the seed
                    Err(Error::StoreConflict { .. }) => {
                        if let Some(stored) = self.catalog.get_dock(&seed.id).await? {
                            docks.push(stored);
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        // Oldest first so the newest claim on an endpoint ends up owning it
        docks.sort_by(|a, b| last_write(a).cmp(&last_write(b)).then(a.id.cmp(&b.id)));

        let mut displaced = Vec::new();
        {
            let mut table = self.table.write();
            *table = DockTable::default();
            for dock in docks {
                if let Some(old) = table.upsert(dock) {
                    displaced.push(old);
                }
            }
        }
        for old in displaced {
            self.drop_displaced(old).await?;
        }

        let count = self.table.read().docks.len();
        info!("Dock registry initialized with {} dock(s)", count);
        Ok(count)
    }

    /// Write the current docks to the route file, if one is configured
    pub async fn flush(&self) -> Result<()> {
        if let Some(file) = &self.route_file {
            let docks = self.list();
            file.save(&docks).await?;
            info!("Flushed {} dock(s) to {}", docks.len(), file.path().display());
        }
        Ok(())
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a dock in the default availability zone
    pub async fn register(&self, endpoint: &str, backends: Vec<String>) -> Result<String> {
        self.register_in_zone(endpoint, backends, None).await
    }

    /// Register a dock; an already known endpoint returns its existing id
    pub async fn register_in_zone(
        &self,
        endpoint: &str,
        backends: Vec<String>,
        availability_zone: Option<String>,
    ) -> Result<String> {
        if endpoint.trim().is_empty() {
            return Err(Error::Validation("dock endpoint must not be empty".into()));
        }

        if let Some(existing) = self.lookup_endpoint(endpoint) {
            let mut backends = backends;
            backends.sort();
            backends.dedup();
            if existing.backends != backends {
                self.modify(&existing.id, |dock| dock.backends = backends.clone())
                    .await?;
                debug!("Updated backends of dock {}", existing.id);
            }
            debug!("Dock {} already registered at {}", existing.id, endpoint);
            return Ok(existing.id);
        }

        let mut backends = backends;
        backends.sort();
        backends.dedup();
        let dock = Dock {
            id: Uuid::new_v4().to_string(),
            endpoint: endpoint.to_string(),
            availability_zone: availability_zone
                .unwrap_or_else(|| DEFAULT_AVAILABILITY_ZONE.to_string()),
            backends: backends.clone(),
            status: DockStatus::Available,
            created_at: Utc::now(),
            updated_at: None,
        };
        let dock_id = dock.id.clone();
        self.catalog.create_dock(&dock).await?;
        self.cache(dock).await?;

        self.stats.registrations.fetch_add(1, Ordering::Relaxed);
        let _ = self.event_sender.send(DockEvent::Registered {
            dock_id: dock_id.clone(),
            endpoint: endpoint.to_string(),
            backends: backends.clone(),
        });
        info!(
            "Registered dock {} at {} (backends: {})",
            dock_id,
            endpoint,
            backends.join(",")
        );
        Ok(dock_id)
    }

    /// Remove the dock at `endpoint` and its pools
    pub async fn deregister(&self, endpoint: &str) -> Result<Deregistration> {
        let dock = match self.lookup_endpoint(endpoint) {
            Some(dock) => dock,
            None => {
                debug!("Deregister of unknown endpoint {}", endpoint);
                return Ok(Deregistration::NotFound);
            }
        };

        let removed_pools = self.remove_pools_of(&dock.id).await?;
        self.catalog.delete_dock(&dock.id).await?;
        self.table.write().remove(&dock.id);

        self.stats.deregistrations.fetch_add(1, Ordering::Relaxed);
        let _ = self.event_sender.send(DockEvent::Deregistered {
            dock_id: dock.id.clone(),
            endpoint: dock.endpoint.clone(),
        });
        info!(
            "Deregistered dock {} at {} ({} pool(s) removed)",
            dock.id, dock.endpoint, removed_pools
        );
        Ok(Deregistration::Removed { dock_id: dock.id })
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Get a dock by ID
    pub fn get(&self, dock_id: &str) -> Result<Dock> {
        self.table
            .read()
            .docks
            .get(dock_id)
            .cloned()
            .ok_or_else(|| Error::DockNotFound {
                dock: dock_id.to_string(),
            })
    }

    /// All docks ordered by ID
    pub fn list(&self) -> Vec<Dock> {
        self.table.read().docks.values().cloned().collect()
    }

    /// IDs of docks currently available
    pub fn available_dock_ids(&self) -> BTreeSet<String> {
        self.table
            .read()
            .docks
            .values()
            .filter(|d| d.is_available())
            .map(|d| d.id.clone())
            .collect()
    }

    /// A dock hosting `backend`
    ///
    /// Available docks win over down ones; within each group the lowest ID is
    /// chosen so the answer is stable.
    pub fn find_by_backend(&self, backend: &str) -> Result<String> {
        let table = self.table.read();
        table
            .docks
            .values()
            .filter(|d| d.hosts(backend))
            .min_by_key(|d| (!d.is_available(), d.id.clone()))
            .map(|d| d.id.clone())
            .ok_or_else(|| Error::DockNotFound {
                dock: format!("backend {}", backend),
            })
    }

    /// The dock owning `pool_id`
    pub async fn find_by_pool(&self, pool_id: &str) -> Result<Dock> {
        let pool = self
            .catalog
            .get_pool(pool_id)
            .await?
            .ok_or_else(|| Error::PoolNotFound {
                pool_id: pool_id.to_string(),
            })?;
        self.get(&pool.dock_id)
    }

    /// All pools known to the store
    pub async fn pools(&self) -> Result<Vec<Pool>> {
        self.catalog.list_pools().await
    }

    fn lookup_endpoint(&self, endpoint: &str) -> Option<Dock> {
        let table = self.table.read();
        table
            .by_endpoint
            .get(endpoint)
            .and_then(|id| table.docks.get(id))
            .cloned()
    }

    // =========================================================================
    // Status & Inventory
    // =========================================================================

    /// Record a heartbeat; a down dock becomes available again
    pub async fn heartbeat(&self, dock_id: &str) -> Result<()> {
        self.stats.heartbeats.fetch_add(1, Ordering::Relaxed);
        self.set_status(dock_id, DockStatus::Available).await
    }

    /// Mark a dock down; placement stops choosing its pools
    pub async fn mark_down(&self, dock_id: &str) -> Result<()> {
        self.set_status(dock_id, DockStatus::Down).await
    }

    async fn set_status(&self, dock_id: &str, status: DockStatus) -> Result<()> {
        let mut previous = status;
        self.modify(dock_id, |dock| {
            previous = dock.status;
            dock.status = status;
        })
        .await?;
        let changed = previous != status;

        if changed {
            let _ = self.event_sender.send(DockEvent::StatusChanged {
                dock_id: dock_id.to_string(),
                status,
            });
            info!("Dock {} is now {}", dock_id, status);
        }
        Ok(())
    }

    /// Move a dock to a new endpoint
    pub async fn update_endpoint(&self, dock_id: &str, endpoint: &str) -> Result<()> {
        if endpoint.trim().is_empty() {
            return Err(Error::Validation("dock endpoint must not be empty".into()));
        }
        if self.get(dock_id)?.endpoint == endpoint {
            return Ok(());
        }
        let mut old_endpoint = String::new();
        self.modify(dock_id, |dock| {
            old_endpoint = std::mem::replace(&mut dock.endpoint, endpoint.to_string());
        })
        .await?;

        let _ = self.event_sender.send(DockEvent::EndpointChanged {
            dock_id: dock_id.to_string(),
            old_endpoint: old_endpoint.clone(),
            new_endpoint: endpoint.to_string(),
        });
        info!("Dock {} moved from {} to {}", dock_id, old_endpoint, endpoint);
        Ok(())
    }

    /// Upsert the pools a dock exposes
    ///
    /// Free capacity of an already known pool is owned by the provisioning
    /// paths and is only clamped to the reported total.
    pub async fn report_pools(&self, dock_id: &str, pools: Vec<Pool>) -> Result<usize> {
        let dock = self.get(dock_id)?;
        let count = pools.len();

        for mut pool in pools {
            if pool.id.is_empty() {
                return Err(Error::Validation("pool id must not be empty".into()));
            }
            if pool.dock_id.is_empty() {
                pool.dock_id = dock.id.clone();
            } else if pool.dock_id != dock.id {
                return Err(Error::Validation(format!(
                    "pool {} belongs to dock {}, reported by {}",
                    pool.id, pool.dock_id, dock.id
                )));
            }
            if pool.free_capacity_gib > pool.total_capacity_gib {
                return Err(Error::Validation(format!(
                    "pool {} reports more free than total capacity",
                    pool.id
                )));
            }
            if pool.availability_zone.is_empty() {
                pool.availability_zone = dock.availability_zone.clone();
            }

            match self.catalog.get_pool(&pool.id).await? {
                Some(_) => {
                    let reported = pool.clone();
                    self.catalog
                        .update_with::<Pool, _>(&crate::store::keys::pool(&pool.id), move |p| {
                            let allocated = p.allocated_gib();
                            p.name = reported.name.clone();
                            p.tags = reported.tags.clone();
                            p.availability_zone = reported.availability_zone.clone();
                            p.total_capacity_gib = reported.total_capacity_gib;
                            p.free_capacity_gib =
                                reported.total_capacity_gib.saturating_sub(allocated);
                            Ok(())
                        })
                        .await?;
                }
                None => self.catalog.put_pool(&pool).await?,
            }
        }

        let _ = self.event_sender.send(DockEvent::PoolsReported {
            dock_id: dock_id.to_string(),
            pool_count: count,
        });
        debug!("Dock {} reported {} pool(s)", dock_id, count);
        Ok(count)
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    pub fn stats(&self) -> RegistryStatsSnapshot {
        let table = self.table.read();
        RegistryStatsSnapshot {
            total_docks: table.docks.len() as u64,
            available_docks: table.docks.values().filter(|d| d.is_available()).count() as u64,
            registrations: self.stats.registrations.load(Ordering::Relaxed),
            deregistrations: self.stats.deregistrations.load(Ordering::Relaxed),
            heartbeats: self.stats.heartbeats.load(Ordering::Relaxed),
            endpoint_conflicts: self.stats.endpoint_conflicts.load(Ordering::Relaxed),
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Apply `change` to the stored record under compare-and-set, then
    /// refresh the cache from the result
    async fn modify<F>(&self, dock_id: &str, mut change: F) -> Result<Dock>
    where
        F: FnMut(&mut Dock) + Send,
    {
        let dock = self
            .catalog
            .update_dock(dock_id, |dock| {
                change(dock);
                dock.updated_at = Some(Utc::now());
                Ok(())
            })
            .await?
            .ok_or_else(|| Error::DockNotFound {
                dock: dock_id.to_string(),
            })?;
        self.cache(dock.clone()).await?;
        Ok(dock)
    }

    /// Install a stored record in the cache
    async fn cache(&self, dock: Dock) -> Result<()> {
        let displaced = self.table.write().upsert(dock);
        if let Some(old) = displaced {
            self.drop_displaced(old).await?;
        }
        Ok(())
    }

    async fn drop_displaced(&self, old: Dock) -> Result<()> {
        self.stats.endpoint_conflicts.fetch_add(1, Ordering::Relaxed);
        warn!(
            "Endpoint {} claimed by another dock; dropping dock {} (last writer wins)",
            old.endpoint, old.id
        );
        self.remove_pools_of(&old.id).await?;
        self.catalog.delete_dock(&old.id).await?;
        Ok(())
    }

    async fn remove_pools_of(&self, dock_id: &str) -> Result<usize> {
        let mut removed = 0;
        for pool in self.catalog.list_pools().await? {
            if pool.dock_id == dock_id && self.catalog.delete_pool(&pool.id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::TagMap;
    use crate::store::MemoryStore;
    use assert_matches::assert_matches;

    fn catalog() -> Catalog {
        Catalog::new(Arc::new(MemoryStore::new()))
    }

    fn pool(id: &str, dock_id: &str, total: u64, free: u64) -> Pool {
        Pool {
            id: id.into(),
            name: id.into(),
            dock_id: dock_id.into(),
            availability_zone: String::new(),
            total_capacity_gib: total,
            free_capacity_gib: free,
            tags: TagMap::new(),
        }
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let registry = DockRegistry::new(catalog(), None);

        let id1 = registry.register("1.2.3.4", vec!["lvm".into()]).await.unwrap();
        let id2 = registry.register("1.2.3.4", vec!["lvm".into()]).await.unwrap();
        assert_eq!(id1, id2);
        assert_eq!(registry.list().len(), 1);
        assert_eq!(registry.stats().registrations, 1);
    }

    #[tokio::test]
    async fn test_find_by_backend_then_deregister() {
        let registry = DockRegistry::new(catalog(), None);

        let id = registry.register("1.2.3.4", vec!["lvm".into()]).await.unwrap();
        assert_eq!(registry.find_by_backend("lvm").unwrap(), id);

        let outcome = registry.deregister("1.2.3.4").await.unwrap();
        assert_eq!(outcome, Deregistration::Removed { dock_id: id });
        assert_matches!(
            registry.find_by_backend("lvm"),
            Err(Error::DockNotFound { .. })
        );

        // Second deregister is a no-op
        assert_eq!(
            registry.deregister("1.2.3.4").await.unwrap(),
            Deregistration::NotFound
        );
    }

    #[tokio::test]
    async fn test_find_by_backend_prefers_available_then_lowest_id() {
        let registry = DockRegistry::new(catalog(), None);
        let a = registry.register("10.0.0.1", vec!["ceph".into()]).await.unwrap();
        let b = registry.register("10.0.0.2", vec!["ceph".into()]).await.unwrap();
        let (low, high) = if a < b { (a, b) } else { (b, a) };

        assert_eq!(registry.find_by_backend("ceph").unwrap(), low);
        registry.mark_down(&low).await.unwrap();
        assert_eq!(registry.find_by_backend("ceph").unwrap(), high);
    }

    #[tokio::test]
    async fn test_report_pools_and_find_by_pool() {
        let registry = DockRegistry::new(catalog(), None);
        let dock_id = registry.register("10.0.0.1", vec!["lvm".into()]).await.unwrap();

        registry
            .report_pools(&dock_id, vec![pool("pool-1", "", 100, 100)])
            .await
            .unwrap();
        let owner = registry.find_by_pool("pool-1").await.unwrap();
        assert_eq!(owner.id, dock_id);

        assert_matches!(
            registry.find_by_pool("missing").await,
            Err(Error::PoolNotFound { .. })
        );
        assert_matches!(
            registry
                .report_pools(&dock_id, vec![pool("pool-2", "other-dock", 1, 1)])
                .await,
            Err(Error::Validation(_))
        );

        registry.deregister("10.0.0.1").await.unwrap();
        assert!(registry.pools().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_report_pools_keeps_allocated_capacity() {
        let catalog = catalog();
        let registry = DockRegistry::new(catalog.clone(), None);
        let dock_id = registry.register("10.0.0.1", vec!["lvm".into()]).await.unwrap();

        registry
            .report_pools(&dock_id, vec![pool("pool-1", "", 100, 100)])
            .await
            .unwrap();
        catalog.reserve_capacity("pool-1", 30).await.unwrap();

        registry
            .report_pools(&dock_id, vec![pool("pool-1", "", 120, 120)])
            .await
            .unwrap();
        let stored = catalog.get_pool("pool-1").await.unwrap().unwrap();
        assert_eq!(stored.total_capacity_gib, 120);
        assert_eq!(stored.free_capacity_gib, 90);
    }

    #[tokio::test]
    async fn test_status_events() {
        let registry = DockRegistry::new(catalog(), None);
        let mut events = registry.subscribe();

        let id = registry.register("10.0.0.1", vec!["lvm".into()]).await.unwrap();
        registry.mark_down(&id).await.unwrap();
        registry.heartbeat(&id).await.unwrap();

        assert_matches!(events.recv().await.unwrap(), DockEvent::Registered { .. });
        assert_eq!(
            events.recv().await.unwrap(),
            DockEvent::StatusChanged {
                dock_id: id.clone(),
                status: DockStatus::Down
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            DockEvent::StatusChanged {
                dock_id: id.clone(),
                status: DockStatus::Available
            }
        );
        assert_eq!(registry.stats().available_docks, 1);
    }

    #[tokio::test]
    async fn test_status_change_keeps_concurrent_store_write() {
        let catalog = catalog();
        let registry = DockRegistry::new(catalog.clone(), None);
        let id = registry.register("10.0.0.1", vec!["lvm".into()]).await.unwrap();

        // Another writer changes the record behind the cached copy
        catalog
            .update_dock(&id, |dock| {
                dock.backends.push("ceph".into());
                Ok(())
            })
            .await
            .unwrap();
        registry.mark_down(&id).await.unwrap();

        let stored = catalog.get_dock(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, DockStatus::Down);
        assert_eq!(stored.backends, vec!["lvm".to_string(), "ceph".to_string()]);
        assert_eq!(registry.get(&id).unwrap(), stored);
    }

    #[tokio::test]
    async fn test_endpoint_conflict_last_writer_wins() {
        let registry = DockRegistry::new(catalog(), None);
        let a = registry.register("10.0.0.1", vec!["lvm".into()]).await.unwrap();
        let b = registry.register("10.0.0.2", vec!["lvm".into()]).await.unwrap();

        registry.update_endpoint(&b, "10.0.0.1").await.unwrap();

        assert_matches!(registry.get(&a), Err(Error::DockNotFound { .. }));
        assert_eq!(registry.get(&b).unwrap().endpoint, "10.0.0.1");
        assert_eq!(registry.stats().endpoint_conflicts, 1);
    }

    #[tokio::test]
    async fn test_init_loads_store_and_seed_then_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let file = DockRouteFile::new(dir.path().join("dock_route.json"));
        let seed = Dock {
            id: "seed-dock".into(),
            endpoint: "10.0.0.9:50050".into(),
            availability_zone: "default".into(),
            backends: vec!["lvm".into()],
            status: DockStatus::Available,
            created_at: Utc::now(),
            updated_at: None,
        };
        file.save(&[seed.clone()]).await.unwrap();

        let catalog = catalog();
        let registry = DockRegistry::new(catalog.clone(), Some(file.clone()));
        assert_eq!(registry.init().await.unwrap(), 1);
        assert_eq!(registry.get("seed-dock").unwrap(), seed);
        assert!(catalog.get_dock("seed-dock").await.unwrap().is_some());

        registry.register("10.0.0.10:50050", vec![]).await.unwrap();
        registry.flush().await.unwrap();
        assert_eq!(file.load().await.unwrap().len(), 2);

        // A fresh registry over the same store sees both without the file
        let reloaded = DockRegistry::new(catalog, None);
        assert_eq!(reloaded.init().await.unwrap(), 2);
    }
}
