//! Placement Scheduler
//!
//! Chooses the pool a new resource lands on. A pool qualifies when it
//! carries every synchronous tag with the same value, has at least the
//! requested free capacity and belongs to an available dock. Among
//! qualifying pools the one with the most free capacity wins; ties go to
//! the lowest pool ID.

use super::dock_registry::DockRegistry;
use crate::domain::model::{Pool, TagMap};
use crate::error::{Error, Result};
use crate::store::Catalog;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Pool selection over the store's pool inventory
pub struct PlacementScheduler {
    catalog: Catalog,
    docks: Arc<DockRegistry>,
}

impl PlacementScheduler {
    pub fn new(catalog: Catalog, docks: Arc<DockRegistry>) -> Self {
        Self { catalog, docks }
    }

    /// Pure selection over a pool snapshot
    pub fn select<'a>(
        pools: &'a [Pool],
        available_docks: &BTreeSet<String>,
        sync_tags: &TagMap,
        size_gib: u64,
        availability_zone: Option<&str>,
    ) -> Option<&'a Pool> {
        pools
            .iter()
            .filter(|p| available_docks.contains(&p.dock_id))
            .filter(|p| availability_zone.map_or(true, |az| p.availability_zone == az))
            .filter(|p| p.free_capacity_gib >= size_gib)
            .filter(|p| p.satisfies(sync_tags))
            // Largest free capacity first, then lowest ID
            .min_by(|a, b| {
                b.free_capacity_gib
                    .cmp(&a.free_capacity_gib)
                    .then_with(|| a.id.cmp(&b.id))
            })
    }

    /// Pick a pool for a new resource of `size_gib`
    pub async fn pick_pool(
        &self,
        sync_tags: &TagMap,
        size_gib: u64,
        availability_zone: Option<&str>,
    ) -> Result<Pool> {
        let pools = self.catalog.list_pools().await?;
        let available = self.docks.available_dock_ids();

        match Self::select(&pools, &available, sync_tags, size_gib, availability_zone) {
            Some(pool) => {
                debug!(
                    "Placed {} GiB on pool {} (dock {}, {} GiB free)",
                    size_gib, pool.id, pool.dock_id, pool.free_capacity_gib
                );
                Ok(pool.clone())
            }
            None => Err(Error::NoSuitablePool {
                size_gib,
                tags: format_tags(sync_tags),
            }),
        }
    }

    /// Pool recorded for an existing volume
    pub async fn pick_pool_by_volume(&self, volume_id: &str) -> Result<String> {
        Ok(self.catalog.require_volume(volume_id).await?.pool_id)
    }
}

fn format_tags(tags: &TagMap) -> String {
    tags.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pool(id: &str, dock: &str, free: u64, tags: &[(&str, &str)]) -> Pool {
        Pool {
            id: id.into(),
            name: id.into(),
            dock_id: dock.into(),
            availability_zone: "default".into(),
            total_capacity_gib: 100,
            free_capacity_gib: free,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn docks(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn thin() -> TagMap {
        [("thinProvision".to_string(), "true".to_string())]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_prefers_greatest_free_capacity() {
        let pools = vec![
            make_pool("pool-a", "d1", 10, &[]),
            make_pool("pool-b", "d1", 50, &[]),
            make_pool("pool-c", "d1", 30, &[]),
        ];
        let chosen = PlacementScheduler::select(&pools, &docks(&["d1"]), &TagMap::new(), 1, None);
        assert_eq!(chosen.unwrap().id, "pool-b");
    }

    #[test]
    fn test_ties_break_on_lowest_id() {
        let pools = vec![
            make_pool("pool-z", "d1", 20, &[]),
            make_pool("pool-m", "d1", 20, &[]),
        ];
        let chosen = PlacementScheduler::select(&pools, &docks(&["d1"]), &TagMap::new(), 1, None);
        assert_eq!(chosen.unwrap().id, "pool-m");
    }

    #[test]
    fn test_sync_tags_must_match() {
        let pools = vec![
            make_pool("plain", "d1", 90, &[]),
            make_pool("thin", "d1", 10, &[("thinProvision", "true")]),
            make_pool("thick", "d1", 80, &[("thinProvision", "false")]),
        ];
        let chosen = PlacementScheduler::select(&pools, &docks(&["d1"]), &thin(), 2, None);
        assert_eq!(chosen.unwrap().id, "thin");

        let none = PlacementScheduler::select(&pools[..1], &docks(&["d1"]), &thin(), 2, None);
        assert!(none.is_none());
    }

    #[test]
    fn test_capacity_boundary() {
        let pools = vec![make_pool("pool-1", "d1", 7, &[])];
        let available = docks(&["d1"]);
        assert!(PlacementScheduler::select(&pools, &available, &TagMap::new(), 7, None).is_some());
        assert!(PlacementScheduler::select(&pools, &available, &TagMap::new(), 8, None).is_none());
    }

    #[test]
    fn test_skips_pools_of_unavailable_docks() {
        let pools = vec![
            make_pool("big", "down-dock", 90, &[]),
            make_pool("small", "up-dock", 5, &[]),
        ];
        let chosen =
            PlacementScheduler::select(&pools, &docks(&["up-dock"]), &TagMap::new(), 1, None);
        assert_eq!(chosen.unwrap().id, "small");
    }

    #[test]
    fn test_availability_zone_filter() {
        let mut east = make_pool("east", "d1", 10, &[]);
        east.availability_zone = "east".into();
        let pools = vec![east, make_pool("west", "d1", 90, &[])];
        let chosen =
            PlacementScheduler::select(&pools, &docks(&["d1"]), &TagMap::new(), 1, Some("east"));
        assert_eq!(chosen.unwrap().id, "east");
    }

    #[test]
    fn test_format_tags() {
        assert_eq!(format_tags(&thin()), "thinProvision=true");
        assert_eq!(format_tags(&TagMap::new()), "");
    }
}
