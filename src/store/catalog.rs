//! Typed Catalog over the Metadata Store
//!
//! Serializes entities as JSON under the key layout in [`super::keys`].
//! Read-modify-write goes through compare-and-set so concurrent writers of
//! the same record never lose updates silently.

use super::keys;
use crate::domain::model::*;
use crate::domain::ports::MetadataStoreRef;
use crate::error::{Error, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// Upper bound on compare-and-set retries for one read-modify-write
const MAX_CAS_RETRIES: usize = 16;

/// Typed access to persisted entities
#[derive(Clone)]
pub struct Catalog {
    store: MetadataStoreRef,
}

impl Catalog {
    pub fn new(store: MetadataStoreRef) -> Self {
        Self { store }
    }

    /// Underlying store
    pub fn store(&self) -> &MetadataStoreRef {
        &self.store
    }

    // =========================================================================
    // Generic Record Access
    // =========================================================================

    async fn get_record<T: DeserializeOwned>(&self, key: &str) -> Result<Option<(T, u64)>> {
        match self.store.get(key).await? {
            Some(v) => Ok(Some((serde_json::from_slice(&v.value)?, v.version))),
            None => Ok(None),
        }
    }

    async fn put_record<T: Serialize>(&self, key: &str, value: &T) -> Result<u64> {
        let bytes = Bytes::from(serde_json::to_vec(value)?);
        self.store.put(key, bytes).await
    }

    /// Write only if the key is absent
    async fn create_record<T: Serialize>(&self, key: &str, value: &T) -> Result<u64> {
        let bytes = Bytes::from(serde_json::to_vec(value)?);
        self.store.compare_and_set(key, None, bytes).await
    }

    async fn list_records<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        self.store
            .list_prefix(prefix)
            .await?
            .into_iter()
            .map(|(_, v)| serde_json::from_slice(&v.value).map_err(Error::from))
            .collect()
    }

    /// Read-modify-write a record under compare-and-set
    ///
    /// Returns `None` when the key does not exist. `apply` may run more than
    /// once if another writer wins the race.
    pub async fn update_with<T, F>(&self, key: &str, mut apply: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnMut(&mut T) -> Result<()> + Send,
    {
        for attempt in 0..MAX_CAS_RETRIES {
            let (mut record, version) = match self.get_record::<T>(key).await? {
                Some(found) => found,
                None => return Ok(None),
            };
            apply(&mut record)?;
            let bytes = Bytes::from(serde_json::to_vec(&record)?);
            match self.store.compare_and_set(key, Some(version), bytes).await {
                Ok(_) => return Ok(Some(record)),
                Err(Error::StoreConflict { .. }) => {
                    debug!("CAS conflict on {} (attempt {})", key, attempt + 1);
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::StoreConflict {
            key: key.to_string(),
        })
    }

    // =========================================================================
    // Docks & Pools
    // =========================================================================

    /// Store a new dock; fails with [`Error::StoreConflict`] if the id exists
    pub async fn create_dock(&self, dock: &Dock) -> Result<()> {
        self.create_record(&keys::dock(&dock.id), dock).await.map(|_| ())
    }

    /// Read-modify-write a dock record; `None` when it does not exist
    pub async fn update_dock<F>(&self, id: &str, apply: F) -> Result<Option<Dock>>
    where
        F: FnMut(&mut Dock) -> Result<()> + Send,
    {
        self.update_with(&keys::dock(id), apply).await
    }

    pub async fn get_dock(&self, id: &str) -> Result<Option<Dock>> {
        Ok(self.get_record(&keys::dock(id)).await?.map(|(d, _)| d))
    }

    pub async fn list_docks(&self) -> Result<Vec<Dock>> {
        self.list_records(keys::DOCKS_PREFIX).await
    }

    pub async fn delete_dock(&self, id: &str) -> Result<bool> {
        self.store.delete(&keys::dock(id)).await
    }

    pub async fn put_pool(&self, pool: &Pool) -> Result<()> {
        self.put_record(&keys::pool(&pool.id), pool).await.map(|_| ())
    }

    pub async fn get_pool(&self, id: &str) -> Result<Option<Pool>> {
        Ok(self.get_record(&keys::pool(id)).await?.map(|(p, _)| p))
    }

    pub async fn list_pools(&self) -> Result<Vec<Pool>> {
        self.list_records(keys::POOLS_PREFIX).await
    }

    pub async fn delete_pool(&self, id: &str) -> Result<bool> {
        self.store.delete(&keys::pool(id)).await
    }

    /// Decrement a pool's free capacity by `size_gib`
    ///
    /// Fails with [`Error::NoSuitablePool`] if a concurrent reservation
    /// consumed the capacity in the meantime.
    pub async fn reserve_capacity(&self, pool_id: &str, size_gib: u64) -> Result<Pool> {
        self.update_with::<Pool, _>(&keys::pool(pool_id), |pool| {
            if pool.free_capacity_gib < size_gib {
                return Err(Error::NoSuitablePool {
                    size_gib,
                    tags: format!("pool {} has {} GiB free", pool.id, pool.free_capacity_gib),
                });
            }
            pool.free_capacity_gib -= size_gib;
            Ok(())
        })
        .await?
        .ok_or_else(|| Error::PoolNotFound {
            pool_id: pool_id.to_string(),
        })
    }

    /// Return `size_gib` to a pool, never exceeding its total capacity
    ///
    /// A pool removed in the meantime is not an error.
    pub async fn release_capacity(&self, pool_id: &str, size_gib: u64) -> Result<()> {
        self.update_with::<Pool, _>(&keys::pool(pool_id), |pool| {
            pool.free_capacity_gib = pool
                .free_capacity_gib
                .saturating_add(size_gib)
                .min(pool.total_capacity_gib);
            Ok(())
        })
        .await
        .map(|_| ())
    }

    // =========================================================================
    // Profiles
    // =========================================================================

    pub async fn create_profile(&self, profile: &Profile) -> Result<()> {
        self.create_record(&keys::profile(&profile.id), profile)
            .await
            .map(|_| ())
    }

    pub async fn put_profile(&self, profile: &Profile) -> Result<()> {
        self.put_record(&keys::profile(&profile.id), profile)
            .await
            .map(|_| ())
    }

    pub async fn get_profile(&self, id: &str) -> Result<Option<Profile>> {
        Ok(self.get_record(&keys::profile(id)).await?.map(|(p, _)| p))
    }

    pub async fn list_profiles(&self) -> Result<Vec<Profile>> {
        self.list_records(keys::PROFILES_PREFIX).await
    }

    pub async fn delete_profile(&self, id: &str) -> Result<bool> {
        self.store.delete(&keys::profile(id)).await
    }

    // =========================================================================
    // Volumes & Attachments
    // =========================================================================

    pub async fn put_volume(&self, volume: &Volume) -> Result<()> {
        self.put_record(&keys::volume(&volume.id), volume)
            .await
            .map(|_| ())
    }

    pub async fn get_volume(&self, id: &str) -> Result<Option<Volume>> {
        Ok(self.get_record(&keys::volume(id)).await?.map(|(v, _)| v))
    }

    /// Like [`Self::get_volume`] but a miss is an error
    pub async fn require_volume(&self, id: &str) -> Result<Volume> {
        self.get_volume(id).await?.ok_or_else(|| Error::VolumeNotFound {
            volume_id: id.to_string(),
        })
    }

    pub async fn list_volumes(&self) -> Result<Vec<Volume>> {
        self.list_records(keys::VOLUMES_PREFIX).await
    }

    /// Move a volume to `status` through its state machine
    pub async fn set_volume_status(&self, id: &str, status: VolumeStatus) -> Result<Volume> {
        self.update_with::<Volume, _>(&keys::volume(id), |v| v.transition(status))
            .await?
            .ok_or_else(|| Error::VolumeNotFound {
                volume_id: id.to_string(),
            })
    }

    pub async fn delete_volume(&self, id: &str) -> Result<bool> {
        self.store.delete(&keys::volume(id)).await
    }

    pub async fn put_attachment(&self, attachment: &VolumeAttachment) -> Result<()> {
        self.put_record(
            &keys::volume_attachment(&attachment.volume_id, &attachment.id),
            attachment,
        )
        .await
        .map(|_| ())
    }

    pub async fn list_attachments(&self, volume_id: &str) -> Result<Vec<VolumeAttachment>> {
        self.list_records(&keys::volume_attachments(volume_id))
            .await
    }

    /// Locate an attachment by id across all volumes
    pub async fn find_attachment(&self, attachment_id: &str) -> Result<Option<VolumeAttachment>> {
        self.find_nested(keys::VOLUME_PREFIX, attachment_id).await
    }

    pub async fn require_attachment(&self, attachment_id: &str) -> Result<VolumeAttachment> {
        self.find_attachment(attachment_id)
            .await?
            .ok_or_else(|| Error::AttachmentNotFound {
                attachment_id: attachment_id.to_string(),
            })
    }

    pub async fn delete_attachment(&self, volume_id: &str, attachment_id: &str) -> Result<bool> {
        self.store
            .delete(&keys::volume_attachment(volume_id, attachment_id))
            .await
    }

    async fn find_nested<T: DeserializeOwned>(&self, prefix: &str, id: &str) -> Result<Option<T>> {
        let suffix = format!("{}{}", keys::ATTACHMENTS_SEGMENT, id);
        for (key, v) in self.store.list_prefix(prefix).await? {
            if key.ends_with(&suffix) {
                return Ok(Some(serde_json::from_slice(&v.value)?));
            }
        }
        Ok(None)
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    pub async fn put_snapshot(&self, snapshot: &VolumeSnapshot) -> Result<()> {
        self.put_record(&keys::snapshot(&snapshot.id), snapshot)
            .await
            .map(|_| ())
    }

    pub async fn get_snapshot(&self, id: &str) -> Result<Option<VolumeSnapshot>> {
        Ok(self.get_record(&keys::snapshot(id)).await?.map(|(s, _)| s))
    }

    pub async fn require_snapshot(&self, id: &str) -> Result<VolumeSnapshot> {
        self.get_snapshot(id)
            .await?
            .ok_or_else(|| Error::SnapshotNotFound {
                snapshot_id: id.to_string(),
            })
    }

    pub async fn list_snapshots(&self) -> Result<Vec<VolumeSnapshot>> {
        self.list_records(keys::SNAPSHOTS_PREFIX).await
    }

    /// Snapshots whose source is `volume_id`
    ///
    /// An empty id is rejected rather than matching snapshots with no source.
    pub async fn list_snapshots_for_volume(&self, volume_id: &str) -> Result<Vec<VolumeSnapshot>> {
        if volume_id.is_empty() {
            return Err(Error::Validation(
                "snapshot enumeration requires a volume id".to_string(),
            ));
        }
        Ok(self
            .list_snapshots()
            .await?
            .into_iter()
            .filter(|s| s.volume_id == volume_id)
            .collect())
    }

    pub async fn delete_snapshot(&self, id: &str) -> Result<bool> {
        self.store.delete(&keys::snapshot(id)).await
    }

    // =========================================================================
    // Shares
    // =========================================================================

    pub async fn put_share(&self, share: &Share) -> Result<()> {
        self.put_record(&keys::share(&share.id), share)
            .await
            .map(|_| ())
    }

    pub async fn get_share(&self, id: &str) -> Result<Option<Share>> {
        Ok(self.get_record(&keys::share(id)).await?.map(|(s, _)| s))
    }

    pub async fn require_share(&self, id: &str) -> Result<Share> {
        self.get_share(id).await?.ok_or_else(|| Error::ShareNotFound {
            share_id: id.to_string(),
        })
    }

    pub async fn set_share_status(&self, id: &str, status: ShareStatus) -> Result<Share> {
        self.update_with::<Share, _>(&keys::share(id), |s| {
            if !s.status.can_transition_to(status) {
                return Err(Error::InvalidState {
                    resource: "share".into(),
                    id: s.id.clone(),
                    reason: format!("cannot move from {} to {}", s.status, status),
                });
            }
            s.status = status;
            Ok(())
        })
        .await?
        .ok_or_else(|| Error::ShareNotFound {
            share_id: id.to_string(),
        })
    }

    pub async fn list_shares(&self) -> Result<Vec<Share>> {
        self.list_records(keys::SHARES_PREFIX).await
    }

    pub async fn delete_share(&self, id: &str) -> Result<bool> {
        self.store.delete(&keys::share(id)).await
    }

    pub async fn put_share_attachment(&self, attachment: &ShareAttachment) -> Result<()> {
        self.put_record(
            &keys::share_attachment(&attachment.share_id, &attachment.id),
            attachment,
        )
        .await
        .map(|_| ())
    }

    pub async fn list_share_attachments(&self, share_id: &str) -> Result<Vec<ShareAttachment>> {
        self.list_records(&keys::share_attachments(share_id)).await
    }

    pub async fn require_share_attachment(&self, attachment_id: &str) -> Result<ShareAttachment> {
        self.find_nested(keys::SHARE_PREFIX, attachment_id)
            .await?
            .ok_or_else(|| Error::AttachmentNotFound {
                attachment_id: attachment_id.to_string(),
            })
    }

    pub async fn delete_share_attachment(&self, share_id: &str, attachment_id: &str) -> Result<bool> {
        self.store
            .delete(&keys::share_attachment(share_id, attachment_id))
            .await
    }
}
