//! Profile Registry
//!
//! Maps profile names to validated tag sets. Write operations assume the
//! caller already holds administrator authority; that check happens in the
//! API server before a request reaches the controller.

use super::policy::PolicyEngine;
use crate::domain::model::{Profile, TagMap};
use crate::domain::protocol::{ProfilePatch, ProfileSpec};
use crate::error::{Error, Result};
use crate::store::{keys, Catalog};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedRwLockReadGuard, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_PROFILE_NAME: &str = "default";

/// Keeps a resolved profile from being deleted while it is held
pub type ProfileLease = OwnedRwLockReadGuard<()>;

/// Registry of storage profiles
pub struct ProfileRegistry {
    catalog: Catalog,
    policy: PolicyEngine,
    /// Serializes writers so name uniqueness holds
    write_lock: Mutex<()>,
    /// Shared by provisioning, exclusive for deletion
    usage: Arc<RwLock<()>>,
}

impl ProfileRegistry {
    pub fn new(catalog: Catalog, policy: PolicyEngine) -> Arc<Self> {
        Arc::new(Self {
            catalog,
            policy,
            write_lock: Mutex::new(()),
            usage: Arc::new(RwLock::new(())),
        })
    }

    /// Create the `default` profile with an empty tag set if it is missing
    pub async fn ensure_default(&self) -> Result<Profile> {
        match self.get_by_name(DEFAULT_PROFILE_NAME).await {
            Ok(profile) => Ok(profile),
            Err(Error::ProfileNotFound { .. }) => {
                let profile = self
                    .create(ProfileSpec {
                        name: DEFAULT_PROFILE_NAME.to_string(),
                        description: "default policy".to_string(),
                        tags: TagMap::new(),
                    })
                    .await;
                match profile {
                    // Lost a race with another seeder
                    Err(Error::ProfileExists { .. }) => self.get_by_name(DEFAULT_PROFILE_NAME).await,
                    other => other,
                }
            }
            Err(e) => Err(e),
        }
    }

    pub async fn create(&self, spec: ProfileSpec) -> Result<Profile> {
        let name = spec.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::Validation("profile name must not be empty".into()));
        }
        self.policy.validate(&spec.tags)?;

        let _guard = self.write_lock.lock().await;
        if self.find_by_name(&name).await?.is_some() {
            return Err(Error::ProfileExists { name });
        }

        let profile = Profile {
            id: Uuid::new_v4().to_string(),
            name,
            description: spec.description,
            tags: spec.tags,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.catalog.create_profile(&profile).await?;
        info!("Created profile {} ({})", profile.name, profile.id);
        Ok(profile)
    }

    pub async fn get(&self, id: &str) -> Result<Profile> {
        self.catalog
            .get_profile(id)
            .await?
            .ok_or_else(|| Error::ProfileNotFound {
                name: id.to_string(),
            })
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Profile> {
        self.find_by_name(name)
            .await?
            .ok_or_else(|| Error::ProfileNotFound {
                name: name.to_string(),
            })
    }

    /// Profile named `name`, or the default profile when `None`
    pub async fn resolve(&self, name: Option<&str>) -> Result<Profile> {
        self.get_by_name(name.unwrap_or(DEFAULT_PROFILE_NAME)).await
    }

    /// Resolve like [`Self::resolve`] and hold off deletion of the profile
    /// until the lease is dropped
    ///
    /// Provisioning keeps the lease until the new resource is persisted.
    pub async fn lease(&self, name: Option<&str>) -> Result<(Profile, ProfileLease)> {
        let lease = self.usage.clone().read_owned().await;
        let profile = self.resolve(name).await?;
        Ok((profile, lease))
    }

    /// All profiles ordered by name
    pub async fn list(&self) -> Result<Vec<Profile>> {
        let mut profiles = self.catalog.list_profiles().await?;
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(profiles)
    }

    pub async fn update(&self, id: &str, patch: ProfilePatch) -> Result<Profile> {
        if let Some(tags) = &patch.tags {
            self.policy.validate(tags)?;
        }
        let _guard = self.write_lock.lock().await;

        if let Some(name) = &patch.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::Validation("profile name must not be empty".into()));
            }
            if let Some(other) = self.find_by_name(name).await? {
                if other.id != id {
                    return Err(Error::ProfileExists {
                        name: name.to_string(),
                    });
                }
            }
        }

        let updated = self
            .modify(id, |profile| {
                if let Some(name) = &patch.name {
                    profile.name = name.trim().to_string();
                }
                if let Some(description) = &patch.description {
                    profile.description = description.clone();
                }
                if let Some(tags) = &patch.tags {
                    profile.tags = tags.clone();
                }
            })
            .await?;
        info!("Updated profile {} ({})", updated.name, updated.id);
        Ok(updated)
    }

    /// Delete a profile no volume or share still refers to
    ///
    /// Waits for outstanding leases, so a resource provisioned under the
    /// profile is visible to the check.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let _exclusive = self.usage.write().await;
        let profile = self.get(id).await?;

        let volumes = self
            .catalog
            .list_volumes()
            .await?
            .iter()
            .filter(|v| v.profile_id == id)
            .count();
        let shares = self
            .catalog
            .list_shares()
            .await?
            .iter()
            .filter(|s| s.profile_id == id)
            .count();
        if volumes + shares > 0 {
            return Err(Error::InvalidState {
                resource: "profile".into(),
                id: id.to_string(),
                reason: format!(
                    "still referenced by {} volume(s) and {} share(s)",
                    volumes, shares
                ),
            });
        }

        self.catalog.delete_profile(id).await?;
        info!("Deleted profile {} ({})", profile.name, id);
        Ok(())
    }

    pub async fn add_tag(&self, id: &str, key: &str, value: &str) -> Result<Profile> {
        let mut single = TagMap::new();
        single.insert(key.to_string(), value.to_string());
        self.policy.validate(&single)?;

        let _guard = self.write_lock.lock().await;
        let profile = self
            .modify(id, |profile| {
                profile.tags.insert(key.to_string(), value.to_string());
            })
            .await?;
        debug!("Profile {}: set {}={}", profile.name, key, value);
        Ok(profile)
    }

    /// Remove a tag; removing an absent tag is a no-op
    pub async fn remove_tag(&self, id: &str, key: &str) -> Result<Profile> {
        let _guard = self.write_lock.lock().await;
        let profile = self
            .modify(id, |profile| {
                profile.tags.remove(key);
            })
            .await?;
        debug!("Profile {}: removed {}", profile.name, key);
        Ok(profile)
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Profile>> {
        Ok(self
            .catalog
            .list_profiles()
            .await?
            .into_iter()
            .find(|p| p.name == name))
    }

    async fn modify<F>(&self, id: &str, mut apply: F) -> Result<Profile>
    where
        F: FnMut(&mut Profile) + Send,
    {
        self.catalog
            .update_with::<Profile, _>(&keys::profile(id), |profile| {
                apply(profile);
                profile.updated_at = Some(Utc::now());
                Ok(())
            })
            .await?
            .ok_or_else(|| Error::ProfileNotFound {
                name: id.to_string(),
            })
    }
}
