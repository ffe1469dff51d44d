use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rbvault_types::{Profile, ProfileTable};
use rbvault_storage::StorageDriver;

use crate::adapter::ClusterAdapter;
use crate::unit::{ClusterUnit, VmDisk};

/// A bare image pool: every image is its own unit, there is no VM
/// inventory to query and nothing to freeze (spec.md §4.3). Listing
/// delegates to the live [`StorageDriver`] for this cluster, since a
/// plain cluster's unit list *is* its image list.
pub struct PlainAdapter {
    pool: String,
    driver: Arc<dyn StorageDriver>,
    default_profiles: ProfileTable,
}

impl PlainAdapter {
    pub fn new(pool: impl Into<String>, driver: Arc<dyn StorageDriver>, default_profiles: ProfileTable) -> Self {
        Self {
            pool: pool.into(),
            driver,
            default_profiles,
        }
    }
}

#[async_trait]
impl ClusterAdapter for PlainAdapter {
    async fn list_units(&self) -> Result<Vec<ClusterUnit>> {
        let images = self.driver.list_images(&self.pool).await?;
        Ok(images.into_iter().map(ClusterUnit::Image).collect())
    }

    async fn profiles_for(&self, _unit: &ClusterUnit, _disk: Option<&VmDisk>) -> Result<Vec<(String, Profile)>> {
        // Plain images have no per-install profile override in the
        // original tool (only `BackupProxmox` consults the HTTP API);
        // a plain cluster simply gets the global table.
        Ok(self
            .default_profiles
            .iter()
            .map(|(name, profile)| (name.clone(), profile.clone()))
            .collect())
    }

    async fn freeze(&self, _unit: &ClusterUnit) -> Result<()> {
        Ok(())
    }

    async fn thaw(&self, _unit: &ClusterUnit) -> Result<()> {
        Ok(())
    }
}
