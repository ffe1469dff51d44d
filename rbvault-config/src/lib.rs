//! Loads and validates the single configuration document described in
//! spec.md §6 ("Environment"). The teacher's analogous crate,
//! `pbs-config`, is split across many section-config files (one per
//! PVE subsystem); this tool has exactly one flat JSON document, so
//! loading collapses to a single `serde_json::from_slice` plus a
//! validation pass that never hard-fails on a single bad profile (only
//! warns, per spec.md §7's `ConfigMissing` policy).

use std::path::Path;

use anyhow::{Context, Result};
use rbvault_types::ProfileTable;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterKind {
    Proxmox,
    Plain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveClusterConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ClusterKind,
    pub fqdn: String,
    /// Required for `plain` clusters; ignored for `proxmox`.
    pub pool: Option<String>,
    /// Required for `proxmox` clusters when `use_smbios` is set.
    #[serde(default)]
    pub use_smbios: bool,
    /// Proxmox VE API token, `user@realm!tokenid=secret`.
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupClusterConfig {
    pub name: String,
    pub pool: String,
    pub fqdn: String,
}

fn default_snapshot_tag() -> String {
    "rbvault".to_owned()
}

fn default_extra_retention_time() -> i64 {
    1
}

/// The root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub live_clusters: Vec<LiveClusterConfig>,
    pub backup_cluster: BackupClusterConfig,
    #[serde(default)]
    pub profiles: ProfileTable,
    pub profiles_api: Option<String>,
    pub live_worker: usize,
    pub backup_worker: usize,
    pub lockdir: std::path::PathBuf,
    pub check_db: std::path::PathBuf,
    /// Grace period (days) added to a last-remaining backup snapshot's
    /// expiry deadline (spec.md §4.2, §8 P5).
    #[serde(default = "default_extra_retention_time")]
    pub extra_retention_time: i64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub uuid_fallback: bool,
    /// Literal marker distinguishing tool-managed snapshots from
    /// foreign ones (spec.md §3). Configurable so a deployment sharing
    /// a pool with another tool can pick a tag that cannot collide.
    #[serde(default = "default_snapshot_tag")]
    pub snapshot_tag: String,
}

fn default_log_level() -> String {
    "info".to_owned()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.validate();
        Ok(config)
    }

    /// Non-fatal validation: unusual values are logged as warnings, not
    /// rejected, matching spec.md §7's `ConfigMissing` policy of "warn,
    /// never abort" for configuration smells discovered up front.
    fn validate(&self) {
        if self.profiles.is_empty() {
            log::warn!("no retention profiles configured; no snapshot will ever be taken");
        }
        if self.live_worker == 0 {
            log::warn!("live_worker is 0; the producer will never have a consumer to hand jobs to");
        }
        if self.backup_worker == 0 {
            log::warn!("backup_worker is 0; backup-side expiration will never run");
        }
    }
}
