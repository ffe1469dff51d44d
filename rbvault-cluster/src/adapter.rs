use anyhow::Result;
use async_trait::async_trait;
use rbvault_types::Profile;

use crate::unit::{ClusterUnit, VmDisk};

/// Uniform capability set over the two cluster variants this tool
/// understands (spec.md §4.3). Modeled as a trait object rather than
/// an inheritance hierarchy, per spec.md §9's redesign note: proxmox
/// vs. plain is a two-variant sum type with one adapter interface.
#[async_trait]
pub trait ClusterAdapter: Send + Sync {
    /// Enumerate the backup units of this cluster. For a virtualization
    /// cluster, each VM with a resolvable disk set; for a plain
    /// cluster, one unit per image in the pool. A unit may be silently
    /// absent from the result if it was skipped with a warning (e.g. a
    /// VM with no SMBIOS identity and `uuid_fallback` disabled).
    async fn list_units(&self) -> Result<Vec<ClusterUnit>>;

    /// Effective profile list for `unit`/`disk`: the global table,
    /// optionally overridden by the per-install HTTP profiles API.
    /// Returns an empty list when the API reports `backup: false`
    /// (disk skipped entirely). HTTP errors fall back to the global
    /// table and are logged, never propagated (spec.md §4.3).
    async fn profiles_for(&self, unit: &ClusterUnit, disk: Option<&VmDisk>) -> Result<Vec<(String, Profile)>>;

    /// Bracket snapshot-taking for `unit` so all its disks observe one
    /// filesystem-consistent instant. No-op for units with no
    /// filesystem to quiesce (plain images).
    async fn freeze(&self, unit: &ClusterUnit) -> Result<()>;

    /// Thaw a previously frozen unit. Failure here is fatal for this
    /// unit's run but not for the process (spec.md §4.3).
    async fn thaw(&self, unit: &ClusterUnit) -> Result<()>;
}
