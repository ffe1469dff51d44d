use anyhow::Result;
use async_trait::async_trait;
use rbvault_types::{ImageId, SnapshotName};
use tokio::io::AsyncRead;

/// A live export-diff stream piped straight into a backup import, never
/// buffered through this process's memory.
pub type DiffStream = Box<dyn AsyncRead + Send + Unpin>;

/// Per-cluster operations on images and snapshots (spec.md §4.4). This
/// is deliberately an interface: the Ceph/RBD wire protocol itself is
/// out of scope (spec.md §1) and delegated to whatever concrete type
/// implements this trait. Two instances coexist per run — one for each
/// live cluster, one for the backup cluster — exactly as spec.md §4.4
/// describes.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// List every image in `pool`. Raw image ids as the cluster knows
    /// them — callers are responsible for deriving lock keys / backup
    /// destination names from these.
    async fn list_images(&self, pool: &str) -> Result<Vec<ImageId>>;

    /// Raw snapshot names for `image`, ascending. May include names
    /// that do not parse as managed snapshots (foreign tools, manual
    /// snapshots) — callers that care must filter with
    /// [`rbvault_types::SnapshotName::parse`].
    async fn snapshots(&self, image: &ImageId) -> Result<Vec<String>>;

    /// Content digest of `image` at `snap`, comparable across driver
    /// instances of the same concrete type (spec.md §9 open question:
    /// pinned to SHA-256 over the snapshot extent for every
    /// implementation in this crate).
    async fn checksum(&self, image: &ImageId, snap: &str) -> Result<String>;

    /// Create a new snapshot named exactly `name.to_string()`.
    async fn make_snap(&self, image: &ImageId, name: &SnapshotName) -> Result<()>;

    /// Delete a snapshot by its raw name.
    async fn rm_snap(&self, image: &ImageId, name: &str) -> Result<()>;

    /// Delete an entire image (used once it has no snapshots left).
    async fn rm_image(&self, image: &ImageId) -> Result<()>;

    /// Start an incremental (or full, if `from` is `None`) export of
    /// `to` from `image`, returning a readable stream of the diff.
    async fn export_diff(
        &self,
        image: &ImageId,
        from: Option<&str>,
        to: &str,
    ) -> Result<DiffStream>;

    /// Import a diff stream (as produced by [`Self::export_diff`] on
    /// any driver instance) into `dest_image`.
    async fn import_diff(&self, dest_image: &ImageId, stream: DiffStream) -> Result<()>;

    /// Whether `image` exists at all on this side.
    async fn exists(&self, image: &ImageId) -> Result<bool>;
}
