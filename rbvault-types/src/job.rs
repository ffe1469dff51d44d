use crate::{ImageId, SnapshotName};

/// A single incremental transfer: export `target_snap` from the live
/// image (diffed against `anchor_snap` when one exists) and import it
/// into `destination_image_id` on the backup cluster.
///
/// Created by the Producer once the live-side snapshot exists;
/// destroyed once the Consumer has imported it — never persisted
/// (spec.md §3, "Transfer job").
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub image_id: ImageId,
    pub anchor_snap: Option<SnapshotName>,
    pub target_snap: SnapshotName,
    pub destination_image_id: ImageId,
    /// The lock key the Consumer must hold for the whole batch this job
    /// belongs to (the destination of the *first* job in the batch).
    pub owning_lock_key: String,
}
