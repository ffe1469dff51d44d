//! Snapshot naming/expiry (C2), the storage driver interface (C4) and
//! the two-phase expiration algorithm (C7), grounded on the teacher's
//! `pbs-datastore` crate: the "mark each entry, then sweep" shape of
//! `pbs-datastore::prune::compute_prune_info` generalizes directly to
//! this spec's profile-grouped live-side retention, and
//! `pbs-datastore::store_progress::StoreProgress` grounds the progress
//! struct later reused by the root crate's Status Reporter.

mod anchor;
mod driver;
mod expire;
mod naming;
mod rbd;

pub use anchor::anchor_snapshot;
pub use driver::{DiffStream, StorageDriver};
pub use expire::{backup_side_expire, live_side_expire, BackupExpireOutcome};
pub use naming::is_expired;
pub use rbd::RbdDriver;
