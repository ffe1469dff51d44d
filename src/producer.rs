//! C5 Producer: iterates live clusters, takes coordinated snapshots
//! (optionally quiescing a VM across all its disks) and emits transfer
//! jobs (spec.md §4.5).

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;

use rbvault_cluster::{destination_for, ClusterAdapter, ClusterUnit, VmDisk};
use rbvault_lock::{ImageLockGuard, LockError};
use rbvault_storage::{anchor_snapshot, StorageDriver};
use rbvault_types::{Frequency, ImageId, Profile, SnapshotName, TransferJob};

use crate::status::{StatusMsg, StatusReporter};

/// One live cluster bundled with its adapter and storage driver, the
/// unit the Producer (and Expirer, Verifier) iterate over.
pub struct LiveCluster {
    pub name: String,
    pub adapter: Arc<dyn ClusterAdapter>,
    pub driver: Arc<dyn StorageDriver>,
}

/// A unit's worth of jobs together with the live driver they must be
/// exported from. `TransferJob` itself stays plain data (spec.md §3:
/// created and destroyed within a single run, never persisted) — this
/// wrapper is the queue's actual item type so a Consumer dequeuing a
/// batch knows which live cluster to read it back from without having
/// to thread a cluster lookup table through the channel.
pub struct JobBatch {
    pub live_driver: Arc<dyn StorageDriver>,
    pub jobs: Vec<TransferJob>,
}

pub(crate) fn disks_for(unit: &ClusterUnit, cluster_name: &str) -> Vec<VmDisk> {
    match unit {
        ClusterUnit::Vm(vm) => vm.disks.clone(),
        ClusterUnit::Image(image) => vec![VmDisk {
            rbd: image.clone(),
            adapter: String::new(),
            backup_target: destination_for(cluster_name, image),
        }],
    }
}

/// Whether a new snapshot of `profile_name` is due on `image`: true if
/// none exists yet, or if the newest existing one is at least one
/// cadence interval (derived from the profile's `frequency`) old.
/// Mirrors `Bck.check_profile` in the tool this spec was distilled
/// from (never spelled out in spec.md's prose, required to implement
/// §4.5 step 3 — see SPEC_FULL.md §4.5).
async fn profile_due(
    live: &dyn StorageDriver,
    image: &ImageId,
    tag: &str,
    profile_name: &str,
    profile: &Profile,
    now: DateTime<Utc>,
) -> Result<bool> {
    let snaps = live.snapshots(image).await?;
    let newest = snaps
        .iter()
        .filter_map(|raw| SnapshotName::parse(raw, tag))
        .filter(|s| s.profile() == profile_name)
        .map(|s| s.timestamp())
        .max();

    let Some(newest) = newest else {
        return Ok(true);
    };

    let cadence = match profile.frequency {
        Frequency::Hourly => Duration::hours(1),
        Frequency::Daily => Duration::days(1),
    };
    Ok(now - newest >= cadence)
}

pub struct Producer {
    pub clusters: Vec<LiveCluster>,
    pub backup: Arc<dyn StorageDriver>,
    pub tag: String,
    pub lockdir: std::path::PathBuf,
}

impl Producer {
    /// Runs the whole producer pass: every cluster, every unit, every
    /// disk. Emits one job batch per unit so a single consumer handles
    /// all of a VM's disks contiguously (spec.md §4.5 step 5).
    pub async fn run(
        &self,
        job_tx: mpsc::UnboundedSender<JobBatch>,
        status: &StatusReporter,
        now: DateTime<Utc>,
    ) -> Result<()> {
        for cluster in &self.clusters {
            log::debug!("producing snapshots for cluster {}", cluster.name);
            let units = match cluster.adapter.list_units().await {
                Ok(units) => units,
                Err(err) => {
                    log::error!("{err} thrown while listing units on {}", cluster.name);
                    continue;
                }
            };

            for unit in units {
                self.process_unit(cluster, &unit, &job_tx, status, now).await;
            }
        }
        Ok(())
    }

    async fn process_unit(
        &self,
        cluster: &LiveCluster,
        unit: &ClusterUnit,
        job_tx: &mpsc::UnboundedSender<JobBatch>,
        status: &StatusReporter,
        now: DateTime<Utc>,
    ) {
        if let Err(err) = cluster.adapter.freeze(unit).await {
            log::error!("{err} thrown while freezing {}", unit.label());
            return;
        }

        let jobs = self.snapshot_disks(cluster, unit, status, now).await;

        if let Err(err) = cluster.adapter.thaw(unit).await {
            log::error!("{err} thrown while thawing {} (fatal for this unit)", unit.label());
        }

        if !jobs.is_empty() {
            let batch = JobBatch {
                live_driver: cluster.driver.clone(),
                jobs,
            };
            if job_tx.send(batch).is_err() {
                log::error!("cannot enqueue jobs for {}, consumers are gone", unit.label());
            }
        }
    }

    async fn snapshot_disks(
        &self,
        cluster: &LiveCluster,
        unit: &ClusterUnit,
        status: &StatusReporter,
        now: DateTime<Utc>,
    ) -> Vec<TransferJob> {
        let mut jobs = Vec::new();

        for disk in disks_for(unit, &cluster.name) {
            let profiles = match cluster.adapter.profiles_for(unit, Some(&disk)).await {
                Ok(profiles) => profiles,
                Err(err) => {
                    log::warn!("{err} thrown while fetching profiles for {}", disk.rbd);
                    continue;
                }
            };
            if profiles.is_empty() {
                continue;
            }

            let lock_key = disk.backup_target.lock_key();
            let guard = match ImageLockGuard::try_acquire(&self.lockdir, &lock_key) {
                Ok(guard) => guard,
                Err(LockError::Contended(_)) => {
                    log::debug!("{} contended, skipping this round", disk.rbd);
                    continue;
                }
                Err(LockError::Other(err)) => {
                    log::warn!("{err} thrown while locking {}", disk.rbd);
                    continue;
                }
            };

            for (profile_name, profile) in &profiles {
                status.sender().send(StatusMsg::AddItem).ok();

                let due = profile_due(cluster.driver.as_ref(), &disk.rbd, &self.tag, profile_name, profile, now).await;
                let due = match due {
                    Ok(due) => due,
                    Err(err) => {
                        log::warn!("{err} thrown while checking profile {profile_name} for {}", disk.rbd);
                        status.sender().send(StatusMsg::DoneItem).ok();
                        continue;
                    }
                };
                if !due {
                    status.sender().send(StatusMsg::DoneItem).ok();
                    continue;
                }

                if let Some(job) = self
                    .make_snapshot(cluster, &disk, profile_name, profile, &lock_key, now)
                    .await
                {
                    jobs.push(job);
                }
                status.sender().send(StatusMsg::DoneItem).ok();
            }

            drop(guard);
        }

        jobs
    }

    async fn make_snapshot(
        &self,
        cluster: &LiveCluster,
        disk: &VmDisk,
        profile_name: &str,
        profile: &Profile,
        lock_key: &str,
        now: DateTime<Utc>,
    ) -> Option<TransferJob> {
        let live_snaps = match cluster.driver.snapshots(&disk.rbd).await {
            Ok(snaps) => snaps,
            Err(err) => {
                log::warn!("{err} thrown while listing live snapshots of {}", disk.rbd);
                return None;
            }
        };
        let backup_snaps = self.backup.snapshots(&disk.backup_target).await.unwrap_or_default();
        let anchor = anchor_snapshot(&live_snaps, &backup_snaps)
            .and_then(|raw| SnapshotName::parse(&raw, &self.tag));

        let target = SnapshotName::new(self.tag.clone(), profile_name, profile.count, now);
        if let Err(err) = cluster.driver.make_snap(&disk.rbd, &target).await {
            log::warn!("{err} thrown while snapshotting {}", disk.rbd);
            return None;
        }

        Some(TransferJob {
            image_id: disk.rbd.clone(),
            anchor_snap: anchor,
            target_snap: target,
            destination_image_id: disk.backup_target.clone(),
            owning_lock_key: lock_key.to_owned(),
        })
    }
}
