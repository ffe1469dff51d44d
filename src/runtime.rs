//! Builds the live-cluster/backup-driver wiring from [`Config`] and
//! drives the four phases the `rbvault` binary exposes as subcommands:
//! `backup` (Producer + Consumer pool, then both Expirer passes),
//! `precheck`/`check-snap` (Verifier, then Results Store reconciliation
//! and the `check` report), and `check` on its own. Grounded on the
//! teacher's `src/bin/proxmox-backup-manager.rs` for "a binary that
//! dispatches named subcommands to small handler functions" — the
//! handlers themselves live here so `main.rs` stays a thin CLI shell.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use rbvault_cluster::{ClusterAdapter, PlainAdapter, ProxmoxAdapter};
use rbvault_config::{ClusterKind, Config};
use rbvault_lock::{ImageLockGuard, LockError};
use rbvault_storage::{backup_side_expire, live_side_expire, RbdDriver, StorageDriver};

use crate::consumer::Consumer;
use crate::producer::{disks_for, LiveCluster, Producer};
use crate::results::ResultsStore;
use crate::status::{StatusMsg, StatusReporter};
use crate::verifier;

/// The backup cluster's own driver, shared by every phase.
pub fn build_backup_driver(config: &Config) -> Arc<dyn StorageDriver> {
    Arc::new(RbdDriver::new(
        config.backup_cluster.pool.clone(),
        Some(config.backup_cluster.fqdn.clone()),
    ))
}

/// One [`LiveCluster`] (adapter + driver) per entry in
/// `config.live_clusters` (spec.md §4.3).
pub fn build_live_clusters(config: &Config) -> Result<Vec<LiveCluster>> {
    let mut clusters = Vec::with_capacity(config.live_clusters.len());

    for lc in &config.live_clusters {
        match lc.kind {
            ClusterKind::Proxmox => {
                let api_token = lc
                    .api_token
                    .clone()
                    .with_context(|| format!("proxmox cluster {:?} is missing api_token", lc.name))?;
                // Proxmox VE disk ids already carry their storage name
                // as the leading path component (see
                // `ProxmoxAdapter::parse_disks`), so this driver's own
                // pool is left empty.
                let driver: Arc<dyn StorageDriver> = Arc::new(RbdDriver::new("", Some(lc.fqdn.clone())));
                let adapter: Arc<dyn ClusterAdapter> = Arc::new(ProxmoxAdapter::new(
                    lc.name.clone(),
                    lc.fqdn.clone(),
                    api_token,
                    lc.use_smbios,
                    config.uuid_fallback,
                    config.profiles_api.clone(),
                    config.profiles.clone(),
                ));
                clusters.push(LiveCluster {
                    name: lc.name.clone(),
                    adapter,
                    driver,
                });
            }
            ClusterKind::Plain => {
                let pool = lc
                    .pool
                    .clone()
                    .with_context(|| format!("plain cluster {:?} is missing pool", lc.name))?;
                let driver: Arc<dyn StorageDriver> = Arc::new(RbdDriver::new(pool.clone(), Some(lc.fqdn.clone())));
                let adapter: Arc<dyn ClusterAdapter> =
                    Arc::new(PlainAdapter::new(pool, driver.clone(), config.profiles.clone()));
                clusters.push(LiveCluster {
                    name: lc.name.clone(),
                    adapter,
                    driver,
                });
            }
        }
    }

    Ok(clusters)
}

/// Runs the full `backup` subcommand: Producer + Consumer pool (spec.md
/// §4.5-§4.6), then both Expirer passes (§4.7). Never fails the run for
/// a per-image problem (§7) — only infrastructural errors (config,
/// results-store I/O) propagate.
pub async fn run_backup(config: &Config, quiet: bool) -> Result<()> {
    let clusters = build_live_clusters(config)?;
    let backup = build_backup_driver(config);

    let (job_tx, job_rx) = mpsc::unbounded_channel();
    let job_rx = Arc::new(Mutex::new(job_rx));

    let producer = Producer {
        clusters,
        backup: backup.clone(),
        tag: config.snapshot_tag.clone(),
        lockdir: config.lockdir.clone(),
    };

    let status = StatusReporter::start("images backed up", quiet);
    let now = Utc::now();

    let mut consumers = JoinSet::new();
    for _ in 0..config.live_worker.max(1) {
        let consumer = Consumer {
            backup: backup.clone(),
            lockdir: config.lockdir.clone(),
        };
        let rx = job_rx.clone();
        let status_tx = status.sender();
        consumers.spawn(async move { consumer.run(rx, status_tx).await });
    }

    // Dropping `job_tx` once the producer pass completes closes the
    // channel, which is every consumer's sole shutdown signal (spec.md
    // §9's redesign note replaces the sentinel-count protocol with a
    // closed queue).
    producer.run(job_tx, &status, now).await?;

    while let Some(res) = consumers.join_next().await {
        if let Err(err) = res {
            log::error!("a consumer task panicked: {err}");
        }
    }

    status.finish().await;

    run_expire_live(config, &producer.clusters, &backup, quiet).await?;
    run_expire_backup(config, &backup, quiet).await?;

    Ok(())
}

/// Live-side expiration (spec.md §4.7): one task per disk, bounded by
/// `live_worker`, each under its own image lock.
pub async fn run_expire_live(config: &Config, clusters: &[LiveCluster], backup: &Arc<dyn StorageDriver>, quiet: bool) -> Result<()> {
    let status = StatusReporter::start("images cleaned up on live clusters", quiet);

    let mut work = Vec::new();
    for cluster in clusters {
        let units = match cluster.adapter.list_units().await {
            Ok(units) => units,
            Err(err) => {
                log::error!("{err} thrown while listing units on {}", cluster.name);
                continue;
            }
        };
        for unit in units {
            for disk in disks_for(&unit, &cluster.name) {
                work.push((cluster.driver.clone(), disk));
            }
        }
    }

    for _ in &work {
        status.sender().send(StatusMsg::AddItem).ok();
    }

    let lockdir = config.lockdir.clone();
    let tag = config.snapshot_tag.clone();
    let profiles = config.profiles.clone();
    let status_tx = status.sender();

    stream::iter(work.into_iter().map(|(live, disk)| {
        let backup = backup.clone();
        let lockdir = lockdir.clone();
        let tag = tag.clone();
        let profiles = profiles.clone();
        let status_tx = status_tx.clone();
        async move {
            let lock_key = disk.backup_target.lock_key();
            let guard = match ImageLockGuard::try_acquire(&lockdir, &lock_key) {
                Ok(guard) => guard,
                Err(LockError::Contended(_)) => {
                    log::debug!("{} contended, skipping live-side expiry this round", disk.rbd);
                    status_tx.send(StatusMsg::DoneItem).ok();
                    return;
                }
                Err(LockError::Other(err)) => {
                    log::warn!("{err} thrown while locking {} for live-side expiry", disk.rbd);
                    status_tx.send(StatusMsg::DoneItem).ok();
                    return;
                }
            };

            if let Err(err) = live_side_expire(live.as_ref(), backup.as_ref(), &disk.rbd, &disk.backup_target, &profiles, &tag).await
            {
                log::warn!("{err} thrown while expiring live snapshots of {}", disk.rbd);
            }

            drop(guard);
            status_tx.send(StatusMsg::DoneItem).ok();
        }
    }))
    .buffer_unordered(config.live_worker.max(1))
    .collect::<Vec<()>>()
    .await;

    status.finish().await;
    Ok(())
}

/// Backup-side expiration (spec.md §4.7): one task per backup image,
/// bounded by `backup_worker`, each under its own image lock.
pub async fn run_expire_backup(config: &Config, backup: &Arc<dyn StorageDriver>, quiet: bool) -> Result<()> {
    let status = StatusReporter::start("images expired on the backup cluster", quiet);

    let images = backup
        .list_images(&config.backup_cluster.pool)
        .await
        .context("listing images on the backup cluster")?;

    for _ in &images {
        status.sender().send(StatusMsg::AddItem).ok();
    }

    let lockdir = config.lockdir.clone();
    let tag = config.snapshot_tag.clone();
    let profiles = config.profiles.clone();
    let extra_retention_time = Duration::days(config.extra_retention_time);
    let now = Utc::now();
    let status_tx = status.sender();

    stream::iter(images.into_iter().map(|image| {
        let backup = backup.clone();
        let lockdir = lockdir.clone();
        let tag = tag.clone();
        let profiles = profiles.clone();
        let status_tx = status_tx.clone();
        async move {
            let lock_key = image.lock_key();
            let guard = match ImageLockGuard::try_acquire(&lockdir, &lock_key) {
                Ok(guard) => guard,
                Err(LockError::Contended(_)) => {
                    log::debug!("{image} contended, skipping backup-side expiry this round");
                    status_tx.send(StatusMsg::DoneItem).ok();
                    return;
                }
                Err(LockError::Other(err)) => {
                    log::warn!("{err} thrown while locking {image} for backup-side expiry");
                    status_tx.send(StatusMsg::DoneItem).ok();
                    return;
                }
            };

            if let Err(err) = backup_side_expire(backup.as_ref(), &image, &profiles, extra_retention_time, &tag, now).await {
                log::warn!("{err} thrown while expiring {image} on the backup cluster");
            }

            drop(guard);
            status_tx.send(StatusMsg::DoneItem).ok();
        }
    }))
    .buffer_unordered(config.backup_worker.max(1))
    .collect::<Vec<()>>()
    .await;

    status.finish().await;
    Ok(())
}

/// `precheck`: freshness verification, reconcile, then behave as
/// `check` (spec.md §6). Returns the process exit code.
pub async fn run_precheck(config: &Config, quiet: bool) -> Result<i32> {
    let clusters = build_live_clusters(config)?;
    let backup = build_backup_driver(config);
    let status = StatusReporter::start("images freshness-checked", quiet);
    let now = Utc::now();

    let records = verifier::precheck(&clusters, &backup, &config.snapshot_tag, now, config.live_worker.max(1), &status).await;
    status.finish().await;

    reconcile_and_report(config, now, &records)
}

/// `check-snap`: deep checksum verification, reconcile, then behave as
/// `check` (spec.md §6).
pub async fn run_check_snap(config: &Config, quiet: bool) -> Result<i32> {
    let clusters = build_live_clusters(config)?;
    let backup = build_backup_driver(config);
    let status = StatusReporter::start("images checksum-verified", quiet);
    let now = Utc::now();

    let records = verifier::check_snap(&clusters, &backup, now, &status).await;
    status.finish().await;

    reconcile_and_report(config, now, &records)
}

/// `check` on its own: no fresh verification pass, just the stored
/// findings older than the 2-hour freshness window (spec.md §4.10).
pub fn run_check(config: &Config) -> Result<i32> {
    let store = ResultsStore::open(&config.check_db)?;
    print_stale(&store, Utc::now())
}

fn reconcile_and_report(config: &Config, now: DateTime<Utc>, records: &[rbvault_types::VerificationRecord]) -> Result<i32> {
    let mut store = ResultsStore::open(&config.check_db)?;
    store.reconcile(now, records)?;
    print_stale(&store, now)
}

/// The `check` window: 2 hours (spec.md §4.10).
const CHECK_FRESHNESS_WINDOW: i64 = 2;

fn print_stale(store: &ResultsStore, now: DateTime<Utc>) -> Result<i32> {
    let stale = store.stale_records(now, Duration::hours(CHECK_FRESHNESS_WINDOW))?;
    if stale.is_empty() {
        println!("OK: no findings older than {CHECK_FRESHNESS_WINDOW}h");
        return Ok(0);
    }
    for record in &stale {
        println!("{}/{}: {}", record.cluster, record.image, record.message);
    }
    Ok(2)
}
