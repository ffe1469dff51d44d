//! C6 Consumer: dequeues transfer-job batches and performs the
//! incremental export/import under the image lock (spec.md §4.6).

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use rbvault_lock::{ImageLockGuard, LockError};
use rbvault_storage::StorageDriver;
use rbvault_types::TransferJob;

use crate::producer::JobBatch;
use crate::status::StatusMsg;

pub struct Consumer {
    pub backup: Arc<dyn StorageDriver>,
    pub lockdir: std::path::PathBuf,
}

impl Consumer {
    /// Pulls batches off the shared job queue — several Consumer tasks
    /// share one receiver behind a `Mutex`, the standard idiom for an
    /// MPMC-over-MPSC queue — until the Producer drops its sender and
    /// the channel closes. Per spec.md §9's redesign note this
    /// replaces the original sentinel-count shutdown protocol: closing
    /// the queue is the only signal a Consumer needs to exit.
    pub async fn run(
        &self,
        job_rx: Arc<Mutex<mpsc::UnboundedReceiver<JobBatch>>>,
        status_tx: mpsc::UnboundedSender<StatusMsg>,
    ) {
        loop {
            let batch = {
                let mut rx = job_rx.lock().await;
                rx.recv().await
            };
            match batch {
                Some(batch) => self.process_batch(batch, &status_tx).await,
                None => break,
            }
        }
    }

    /// Processes one batch atomically with respect to the lock: either
    /// every job in it is transferred, or — on contention — every job
    /// is skipped this round (spec.md §4.6: "Batches are atomic with
    /// respect to the lock").
    async fn process_batch(&self, batch: JobBatch, status_tx: &mpsc::UnboundedSender<StatusMsg>) {
        let JobBatch { live_driver, jobs } = batch;
        if jobs.is_empty() {
            return;
        }
        for _ in &jobs {
            status_tx.send(StatusMsg::AddItem).ok();
        }

        let lock_key = jobs[0].owning_lock_key.clone();
        let guard = match ImageLockGuard::try_acquire(&self.lockdir, &lock_key) {
            Ok(guard) => guard,
            Err(LockError::Contended(_)) => {
                log::debug!("{lock_key} contended, skipping this transfer batch");
                for _ in &jobs {
                    status_tx.send(StatusMsg::DoneItem).ok();
                }
                return;
            }
            Err(LockError::Other(err)) => {
                log::warn!("{err} thrown while locking {lock_key} for transfer");
                for _ in &jobs {
                    status_tx.send(StatusMsg::DoneItem).ok();
                }
                return;
            }
        };

        for job in &jobs {
            if let Err(err) = self.transfer_one(live_driver.as_ref(), job).await {
                log::warn!(
                    "{err} thrown while transferring {} -> {}",
                    job.image_id,
                    job.destination_image_id
                );
            }
            status_tx.send(StatusMsg::DoneItem).ok();
        }

        drop(guard);
    }

    async fn transfer_one(&self, live: &dyn StorageDriver, job: &TransferJob) -> anyhow::Result<()> {
        let anchor = job.anchor_snap.as_ref().map(|s| s.to_string());
        let target = job.target_snap.to_string();
        let stream = live.export_diff(&job.image_id, anchor.as_deref(), &target).await?;
        self.backup.import_diff(&job.destination_image_id, stream).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use rbvault_storage::DiffStream;
    use rbvault_types::{ImageId, SnapshotName};
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Default)]
    struct FakeDriver {
        images: StdMutex<StdHashMap<String, Vec<String>>>,
        imports: StdMutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl StorageDriver for FakeDriver {
        async fn list_images(&self, _pool: &str) -> anyhow::Result<Vec<ImageId>> {
            Ok(Vec::new())
        }

        async fn snapshots(&self, image: &ImageId) -> anyhow::Result<Vec<String>> {
            Ok(self.images.lock().unwrap().get(image.as_str()).cloned().unwrap_or_default())
        }

        async fn checksum(&self, _image: &ImageId, _snap: &str) -> anyhow::Result<String> {
            unimplemented!()
        }

        async fn make_snap(&self, _image: &ImageId, _name: &SnapshotName) -> anyhow::Result<()> {
            unimplemented!()
        }

        async fn rm_snap(&self, _image: &ImageId, _name: &str) -> anyhow::Result<()> {
            unimplemented!()
        }

        async fn rm_image(&self, _image: &ImageId) -> anyhow::Result<()> {
            unimplemented!()
        }

        async fn export_diff(&self, _image: &ImageId, from: Option<&str>, to: &str) -> anyhow::Result<DiffStream> {
            self.imports.lock().unwrap().push((format!("export:{from:?}"), to.to_owned()));
            Ok(Box::new(tokio::io::empty()))
        }

        async fn import_diff(&self, dest_image: &ImageId, mut stream: DiffStream) -> anyhow::Result<()> {
            tokio::io::copy(&mut stream, &mut tokio::io::sink()).await?;
            self.imports
                .lock()
                .unwrap()
                .push(("import".to_owned(), dest_image.as_str().to_owned()));
            Ok(())
        }

        async fn exists(&self, image: &ImageId) -> anyhow::Result<bool> {
            Ok(self.images.lock().unwrap().contains_key(image.as_str()))
        }
    }

    fn job(dest: &str, lock_key: &str) -> TransferJob {
        let now = Utc.with_ymd_and_hms(2026, 1, 8, 0, 0, 0).unwrap();
        TransferJob {
            image_id: ImageId::new("pool/img"),
            anchor_snap: None,
            target_snap: SnapshotName::new("rbvault", "daily", 7, now),
            destination_image_id: ImageId::new(dest),
            owning_lock_key: lock_key.to_owned(),
        }
    }

    #[tokio::test]
    async fn transfers_every_job_in_a_batch_under_one_lock() {
        let dir = tempdir().unwrap();
        let live: Arc<dyn StorageDriver> = Arc::new(FakeDriver::default());
        let backup = Arc::new(FakeDriver::default());
        let consumer = Consumer {
            backup: backup.clone(),
            lockdir: dir.path().to_path_buf(),
        };

        let batch = JobBatch {
            live_driver: live.clone(),
            jobs: vec![job("dest-a", "dest-a"), job("dest-a", "dest-a")],
        };

        let (status_tx, mut status_rx) = mpsc::unbounded_channel();
        consumer.process_batch(batch, &status_tx).await;
        drop(status_tx);

        let mut seen = Vec::new();
        while let Some(msg) = status_rx.recv().await {
            seen.push(msg);
        }
        assert_eq!(seen.len(), 4); // add, add, done, done

        assert_eq!(backup.imports.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn contention_skips_the_whole_batch() {
        let dir = tempdir().unwrap();
        let _held = ImageLockGuard::try_acquire(dir.path(), "dest-a").unwrap();

        let live: Arc<dyn StorageDriver> = Arc::new(FakeDriver::default());
        let backup = Arc::new(FakeDriver::default());
        let consumer = Consumer {
            backup: backup.clone(),
            lockdir: dir.path().to_path_buf(),
        };

        let batch = JobBatch {
            live_driver: live,
            jobs: vec![job("dest-a", "dest-a")],
        };

        let (status_tx, _status_rx) = mpsc::unbounded_channel();
        consumer.process_batch(batch, &status_tx).await;

        assert!(backup.imports.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_drains_the_shared_queue_until_closed() {
        let dir = tempdir().unwrap();
        let live: Arc<dyn StorageDriver> = Arc::new(FakeDriver::default());
        let backup = Arc::new(FakeDriver::default());
        let consumer = Consumer {
            backup: backup.clone(),
            lockdir: dir.path().to_path_buf(),
        };

        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let job_rx = Arc::new(TokioMutex::new(job_rx));
        let (status_tx, _status_rx) = mpsc::unbounded_channel();

        job_tx
            .send(JobBatch {
                live_driver: live,
                jobs: vec![job("dest-b", "dest-b")],
            })
            .unwrap();
        drop(job_tx);

        consumer.run(job_rx, status_tx).await;

        assert_eq!(backup.imports.lock().unwrap().len(), 1);
    }
}
