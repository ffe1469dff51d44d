use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rbvault_types::{ImageId, ProfileTable, SnapshotName};

use crate::anchor::anchor_snapshot;
use crate::driver::StorageDriver;
use crate::naming::is_expired;

/// Outcome of one backup-side expiration pass over a single image,
/// reported back to the caller so it can tally progress and logging
/// without re-querying the driver (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupExpireOutcome {
    /// The image (and everything on it) was deleted: it had no
    /// snapshots at entry (orphan), or its last snapshot aged out
    /// under the grace period.
    ImageDeleted,
    /// The image still has at least one snapshot left.
    Retained,
}

/// Live-side expiration for a single image, under the caller's lock
/// (spec.md §4.7 "Live-side expiration").
///
/// Snapshots at or above the anchor (`max(live ∩ backup)`) are never
/// touched — a transfer may still be pending for them elsewhere.
/// Everything below the anchor is grouped by profile: a profile no
/// longer present in `profiles` has all its snapshots deleted
/// (treated as an intentional removal, spec.md §7 `ConfigMissing`
/// policy — *live*-side only); a known profile keeps its
/// `max_on_live` most recent snapshots and deletes the rest.
pub async fn live_side_expire(
    live: &dyn StorageDriver,
    backup: &dyn StorageDriver,
    image: &ImageId,
    dest: &ImageId,
    profiles: &ProfileTable,
    tag: &str,
) -> Result<()> {
    let backup_snaps = backup.snapshots(dest).await.unwrap_or_default();
    let live_snaps = live.snapshots(image).await?;
    let anchor = anchor_snapshot(&live_snaps, &backup_snaps);

    let mut by_profile: HashMap<String, Vec<String>> = HashMap::new();
    for snap in &live_snaps {
        if let Some(anchor) = &anchor {
            if snap >= anchor {
                continue;
            }
        }
        let Some(parsed) = SnapshotName::parse(snap, tag) else {
            continue;
        };
        by_profile
            .entry(parsed.profile().to_owned())
            .or_default()
            .push(snap.clone());
    }

    for (profile_name, mut snaps) in by_profile {
        snaps.sort();
        let keep = match profiles.get(&profile_name) {
            Some(profile) => profile.max_on_live as usize,
            None => {
                log::debug!(
                    "profile {profile_name:?} no longer configured, dropping all its snapshots on {image}"
                );
                0
            }
        };
        let to_delete = snaps.len().saturating_sub(keep);
        for snap in snaps.into_iter().take(to_delete) {
            live.rm_snap(image, &snap).await?;
        }
    }

    Ok(())
}

/// Backup-side expiration for a single backup image, under the
/// caller's lock (spec.md §4.7 "Backup-side expiration").
///
/// An image with no snapshots at entry is an orphan and is deleted
/// outright. Otherwise the newest snapshot is set aside; every other
/// snapshot is deleted if expired; then, if the set-aside snapshot is
/// the only one left, it is deleted too but only under the
/// `treat_as_last` grace period (P5). An image left with zero
/// snapshots afterwards is deleted.
pub async fn backup_side_expire(
    backup: &dyn StorageDriver,
    image: &ImageId,
    profiles: &ProfileTable,
    extra_retention_time: Duration,
    tag: &str,
    now: DateTime<Utc>,
) -> Result<BackupExpireOutcome> {
    let mut snaps = backup.snapshots(image).await?;
    snaps.sort();

    let last = match snaps.pop() {
        Some(last) => last,
        None => {
            log::debug!("{image} has no snapshot at all, deleting as orphan");
            backup.rm_image(image).await?;
            return Ok(BackupExpireOutcome::ImageDeleted);
        }
    };

    for snap in &snaps {
        let Some(parsed) = SnapshotName::parse(snap, tag) else {
            continue;
        };
        if is_expired(&parsed, profiles, extra_retention_time, false, now) {
            backup.rm_snap(image, snap).await?;
        }
    }

    let remaining = backup.snapshots(image).await?;
    if remaining.len() == 1 {
        if let Some(parsed) = SnapshotName::parse(&last, tag) {
            if is_expired(&parsed, profiles, extra_retention_time, true, now) {
                backup.rm_snap(image, &remaining[0]).await?;
            }
        }
    }

    if backup.snapshots(image).await?.is_empty() {
        log::debug!("{image} has no snapshot left, deleting");
        backup.rm_image(image).await?;
        return Ok(BackupExpireOutcome::ImageDeleted);
    }

    Ok(BackupExpireOutcome::Retained)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DiffStream;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use rbvault_types::{Frequency, Profile};
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeDriver {
        snaps: Mutex<StdHashMap<String, Vec<String>>>,
        removed_images: Mutex<Vec<String>>,
    }

    impl FakeDriver {
        fn with(snaps: &[(&str, &[&str])]) -> Self {
            let mut map = StdHashMap::new();
            for (image, names) in snaps {
                map.insert(
                    image.to_string(),
                    names.iter().map(|s| s.to_string()).collect(),
                );
            }
            Self {
                snaps: Mutex::new(map),
                removed_images: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl StorageDriver for FakeDriver {
        async fn list_images(&self, _pool: &str) -> Result<Vec<ImageId>> {
            Ok(self
                .snaps
                .lock()
                .unwrap()
                .keys()
                .map(|k| ImageId::new(k.clone()))
                .collect())
        }

        async fn snapshots(&self, image: &ImageId) -> Result<Vec<String>> {
            Ok(self
                .snaps
                .lock()
                .unwrap()
                .get(image.as_str())
                .cloned()
                .unwrap_or_default())
        }

        async fn checksum(&self, _image: &ImageId, _snap: &str) -> Result<String> {
            unimplemented!()
        }

        async fn make_snap(&self, image: &ImageId, name: &SnapshotName) -> Result<()> {
            self.snaps
                .lock()
                .unwrap()
                .entry(image.as_str().to_owned())
                .or_default()
                .push(name.to_string());
            Ok(())
        }

        async fn rm_snap(&self, image: &ImageId, name: &str) -> Result<()> {
            if let Some(v) = self.snaps.lock().unwrap().get_mut(image.as_str()) {
                v.retain(|s| s != name);
            }
            Ok(())
        }

        async fn rm_image(&self, image: &ImageId) -> Result<()> {
            self.snaps.lock().unwrap().remove(image.as_str());
            self.removed_images.lock().unwrap().push(image.as_str().to_owned());
            Ok(())
        }

        async fn export_diff(
            &self,
            _image: &ImageId,
            _from: Option<&str>,
            _to: &str,
        ) -> Result<DiffStream> {
            unimplemented!()
        }

        async fn import_diff(&self, _dest_image: &ImageId, _stream: DiffStream) -> Result<()> {
            unimplemented!()
        }

        async fn exists(&self, image: &ImageId) -> Result<bool> {
            Ok(self.snaps.lock().unwrap().contains_key(image.as_str()))
        }
    }

    fn profiles() -> ProfileTable {
        let mut map = HashMap::new();
        map.insert(
            "daily".to_owned(),
            Profile {
                count: 7,
                frequency: Frequency::Daily,
                max_on_live: 1,
            },
        );
        ProfileTable::new(map)
    }

    #[tokio::test]
    async fn live_expire_retains_max_on_live_below_anchor() {
        let live = FakeDriver::with(&[(
            "img",
            &[
                "rbvault;daily;7;2026-01-01T00:00:00Z",
                "rbvault;daily;7;2026-01-02T00:00:00Z",
                "rbvault;daily;7;2026-01-03T00:00:00Z",
            ],
        )]);
        let backup = FakeDriver::with(&[(
            "dest",
            &[
                "rbvault;daily;7;2026-01-01T00:00:00Z",
                "rbvault;daily;7;2026-01-03T00:00:00Z",
            ],
        )]);

        live_side_expire(
            &live,
            &backup,
            &ImageId::new("img"),
            &ImageId::new("dest"),
            &profiles(),
            "rbvault",
        )
        .await
        .unwrap();

        // anchor = 01-03 (newest shared). only 01-01 is below it and is
        // the sole member of its profile group, so it is retained by
        // max_on_live=1 — nothing is deleted here.
        let remaining = live.snapshots(&ImageId::new("img")).await.unwrap();
        assert_eq!(remaining.len(), 3);
    }

    #[tokio::test]
    async fn live_expire_deletes_below_max_on_live() {
        let live = FakeDriver::with(&[(
            "img",
            &[
                "rbvault;daily;7;2026-01-01T00:00:00Z",
                "rbvault;daily;7;2026-01-02T00:00:00Z",
                "rbvault;daily;7;2026-01-03T00:00:00Z",
            ],
        )]);
        // no shared anchor: everything is below "no anchor" (anchor is
        // None so nothing is skipped for that reason), and max_on_live=1
        // keeps only the newest.
        let backup = FakeDriver::with(&[("dest", &[])]);

        live_side_expire(
            &live,
            &backup,
            &ImageId::new("img"),
            &ImageId::new("dest"),
            &profiles(),
            "rbvault",
        )
        .await
        .unwrap();

        let remaining = live.snapshots(&ImageId::new("img")).await.unwrap();
        assert_eq!(remaining, vec!["rbvault;daily;7;2026-01-03T00:00:00Z".to_owned()]);
    }

    #[tokio::test]
    async fn live_expire_drops_orphaned_profile_entirely() {
        let live = FakeDriver::with(&[(
            "img",
            &[
                "rbvault;weekly;4;2026-01-01T00:00:00Z",
                "rbvault;weekly;4;2026-01-02T00:00:00Z",
            ],
        )]);
        let backup = FakeDriver::with(&[("dest", &[])]);

        live_side_expire(
            &live,
            &backup,
            &ImageId::new("img"),
            &ImageId::new("dest"),
            &profiles(),
            "rbvault",
        )
        .await
        .unwrap();

        let remaining = live.snapshots(&ImageId::new("img")).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn backup_expire_deletes_orphan_image_with_no_snapshots() {
        let backup = FakeDriver::with(&[("img", &[])]);
        let now = Utc.with_ymd_and_hms(2026, 1, 8, 0, 0, 0).unwrap();
        let outcome = backup_side_expire(
            &backup,
            &ImageId::new("img"),
            &profiles(),
            Duration::days(1),
            "rbvault",
            now,
        )
        .await
        .unwrap();
        assert_eq!(outcome, BackupExpireOutcome::ImageDeleted);
        assert_eq!(backup.removed_images.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn backup_expire_keeps_last_snapshot_within_grace() {
        let now = Utc.with_ymd_and_hms(2026, 1, 8, 0, 0, 0).unwrap();
        // created 8 days ago, retention 7 days -> expired by 1 day, but
        // grace of 3 days keeps the *last remaining* snapshot alive (P5).
        let backup = FakeDriver::with(&[(
            "img",
            &["rbvault;daily;7;2026-01-01T00:00:00Z"],
        )]);

        let outcome = backup_side_expire(
            &backup,
            &ImageId::new("img"),
            &profiles(),
            Duration::days(3),
            "rbvault",
            now,
        )
        .await
        .unwrap();

        assert_eq!(outcome, BackupExpireOutcome::Retained);
        assert_eq!(
            backup.snapshots(&ImageId::new("img")).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn backup_expire_deletes_last_snapshot_past_grace() {
        let now = Utc.with_ymd_and_hms(2026, 1, 20, 0, 0, 0).unwrap();
        let backup = FakeDriver::with(&[(
            "img",
            &["rbvault;daily;7;2026-01-01T00:00:00Z"],
        )]);

        let outcome = backup_side_expire(
            &backup,
            &ImageId::new("img"),
            &profiles(),
            Duration::days(3),
            "rbvault",
            now,
        )
        .await
        .unwrap();

        assert_eq!(outcome, BackupExpireOutcome::ImageDeleted);
    }
}
