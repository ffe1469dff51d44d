use chrono::{DateTime, Duration, Utc};
use rbvault_types::{ProfileTable, SnapshotName};

/// `is_expired(snap, treat_as_last)` from spec.md §4.2:
/// `expires_at = timestamp + profile_duration(profile, count)`, extended
/// by `extra_retention_time` when `treat_as_last` is set. An unknown
/// profile is *never* treated as expired — it only produces a log
/// warning, so no orphaned snapshot is ever silently deleted by the
/// backup-side expirer just because its profile was removed from
/// config (that removal is handled as an intentional delete only on
/// the *live* side, see [`crate::live_side_expire`]).
pub fn is_expired(
    snap: &SnapshotName,
    profiles: &ProfileTable,
    extra_retention_time: Duration,
    treat_as_last: bool,
    now: DateTime<Utc>,
) -> bool {
    let profile = match profiles.get(snap.profile()) {
        Some(p) => p,
        None => {
            log::warn!(
                "unknown profile {:?} found on {}, no action taken",
                snap.profile(),
                snap
            );
            return false;
        }
    };

    let mut expires_at = snap.timestamp() + profile.retention();
    if treat_as_last {
        expires_at += extra_retention_time;
    }
    expires_at <= now
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rbvault_types::{Frequency, Profile};
    use std::collections::HashMap;

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

    fn ts(days_ago: i64, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(days_ago)
    }

    #[test]
    fn expires_after_retention_window() {
        let now = Utc.with_ymd_and_hms(2026, 1, 8, 0, 0, 0).unwrap();
        let snap = SnapshotName::new("rbvault", "daily", 7, ts(8, now));
        assert!(is_expired(&snap, &profiles(), Duration::days(0), false, now));
    }

    #[test]
    fn not_expired_within_retention_window() {
        let now = Utc.with_ymd_and_hms(2026, 1, 8, 0, 0, 0).unwrap();
        let snap = SnapshotName::new("rbvault", "daily", 7, ts(3, now));
        assert!(!is_expired(&snap, &profiles(), Duration::days(0), false, now));
    }

    #[test]
    fn unknown_profile_is_never_expired() {
        let now = Utc.with_ymd_and_hms(2026, 1, 8, 0, 0, 0).unwrap();
        let snap = SnapshotName::new("rbvault", "weekly", 4, ts(365, now));
        assert!(!is_expired(&snap, &profiles(), Duration::days(0), false, now));
    }

    #[test]
    fn grace_period_applies_only_when_marked_as_last() {
        let now = Utc.with_ymd_and_hms(2026, 1, 8, 0, 0, 0).unwrap();
        // Expired by 1 day under base retention, but +3 days grace keeps
        // it alive when treated as the last remaining snapshot (P5).
        let snap = SnapshotName::new("rbvault", "daily", 7, ts(8, now));
        assert!(!is_expired(&snap, &profiles(), Duration::days(3), true, now));

        let snap_older = SnapshotName::new("rbvault", "daily", 7, ts(11, now));
        assert!(is_expired(&snap_older, &profiles(), Duration::days(3), true, now));
    }
}
