use std::collections::HashSet;

/// The incremental anchor: `max(live_snaps ∩ backup_snaps)` (spec.md
/// §3, "Shared snapshot invariant"). Snapshot names are compared as
/// plain strings, matching `backurne.py`'s `sorted(shared).pop()` —
/// this is only a faithful *temporal* maximum within a single profile
/// (P3 scopes the lexicographic-equals-temporal guarantee to pairs
/// sharing a profile); across profiles it is the same best-effort
/// comparison the original tool has always used.
pub fn anchor_snapshot(live_snaps: &[String], backup_snaps: &[String]) -> Option<String> {
    let backup_set: HashSet<&str> = backup_snaps.iter().map(String::as_str).collect();
    live_snaps
        .iter()
        .filter(|s| backup_set.contains(s.as_str()))
        .max()
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_the_newest_shared_snapshot() {
        let live = vec![
            "rbvault;daily;7;2026-01-01T00:00:00Z".to_owned(),
            "rbvault;daily;7;2026-01-02T00:00:00Z".to_owned(),
            "rbvault;daily;7;2026-01-03T00:00:00Z".to_owned(),
        ];
        let backup = vec![
            "rbvault;daily;7;2026-01-01T00:00:00Z".to_owned(),
            "rbvault;daily;7;2026-01-02T00:00:00Z".to_owned(),
        ];
        assert_eq!(
            anchor_snapshot(&live, &backup),
            Some("rbvault;daily;7;2026-01-02T00:00:00Z".to_owned())
        );
    }

    #[test]
    fn none_when_no_shared_snapshot() {
        let live = vec!["rbvault;daily;7;2026-01-01T00:00:00Z".to_owned()];
        let backup = vec!["rbvault;daily;7;2026-01-02T00:00:00Z".to_owned()];
        assert_eq!(anchor_snapshot(&live, &backup), None);
    }
}
