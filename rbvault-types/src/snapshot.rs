use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;

/// A canonical, semicolon-delimited snapshot name:
/// `tag;profile;count;timestamp` (spec.md §3).
///
/// Timestamps are always rendered in UTC with second precision and a
/// literal `Z` suffix, so that for any two names sharing the same
/// `tag;profile;` prefix, lexicographic order of the full string equals
/// temporal order of their `timestamp` (P3).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotName {
    tag: String,
    profile: String,
    count: u32,
    timestamp: DateTime<Utc>,
}

impl SnapshotName {
    pub fn new(tag: impl Into<String>, profile: impl Into<String>, count: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            tag: tag.into(),
            profile: profile.into(),
            count,
            timestamp,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Parse a snapshot name, accepting it only if it carries exactly
    /// `expected_tag` as its first field. Anything else — wrong tag,
    /// wrong number of fields, unparseable count or timestamp — is
    /// *not managed* and returns `None`: never deleted, never expired,
    /// just ignored (spec.md §9 open question: the tag check is a hard
    /// requirement, not a heuristic).
    pub fn parse(raw: &str, expected_tag: &str) -> Option<Self> {
        let mut parts = raw.split(';');
        let tag = parts.next()?;
        if tag != expected_tag {
            return None;
        }
        let profile = parts.next()?;
        let count: u32 = parts.next()?.parse().ok()?;
        let timestamp_raw = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        let timestamp = DateTime::parse_from_rfc3339(timestamp_raw)
            .ok()?
            .with_timezone(&Utc);

        Some(Self {
            tag: tag.to_owned(),
            profile: profile.to_owned(),
            count,
            timestamp,
        })
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{};{};{};{}",
            self.tag,
            self.profile,
            self.count,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn round_trips_through_format_and_parse() {
        let name = SnapshotName::new("rbvault", "daily", 7, ts(1_700_000_000));
        let formatted = name.to_string();
        let parsed = SnapshotName::parse(&formatted, "rbvault").expect("should parse");
        assert_eq!(name, parsed);
    }

    #[test]
    fn rejects_foreign_tag() {
        let raw = "someothertool;daily;7;2023-11-14T22:13:20Z";
        assert!(SnapshotName::parse(raw, "rbvault").is_none());
    }

    #[test]
    fn rejects_malformed_names() {
        assert!(SnapshotName::parse("rbvault;daily;notanumber;2023-11-14T22:13:20Z", "rbvault").is_none());
        assert!(SnapshotName::parse("rbvault;daily;7", "rbvault").is_none());
        assert!(SnapshotName::parse("rbvault;daily;7;2023-11-14T22:13:20Z;extra", "rbvault").is_none());
    }

    #[test]
    fn lexicographic_order_matches_temporal_order_within_a_profile() {
        let earlier = SnapshotName::new("rbvault", "hourly", 24, ts(1_700_000_000)).to_string();
        let later = SnapshotName::new("rbvault", "hourly", 24, ts(1_700_003_600)).to_string();
        assert!(earlier < later);
    }
}
