use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted verification failure (spec.md §3, §4.10). Reconciled
/// at the end of each verification pass: cleared findings are deleted,
/// new findings are inserted with the current epoch, and findings that
/// persist across runs keep their original `first_seen_epoch` so the
/// `check` subcommand can alert on age, not just presence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub first_seen_epoch: i64,
    pub cluster: String,
    pub image: String,
    pub message: String,
}

impl VerificationRecord {
    pub fn new(now: DateTime<Utc>, cluster: impl Into<String>, image: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            first_seen_epoch: now.timestamp(),
            cluster: cluster.into(),
            image: image.into(),
            message: message.into(),
        }
    }

    /// Identity used for reconciliation: same `(cluster, image)` means
    /// the same failure slot, regardless of the message text.
    pub fn key(&self) -> (&str, &str) {
        (&self.cluster, &self.image)
    }
}
