use thiserror::Error;

/// Typed failure modes described in spec.md §7.
///
/// `Contended`, `TransientIO` and `ConfigMissing` are routed to a log
/// line and a skipped unit of work by the caller; `MissingAnchor`,
/// `Stale` and `Divergent` are routed into the results store;
/// `Fatal` is the only kind that propagates out of a run.
#[derive(Debug, Error)]
pub enum RbvaultError {
    #[error("lock contended for {0}")]
    Contended(String),

    #[error("transient I/O failure: {0}")]
    TransientIO(String),

    #[error("no shared snapshot between live and backup for {0}")]
    MissingAnchor(String),

    #[error("backup for {image} is stale (anchor created at {timestamp})")]
    Stale {
        image: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    #[error("checksum mismatch for {image} @ {snapshot}: live={live_checksum} backup={backup_checksum}")]
    Divergent {
        image: String,
        snapshot: String,
        live_checksum: String,
        backup_checksum: String,
    },

    #[error("unknown retention profile {0:?}")]
    ConfigMissing(String),

    #[error("fatal: {0}")]
    Fatal(String),
}
