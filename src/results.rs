//! C10 Results Store: a single-table relational store of current
//! verification failures, reconciled at the end of every verification
//! pass (spec.md §4.10).
//!
//! Implemented with `rusqlite` rather than a hand-rolled flat file:
//! the spec calls for "a small relational store" with an exact
//! four-column schema, and this is the direct idiomatic-Rust
//! equivalent of the original's `sqlite3` usage (see DESIGN.md).

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rbvault_types::VerificationRecord;
use rusqlite::Connection;

pub struct ResultsStore {
    conn: Connection,
}

impl ResultsStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating results store directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening results store {}", path.display()))?;
        conn.execute(
            "create table if not exists results (
                first_seen_epoch integer not null,
                cluster text not null,
                image text not null,
                message text not null
            )",
            [],
        )?;
        Ok(Self { conn })
    }

    /// Reconciles stored findings against a freshly computed set
    /// (spec.md §4.10): records present in the store but not in
    /// `fresh` are removed (the problem cleared); records present in
    /// `fresh` but not in the store are inserted with `now`'s epoch;
    /// records present in both are left untouched, preserving their
    /// original `first_seen_epoch` (P7, age-based alerting in `check`).
    pub fn reconcile(&mut self, now: DateTime<Utc>, fresh: &[VerificationRecord]) -> Result<()> {
        let tx = self.conn.transaction()?;

        let existing: Vec<(String, String)> = {
            let mut stmt = tx.prepare("select cluster, image from results")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        for (cluster, image) in &existing {
            let still_present = fresh
                .iter()
                .any(|r| &r.cluster == cluster && &r.image == image);
            if !still_present {
                tx.execute(
                    "delete from results where cluster = ?1 and image = ?2",
                    rusqlite::params![cluster, image],
                )?;
            }
        }

        for record in fresh {
            let already_known = existing
                .iter()
                .any(|(cluster, image)| cluster == &record.cluster && image == &record.image);
            if already_known {
                continue;
            }
            tx.execute(
                "insert into results (first_seen_epoch, cluster, image, message) values (?1, ?2, ?3, ?4)",
                rusqlite::params![now.timestamp(), record.cluster, record.image, record.message],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// All stored records whose `first_seen_epoch` is older than
    /// `now - max_age` — the `check` subcommand's alert set
    /// (spec.md §4.10, a fixed 2-hour window).
    pub fn stale_records(&self, now: DateTime<Utc>, max_age: Duration) -> Result<Vec<VerificationRecord>> {
        let cutoff = (now - max_age).timestamp();
        let mut stmt = self
            .conn
            .prepare("select first_seen_epoch, cluster, image, message from results where first_seen_epoch < ?1")?;
        let rows = stmt.query_map([cutoff], |row| {
            Ok(VerificationRecord {
                first_seen_epoch: row.get(0)?,
                cluster: row.get(1)?,
                image: row.get(2)?,
                message: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}
