//! C9 Status Reporter: a single reader that aggregates worker
//! progress from a side-channel stream into one progress view
//! (spec.md §4.9). Progress math (`percentage`, done/pending
//! accounting) is grounded on the teacher's
//! `pbs-datastore::StoreProgress`, generalized from its two-level
//! group/snapshot counter to the flat total/pending counter this spec
//! needs — this tool has no notion of "groups" of snapshots, only a
//! flat stream of per-image work items.

use std::time::Duration as StdDuration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;

/// A progress event emitted by Producer/Consumer/Expirer workers.
#[derive(Debug, Clone, Copy)]
pub enum StatusMsg {
    AddItem,
    DoneItem,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Progress {
    pub total: u64,
    pub done: u64,
}

impl Progress {
    pub fn pending(&self) -> u64 {
        self.total.saturating_sub(self.done)
    }

    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.done as f64 / self.total as f64
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1}% ({}/{})", self.percentage() * 100.0, self.done, self.total)
    }
}

/// A handle to a running reporter task; dropping or awaiting it stops
/// rendering and returns the final tally. `desc` names the phase the
/// way the teacher's own progress bar carries a fixed description
/// ("images processed", "images cleaned up on live clusters", ...).
pub struct StatusReporter {
    tx: mpsc::UnboundedSender<StatusMsg>,
    handle: JoinHandle<Progress>,
}

impl StatusReporter {
    /// Starts the reporter for `desc`. Rendering happens at ≥1Hz; in
    /// `quiet` mode (the machine/debug mode of spec.md §4.9) rendering
    /// is suppressed but accounting still runs to completion.
    pub fn start(desc: impl Into<String>, quiet: bool) -> Self {
        let desc = desc.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<StatusMsg>();

        let handle = tokio::spawn(async move {
            let mut progress = Progress::default();
            let mut ticker = interval(StdDuration::from_secs(1));

            loop {
                tokio::select! {
                    msg = rx.recv() => {
                        match msg {
                            Some(StatusMsg::AddItem) => progress.total += 1,
                            Some(StatusMsg::DoneItem) => progress.done += 1,
                            None => break,
                        }
                    }
                    _ = ticker.tick() => {
                        if !quiet {
                            eprint!("\rrbvault: {progress} {desc}");
                        }
                    }
                }
            }

            if !quiet {
                eprintln!("\rrbvault: {progress} {desc}");
            }
            progress
        });

        Self { tx, handle }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<StatusMsg> {
        self.tx.clone()
    }

    /// Signals the reporter to stop and waits for the final tally.
    /// Guaranteed to be called even on an abnormal exit path by every
    /// caller in this crate (spec.md §4.9).
    pub async fn finish(self) -> Progress {
        drop(self.tx);
        self.handle.await.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_is_complete_with_no_items() {
        let progress = Progress::default();
        assert_eq!(progress.percentage(), 1.0);
    }

    #[test]
    fn pending_is_total_minus_done() {
        let progress = Progress { total: 10, done: 4 };
        assert_eq!(progress.pending(), 6);
    }

    #[tokio::test]
    async fn accounts_add_and_done_messages() {
        let reporter = StatusReporter::start("test", true);
        let tx = reporter.sender();
        tx.send(StatusMsg::AddItem).unwrap();
        tx.send(StatusMsg::AddItem).unwrap();
        tx.send(StatusMsg::DoneItem).unwrap();
        drop(tx);
        let progress = reporter.finish().await;
        assert_eq!(progress.total, 2);
        assert_eq!(progress.done, 1);
    }
}
