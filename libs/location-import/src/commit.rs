//! Commit driver
//!
//! Runs the [`Scheduler`] against a [`BatchSubmitter`], keeping exactly one batch in
//! flight. Cancellation is observed through a `watch` channel: once it flips to
//! `true` no further batch is submitted, and the result of a batch that was
//! already in flight is discarded.

use crate::error::{ImportError, Result};
use crate::model::{Forest, ServerId};
use crate::scheduler::{Action, BatchResult, CommitStats, Scheduler, SchedulerConfig};
use crate::submitter::BatchSubmitter;
use tokio::sync::watch;

#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    pub scheduler: SchedulerConfig,
    /// Existing location the top-level nodes are created under.
    pub parent: Option<ServerId>,
}

/// Summary of a completed commit run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitReport {
    pub batches: usize,
    pub created: usize,
    pub skipped: usize,
}

impl From<CommitStats> for CommitReport {
    fn from(stats: CommitStats) -> Self {
        Self {
            batches: stats.batches,
            created: stats.created,
            skipped: stats.skipped,
        }
    }
}

/// Commit every node of `forest` that has no server id yet.
///
/// Server ids are written into `forest` as batches succeed, so on any error the
/// forest reflects exactly what was persisted and can be committed again to resume.
pub async fn commit(
    forest: &mut Forest,
    submitter: &dyn BatchSubmitter,
    options: CommitOptions,
    cancel: watch::Receiver<bool>,
) -> Result<CommitReport> {
    let mut scheduler = Scheduler::new(options.scheduler);
    scheduler.seed(forest, options.parent);

    tracing::info!(
        locations = forest.len(),
        already_committed = forest.committed_count(),
        "Starting location commit"
    );

    let mut last = None;
    loop {
        match scheduler.step(forest, last.take()) {
            Action::Done => {
                let report = CommitReport::from(scheduler.stats());
                tracing::info!(
                    batches = report.batches,
                    created = report.created,
                    skipped = report.skipped,
                    "Location commit complete"
                );
                return Ok(report);
            }
            Action::Failed(failure) => {
                tracing::error!(
                    rejected = failure.rejected.len(),
                    pending_batches = failure.pending_batches,
                    committed = forest.committed_count(),
                    "Location commit halted"
                );
                return Err(ImportError::Commit(failure));
            }
            Action::Submit(batch) => {
                if *cancel.borrow() {
                    tracing::info!(
                        committed = forest.committed_count(),
                        queued = scheduler.queued(),
                        "Import cancelled before next batch"
                    );
                    return Err(ImportError::Cancelled);
                }

                let result = match submitter.submit(batch.requests(forest)).await {
                    Ok(outcomes) => BatchResult::Entries(outcomes),
                    Err(e) => BatchResult::Transport(e.to_string()),
                };

                if *cancel.borrow() {
                    tracing::warn!(
                        size = batch.len(),
                        "Import cancelled while a batch was in flight; discarding its result"
                    );
                    return Err(ImportError::Cancelled);
                }
                last = Some(result);
            }
        }
    }
}
