use crate::bili::SubmitApi;
use crate::error::{ApiFailure, LedgerError};
use crate::restore::breaker::{FailureClass, TripCounter};
use crate::restore::cancel::CancelToken;
use crate::restore::comment::{CommentKey, TargetId, fingerprint};
use crate::restore::config::RestoreConfig;
use crate::restore::ledger::{DeliveryRecord, DeliveryState, Ledger};
use crate::restore::pacing::PacingPolicy;
use crate::restore::progress::{ProgressEvent, ProgressFeed};
use crate::restore::util::now_epoch_secs;
use anyhow::Result;
use std::time::Duration;

/// Why a dispatch run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    Completed,
    Cancelled,
    /// A single remote signal invalidated the whole run.
    Fatal,
    /// Too many consecutive transient failures.
    CircuitTripped,
}

impl RunEnd {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Fatal => "fatal",
            Self::CircuitTripped => "circuit-tripped",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunTally {
    pub sent: usize,
    pub skipped_dup: usize,
    pub skipped_failed: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct DispatchOutcome {
    pub end: RunEnd,
    pub tally: RunTally,
    /// Submissions actually attempted (dedup skips excluded).
    pub attempted: usize,
    /// Candidates never reached because the run stopped early.
    pub unprocessed: usize,
    pub last_error: Option<String>,
}

enum ItemOutcome {
    Sent(u64),
    Rejected(ApiFailure),
    Exhausted(ApiFailure),
    FatalRun(ApiFailure),
    CancelledMidRetry,
}

/// Submit `candidates` for `target` in input order.
///
/// Per item: dedup lookup, cancellable pacing wait (skipped for the first
/// attempted submission of the run), bounded transient retries, then a
/// ledger write on success. The ledger is only touched after the remote
/// acknowledged the comment, so cancellation between items never leaves a
/// partial record.
pub fn run_dispatch(
    ledger: &Ledger,
    api: &dyn SubmitApi,
    target: &TargetId,
    candidates: &[CommentKey],
    cfg: &RestoreConfig,
    pacing: &mut PacingPolicy,
    cancel: &CancelToken,
    feed: &ProgressFeed,
) -> Result<DispatchOutcome> {
    let total = candidates.len();
    feed.publish(ProgressEvent::RunStarted { total });

    let classifier = cfg.classifier();
    let rate_limit_backoff = Duration::from_secs(cfg.retry.rate_limit_backoff_secs);
    let mut tally = RunTally::default();
    let mut trips = TripCounter::default();
    let mut attempted: u32 = 0;
    let mut end = RunEnd::Completed;
    let mut last_error: Option<String> = None;
    let mut next_index = 0usize;

    'items: for (index, key) in candidates.iter().enumerate() {
        next_index = index;
        if cancel.is_cancelled() {
            end = RunEnd::Cancelled;
            break 'items;
        }

        let fp = fingerprint(target.cid, key);

        if cfg.dedup.enabled
            && let Some(existing) = ledger.lookup(&fp)?
            && matches!(
                existing.state,
                DeliveryState::Pending | DeliveryState::Verified
            )
        {
            // Already satisfied; Lost records fall through and are resent.
            tally.skipped_dup += 1;
            feed.publish(ProgressEvent::SkippedDuplicate {
                index,
                fingerprint: fp,
            });
            next_index = index + 1;
            continue;
        }

        if attempted > 0 {
            let wait = pacing.next_wait(attempted);
            feed.publish(ProgressEvent::Waiting {
                wait_ms: wait.as_millis() as u64,
            });
            if cancel.wait_timeout(wait) {
                end = RunEnd::Cancelled;
                break 'items;
            }
        }

        let mut attempts = 0u32;
        let item = loop {
            attempts += 1;
            match api.submit(target, key) {
                Ok(remote_id) => break ItemOutcome::Sent(remote_id),
                Err(failure) => match classifier.classify(&failure) {
                    FailureClass::FatalRun => break ItemOutcome::FatalRun(failure),
                    FailureClass::FatalItem => break ItemOutcome::Rejected(failure),
                    FailureClass::Transient => {
                        if attempts >= cfg.retry.max_attempts {
                            break ItemOutcome::Exhausted(failure);
                        }
                        let mut wait = pacing.next_wait(attempted);
                        if classifier.is_rate_limited(&failure) {
                            wait += rate_limit_backoff;
                        }
                        feed.publish(ProgressEvent::Waiting {
                            wait_ms: wait.as_millis() as u64,
                        });
                        if cancel.wait_timeout(wait) {
                            break ItemOutcome::CancelledMidRetry;
                        }
                    }
                },
            }
        };
        attempted += 1;

        match item {
            ItemOutcome::Sent(remote_id) => {
                let record = DeliveryRecord {
                    fingerprint: fp.clone(),
                    bvid: target.bvid.clone(),
                    cid: target.cid,
                    text: key.text.clone(),
                    progress_ms: key.progress_ms,
                    color: key.color,
                    font_size: key.font_size,
                    state: DeliveryState::Pending,
                    remote_id: Some(remote_id),
                    created_at_epoch_secs: now_epoch_secs()?,
                    last_checked_at_epoch_secs: None,
                };
                if let Err(err) = ledger.upsert_pending(record) {
                    // A concurrent writer verified this fingerprint first;
                    // the send was redundant but harmless.
                    let conflict = matches!(
                        err.downcast_ref::<LedgerError>(),
                        Some(LedgerError::Conflict(_))
                    );
                    if !conflict {
                        return Err(err);
                    }
                }
                tally.sent += 1;
                trips.reset();
                feed.publish(ProgressEvent::Sent {
                    index,
                    fingerprint: fp,
                    remote_id,
                });
                next_index = index + 1;
            }
            ItemOutcome::Rejected(failure) => {
                tally.skipped_failed += 1;
                last_error = Some(failure.to_string());
                feed.publish(ProgressEvent::SkippedRejected {
                    index,
                    code: failure.code().unwrap_or(-1),
                });
                next_index = index + 1;
            }
            ItemOutcome::Exhausted(failure) => {
                tally.failed += 1;
                let consecutive = trips.record_failure();
                feed.publish(ProgressEvent::Failed { index, attempts });
                next_index = index + 1;
                if trips.tripped(cfg.retry.failure_threshold) {
                    end = RunEnd::CircuitTripped;
                    last_error = Some(format!(
                        "circuit tripped after {consecutive} consecutive failures; last: {failure}"
                    ));
                    break 'items;
                }
                last_error = Some(failure.to_string());
            }
            ItemOutcome::FatalRun(failure) => {
                tally.failed += 1;
                last_error = Some(failure.to_string());
                end = RunEnd::Fatal;
                next_index = index + 1;
                break 'items;
            }
            ItemOutcome::CancelledMidRetry => {
                // The in-flight attempt finished before we noticed the
                // cancel; nothing was recorded, so the item stays
                // unprocessed and a dedup rerun picks it up again.
                end = RunEnd::Cancelled;
                break 'items;
            }
        }
    }

    let unprocessed = total - next_index;
    feed.publish(ProgressEvent::RunFinished {
        sent: tally.sent,
        skipped_dup: tally.skipped_dup,
        skipped_failed: tally.skipped_failed,
        failed: tally.failed,
        unprocessed,
    });

    Ok(DispatchOutcome {
        end,
        tally,
        attempted: attempted as usize,
        unprocessed,
        last_error,
    })
}
