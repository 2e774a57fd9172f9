use crate::bili::CommentFeed;
use crate::error::LedgerError;
use crate::restore::audit;
use crate::restore::cancel::CancelToken;
use crate::restore::comment::{CommentKey, TargetId};
use crate::restore::config::MonitorSection;
use crate::restore::ledger::{DeliveryState, Ledger};
use crate::restore::paths::DmrPaths;
use crate::restore::progress::{ProgressEvent, ProgressFeed};
use crate::restore::util::now_epoch_secs;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct MonitorCycleOutcome {
    /// Comments in the remote list.
    pub fetched: usize,
    /// Pending records examined this cycle.
    pub pending: usize,
    pub promoted: usize,
    pub demoted: usize,
    pub still_pending: usize,
    /// Verified records demoted by re-verification.
    pub reverified_lost: usize,
    /// Transitions lost to a concurrent writer.
    pub races: usize,
}

/// Matchable copies of the remote list, as a multiset so each remote
/// comment confirms at most one record.
struct RemoteIndex {
    counts: HashMap<CommentKey, usize>,
}

impl RemoteIndex {
    fn new(comments: Vec<CommentKey>) -> Self {
        let mut counts = HashMap::new();
        for key in comments {
            *counts.entry(key).or_insert(0usize) += 1;
        }
        Self { counts }
    }

    fn take(&mut self, key: &CommentKey) -> bool {
        match self.counts.get_mut(key) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

/// One reconciliation pass over the ledger for `target`.
///
/// Matching is exact on the full (text, progress_ms, color, font_size)
/// tuple. A pending record older than the grace period with no match is
/// demoted to lost; a younger one just gets its checked timestamp bumped.
/// State changes go through the ledger's compare-and-set, so losing a race
/// with another writer is counted, not fatal.
pub fn run_cycle(
    ledger: &Ledger,
    feed_api: &dyn CommentFeed,
    target: &TargetId,
    cfg: &MonitorSection,
    progress: &ProgressFeed,
    now: u64,
) -> Result<MonitorCycleOutcome> {
    let remote = feed_api
        .fetch_comments(target)
        .with_context(|| format!("failed to fetch comment list for cid {}", target.cid))?;

    let mut outcome = MonitorCycleOutcome {
        fetched: remote.len(),
        ..Default::default()
    };
    let mut index = RemoteIndex::new(remote);

    // Verified records claim their matches first so a pending duplicate
    // of an already-verified comment cannot steal its remote copy.
    if cfg.reverify {
        for record in ledger.query_by_target(target.cid, Some(DeliveryState::Verified))? {
            if index.take(&record.key()) {
                continue;
            }
            match apply_transition(
                ledger,
                progress,
                &record.fingerprint,
                DeliveryState::Verified,
                DeliveryState::Lost,
                now,
            )? {
                Applied::Yes => outcome.reverified_lost += 1,
                Applied::Raced => outcome.races += 1,
            }
        }
    } else {
        for record in ledger.query_by_target(target.cid, Some(DeliveryState::Verified))? {
            index.take(&record.key());
        }
    }

    let mut unchanged: Vec<String> = Vec::new();
    for record in ledger.query_by_target(target.cid, Some(DeliveryState::Pending))? {
        outcome.pending += 1;
        if index.take(&record.key()) {
            match apply_transition(
                ledger,
                progress,
                &record.fingerprint,
                DeliveryState::Pending,
                DeliveryState::Verified,
                now,
            )? {
                Applied::Yes => outcome.promoted += 1,
                Applied::Raced => outcome.races += 1,
            }
        } else if now.saturating_sub(record.created_at_epoch_secs) > cfg.grace_period_secs {
            match apply_transition(
                ledger,
                progress,
                &record.fingerprint,
                DeliveryState::Pending,
                DeliveryState::Lost,
                now,
            )? {
                Applied::Yes => outcome.demoted += 1,
                Applied::Raced => outcome.races += 1,
            }
        } else {
            outcome.still_pending += 1;
            unchanged.push(record.fingerprint);
        }
    }
    ledger.mark_checked(&unchanged, now)?;

    Ok(outcome)
}

enum Applied {
    Yes,
    Raced,
}

fn apply_transition(
    ledger: &Ledger,
    progress: &ProgressFeed,
    fingerprint: &str,
    from: DeliveryState,
    to: DeliveryState,
    now: u64,
) -> Result<Applied> {
    match ledger.transition(fingerprint, from, to, now) {
        Ok(()) => {
            progress.publish(ProgressEvent::Transition {
                fingerprint: fingerprint.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            });
            Ok(Applied::Yes)
        }
        Err(err) => match err.downcast_ref::<LedgerError>() {
            Some(LedgerError::StateMismatch { .. }) | Some(LedgerError::NotFound(_)) => {
                Ok(Applied::Raced)
            }
            _ => Err(err),
        },
    }
}

/// Reconcile on an interval until cancelled. Each cycle is audited; a
/// failed fetch degrades the cycle instead of killing the loop.
pub fn run_loop(
    ledger: &Ledger,
    feed_api: &dyn CommentFeed,
    target: &TargetId,
    cfg: &MonitorSection,
    paths: &DmrPaths,
    progress: &ProgressFeed,
    cancel: &CancelToken,
) -> Result<()> {
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        match run_cycle(ledger, feed_api, target, cfg, progress, now_epoch_secs()?) {
            Ok(outcome) => {
                audit::append_event(
                    paths,
                    "reconcile",
                    "ok",
                    &format!(
                        "cid={} fetched={} promoted={} demoted={} still_pending={} races={}",
                        target.cid,
                        outcome.fetched,
                        outcome.promoted,
                        outcome.demoted,
                        outcome.still_pending,
                        outcome.races
                    ),
                )?;
            }
            Err(err) => {
                audit::append_event(
                    paths,
                    "reconcile",
                    "degraded",
                    &format!("cid={} cycle failed: {err:#}", target.cid),
                )?;
            }
        }
        if cancel.wait_timeout(Duration::from_secs(cfg.poll_interval_secs)) {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::run_cycle;
    use crate::bili::CommentFeed;
    use crate::error::ApiFailure;
    use crate::restore::comment::{CommentKey, TargetId, fingerprint};
    use crate::restore::config::MonitorSection;
    use crate::restore::ledger::{DeliveryRecord, DeliveryState, Ledger};
    use crate::restore::progress::ProgressFeed;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct FakeFeed {
        lists: Mutex<VecDeque<Result<Vec<CommentKey>, ApiFailure>>>,
    }

    impl FakeFeed {
        fn returning(list: Vec<CommentKey>) -> Self {
            Self {
                lists: Mutex::new(VecDeque::from([Ok(list)])),
            }
        }

        fn failing(failure: ApiFailure) -> Self {
            Self {
                lists: Mutex::new(VecDeque::from([Err(failure)])),
            }
        }
    }

    impl CommentFeed for FakeFeed {
        fn fetch_comments(&self, _target: &TargetId) -> Result<Vec<CommentKey>, ApiFailure> {
            self.lists
                .lock()
                .expect("lists lock")
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn key(text: &str, progress_ms: u64) -> CommentKey {
        CommentKey {
            text: text.to_string(),
            progress_ms,
            color: 16_777_215,
            font_size: 25,
        }
    }

    fn seed(ledger: &Ledger, cid: u64, k: &CommentKey, created_at: u64) -> String {
        let fp = fingerprint(cid, k);
        ledger
            .upsert_pending(DeliveryRecord {
                fingerprint: fp.clone(),
                bvid: "BV1test".to_string(),
                cid,
                text: k.text.clone(),
                progress_ms: k.progress_ms,
                color: k.color,
                font_size: k.font_size,
                state: DeliveryState::Pending,
                remote_id: Some(1),
                created_at_epoch_secs: created_at,
                last_checked_at_epoch_secs: None,
            })
            .expect("seed");
        fp
    }

    fn target() -> TargetId {
        TargetId {
            bvid: "BV1test".to_string(),
            cid: 7,
        }
    }

    fn temp_ledger() -> (tempfile::TempDir, Ledger) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let ledger = Ledger::open(tmp.path().join("deliveries.jsonl"));
        (tmp, ledger)
    }

    fn cfg() -> MonitorSection {
        MonitorSection {
            poll_interval_secs: 60,
            grace_period_secs: 600,
            reverify: false,
        }
    }

    #[test]
    fn matched_pending_record_is_promoted() {
        let (_tmp, ledger) = temp_ledger();
        let k = key("前方高能", 12_000);
        let fp = seed(&ledger, 7, &k, 1_000);
        let feed = FakeFeed::returning(vec![key("unrelated", 5), k]);

        let out = run_cycle(
            &ledger,
            &feed,
            &target(),
            &cfg(),
            &ProgressFeed::disabled(),
            1_100,
        )
        .expect("cycle");

        assert_eq!(out.promoted, 1);
        assert_eq!(out.demoted, 0);
        let got = ledger.lookup(&fp).expect("lookup").expect("present");
        assert_eq!(got.state, DeliveryState::Verified);
        assert_eq!(got.last_checked_at_epoch_secs, Some(1_100));
    }

    #[test]
    fn near_miss_tuple_is_not_a_match() {
        let (_tmp, ledger) = temp_ledger();
        let k = key("off by one", 12_000);
        let fp = seed(&ledger, 7, &k, 1_000);
        // Same text, 1ms off.
        let feed = FakeFeed::returning(vec![key("off by one", 12_001)]);

        let out = run_cycle(
            &ledger,
            &feed,
            &target(),
            &cfg(),
            &ProgressFeed::disabled(),
            1_100,
        )
        .expect("cycle");

        assert_eq!(out.promoted, 0);
        assert_eq!(out.still_pending, 1);
        let got = ledger.lookup(&fp).expect("lookup").expect("present");
        assert_eq!(got.state, DeliveryState::Pending);
    }

    #[test]
    fn unmatched_young_record_stays_pending_with_fresh_check() {
        let (_tmp, ledger) = temp_ledger();
        let fp = seed(&ledger, 7, &key("still in flight", 3_000), 1_000);
        let feed = FakeFeed::returning(Vec::new());

        // 500s old, grace is 600s.
        let out = run_cycle(
            &ledger,
            &feed,
            &target(),
            &cfg(),
            &ProgressFeed::disabled(),
            1_500,
        )
        .expect("cycle");

        assert_eq!(out.still_pending, 1);
        assert_eq!(out.demoted, 0);
        let got = ledger.lookup(&fp).expect("lookup").expect("present");
        assert_eq!(got.state, DeliveryState::Pending);
        assert_eq!(got.last_checked_at_epoch_secs, Some(1_500));
    }

    #[test]
    fn unmatched_record_past_grace_is_demoted_once() {
        let (_tmp, ledger) = temp_ledger();
        let fp = seed(&ledger, 7, &key("moderated away", 3_000), 1_000);

        let out = run_cycle(
            &ledger,
            &FakeFeed::returning(Vec::new()),
            &target(),
            &cfg(),
            &ProgressFeed::disabled(),
            1_000 + 601,
        )
        .expect("cycle");
        assert_eq!(out.demoted, 1);
        assert_eq!(
            ledger.lookup(&fp).expect("lookup").expect("present").state,
            DeliveryState::Lost
        );

        // The next cycle sees a Lost record and leaves it alone.
        let again = run_cycle(
            &ledger,
            &FakeFeed::returning(Vec::new()),
            &target(),
            &cfg(),
            &ProgressFeed::disabled(),
            1_000 + 700,
        )
        .expect("cycle");
        assert_eq!(again.pending, 0);
        assert_eq!(again.demoted, 0);
    }

    #[test]
    fn duplicate_tuples_consume_remote_copies_one_for_one() {
        let (_tmp, ledger) = temp_ledger();
        // Two pending records for different cids cannot share a fingerprint,
        // so duplicates are a verified record and a pending one with the
        // same tuple. The single remote copy belongs to the verified record.
        let k = key("same tuple", 9_000);
        let verified_fp = seed(&ledger, 7, &k, 1_000);
        ledger
            .transition(
                &verified_fp,
                DeliveryState::Pending,
                DeliveryState::Verified,
                1_001,
            )
            .expect("verify");
        // Re-insert under a synthetic fingerprint to model a second copy.
        ledger
            .upsert_pending(DeliveryRecord {
                fingerprint: "synthetic-second-copy".to_string(),
                bvid: "BV1test".to_string(),
                cid: 7,
                text: k.text.clone(),
                progress_ms: k.progress_ms,
                color: k.color,
                font_size: k.font_size,
                state: DeliveryState::Pending,
                remote_id: Some(2),
                created_at_epoch_secs: 1_000,
                last_checked_at_epoch_secs: None,
            })
            .expect("seed second");

        let out = run_cycle(
            &ledger,
            &FakeFeed::returning(vec![k]),
            &target(),
            &cfg(),
            &ProgressFeed::disabled(),
            1_100,
        )
        .expect("cycle");

        assert_eq!(out.promoted, 0, "verified record claimed the remote copy");
        assert_eq!(out.still_pending, 1);
    }

    #[test]
    fn reverify_demotes_verified_records_missing_from_remote() {
        let (_tmp, ledger) = temp_ledger();
        let k = key("was verified", 4_000);
        let fp = seed(&ledger, 7, &k, 1_000);
        ledger
            .transition(&fp, DeliveryState::Pending, DeliveryState::Verified, 1_001)
            .expect("verify");

        let mut reverify_cfg = cfg();
        reverify_cfg.reverify = true;
        let out = run_cycle(
            &ledger,
            &FakeFeed::returning(Vec::new()),
            &target(),
            &reverify_cfg,
            &ProgressFeed::disabled(),
            1_100,
        )
        .expect("cycle");

        assert_eq!(out.reverified_lost, 1);
        assert_eq!(
            ledger.lookup(&fp).expect("lookup").expect("present").state,
            DeliveryState::Lost
        );
    }

    #[test]
    fn without_reverify_verified_records_are_left_alone() {
        let (_tmp, ledger) = temp_ledger();
        let k = key("settled", 4_000);
        let fp = seed(&ledger, 7, &k, 1_000);
        ledger
            .transition(&fp, DeliveryState::Pending, DeliveryState::Verified, 1_001)
            .expect("verify");

        let out = run_cycle(
            &ledger,
            &FakeFeed::returning(Vec::new()),
            &target(),
            &cfg(),
            &ProgressFeed::disabled(),
            1_100,
        )
        .expect("cycle");

        assert_eq!(out.reverified_lost, 0);
        assert_eq!(
            ledger.lookup(&fp).expect("lookup").expect("present").state,
            DeliveryState::Verified
        );
    }

    #[test]
    fn fetch_failure_propagates() {
        let (_tmp, ledger) = temp_ledger();
        seed(&ledger, 7, &key("unreachable", 1_000), 1_000);
        let feed = FakeFeed::failing(ApiFailure::Transport("connection refused".into()));

        let err = run_cycle(
            &ledger,
            &feed,
            &target(),
            &cfg(),
            &ProgressFeed::disabled(),
            1_100,
        )
        .unwrap_err();
        assert!(err.to_string().contains("cid 7"));
    }
}
