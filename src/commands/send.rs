use anyhow::{Context, Result};
use std::path::PathBuf;
use std::thread;

use crate::bili::HttpClient;
use crate::commands::CommandReport;
use crate::restore::audit;
use crate::restore::cancel::CancelToken;
use crate::restore::candidates::load_candidates;
use crate::restore::comment::TargetId;
use crate::restore::config::load_config;
use crate::restore::dispatch::{RunEnd, run_dispatch};
use crate::restore::ledger::Ledger;
use crate::restore::pacing::PacingPolicy;
use crate::restore::paths::resolve_paths;
use crate::restore::progress::{ProgressEvent, ProgressFeed};
use crate::restore::util::format_progress_ms;

#[derive(Debug, Clone)]
pub struct SendOptions {
    pub bvid: String,
    pub cid: u64,
    pub candidates: PathBuf,
    pub seed: Option<u64>,
    pub no_dedup: bool,
}

pub fn run(opts: &SendOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("send");
    let paths = resolve_paths()?;
    let mut cfg = load_config(&paths.config_file)?;
    if opts.no_dedup {
        cfg.dedup.enabled = false;
    }

    let batch = load_candidates(&opts.candidates)
        .with_context(|| format!("failed to load {}", opts.candidates.display()))?;
    if batch.is_empty() {
        report.detail("candidate file is empty; nothing to send");
        return Ok(report);
    }

    let client = HttpClient::from_env()?;
    let ledger = Ledger::open(&paths.ledger_file);
    let target = TargetId {
        bvid: opts.bvid.clone(),
        cid: opts.cid,
    };
    let mut pacing = match opts.seed {
        Some(seed) => PacingPolicy::with_seed(cfg.pacing_config(), seed),
        None => PacingPolicy::new(cfg.pacing_config()),
    };

    let (feed, rx) = ProgressFeed::bounded(cfg.progress.buffer_capacity);
    let printer = thread::spawn(move || {
        for event in rx {
            eprintln!("{}", render_event(&event));
        }
    });

    let cancel = CancelToken::new();
    let outcome = run_dispatch(
        &ledger, &client, &target, &batch, &cfg, &mut pacing, &cancel, &feed,
    );
    let dropped = feed.dropped();
    drop(feed);
    let _ = printer.join();
    let outcome = outcome?;

    report.detail(format!("ledger_file={}", paths.ledger_file.display()));
    report.detail(format!("candidates={}", batch.len()));
    if let (Some(first), Some(last)) = (
        batch.iter().map(|c| c.progress_ms).min(),
        batch.iter().map(|c| c.progress_ms).max(),
    ) {
        report.detail(format!(
            "position_span={}..{}",
            format_progress_ms(first),
            format_progress_ms(last)
        ));
    }
    report.detail(format!("sent={}", outcome.tally.sent));
    report.detail(format!("skipped_duplicate={}", outcome.tally.skipped_dup));
    report.detail(format!("skipped_rejected={}", outcome.tally.skipped_failed));
    report.detail(format!("failed={}", outcome.tally.failed));
    report.detail(format!("unprocessed={}", outcome.unprocessed));
    report.detail(format!("end={}", outcome.end.as_str()));
    if dropped > 0 {
        report.detail(format!("progress_events_dropped={dropped}"));
    }

    let audit_status = if outcome.end == RunEnd::Completed {
        "ok"
    } else {
        "degraded"
    };
    audit::append_event(
        &paths,
        "send",
        audit_status,
        &format!(
            "bvid={} cid={} sent={} skipped_dup={} skipped_rejected={} failed={} unprocessed={} end={}",
            opts.bvid,
            opts.cid,
            outcome.tally.sent,
            outcome.tally.skipped_dup,
            outcome.tally.skipped_failed,
            outcome.tally.failed,
            outcome.unprocessed,
            outcome.end.as_str()
        ),
    )?;

    if outcome.end != RunEnd::Completed {
        let cause = outcome
            .last_error
            .unwrap_or_else(|| "no error captured".to_string());
        report.issue(format!("run ended early ({}): {cause}", outcome.end.as_str()));
    }

    Ok(report)
}

fn render_event(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::RunStarted { total } => format!("run started: {total} candidates"),
        ProgressEvent::Waiting { wait_ms } => format!("waiting {:.1}s", *wait_ms as f64 / 1000.0),
        ProgressEvent::Sent {
            index,
            fingerprint,
            remote_id,
        } => format!("[{index}] sent remote_id={remote_id} fingerprint={fingerprint}"),
        ProgressEvent::SkippedDuplicate { index, fingerprint } => {
            format!("[{index}] duplicate, skipped fingerprint={fingerprint}")
        }
        ProgressEvent::SkippedRejected { index, code } => {
            format!("[{index}] rejected by remote (code {code}), skipped")
        }
        ProgressEvent::Failed { index, attempts } => {
            format!("[{index}] failed after {attempts} attempts")
        }
        ProgressEvent::Transition {
            fingerprint,
            from,
            to,
        } => format!("transition {from} -> {to} fingerprint={fingerprint}"),
        ProgressEvent::RunFinished {
            sent,
            skipped_dup,
            skipped_failed,
            failed,
            unprocessed,
        } => format!(
            "run finished: sent={sent} skipped_dup={skipped_dup} skipped_rejected={skipped_failed} failed={failed} unprocessed={unprocessed}"
        ),
    }
}
