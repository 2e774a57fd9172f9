use anyhow::Result;

use crate::bili::HttpClient;
use crate::commands::CommandReport;
use crate::restore::cancel::CancelToken;
use crate::restore::comment::TargetId;
use crate::restore::config::load_config;
use crate::restore::ledger::Ledger;
use crate::restore::monitor;
use crate::restore::paths::resolve_paths;
use crate::restore::progress::ProgressFeed;
use crate::restore::util::now_epoch_secs;

#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    pub bvid: String,
    pub cid: u64,
    pub once: bool,
    pub daemon: bool,
}

pub fn run(opts: &ReconcileOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("reconcile");

    if opts.once && opts.daemon {
        report.issue("invalid flags: use only one of --once or --daemon");
        return Ok(report);
    }

    let paths = resolve_paths()?;
    let cfg = load_config(&paths.config_file)?;
    let client = HttpClient::from_env()?;
    let ledger = Ledger::open(&paths.ledger_file);
    let target = TargetId {
        bvid: opts.bvid.clone(),
        cid: opts.cid,
    };

    if opts.daemon {
        report.detail(format!(
            "reconciling cid={} every {}s until interrupted",
            opts.cid, cfg.monitor.poll_interval_secs
        ));
        monitor::run_loop(
            &ledger,
            &client,
            &target,
            &cfg.monitor,
            &paths,
            &ProgressFeed::disabled(),
            &CancelToken::new(),
        )?;
        return Ok(report);
    }

    let outcome = monitor::run_cycle(
        &ledger,
        &client,
        &target,
        &cfg.monitor,
        &ProgressFeed::disabled(),
        now_epoch_secs()?,
    )?;

    report.detail("reconcile cycle completed");
    report.detail(format!("remote_fetched={}", outcome.fetched));
    report.detail(format!("pending_examined={}", outcome.pending));
    report.detail(format!("promoted={}", outcome.promoted));
    report.detail(format!("demoted={}", outcome.demoted));
    report.detail(format!("still_pending={}", outcome.still_pending));
    if cfg.monitor.reverify {
        report.detail(format!("reverified_lost={}", outcome.reverified_lost));
    }
    if outcome.races > 0 {
        report.detail(format!("races={}", outcome.races));
    }

    Ok(report)
}
