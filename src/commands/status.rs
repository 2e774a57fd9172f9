use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::commands::CommandReport;
use crate::restore::ledger::Ledger;
use crate::restore::paths::resolve_paths;

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("dmr_home={}", paths.dmr_home.display()));
    report.detail(format!("ledger_file={}", paths.ledger_file.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    report.detail(format!("config_file={}", paths.config_file.display()));

    if !paths.ledger_file.exists() {
        report.detail("ledger is empty (no deliveries recorded yet)");
        return Ok(report);
    }

    let ledger = Ledger::open(&paths.ledger_file);
    let targets = ledger.targets()?;
    report.detail(format!("targets={}", targets.len()));

    for (bvid, cid) in targets {
        let counts = ledger.counts_by_target(cid)?;
        report.detail(format!(
            "target bvid={bvid} cid={cid} pending={} verified={} lost={}",
            counts.pending, counts.verified, counts.lost
        ));
        if let Some(oldest) = counts.oldest_pending_epoch_secs {
            let rendered = DateTime::<Utc>::from_timestamp(oldest as i64, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| oldest.to_string());
            report.detail(format!("target cid={cid} oldest_pending_since={rendered}"));
        }
    }

    Ok(report)
}
