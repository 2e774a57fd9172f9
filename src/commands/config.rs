use anyhow::Result;

use crate::commands::CommandReport;
use crate::restore::config::load_config;
use crate::restore::paths::resolve_paths;

include!(concat!(env!("OUT_DIR"), "/dmr_env_allowlist.rs"));

/// Show the effective configuration after file and environment merging,
/// plus every `DMR_*` variable the binary recognizes.
pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("config");

    report.detail(format!("config_file={}", paths.config_file.display()));
    if !paths.config_file.exists() {
        report.detail("config file not present; using defaults");
    }

    let cfg = load_config(&paths.config_file)?;
    let rendered = toml::to_string(&cfg)?;
    for line in rendered.lines() {
        report.detail(line.to_string());
    }

    report.detail(format!(
        "recognized_env_vars={}",
        GENERATED_DMR_ENV_ALLOWLIST.join(",")
    ));

    Ok(report)
}
