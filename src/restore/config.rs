use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::restore::breaker::Classifier;
use crate::restore::pacing::PacingConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingSection {
    pub min_delay_secs: f64,
    pub max_delay_secs: f64,
    pub burst_size: u32,
    pub burst_rest_secs: f64,
}

impl Default for PacingSection {
    fn default() -> Self {
        Self {
            min_delay_secs: 5.0,
            max_delay_secs: 10.0,
            burst_size: 20,
            burst_rest_secs: 60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub failure_threshold: u32,
    pub rate_limit_backoff_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            failure_threshold: 5,
            rate_limit_backoff_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupSection {
    pub enabled: bool,
}

impl Default for DedupSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSection {
    pub poll_interval_secs: u64,
    pub grace_period_secs: u64,
    pub reverify: bool,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            grace_period_secs: 600,
            reverify: false,
        }
    }
}

/// Remote status-code tables for the circuit breaker. These defaults track
/// the bilibili danmaku API; they are config, not code, because the
/// remote's anti-automation signals change over time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifySection {
    pub fatal_run_codes: Vec<i64>,
    pub fatal_item_codes: Vec<i64>,
    pub rate_limit_codes: Vec<i64>,
}

impl Default for ClassifySection {
    fn default() -> Self {
        Self {
            // Session/account dead, video unreachable, or upgrade wall.
            fatal_run_codes: vec![-101, -102, -111, -404, 36700, 36704, 36705, 36711, 36713],
            // The comment itself is rejected; the next one may be fine.
            fatal_item_codes: vec![
                -400, 36701, 36702, 36706, 36707, 36708, 36709, 36710, 36712, 36714, 36715, 36718,
            ],
            rate_limit_codes: vec![36703],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSection {
    pub buffer_capacity: usize,
}

impl Default for ProgressSection {
    fn default() -> Self {
        Self {
            buffer_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RestoreConfig {
    pub pacing: PacingSection,
    pub retry: RetrySection,
    pub dedup: DedupSection,
    pub monitor: MonitorSection,
    pub classify: ClassifySection,
    pub progress: ProgressSection,
}

impl RestoreConfig {
    pub fn pacing_config(&self) -> PacingConfig {
        PacingConfig {
            min_delay: Duration::from_secs_f64(self.pacing.min_delay_secs),
            max_delay: Duration::from_secs_f64(self.pacing.max_delay_secs),
            burst_size: self.pacing.burst_size,
            burst_rest: Duration::from_secs_f64(self.pacing.burst_rest_secs),
        }
    }

    pub fn classifier(&self) -> Classifier {
        Classifier::from_tables(
            &self.classify.fatal_run_codes,
            &self.classify.fatal_item_codes,
            &self.classify.rate_limit_codes,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialRestoreConfig {
    pacing: Option<PacingSection>,
    retry: Option<RetrySection>,
    dedup: Option<DedupSection>,
    monitor: Option<MonitorSection>,
    classify: Option<ClassifySection>,
    progress: Option<ProgressSection>,
}

fn env_or_f64(var: &str, fallback: f64) -> f64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<f64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u32(var: &str, fallback: u32) -> u32 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u32>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => {
            let trimmed = v.trim();
            match trimmed {
                "1" | "true" | "TRUE" | "yes" | "on" => true,
                "0" | "false" | "FALSE" | "no" | "off" => false,
                _ => fallback,
            }
        }
        Err(_) => fallback,
    }
}

fn env_or_csv_i64(var: &str, fallback: &[i64]) -> Vec<i64> {
    match env::var(var) {
        Ok(v) => {
            let out = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(|s| s.parse::<i64>().ok())
                .collect::<Vec<_>>();
            if out.is_empty() { fallback.to_vec() } else { out }
        }
        Err(_) => fallback.to_vec(),
    }
}

fn validate(cfg: &RestoreConfig) -> Result<()> {
    let min = cfg.pacing.min_delay_secs;
    let max = cfg.pacing.max_delay_secs;
    if !(min >= 0.0 && min.is_finite()) {
        return Err(anyhow!("invalid pacing min delay: must be >= 0"));
    }
    if !(max >= min && max.is_finite()) {
        return Err(anyhow!(
            "invalid pacing delays: require 0 <= min <= max"
        ));
    }
    if cfg.pacing.burst_size == 0 {
        return Err(anyhow!("invalid pacing burst size: must be >= 1"));
    }
    if !(cfg.pacing.burst_rest_secs >= 0.0 && cfg.pacing.burst_rest_secs.is_finite()) {
        return Err(anyhow!("invalid pacing burst rest: must be >= 0"));
    }
    if cfg.retry.max_attempts == 0 {
        return Err(anyhow!("invalid retry max attempts: must be >= 1"));
    }
    if cfg.retry.failure_threshold == 0 {
        return Err(anyhow!("invalid retry failure threshold: must be >= 1"));
    }
    if cfg.monitor.poll_interval_secs == 0 {
        return Err(anyhow!("invalid monitor poll interval: must be >= 1 second"));
    }
    if cfg.monitor.grace_period_secs == 0 {
        return Err(anyhow!("invalid monitor grace period: must be >= 1 second"));
    }
    if cfg.progress.buffer_capacity == 0 {
        return Err(anyhow!("invalid progress buffer capacity: must be >= 1"));
    }
    Ok(())
}

fn merge_file_config(base: &mut RestoreConfig, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: PartialRestoreConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse config {}: {err}", path.display()))?;
    if let Some(pacing) = parsed.pacing {
        base.pacing = pacing;
    }
    if let Some(retry) = parsed.retry {
        base.retry = retry;
    }
    if let Some(dedup) = parsed.dedup {
        base.dedup = dedup;
    }
    if let Some(monitor) = parsed.monitor {
        base.monitor = monitor;
    }
    if let Some(classify) = parsed.classify {
        base.classify = classify;
    }
    if let Some(progress) = parsed.progress {
        base.progress = progress;
    }
    Ok(())
}

pub fn load_config(config_file: &Path) -> Result<RestoreConfig> {
    let mut cfg = RestoreConfig::default();
    merge_file_config(&mut cfg, config_file)?;

    cfg.pacing.min_delay_secs = env_or_f64("DMR_MIN_DELAY_SECS", cfg.pacing.min_delay_secs);
    cfg.pacing.max_delay_secs = env_or_f64("DMR_MAX_DELAY_SECS", cfg.pacing.max_delay_secs);
    cfg.pacing.burst_size = env_or_u32("DMR_BURST_SIZE", cfg.pacing.burst_size);
    cfg.pacing.burst_rest_secs = env_or_f64("DMR_BURST_REST_SECS", cfg.pacing.burst_rest_secs);
    cfg.retry.max_attempts = env_or_u32("DMR_MAX_ATTEMPTS", cfg.retry.max_attempts);
    cfg.retry.failure_threshold =
        env_or_u32("DMR_FAILURE_THRESHOLD", cfg.retry.failure_threshold);
    cfg.retry.rate_limit_backoff_secs = env_or_u64(
        "DMR_RATE_LIMIT_BACKOFF_SECS",
        cfg.retry.rate_limit_backoff_secs,
    );
    cfg.dedup.enabled = env_or_bool("DMR_DEDUP_ENABLED", cfg.dedup.enabled);
    cfg.monitor.poll_interval_secs = env_or_u64(
        "DMR_MONITOR_POLL_INTERVAL_SECS",
        cfg.monitor.poll_interval_secs,
    );
    cfg.monitor.grace_period_secs =
        env_or_u64("DMR_MONITOR_GRACE_SECS", cfg.monitor.grace_period_secs);
    cfg.monitor.reverify = env_or_bool("DMR_MONITOR_REVERIFY", cfg.monitor.reverify);
    cfg.classify.fatal_run_codes =
        env_or_csv_i64("DMR_FATAL_RUN_CODES", &cfg.classify.fatal_run_codes);
    cfg.classify.fatal_item_codes =
        env_or_csv_i64("DMR_FATAL_ITEM_CODES", &cfg.classify.fatal_item_codes);
    cfg.classify.rate_limit_codes =
        env_or_csv_i64("DMR_RATE_LIMIT_CODES", &cfg.classify.rate_limit_codes);
    cfg.progress.buffer_capacity =
        env_or_usize("DMR_PROGRESS_BUFFER", cfg.progress.buffer_capacity);

    validate(&cfg)?;
    Ok(cfg)
}
