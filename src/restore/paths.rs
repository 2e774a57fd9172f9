use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct DmrPaths {
    pub dmr_home: PathBuf,
    pub ledger_file: PathBuf,
    pub logs_dir: PathBuf,
    pub config_file: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<DmrPaths> {
    let home = required_home_dir()?;
    let dmr_home = env_or_default_path("DMR_HOME", home.join(".danmaku-restore"));

    let ledger_file = env_or_default_path(
        "DMR_LEDGER_FILE",
        dmr_home.join("ledger").join("deliveries.jsonl"),
    );
    let logs_dir = env_or_default_path("DMR_LOGS_DIR", dmr_home.join("logs"));
    let config_file = env_or_default_path("DMR_CONFIG_PATH", dmr_home.join("config.toml"));

    Ok(DmrPaths {
        dmr_home,
        ledger_file,
        logs_dir,
        config_file,
    })
}
