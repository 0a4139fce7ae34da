use anyhow::Result;
use std::path::PathBuf;

const AUTHFLOW_DIR: &str = ".authflow";
const LOGS_DIR: &str = "logs";
const REPORTS_DIR: &str = "reports";
const SCREENSHOTS_DIR: &str = "screenshots";
const INDEX_FILE: &str = "rotate-index.json";
const CONFIG_FILE: &str = "config.toml";

/// Environment variable to override the authflow data directory.
const AUTHFLOW_DIR_ENV: &str = "AUTHFLOW_DIR";

/// Resolve the authflow data directory.
/// Priority: AUTHFLOW_DIR env var > ~/.authflow/
pub fn resolve_authflow_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(AUTHFLOW_DIR_ENV)
        && !dir.trim().is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|h| h.join(AUTHFLOW_DIR))
        .ok_or_else(|| anyhow::anyhow!("Failed to determine home directory"))
}

/// Ensure the data directory exists and return its path.
pub fn ensure_authflow_dir() -> Result<PathBuf> {
    let dir = resolve_authflow_dir()?;
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Get the logs directory: ~/.authflow/logs/
pub fn logs_dir() -> Result<PathBuf> {
    let dir = resolve_authflow_dir()?.join(LOGS_DIR);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Default report path for a run started now: ~/.authflow/reports/run-<ts>.json
pub fn default_report_path() -> Result<PathBuf> {
    let dir = resolve_authflow_dir()?.join(REPORTS_DIR);
    std::fs::create_dir_all(&dir)?;
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
    Ok(dir.join(format!("run-{}.json", stamp)))
}

/// Default screenshot directory: ~/.authflow/screenshots/
pub fn screenshots_dir() -> Result<PathBuf> {
    Ok(resolve_authflow_dir()?.join(SCREENSHOTS_DIR))
}

/// Default rotation index: ~/.authflow/rotate-index.json
pub fn default_index_path() -> Result<PathBuf> {
    Ok(resolve_authflow_dir()?.join(INDEX_FILE))
}

/// User config file: <config_dir>/authflow/config.toml
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("authflow").join(CONFIG_FILE))
}
