//! CLI configuration loading
//!
//! Reads `AutomationConfig` from `--config` or ~/.config/authflow/config.toml
//! and layers command-line and environment overrides on top.

use anyhow::{Context, Result, bail};
use authflow_core::{AutomationConfig, paths};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use crate::cli::ConsoleArgs;

/// Load the configuration.
///
/// An explicit path must exist; the default location is optional.
pub fn load_config(path: Option<&Path>) -> Result<AutomationConfig> {
    let config = match path {
        Some(path) => {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            AutomationConfig::load_from_path(path)
                .with_context(|| format!("Failed to load {}", path.display()))?
        }
        None => match paths::default_config_path() {
            Some(path) => AutomationConfig::load_from_path(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => AutomationConfig::default(),
        },
    };
    Ok(config)
}

/// Location `load_config(None)` reads from.
pub fn config_location() -> Option<PathBuf> {
    paths::default_config_path()
}

pub fn apply_console_overrides(config: &mut AutomationConfig, args: &ConsoleArgs) {
    if let Some(url) = args.console_url.as_deref().filter(|u| !u.trim().is_empty()) {
        config.console.base_url = url.trim().to_string();
    }
    if let Some(dir) = &args.auth_dir {
        config.paths.auth_dir = dir.clone();
    }
}

/// Resolve the management secret key.
/// Priority: flag/env > config file > interactive prompt.
pub fn resolve_secret_key(flag: Option<&str>, config: &AutomationConfig) -> Result<String> {
    let configured = flag
        .or(config.console.secret_key.as_deref())
        .map(str::trim)
        .filter(|key| !key.is_empty());
    if let Some(key) = configured {
        return Ok(key.to_string());
    }

    if std::io::stdin().is_terminal() {
        let key = rpassword::prompt_password("Management secret key: ")
            .context("Failed to read secret key")?;
        let key = key.trim();
        if !key.is_empty() {
            return Ok(key.to_string());
        }
    }
    bail!("Management secret key is required (use --secret-key or AUTHFLOW_SECRET_KEY)")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn explicit_config_must_exist() {
        let temp = tempdir().unwrap();
        let err = load_config(Some(temp.path().join("missing.toml").as_path())).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn loads_explicit_config() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            "[console]\nbase_url = \"http://10.0.0.2:8317\"\nsecret_key = \"from-file\"\n",
        )
        .unwrap();

        let config = load_config(Some(path.as_path())).unwrap();
        assert_eq!(config.console.base_url, "http://10.0.0.2:8317");
        assert_eq!(config.console.secret_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn console_overrides_replace_file_values() {
        let mut config = AutomationConfig::default();
        let args = ConsoleArgs {
            console_url: Some(" http://console:9000 ".to_string()),
            secret_key: None,
            auth_dir: Some(PathBuf::from("/tmp/auths")),
        };
        apply_console_overrides(&mut config, &args);
        assert_eq!(config.console.base_url, "http://console:9000");
        assert_eq!(config.paths.auth_dir, PathBuf::from("/tmp/auths"));

        let before = config.console.base_url.clone();
        apply_console_overrides(
            &mut config,
            &ConsoleArgs {
                console_url: Some("  ".to_string()),
                ..ConsoleArgs::default()
            },
        );
        assert_eq!(config.console.base_url, before);
    }

    #[test]
    fn flag_secret_wins_over_config() {
        let mut config = AutomationConfig::default();
        config.console.secret_key = Some("from-file".to_string());
        assert_eq!(resolve_secret_key(Some("flag"), &config).unwrap(), "flag");
        assert_eq!(resolve_secret_key(None, &config).unwrap(), "from-file");
    }
}
