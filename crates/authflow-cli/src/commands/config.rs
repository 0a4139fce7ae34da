use anyhow::{Result, anyhow};
use std::path::Path;

use crate::cli::ConfigCommands;
use crate::config::{config_location, load_config};
use crate::output::{OutputFormat, json::print_json};

pub fn run(
    command: ConfigCommands,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    match command {
        ConfigCommands::Show => show(config_path, format),
        ConfigCommands::Path => path(config_path, format),
    }
}

fn show(config_path: Option<&Path>, format: OutputFormat) -> Result<()> {
    let config = load_config(config_path)?;
    if format.is_json() {
        return print_json(&config);
    }
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn path(config_path: Option<&Path>, format: OutputFormat) -> Result<()> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => config_location().ok_or_else(|| anyhow!("Failed to determine config directory"))?,
    };
    if format.is_json() {
        return print_json(&serde_json::json!({
            "path": path.display().to_string(),
            "exists": path.exists(),
        }));
    }
    println!("{}", path.display());
    Ok(())
}
