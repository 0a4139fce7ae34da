use anyhow::Result;
use authflow_browser::{BrowserRuntime, BrowserService};
use colored::Colorize;
use std::path::Path;

use crate::cli::ProbeArgs;
use crate::commands::run::browser_options;
use crate::config::load_config;
use crate::output::{OutputFormat, json::print_json};

pub async fn run(args: ProbeArgs, config_path: Option<&Path>, format: OutputFormat) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(cdp_url) = args.cdp_url {
        config.browser.cdp_url = Some(cdp_url);
    }

    let service = BrowserService::new(browser_options(&config));
    let probe = service.probe_runtime().await?;

    if format.is_json() {
        return print_json(&probe);
    }

    let state = if probe.ready {
        "ready".green().bold()
    } else {
        "unavailable".red().bold()
    };
    println!("Browser runtime: {}", state);
    if let Some(path) = &probe.chromium_path {
        println!("  Chromium:  {}", path);
    }
    if let Some(endpoint) = &probe.cdp_endpoint {
        println!("  DevTools:  {}", endpoint);
    }
    println!("  Headless:  {}", config.browser.headless);
    for note in &probe.notes {
        println!("  {} {}", "note:".yellow(), note);
    }
    Ok(())
}
