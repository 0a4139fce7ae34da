use anyhow::{Context, Result, bail};
use authflow_browser::{BrowserOptions, BrowserService, LaunchOptions};
use authflow_core::accounts::load_accounts;
use authflow_core::console::CpamcConsole;
use authflow_core::flow::ProviderFlowDriver;
use authflow_core::models::mask_secret;
use authflow_core::orchestrator::{BatchObserver, BatchOrchestrator, NoopObserver, write_report};
use authflow_core::surface::cdp::CdpSurfaceFactory;
use authflow_core::{AccountCredential, AuthResult, AuthStatus, AutomationConfig, RunReport, paths};
use colored::Colorize;
use comfy_table::Cell;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::commands::print_rejected;
use crate::config::{apply_console_overrides, load_config, resolve_secret_key};
use crate::output::{OutputFormat, json::print_json, table};

pub async fn run(args: RunArgs, config_path: Option<&Path>, format: OutputFormat) -> Result<()> {
    let mut config = load_config(config_path)?;
    apply_run_overrides(&mut config, &args)?;
    config.validate()?;
    let secret_key = resolve_secret_key(args.console.secret_key.as_deref(), &config)?;

    let batch = load_accounts(&args.accounts, &config.run.default_plan)
        .await
        .with_context(|| format!("Failed to read {}", args.accounts.display()))?;
    if !format.is_json() {
        print_rejected(&batch);
    }
    if batch.accounts.is_empty() {
        bail!("No valid accounts in {}", args.accounts.display());
    }

    let report_path = match args.report.clone().or_else(|| config.paths.report_path.clone()) {
        Some(path) => path,
        None => paths::default_report_path()?,
    };

    info!(
        console = %config.console.base_url,
        key = %mask_secret(&secret_key),
        accounts = batch.accounts.len(),
        report = %report_path.display(),
        "Starting run"
    );
    let config = Arc::new(config);
    let browser = Arc::new(BrowserService::new(browser_options(&config)));
    let surfaces = Arc::new(CdpSurfaceFactory::new(
        browser.clone(),
        config.timeouts.navigation(),
    ));
    let console = Arc::new(CpamcConsole::new(config.clone())?);
    let flow = Arc::new(ProviderFlowDriver::new(config.clone())?);
    let orchestrator = BatchOrchestrator::new(config.clone(), surfaces, console, flow, secret_key);

    let report = if format.is_json() {
        orchestrator.run(&batch.accounts, &NoopObserver).await
    } else {
        println!(
            "Processing {} account(s) via {}",
            batch.accounts.len().min(config.run.limit.unwrap_or(usize::MAX)),
            config.console.base_url
        );
        orchestrator.run(&batch.accounts, &ProgressPrinter).await
    };

    if let Err(e) = browser.shutdown().await {
        warn!(error = %e, "Browser shutdown failed");
    }

    let written = write_report(&report_path, &report).await?;
    if format.is_json() {
        return print_json(&report);
    }
    print_summary(&report)?;
    println!("Report written to {}", written.display());
    Ok(())
}

fn apply_run_overrides(config: &mut AutomationConfig, args: &RunArgs) -> Result<()> {
    apply_console_overrides(config, &args.console);
    if let Some(plan) = args.plan.as_deref().filter(|p| !p.trim().is_empty()) {
        config.run.default_plan = plan.trim().to_string();
    }
    if args.limit.is_some() {
        config.run.limit = args.limit;
    }
    if args.skip_existing {
        config.run.skip_existing = true;
    }
    if args.headless {
        config.browser.headless = true;
    }
    if args.headed {
        config.browser.headless = false;
    }
    if let Some(cdp_url) = &args.cdp_url {
        config.browser.cdp_url = Some(cdp_url.clone());
    }
    if args.screenshots && config.paths.screenshot_dir.is_none() {
        config.paths.screenshot_dir = Some(paths::screenshots_dir()?);
    }
    Ok(())
}

pub(crate) fn browser_options(config: &AutomationConfig) -> BrowserOptions {
    BrowserOptions {
        launch: LaunchOptions {
            executable: config.browser.executable.clone(),
            headless: config.browser.headless,
            extra_args: config.browser.args.clone(),
            ..LaunchOptions::default()
        },
        cdp_url: config.browser.cdp_url.clone(),
    }
}

/// Per-account progress lines on stdout. Emails are always redacted.
struct ProgressPrinter;

impl BatchObserver for ProgressPrinter {
    fn on_account_start(&self, position: usize, total: usize, account: &AccountCredential) {
        println!(
            "{} {}",
            format!("[{}/{}]", position + 1, total).dimmed(),
            account.redacted_email()
        );
    }

    fn on_account_done(&self, _position: usize, _total: usize, result: &AuthResult) {
        match result.status {
            AuthStatus::Success => println!(
                "      {} {}",
                "success".green().bold(),
                result.file.as_deref().unwrap_or_default()
            ),
            AuthStatus::Skipped => println!(
                "      {} {}",
                "skipped".yellow(),
                result.message.as_deref().unwrap_or_default()
            ),
            AuthStatus::Failed => println!(
                "      {} {} {}",
                "failed".red().bold(),
                result
                    .code
                    .map(|code| code.to_string())
                    .unwrap_or_default()
                    .red(),
                result.message.as_deref().unwrap_or_default()
            ),
        }
    }
}

fn print_summary(report: &RunReport) -> Result<()> {
    let mut summary = table::with_header(&["Total", "Success", "Failed", "Skipped"]);
    summary.add_row(vec![
        Cell::new(report.total),
        Cell::new(report.success),
        Cell::new(report.failed),
        Cell::new(report.skipped),
    ]);
    table::print_table(summary)?;

    let mut failures: Vec<_> = report.failures_by_code().into_iter().collect();
    if failures.is_empty() {
        return Ok(());
    }
    failures.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.to_string().cmp(&b.0.to_string())));
    let mut by_code = table::with_header(&["Failure", "Count"]);
    for (code, count) in failures {
        by_code.add_row(vec![Cell::new(code), Cell::new(count)]);
    }
    table::print_table(by_code)
}
