use anyhow::{Context, Result};
use authflow_core::accounts::load_accounts;
use comfy_table::Cell;
use serde_json::json;
use std::path::Path;

use crate::cli::AccountsArgs;
use crate::commands::print_rejected;
use crate::config::load_config;
use crate::output::{OutputFormat, json::print_json, table};

pub async fn run(
    args: AccountsArgs,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let config = load_config(config_path)?;
    let plan = args
        .plan
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or(&config.run.default_plan);

    let batch = load_accounts(&args.accounts, plan)
        .await
        .with_context(|| format!("Failed to read {}", args.accounts.display()))?;

    if format.is_json() {
        let accounts: Vec<_> = batch
            .accounts
            .iter()
            .map(|account| {
                json!({
                    "email": account.redacted_email(),
                    "plan": account.plan,
                    "has_password": !account.password.is_empty(),
                })
            })
            .collect();
        let rejected: Vec<_> = batch
            .rejected
            .iter()
            .map(|entry| json!({ "position": entry.position, "reason": entry.reason }))
            .collect();
        return print_json(&json!({
            "total": batch.accounts.len(),
            "duplicates": batch.duplicates,
            "accounts": accounts,
            "rejected": rejected,
        }));
    }

    print_rejected(&batch);
    let mut listing = table::with_header(&["#", "Email", "Plan", "Password"]);
    for (n, account) in batch.accounts.iter().enumerate() {
        let password = if account.password.is_empty() {
            "(empty)"
        } else {
            "********"
        };
        listing.add_row(vec![
            Cell::new(n + 1),
            Cell::new(account.redacted_email()),
            Cell::new(&account.plan),
            Cell::new(password),
        ]);
    }
    table::print_table(listing)?;
    println!("{} account(s) ready", batch.accounts.len());
    Ok(())
}
