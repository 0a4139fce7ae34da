use anyhow::{Context, Result};
use authflow_core::models::redact_email;
use authflow_core::{RotateStatus, paths, rotation};
use colored::Colorize;
use comfy_table::Cell;
use std::path::Path;

use crate::cli::RotateArgs;
use crate::config::load_config;
use crate::output::{OutputFormat, json::print_json, table};

pub async fn run(args: RotateArgs, config_path: Option<&Path>, format: OutputFormat) -> Result<()> {
    let config = load_config(config_path)?;
    let auth_dir = args.auth_dir.unwrap_or(config.paths.auth_dir);
    let index_path = match args.index.or(config.paths.index_path) {
        Some(path) => path,
        None => paths::default_index_path()?,
    };

    let index = rotation::rebuild(&auth_dir, &index_path)
        .await
        .with_context(|| format!("Failed to rebuild index from {}", auth_dir.display()))?;

    if format.is_json() {
        return print_json(&index);
    }

    let mut counts = table::with_header(&["Total", "Active", "Expired", "Disabled", "Invalid"]);
    counts.add_row(vec![
        Cell::new(index.total),
        Cell::new(index.active),
        Cell::new(index.expired),
        Cell::new(index.disabled),
        Cell::new(index.invalid),
    ]);
    table::print_table(counts)?;

    if args.list {
        let mut entries = table::with_header(&["Email", "Status", "Expires", "File"]);
        for entry in &index.accounts {
            entries.add_row(vec![
                Cell::new(redact_email(&entry.email)),
                Cell::new(status_label(entry.status)),
                Cell::new(entry.expired.as_deref().unwrap_or("-")),
                Cell::new(&entry.file),
            ]);
        }
        table::print_table(entries)?;
    }

    println!("Index written to {}", index_path.display());
    Ok(())
}

fn status_label(status: RotateStatus) -> String {
    let label = status.to_string();
    match status {
        RotateStatus::Active => label.green().to_string(),
        RotateStatus::Expired => label.yellow().to_string(),
        RotateStatus::Disabled | RotateStatus::Invalid => label.red().to_string(),
    }
}
