pub mod accounts;
pub mod config;
pub mod probe;
pub mod rotate;
pub mod run;

use authflow_core::accounts::AccountBatch;
use colored::Colorize;

/// Warn about entries the normalizer dropped.
pub(crate) fn print_rejected(batch: &AccountBatch) {
    for entry in &batch.rejected {
        eprintln!(
            "{} entry {} skipped: {}",
            "Warning:".yellow().bold(),
            entry.position,
            entry.reason
        );
    }
    if batch.duplicates > 0 {
        eprintln!(
            "{} {} duplicate account(s) ignored",
            "Warning:".yellow().bold(),
            batch.duplicates
        );
    }
}
