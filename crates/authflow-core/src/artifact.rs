//! Credential artifact verification.
//!
//! The console writes `codex-<sanitized-email>-<plan>.json` into its auth
//! directory once the token exchange completes. Files are matched by the
//! `email` they carry, so a stale plan suffix still verifies.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{AutomationError, Result};

pub const ARTIFACT_PREFIX: &str = "codex-";
pub const ARTIFACT_EXTENSION: &str = ".json";
const TOKEN_FIELDS: [&str; 3] = ["access_token", "refresh_token", "id_token"];

/// `@` becomes `_`; anything outside `[A-Za-z0-9._-]` becomes `_`.
pub fn sanitize_email(email: &str) -> String {
    email
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn artifact_file_name(email: &str, plan: &str) -> String {
    format!(
        "{}{}-{}{}",
        ARTIFACT_PREFIX,
        sanitize_email(email),
        sanitize_email(plan),
        ARTIFACT_EXTENSION
    )
}

pub fn is_artifact_name(name: &str) -> bool {
    name.starts_with(ARTIFACT_PREFIX) && name.ends_with(ARTIFACT_EXTENSION)
}

/// Artifact files for `email` judged by file name alone.
fn name_matches_email(name: &str, email: &str) -> bool {
    let stem = format!("{}{}-", ARTIFACT_PREFIX, sanitize_email(email)).to_lowercase();
    is_artifact_name(name) && name.to_lowercase().starts_with(&stem)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Probe {
    /// Matching file with at least one token field.
    Verified(PathBuf),
    /// Matching file, but no token field.
    Tokenless(PathBuf),
    Missing,
}

fn has_token(record: &Value) -> bool {
    TOKEN_FIELDS.iter().any(|field| {
        record
            .get(field)
            .and_then(Value::as_str)
            .is_some_and(|token| !token.is_empty())
    })
}

async fn modified_since(path: &Path, since: Option<SystemTime>) -> bool {
    let Some(since) = since else {
        return true;
    };
    match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => modified >= since,
        Err(_) => false,
    }
}

async fn probe_dir(dir: &Path, email: &str, since: Option<SystemTime>) -> Probe {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return Probe::Missing;
    };
    let mut result = Probe::Missing;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name_matches_email(&name, email) {
            continue;
        }
        let path = entry.path();
        if !modified_since(&path, since).await {
            continue;
        }
        // Partially written files parse as nothing and count as "not yet".
        let Ok(content) = tokio::fs::read_to_string(&path).await else {
            continue;
        };
        let Ok(record) = serde_json::from_str::<Value>(&content) else {
            continue;
        };
        let record_email = record.get("email").and_then(Value::as_str).unwrap_or_default();
        if !record_email.eq_ignore_ascii_case(email) {
            continue;
        }
        if has_token(&record) {
            return Probe::Verified(path);
        }
        result = Probe::Tokenless(path);
    }
    result
}

/// First existing artifact for `email` carrying a token, if any.
pub async fn find_existing(dir: &Path, email: &str) -> Option<PathBuf> {
    match probe_dir(dir, email, None).await {
        Probe::Verified(path) => Some(path),
        _ => None,
    }
}

pub struct ArtifactVerifier {
    auth_dir: PathBuf,
    interval: Duration,
    timeout: Duration,
}

impl ArtifactVerifier {
    pub fn new(auth_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            auth_dir: auth_dir.into(),
            interval: Duration::from_secs(1),
            timeout,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn auth_dir(&self) -> &Path {
        &self.auth_dir
    }

    /// Wait for the console to write the artifact for `email`.
    ///
    /// With `since`, files last modified before it are ignored so a stale
    /// artifact from an earlier run cannot verify a failed attempt.
    pub async fn wait_for(&self, email: &str, since: Option<SystemTime>) -> Result<PathBuf> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let probe = probe_dir(&self.auth_dir, email, since).await;
            if let Probe::Verified(path) = probe {
                info!(file = %path.display(), "Credential artifact verified");
                return Ok(path);
            }
            if Instant::now() + self.interval > deadline {
                return match probe {
                    Probe::Tokenless(path) => {
                        debug!(file = %path.display(), "Artifact carries no token");
                        Err(AutomationError::TokenNotFound(path.display().to_string()))
                    }
                    _ => Err(AutomationError::WriteFailed(format!(
                        "{} (in {})",
                        crate::models::redact_email(email),
                        self.auth_dir.display()
                    ))),
                };
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
