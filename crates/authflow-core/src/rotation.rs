//! Rotation index.
//!
//! Scans the console's auth directory, classifies every credential artifact
//! and merges the result into a durable index. Merging is never subtractive:
//! entries for artifacts that disappeared stay in the index.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::artifact::{ARTIFACT_EXTENSION, ARTIFACT_PREFIX, is_artifact_name};
use crate::error::{AutomationError, Result};
use crate::models::{RotateAccountEntry, RotateIndex, RotateStatus};

/// Epoch values above this are taken as milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub email: Option<String>,
    pub expired: Option<String>,
    pub status: RotateStatus,
}

fn parse_expiry(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.trim().parse::<i64>().ok().and_then(from_epoch)),
        Value::Number(n) => n.as_i64().and_then(from_epoch),
        _ => None,
    }
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value > EPOCH_MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(value).single()
    } else {
        Utc.timestamp_opt(value, 0).single()
    }
}

fn is_disabled(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
        _ => false,
    }
}

/// Disabled wins; else an `expired` in the past; else active. Content that
/// is not a JSON object is invalid.
pub fn classify_artifact(content: &str, now: DateTime<Utc>) -> Classification {
    let record = match serde_json::from_str::<Value>(content) {
        Ok(value @ Value::Object(_)) => value,
        _ => {
            return Classification {
                email: None,
                expired: None,
                status: RotateStatus::Invalid,
            };
        }
    };

    let email = record
        .get("email")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string);
    let expired_raw = record.get("expired").filter(|v| !v.is_null());
    let expired = expired_raw.map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    });

    let status = if is_disabled(record.get("disabled")) {
        RotateStatus::Disabled
    } else if expired_raw
        .and_then(parse_expiry)
        .is_some_and(|at| at <= now)
    {
        RotateStatus::Expired
    } else {
        RotateStatus::Active
    };

    Classification {
        email,
        expired,
        status,
    }
}

/// Best-effort email from `codex-<sanitized>-<plan>.json`; the last `_` is
/// taken as the `@`.
pub fn email_from_file_name(name: &str) -> Option<String> {
    let stem = name
        .strip_prefix(ARTIFACT_PREFIX)?
        .strip_suffix(ARTIFACT_EXTENSION)?;
    let (sanitized, _plan) = stem.rsplit_once('-')?;
    let (local, domain) = sanitized.rsplit_once('_')?;
    if local.is_empty() || domain.is_empty() {
        return None;
    }
    Some(format!("{}@{}", local, domain))
}

/// Classify every artifact in `dir`. A missing directory yields an empty
/// index.
pub async fn scan(dir: &Path) -> Result<RotateIndex> {
    let now = Utc::now();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(dir = %dir.display(), "Auth directory does not exist");
            return Ok(RotateIndex::empty());
        }
        Err(e) => return Err(e.into()),
    };

    let mut files: Vec<(String, PathBuf)> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_artifact_name(&name) && entry.file_type().await?.is_file() {
            files.push((name, entry.path()));
        }
    }
    files.sort();

    let mut accounts = Vec::with_capacity(files.len());
    for (name, path) in files {
        let classification = match tokio::fs::read_to_string(&path).await {
            Ok(content) => classify_artifact(&content, now),
            Err(e) => {
                debug!(file = %path.display(), error = %e, "Unreadable artifact");
                Classification {
                    email: None,
                    expired: None,
                    status: RotateStatus::Invalid,
                }
            }
        };
        let email = classification
            .email
            .or_else(|| email_from_file_name(&name))
            .unwrap_or_default();
        accounts.push(RotateAccountEntry {
            email,
            file: path.display().to_string(),
            expired: classification.expired,
            status: classification.status,
        });
    }

    let index = RotateIndex::from_entries(accounts);
    info!(
        dir = %dir.display(),
        total = index.total,
        active = index.active,
        expired = index.expired,
        disabled = index.disabled,
        invalid = index.invalid,
        "Scanned credential artifacts"
    );
    Ok(index)
}

/// Load a prior index; a missing or corrupt file counts as empty.
pub async fn load_index(path: &Path) -> RotateIndex {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => match serde_json::from_str::<RotateIndex>(&content) {
            Ok(index) => index,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt rotation index");
                RotateIndex::empty()
            }
        },
        Err(_) => RotateIndex::empty(),
    }
}

/// Union of `prior` and `fresh` by entry key, fresh entries winning, ordered
/// by key. Counts are recomputed.
///
/// An invalid artifact has no readable email, so its fresh entry carries one
/// guessed from the file name. When the prior index already lists that file,
/// the recorded email is kept so the entry replaces its earlier self.
pub fn merge_entries(prior: RotateIndex, fresh: &RotateIndex) -> RotateIndex {
    let mut known: HashMap<String, String> = HashMap::new();
    for entry in &prior.accounts {
        if !entry.email.is_empty() {
            known.insert(basename_key(&entry.file), entry.email.clone());
        }
    }

    let mut by_key: BTreeMap<String, RotateAccountEntry> = BTreeMap::new();
    for entry in prior.accounts {
        by_key.insert(entry.key(), entry);
    }
    for entry in &fresh.accounts {
        let mut entry = entry.clone();
        if entry.status == RotateStatus::Invalid
            && let Some(email) = known.get(&basename_key(&entry.file))
        {
            entry.email = email.clone();
        }
        by_key.insert(entry.key(), entry);
    }
    RotateIndex::from_entries(by_key.into_values().collect())
}

fn basename_key(file: &str) -> String {
    Path::new(file)
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| file.to_lowercase())
}

/// Merge `fresh` into the index at `existing_path` and write it back
/// atomically.
pub async fn merge(existing_path: &Path, fresh: &RotateIndex) -> Result<RotateIndex> {
    let prior = load_index(existing_path).await;
    let merged = merge_entries(prior, fresh);
    write_index(existing_path, &merged).await?;
    Ok(merged)
}

/// Scan `auth_dir` and merge into `index_path`.
pub async fn rebuild(auth_dir: &Path, index_path: &Path) -> Result<RotateIndex> {
    let fresh = scan(auth_dir).await?;
    merge(index_path, &fresh).await
}

async fn write_index(path: &Path, index: &RotateIndex) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    tokio::fs::create_dir_all(&parent).await?;

    let json = serde_json::to_vec_pretty(index)?;
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut temp = tempfile::NamedTempFile::new_in(&parent)?;
        temp.write_all(&json)?;
        temp.as_file().sync_all()?;
        temp.persist(&target).map_err(|e| AutomationError::Io(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| AutomationError::Io(std::io::Error::other(e)))??;
    Ok(())
}
