//! Core types: accounts, per-account results, run report and the rotation
//! index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::FailureCode;

pub const RUN_MODE: &str = "cpamc";

/// One account to authorize. Immutable once handed to the orchestrator.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCredential {
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub plan: String,
}

impl AccountCredential {
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        plan: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into().trim().to_string(),
            password: password.into(),
            plan: plan.into(),
        }
    }

    pub fn redacted_email(&self) -> String {
        redact_email(&self.email)
    }
}

impl std::fmt::Debug for AccountCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountCredential")
            .field("email", &redact_email(&self.email))
            .field("password", &"***")
            .field("plan", &self.plan)
            .finish()
    }
}

/// Mask the local part of an email, keeping a short prefix and the domain.
pub fn redact_email(email: &str) -> String {
    let Some((local, domain)) = email.split_once('@') else {
        return "***".to_string();
    };
    let keep = if local.chars().count() <= 2 { 1 } else { 2 };
    let prefix: String = local.chars().take(keep).collect();
    format!("{}***@{}", prefix, domain)
}

/// Stand-in for a secret in logs. No character of the value is kept.
pub fn mask_secret(value: &str) -> String {
    if value.is_empty() {
        "(empty)".to_string()
    } else {
        "****".to_string()
    }
}

/// Ephemeral state of one account's attempt.
#[derive(Debug, Clone)]
pub struct AuthAttempt {
    pub correlation_token: Option<String>,
    pub started_at: DateTime<Utc>,
    pub final_url: String,
    pub challenge_detected: bool,
    pub invalid_credentials: bool,
    pub callback_url: Option<String>,
}

impl AuthAttempt {
    pub fn begin() -> Self {
        Self {
            correlation_token: None,
            started_at: Utc::now(),
            final_url: String::new(),
            challenge_detected: false,
            invalid_credentials: false,
            callback_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    Success,
    Failed,
    Skipped,
}

impl std::fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthStatus::Success => write!(f, "success"),
            AuthStatus::Failed => write!(f, "failed"),
            AuthStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Outcome recorded for exactly one input account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResult {
    pub email: String,
    pub plan: String,
    pub status: AuthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<FailureCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl AuthResult {
    pub fn success(account: &AccountCredential, file: String, started_at: DateTime<Utc>) -> Self {
        Self {
            email: account.email.clone(),
            plan: account.plan.clone(),
            status: AuthStatus::Success,
            code: None,
            message: None,
            file: Some(file),
            started_at,
            ended_at: Utc::now(),
        }
    }

    pub fn failed(
        account: &AccountCredential,
        code: FailureCode,
        message: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            email: account.email.clone(),
            plan: account.plan.clone(),
            status: AuthStatus::Failed,
            code: Some(code),
            message: Some(message.into()),
            file: None,
            started_at,
            ended_at: Utc::now(),
        }
    }

    pub fn skipped(
        account: &AccountCredential,
        message: impl Into<String>,
        file: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            email: account.email.clone(),
            plan: account.plan.clone(),
            status: AuthStatus::Skipped,
            code: None,
            message: Some(message.into()),
            file,
            started_at: now,
            ended_at: now,
        }
    }
}

/// Structured report of one batch invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub mode: String,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cpamc_base_url: String,
    pub auth_dir: String,
    pub results: Vec<AuthResult>,
}

impl RunReport {
    pub fn new(results: Vec<AuthResult>, cpamc_base_url: &str, auth_dir: &str) -> Self {
        let count = |status: AuthStatus| results.iter().filter(|r| r.status == status).count();
        Self {
            generated_at: Utc::now(),
            mode: RUN_MODE.to_string(),
            total: results.len(),
            success: count(AuthStatus::Success),
            failed: count(AuthStatus::Failed),
            skipped: count(AuthStatus::Skipped),
            cpamc_base_url: cpamc_base_url.to_string(),
            auth_dir: auth_dir.to_string(),
            results,
        }
    }

    /// Failure counts keyed by code, for summaries.
    pub fn failures_by_code(&self) -> HashMap<FailureCode, usize> {
        let mut counts = HashMap::new();
        for code in self.results.iter().filter_map(|r| r.code) {
            *counts.entry(code).or_insert(0) += 1;
        }
        counts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotateStatus {
    Active,
    Expired,
    Disabled,
    Invalid,
}

impl std::fmt::Display for RotateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RotateStatus::Active => write!(f, "active"),
            RotateStatus::Expired => write!(f, "expired"),
            RotateStatus::Disabled => write!(f, "disabled"),
            RotateStatus::Invalid => write!(f, "invalid"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotateAccountEntry {
    pub email: String,
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired: Option<String>,
    pub status: RotateStatus,
}

impl RotateAccountEntry {
    /// `lower(email) | lower(basename(file))`
    pub fn key(&self) -> String {
        let basename = std::path::Path::new(&self.file)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file.clone());
        format!("{}|{}", self.email.to_lowercase(), basename.to_lowercase())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotateIndex {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub active: usize,
    pub expired: usize,
    pub disabled: usize,
    pub invalid: usize,
    pub accounts: Vec<RotateAccountEntry>,
}

impl RotateIndex {
    /// Build an index whose counts are derived from `accounts`.
    pub fn from_entries(accounts: Vec<RotateAccountEntry>) -> Self {
        let count = |status: RotateStatus| accounts.iter().filter(|a| a.status == status).count();
        Self {
            generated_at: Utc::now(),
            total: accounts.len(),
            active: count(RotateStatus::Active),
            expired: count(RotateStatus::Expired),
            disabled: count(RotateStatus::Disabled),
            invalid: count(RotateStatus::Invalid),
            accounts,
        }
    }

    pub fn empty() -> Self {
        Self::from_entries(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(email: &str, file: &str, status: RotateStatus) -> RotateAccountEntry {
        RotateAccountEntry {
            email: email.to_string(),
            file: file.to_string(),
            expired: None,
            status,
        }
    }

    #[test]
    fn redacts_email_local_part() {
        assert_eq!(redact_email("alice@example.com"), "al***@example.com");
        assert_eq!(redact_email("ab@x.com"), "a***@x.com");
        assert_eq!(redact_email("not-an-email"), "***");
    }

    #[test]
    fn debug_never_prints_password() {
        let account = AccountCredential::new("alice@example.com", "hunter2", "free");
        let debug = format!("{:?}", account);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("alice@"));
        let json = serde_json::to_string(&account).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn masks_secrets() {
        for key in ["short", "mgmt-key1", "sk-abcdefghijkl"] {
            let masked = mask_secret(key);
            assert_eq!(masked, "****");
            assert!(!key.chars().any(|c| c != '*' && masked.contains(c)));
        }
        assert_eq!(mask_secret(""), "(empty)");
    }

    #[test]
    fn rotate_index_counts_partition_accounts() {
        let index = RotateIndex::from_entries(vec![
            entry("a@x.com", "codex-a_x.com-free.json", RotateStatus::Active),
            entry("b@x.com", "codex-b_x.com-free.json", RotateStatus::Expired),
            entry("c@x.com", "codex-c_x.com-plus.json", RotateStatus::Disabled),
            entry("", "codex-broken-free.json", RotateStatus::Invalid),
            entry("d@x.com", "codex-d_x.com-free.json", RotateStatus::Active),
        ]);
        assert_eq!(index.total, 5);
        assert_eq!(index.active, 2);
        assert_eq!(
            index.active + index.expired + index.disabled + index.invalid,
            index.total
        );
    }

    #[test]
    fn entry_key_uses_lowercased_basename() {
        let a = entry("B@X.com", "/auth/Codex-B_x.com-free.json", RotateStatus::Active);
        let b = entry("b@x.com", "codex-b_x.com-free.json", RotateStatus::Expired);
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key(), "b@x.com|codex-b_x.com-free.json");
    }

    #[test]
    fn report_counts_by_status() {
        let account = AccountCredential::new("a@x.com", "p1", "free");
        let started = Utc::now();
        let report = RunReport::new(
            vec![
                AuthResult::success(&account, "/auth/codex-a_x.com-free.json".into(), started),
                AuthResult::failed(&account, FailureCode::ChallengeRequired, "challenge", started),
                AuthResult::skipped(&account, "artifact exists", None),
            ],
            "http://127.0.0.1:8317",
            "/auth",
        );
        assert_eq!(report.mode, "cpamc");
        assert_eq!((report.total, report.success, report.failed, report.skipped), (3, 1, 1, 1));
        assert_eq!(report.failures_by_code()[&FailureCode::ChallengeRequired], 1);
    }
}
