//! Account list normalization.
//!
//! Accepts JSON (an array of objects or `{"accounts": [...]}`) or a
//! line-oriented list in any of the common export shapes:
//!
//! ```text
//! a@x.com----secret----plus
//! a@x.com|secret|plus
//! a@x.com<TAB>secret
//! a@x.com:secret
//! - a@x.com----secret
//! | a@x.com | secret | plus |
//! ```

use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::error::{AutomationError, Result};
use crate::models::AccountCredential;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("Invalid regex"));

static LIST_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[-*+]|\d+[.)])\s+").expect("Invalid regex"));

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEntry {
    /// 1-based line number, or entry index for JSON input.
    pub position: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct AccountBatch {
    pub accounts: Vec<AccountCredential>,
    pub rejected: Vec<RejectedEntry>,
    pub duplicates: usize,
}

#[derive(Debug, Deserialize)]
struct JsonAccount {
    #[serde(alias = "username", alias = "account")]
    email: String,
    #[serde(default, alias = "pass", alias = "pwd")]
    password: String,
    #[serde(default, alias = "type", alias = "tier")]
    plan: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonAccounts {
    List(Vec<JsonAccount>),
    Wrapped { accounts: Vec<JsonAccount> },
}

/// Read and normalize an account file.
pub async fn load_accounts(path: &Path, default_plan: &str) -> Result<AccountBatch> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        AutomationError::InvalidInput(format!("cannot read {}: {}", path.display(), e))
    })?;
    let batch = parse_accounts(&content, default_plan)?;
    debug!(
        path = %path.display(),
        accounts = batch.accounts.len(),
        rejected = batch.rejected.len(),
        duplicates = batch.duplicates,
        "Loaded account list"
    );
    Ok(batch)
}

/// Normalize raw account text. The first occurrence of an email wins.
///
/// Passwords are kept exactly as written, surrounding spaces included,
/// except in `|`-separated rows where cells are padded by convention.
pub fn parse_accounts(content: &str, default_plan: &str) -> Result<AccountBatch> {
    let body = content.trim_start_matches('\u{feff}');
    let head = body.trim_start();
    let raw = if head.starts_with('[') || head.starts_with('{') {
        parse_json(body.trim())?
    } else {
        parse_lines(body)
    };

    let mut batch = AccountBatch::default();
    let mut seen = HashSet::new();
    for (position, entry) in raw {
        let (email, password, plan) = match entry {
            Ok(fields) => fields,
            Err(reason) => {
                batch.rejected.push(RejectedEntry { position, reason });
                continue;
            }
        };
        let email = email.trim().to_string();
        if !is_valid_email(&email) {
            warn!(position, "Rejected account entry with malformed email");
            batch.rejected.push(RejectedEntry {
                position,
                reason: "malformed email".to_string(),
            });
            continue;
        }
        if !seen.insert(email.to_lowercase()) {
            batch.duplicates += 1;
            continue;
        }
        let plan = plan
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| default_plan.to_string());
        batch
            .accounts
            .push(AccountCredential::new(email, password, plan));
    }
    Ok(batch)
}

type RawEntry = (usize, std::result::Result<(String, String, Option<String>), String>);

fn parse_json(content: &str) -> Result<Vec<RawEntry>> {
    let parsed: JsonAccounts = serde_json::from_str(content)
        .map_err(|e| AutomationError::InvalidInput(format!("account JSON: {}", e)))?;
    let list = match parsed {
        JsonAccounts::List(list) | JsonAccounts::Wrapped { accounts: list } => list,
    };
    Ok(list
        .into_iter()
        .enumerate()
        .map(|(i, a)| (i + 1, Ok((a.email, a.password, a.plan))))
        .collect())
}

fn parse_lines(content: &str) -> Vec<RawEntry> {
    content
        .lines()
        .enumerate()
        .filter_map(|(i, line)| parse_line(line).map(|entry| (i + 1, entry)))
        .collect()
}

/// `None` for lines that carry no account at all (blank, comment, headers).
fn parse_line(line: &str) -> Option<std::result::Result<(String, String, Option<String>), String>> {
    let line = line.trim_start();
    if line.trim_end().is_empty() || line.starts_with('#') || line.starts_with("//") {
        return None;
    }
    let line = LIST_MARKER_RE.replace(line, "");
    let line: &str = &line;

    let fields: Vec<String> = if line.starts_with('|') {
        let row = line.trim_end();
        if row.chars().all(|c| matches!(c, '|' | '-' | ':' | ' ')) {
            return None;
        }
        row.trim_matches('|')
            .split('|')
            .map(|cell| cell.trim().trim_matches('`').to_string())
            .collect()
    } else if line.contains("----") {
        line.split("----").map(str::to_string).collect()
    } else if line.contains('|') {
        line.split('|').map(|f| f.trim().to_string()).collect()
    } else if line.contains('\t') {
        line.split('\t').map(str::to_string).collect()
    } else if let Some((email, rest)) = line.split_once(':') {
        vec![email.to_string(), rest.to_string()]
    } else {
        vec![line.trim_end().to_string()]
    };

    let email = fields.first().cloned().unwrap_or_default();
    if !email.contains('@') {
        // Table headers and prose lines.
        return None;
    }
    if fields.len() < 2 {
        return Some(Err("missing password field".to_string()));
    }
    let plan = fields.get(2).cloned();
    Some(Ok((email, fields[1].clone(), plan)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn validates_email_shape() {
        assert!(is_valid_email("a@x.com"));
        assert!(is_valid_email("first.last+tag@sub.example.org"));
        assert!(!is_valid_email("a@x"));
        assert!(!is_valid_email("a x@y.com"));
        assert!(!is_valid_email("@x.com"));
    }

    #[test]
    fn parses_mixed_line_formats() {
        let content = "\
# exported list
a@x.com----p1
b@x.com----p2----PLUS
c@x.com|p3|team
d@x.com\tp4
e@x.com:p:5
- f@x.com----p6
";
        let batch = parse_accounts(content, "free").unwrap();
        let summary: Vec<(&str, &str, &str)> = batch
            .accounts
            .iter()
            .map(|a| (a.email.as_str(), a.password.as_str(), a.plan.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a@x.com", "p1", "free"),
                ("b@x.com", "p2", "plus"),
                ("c@x.com", "p3", "team"),
                ("d@x.com", "p4", "free"),
                ("e@x.com", "p:5", "free"),
                ("f@x.com", "p6", "free"),
            ]
        );
        assert!(batch.rejected.is_empty());
    }

    #[test]
    fn parses_markdown_table() {
        let content = "\
| email | password | plan |
|-------|----------|------|
| a@x.com | p1 | plus |
| `b@x.com` | p2 | |
";
        let batch = parse_accounts(content, "free").unwrap();
        assert_eq!(batch.accounts.len(), 2);
        assert_eq!(batch.accounts[0].plan, "plus");
        assert_eq!(batch.accounts[1].email, "b@x.com");
        assert_eq!(batch.accounts[1].plan, "free");
    }

    #[test]
    fn dedupes_case_insensitively_keeping_first() {
        let batch = parse_accounts("A@X.com----first\na@x.com----second\n", "free").unwrap();
        assert_eq!(batch.accounts.len(), 1);
        assert_eq!(batch.accounts[0].password, "first");
        assert_eq!(batch.duplicates, 1);
    }

    #[test]
    fn rejects_malformed_entries_with_position() {
        let content = "bad@nodot----p\nok@x.com----p\nlonely@x.com\n";
        let batch = parse_accounts(content, "free").unwrap();
        assert_eq!(batch.accounts.len(), 1);
        assert_eq!(
            batch.rejected,
            vec![
                RejectedEntry {
                    position: 1,
                    reason: "malformed email".into()
                },
                RejectedEntry {
                    position: 3,
                    reason: "missing password field".into()
                },
            ]
        );
    }

    #[test]
    fn passwords_keep_surrounding_spaces() {
        let content = "a@x.com---- lead\nb@x.com----trail  \nc@x.com\t p3 \n  d@x.com: p4\n";
        let batch = parse_accounts(content, "free").unwrap();
        let passwords: Vec<&str> = batch.accounts.iter().map(|a| a.password.as_str()).collect();
        assert_eq!(passwords, vec![" lead", "trail  ", " p3 ", " p4"]);
        assert_eq!(batch.accounts[0].email, "a@x.com");
        assert_eq!(batch.accounts[3].email, "d@x.com");

        let json = r#"[{"email":" e@x.com ","password":"  spaced  "}]"#;
        let batch = parse_accounts(json, "free").unwrap();
        assert_eq!(batch.accounts[0].email, "e@x.com");
        assert_eq!(batch.accounts[0].password, "  spaced  ");
    }

    #[test]
    fn keeps_empty_password_for_later_validation() {
        let batch = parse_accounts("a@x.com----\n", "free").unwrap();
        assert_eq!(batch.accounts.len(), 1);
        assert!(batch.accounts[0].password.is_empty());
    }

    #[test]
    fn parses_json_shapes() {
        let array = r#"[
            {"email":"a@x.com","password":"p1"},
            {"email":"b@x.com","password":"p2","plan":"Plus"}
        ]"#;
        let batch = parse_accounts(array, "free").unwrap();
        assert_eq!(batch.accounts.len(), 2);
        assert_eq!(batch.accounts[1].plan, "plus");

        let wrapped = r#"{"accounts":[{"username":"c@x.com","pass":"p3"}]}"#;
        let batch = parse_accounts(wrapped, "team").unwrap();
        assert_eq!(batch.accounts[0].email, "c@x.com");
        assert_eq!(batch.accounts[0].plan, "team");

        assert!(matches!(
            parse_accounts("{not json", "free"),
            Err(AutomationError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn load_reports_missing_file_as_invalid_input() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("accounts.txt");
        assert!(matches!(
            load_accounts(&path, "free").await,
            Err(AutomationError::InvalidInput(_))
        ));

        tokio::fs::write(&path, "a@x.com----p1\n").await.unwrap();
        let batch = load_accounts(&path, "free").await.unwrap();
        assert_eq!(batch.accounts.len(), 1);
    }
}
