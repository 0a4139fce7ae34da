//! Failure taxonomy for account automation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable reason attached to every failed account result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    InvalidInput,
    LoginRejected,
    ChallengeRequired,
    TokenNotFound,
    WriteFailed,
    CpamcLoginFailed,
    CpamcLinkNotFound,
    CpamcOauthFailed,
    CallbackUrlNotCaptured,
    CallbackSubmitFailed,
    Unknown,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::InvalidInput => "INVALID_INPUT",
            FailureCode::LoginRejected => "LOGIN_REJECTED",
            FailureCode::ChallengeRequired => "CHALLENGE_REQUIRED",
            FailureCode::TokenNotFound => "TOKEN_NOT_FOUND",
            FailureCode::WriteFailed => "WRITE_FAILED",
            FailureCode::CpamcLoginFailed => "CPAMC_LOGIN_FAILED",
            FailureCode::CpamcLinkNotFound => "CPAMC_LINK_NOT_FOUND",
            FailureCode::CpamcOauthFailed => "CPAMC_OAUTH_FAILED",
            FailureCode::CallbackUrlNotCaptured => "CALLBACK_URL_NOT_CAPTURED",
            FailureCode::CallbackSubmitFailed => "CALLBACK_SUBMIT_FAILED",
            FailureCode::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a free-form error message by keyword hints.
///
/// Anything that lands on `Unknown` deserves its own code.
pub fn classify_error_message(message: &str) -> FailureCode {
    let lower = message.to_lowercase();
    if lower.contains("management key") {
        FailureCode::CpamcLoginFailed
    } else if lower.contains("auth url") {
        FailureCode::CpamcLinkNotFound
    } else if lower.contains("timeout") || lower.contains("timed out") {
        FailureCode::LoginRejected
    } else {
        FailureCode::Unknown
    }
}

#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Console login failed (management key): {0}")]
    ConsoleLogin(String),

    #[error("Console auth url not found: {0}")]
    LinkNotFound(String),

    #[error("Console OAuth failed: {0}")]
    OAuthFailed(String),

    #[error("Callback submit failed: {0}")]
    CallbackSubmit(String),

    #[error("Credential artifact not written for {0}")]
    WriteFailed(String),

    #[error("Credential artifact for {0} carries no token")]
    TokenNotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Browser error: {0}")]
    Browser(#[from] anyhow::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AutomationError {
    pub fn code(&self) -> FailureCode {
        match self {
            AutomationError::InvalidInput(_) | AutomationError::Config(_) => {
                FailureCode::InvalidInput
            }
            AutomationError::ConsoleLogin(_) => FailureCode::CpamcLoginFailed,
            AutomationError::LinkNotFound(_) => FailureCode::CpamcLinkNotFound,
            AutomationError::OAuthFailed(_) => FailureCode::CpamcOauthFailed,
            AutomationError::CallbackSubmit(_) => FailureCode::CallbackSubmitFailed,
            AutomationError::WriteFailed(_) => FailureCode::WriteFailed,
            AutomationError::TokenNotFound(_) => FailureCode::TokenNotFound,
            other => classify_error_message(&other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AutomationError>;
