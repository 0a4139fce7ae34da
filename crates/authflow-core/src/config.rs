//! Automation configuration.
//!
//! Loaded from TOML (every field has a default) and passed around as an
//! immutable `Arc<AutomationConfig>`. Selectors and text patterns for both the
//! console and the identity provider live here so the matching strategy can
//! be changed without touching the state machines.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AutomationError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub console: ConsoleConfig,
    pub provider: ProviderConfig,
    pub browser: BrowserConfig,
    pub timeouts: TimeoutConfig,
    pub paths: PathsConfig,
    pub run: RunConfig,
}

impl AutomationConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| AutomationError::Config(e.to_string()))
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check the values a batch run cannot start without.
    pub fn validate(&self) -> Result<()> {
        let base = url::Url::parse(&self.console.base_url).map_err(|e| {
            AutomationError::Config(format!("console.base_url '{}': {}", self.console.base_url, e))
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(AutomationError::Config(
                "console.base_url must be http(s)".to_string(),
            ));
        }
        if self.timeouts.poll_interval_ms == 0 {
            return Err(AutomationError::Config(
                "timeouts.poll_interval_ms must be positive".to_string(),
            ));
        }
        self.provider.signals.compile()?;
        self.console.signals.compile()?;
        Ok(())
    }

    /// Join a console-relative path (or pass through an absolute URL).
    pub fn console_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.console.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub base_url: String,
    /// Management secret key. Usually supplied by env or prompt rather than
    /// the config file; never written back out.
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub management_path: String,
    pub oauth_path: String,
    pub auth_url_api: String,
    pub status_api: String,
    /// Endpoint accepting a captured callback URL; `None` disables submission.
    pub callback_api: Option<String>,
    pub signals: ConsoleSignals,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8317".to_string(),
            secret_key: None,
            management_path: "/management.html".to_string(),
            oauth_path: "/management.html#/oauth".to_string(),
            auth_url_api: "/v0/management/codex-auth-url?is_webui=true".to_string(),
            status_api: "/v0/management/get-auth-status".to_string(),
            callback_api: Some("/v0/management/oauth-callback".to_string()),
            signals: ConsoleSignals::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleSignals {
    pub key_input_selectors: Vec<String>,
    pub login_submit_selectors: Vec<String>,
    pub login_error_pattern: String,
    pub oauth_marker_pattern: String,
    pub oauth_action_selectors: Vec<String>,
    pub oauth_action_text: String,
    pub auth_url_pattern: String,
}

impl Default for ConsoleSignals {
    fn default() -> Self {
        Self {
            key_input_selectors: strings(&[
                "input[type=\"password\"]",
                "input[name=\"managementKey\"]",
                "input[placeholder*=\"key\" i]",
                "input[placeholder*=\"密钥\"]",
            ]),
            login_submit_selectors: strings(&["button[type=\"submit\"]", "form button"]),
            login_error_pattern: r"invalid (?:management )?key|unauthori[sz]ed|authentication failed|密钥错误|无效的.{0,6}密钥|认证失败|登录失败".to_string(),
            oauth_marker_pattern: r"OAuth|Codex".to_string(),
            oauth_action_selectors: strings(&[
                "[data-provider=\"codex\"] button",
                "button[data-oauth=\"codex\"]",
            ]),
            oauth_action_text: r"codex.{0,24}(?:login|登录|oauth|授权|认证)|(?:login|登录|授权).{0,12}codex".to_string(),
            auth_url_pattern: r#"https://[^\s"'<>]+/oauth/authorize\?[^\s"'<>]+"#.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledConsoleSignals {
    pub login_error: Regex,
    pub oauth_marker: Regex,
    pub auth_url: Regex,
}

impl ConsoleSignals {
    pub fn compile(&self) -> Result<CompiledConsoleSignals> {
        Ok(CompiledConsoleSignals {
            login_error: compile_pattern("login_error_pattern", &self.login_error_pattern)?,
            oauth_marker: compile_pattern("oauth_marker_pattern", &self.oauth_marker_pattern)?,
            auth_url: compile_pattern("auth_url_pattern", &self.auth_url_pattern)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub default_login_url: String,
    pub signals: SignalConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            default_login_url: "https://auth.openai.com/log-in".to_string(),
            signals: SignalConfig::default(),
        }
    }
}

/// Identity-provider selectors and text patterns.
///
/// Text patterns are used both by Rust (`regex`) and in-page JavaScript
/// (`RegExp`), so keep them to the common syntax subset. All patterns match
/// case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub login_gate_selectors: Vec<String>,
    pub email_selectors: Vec<String>,
    pub email_submit_selectors: Vec<String>,
    pub submit_email: bool,
    pub password_path_selectors: Vec<String>,
    pub password_path_text: String,
    pub password_selectors: Vec<String>,
    pub password_submit_selectors: Vec<String>,
    pub invalid_credentials_pattern: String,
    pub success_url_patterns: Vec<String>,
    pub callback_url_patterns: Vec<String>,
    pub auth_url_patterns: Vec<String>,
    pub consent_page_pattern: String,
    pub continue_pattern: String,
    pub cancel_pattern: String,
    pub challenge_selectors: Vec<String>,
    pub challenge_keywords: Vec<String>,
    /// Keywords too generic to signal a challenge on their own.
    pub challenge_keyword_excludes: Vec<String>,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            login_gate_selectors: strings(&[
                "button[data-testid=\"login-button\"]",
                "a[data-testid=\"login-button\"]",
            ]),
            email_selectors: strings(&[
                "input[type=\"email\"]",
                "input[name=\"email\"]",
                "input[name=\"username\"]",
                "input[autocomplete=\"email\"]",
                "input[autocomplete=\"username\"]",
                "#email-input",
            ]),
            email_submit_selectors: strings(&[
                "button[type=\"submit\"]",
                "button[name=\"intent\"][value=\"email\"]",
            ]),
            submit_email: true,
            password_path_selectors: strings(&[
                "button[value=\"password\"]",
                "a[href*=\"/log-in/password\"]",
            ]),
            password_path_text: r"(?:continue|log in|sign in) with (?:a )?password|使用密码|密码登录".to_string(),
            password_selectors: strings(&[
                "input[type=\"password\"]",
                "input[name=\"password\"]",
                "input[autocomplete=\"current-password\"]",
            ]),
            password_submit_selectors: strings(&[
                "button[type=\"submit\"]",
                "button[name=\"action\"][value=\"default\"]",
            ]),
            invalid_credentials_pattern: r"incorrect (?:email address|email|password)|wrong (?:email|password)|invalid (?:email|password|credentials)|密码错误|邮箱或密码不正确|用户名或密码".to_string(),
            success_url_patterns: strings(&[
                r"localhost:\d+/success",
                r"127\.0\.0\.1:\d+/success",
                r"/oauth/success",
                r"/auth/success",
            ]),
            callback_url_patterns: strings(&[
                r"localhost:\d+/auth/callback\?",
                r"127\.0\.0\.1:\d+/auth/callback\?",
                r"/oauth-callback\?",
                r"/codex/callback\?",
            ]),
            auth_url_patterns: strings(&[
                r"auth\.openai\.com",
                r"auth0\.openai\.com",
                r"/oauth/authorize",
                r"/log-in",
                r"/u/login",
            ]),
            consent_page_pattern: r"(?:log|sign) ?in to (?:codex|chatgpt|openai)|登录到\s*(?:codex|chatgpt)".to_string(),
            continue_pattern: r"^\s*(?:continue|allow|authorize|accept|继续|允许|授权)\s*$".to_string(),
            cancel_pattern: r"cancel|deny|decline|取消|拒绝".to_string(),
            challenge_selectors: strings(&[
                "iframe[src*=\"challenges.cloudflare.com\"]",
                "iframe[src*=\"hcaptcha\"]",
                "iframe[src*=\"recaptcha\"]",
                "iframe[src*=\"arkoselabs\"]",
                "#challenge-form",
                "#cf-challenge-running",
            ]),
            challenge_keywords: strings(&[
                "captcha",
                "verify you are human",
                "are you a robot",
                "human verification",
                "unusual activity",
                "suspicious activity",
                "人机验证",
                "验证您是真人",
                "verification",
                "verify",
                "验证",
            ]),
            challenge_keyword_excludes: strings(&["verification", "verify", "验证"]),
        }
    }
}

/// Regex form of [`SignalConfig`], built once per component.
#[derive(Debug, Clone)]
pub struct CompiledSignals {
    pub password_path: Regex,
    pub invalid_credentials: Regex,
    pub success_urls: Vec<Regex>,
    pub callback_urls: Vec<Regex>,
    pub auth_urls: Vec<Regex>,
    pub consent_page: Regex,
    pub continue_text: Regex,
    pub cancel_text: Regex,
    /// Challenge keywords with the exclusion set already removed, lower-cased.
    pub challenge_keywords: Vec<String>,
}

impl SignalConfig {
    pub fn compile(&self) -> Result<CompiledSignals> {
        let excludes: Vec<String> = self
            .challenge_keyword_excludes
            .iter()
            .map(|k| k.to_lowercase())
            .collect();
        let challenge_keywords = self
            .challenge_keywords
            .iter()
            .map(|k| k.to_lowercase())
            .filter(|k| !k.is_empty() && !excludes.contains(k))
            .collect();

        Ok(CompiledSignals {
            password_path: compile_pattern("password_path_text", &self.password_path_text)?,
            invalid_credentials: compile_pattern(
                "invalid_credentials_pattern",
                &self.invalid_credentials_pattern,
            )?,
            success_urls: compile_all("success_url_patterns", &self.success_url_patterns)?,
            callback_urls: compile_all("callback_url_patterns", &self.callback_url_patterns)?,
            auth_urls: compile_all("auth_url_patterns", &self.auth_url_patterns)?,
            consent_page: compile_pattern("consent_page_pattern", &self.consent_page_pattern)?,
            continue_text: compile_pattern("continue_pattern", &self.continue_pattern)?,
            cancel_text: compile_pattern("cancel_pattern", &self.cancel_pattern)?,
            challenge_keywords,
        })
    }
}

impl CompiledSignals {
    pub fn is_success_url(&self, url: &str) -> bool {
        self.success_urls.iter().any(|re| re.is_match(url))
    }

    /// Callback URLs only count once they carry an authorization code.
    pub fn is_callback_url(&self, url: &str) -> bool {
        self.callback_urls.iter().any(|re| re.is_match(url)) && has_query_param(url, "code")
    }

    pub fn is_auth_url(&self, url: &str) -> bool {
        self.auth_urls.iter().any(|re| re.is_match(url))
    }
}

fn has_query_param(url: &str, name: &str) -> bool {
    url::Url::parse(url)
        .map(|parsed| {
            parsed
                .query_pairs()
                .any(|(key, value)| key == name && !value.is_empty())
        })
        .unwrap_or(false)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub headless: bool,
    pub executable: Option<PathBuf>,
    /// Attach to a running Chromium (`http://host:port` or `ws://...`).
    pub cdp_url: Option<String>,
    pub args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            cdp_url: None,
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub login_secs: u64,
    pub oauth_secs: u64,
    pub step_secs: u64,
    pub flow_secs: u64,
    pub status_secs: u64,
    pub artifact_secs: u64,
    pub navigation_secs: u64,
    pub account_delay_secs: u64,
    pub poll_interval_ms: u64,
    pub status_interval_ms: u64,
    pub popup_grace_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            login_secs: 20,
            oauth_secs: 45,
            step_secs: 20,
            flow_secs: 120,
            status_secs: 60,
            artifact_secs: 30,
            navigation_secs: 45,
            account_delay_secs: 5,
            poll_interval_ms: 700,
            status_interval_ms: 1500,
            popup_grace_ms: 3000,
        }
    }
}

impl TimeoutConfig {
    pub fn login(&self) -> Duration {
        Duration::from_secs(self.login_secs)
    }
    pub fn oauth(&self) -> Duration {
        Duration::from_secs(self.oauth_secs)
    }
    pub fn step(&self) -> Duration {
        Duration::from_secs(self.step_secs)
    }
    pub fn flow(&self) -> Duration {
        Duration::from_secs(self.flow_secs)
    }
    pub fn status(&self) -> Duration {
        Duration::from_secs(self.status_secs)
    }
    pub fn artifact(&self) -> Duration {
        Duration::from_secs(self.artifact_secs)
    }
    pub fn navigation(&self) -> Duration {
        Duration::from_secs(self.navigation_secs)
    }
    pub fn account_delay(&self) -> Duration {
        Duration::from_secs(self.account_delay_secs)
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
    pub fn popup_grace(&self) -> Duration {
        Duration::from_millis(self.popup_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory the console writes credential artifacts into.
    pub auth_dir: PathBuf,
    pub report_path: Option<PathBuf>,
    pub index_path: Option<PathBuf>,
    pub screenshot_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            auth_dir: home.join(".cli-proxy-api"),
            report_path: None,
            index_path: None,
            screenshot_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub default_plan: String,
    pub skip_existing: bool,
    pub limit: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            default_plan: "free".to_string(),
            skip_existing: false,
            limit: None,
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn compile_pattern(name: &str, pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| AutomationError::Config(format!("{}: {}", name, e)))
}

fn compile_all(name: &str, patterns: &[String]) -> Result<Vec<Regex>> {
    patterns.iter().map(|p| compile_pattern(name, p)).collect()
}
