//! Console session controller.
//!
//! The console (CPAMC) owns the OAuth client: it mints the authorization URL,
//! receives the provider callback and writes the credential artifact. This
//! module logs into its management UI, triggers the Codex OAuth action and
//! reads the attempt's status back, either from the status API or from the
//! panel text.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{AutomationConfig, CompiledConsoleSignals};
use crate::error::{AutomationError, Result};
use crate::models::AccountCredential;
use crate::surface::{Surface, wait_for};

const ENABLE_WAIT_CAP: Duration = Duration::from_secs(30);
const KEY_FORM_WAIT: Duration = Duration::from_secs(5);
const AUTH_URL_WAIT_CAP: Duration = Duration::from_secs(15);
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

const STATUS_FIELDS: [&str; 3] = ["status", "state", "result"];
const MESSAGE_FIELDS: [&str; 4] = ["message", "error", "msg", "detail"];
const URL_FIELDS: [&str; 4] = ["url", "auth_url", "authorize_url", "authorization_url"];

const ERROR_KEYWORDS: [&str; 10] = [
    "error", "failed", "failure", "denied", "expired", "invalid", "失败", "错误", "拒绝",
    "过期",
];
const SUCCESS_KEYWORDS: [&str; 7] = [
    "success", "succeeded", "authorized", "completed", "成功", "已完成", "认证完成",
];

/// A started OAuth attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthStart {
    pub auth_url: String,
    /// Correlation token, the `state` query parameter of `auth_url`.
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleStatus {
    Success,
    Error(Option<String>),
    Waiting,
}

impl ConsoleStatus {
    pub fn is_waiting(&self) -> bool {
        matches!(self, ConsoleStatus::Waiting)
    }
}

#[async_trait]
pub trait ConsoleController: Send + Sync {
    async fn login(&self, surface: &dyn Surface, secret_key: &str, timeout: Duration) -> Result<()>;

    async fn start_oauth(
        &self,
        surface: &dyn Surface,
        account: &AccountCredential,
        secret_key: &str,
        timeout: Duration,
    ) -> Result<OAuthStart>;

    /// Poll until the attempt leaves the pending state. Timeout yields
    /// `Waiting`, never an error.
    async fn poll_status(
        &self,
        surface: &dyn Surface,
        token: Option<&str>,
        secret_key: &str,
        timeout: Duration,
    ) -> Result<ConsoleStatus>;

    /// Hand a captured provider callback to the console.
    async fn submit_callback(
        &self,
        callback_url: &str,
        state: &str,
        secret_key: &str,
    ) -> Result<()>;
}

pub struct CpamcConsole {
    config: Arc<AutomationConfig>,
    signals: CompiledConsoleSignals,
    http: reqwest::Client,
}

impl CpamcConsole {
    pub fn new(config: Arc<AutomationConfig>) -> Result<Self> {
        let signals = config.console.signals.compile()?;
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            config,
            signals,
            http,
        })
    }

    fn poll_interval(&self) -> Duration {
        self.config.timeouts.poll_interval()
    }

    async fn page_text(&self, surface: &dyn Surface) -> String {
        surface.body_text().await.unwrap_or_default()
    }

    async fn fetch_auth_url_api(&self, surface: &dyn Surface, secret_key: &str) -> Option<String> {
        let url = self.config.console_url(&self.config.console.auth_url_api);
        match surface.fetch_text(&url, &auth_headers(secret_key)).await {
            Ok(response) if (200..300).contains(&response.status) => {
                parse_auth_url_response(&response.body)
            }
            Ok(response) => {
                warn!(status = response.status, "Auth URL API rejected the request");
                None
            }
            Err(e) => {
                warn!(error = %e, "Auth URL API call failed");
                None
            }
        }
    }

    async fn query_status(&self, token: &str, secret_key: &str) -> Result<ConsoleStatus> {
        let url = self.config.console_url(&self.config.console.status_api);
        let response = self
            .http
            .get(&url)
            .query(&[("state", token)])
            .bearer_auth(secret_key)
            .header("X-Management-Key", secret_key)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            debug!(status = %status, "Status API returned non-success");
            return Ok(ConsoleStatus::Waiting);
        }
        Ok(parse_status_response(&body))
    }
}

#[async_trait]
impl ConsoleController for CpamcConsole {
    async fn login(
        &self,
        surface: &dyn Surface,
        secret_key: &str,
        timeout: Duration,
    ) -> Result<()> {
        let signals = &self.config.console.signals;
        let entry = self.config.console_url(&self.config.console.management_path);
        surface.goto(&entry).await?;

        let form_shown = wait_for(KEY_FORM_WAIT.min(timeout), self.poll_interval(), || async move {
            surface
                .any_visible(&signals.key_input_selectors)
                .await
                .map(|shown| shown.then_some(()))
        })
        .await
        .is_some();
        if !form_shown {
            debug!("No management key form, session already authenticated");
            return Ok(());
        }

        if !surface.fill(&signals.key_input_selectors, secret_key).await? {
            return Err(AutomationError::ConsoleLogin(
                "management key input not fillable".to_string(),
            ));
        }
        if !surface.click(&signals.login_submit_selectors).await? {
            surface.press_key("Enter").await?;
        }

        let deadline = Instant::now() + timeout;
        loop {
            let text = self.page_text(surface).await;
            if self.signals.login_error.is_match(&text) {
                return Err(AutomationError::ConsoleLogin(
                    "console rejected the management key".to_string(),
                ));
            }
            if !surface.any_visible(&signals.key_input_selectors).await? {
                info!("Console login accepted");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AutomationError::ConsoleLogin(
                    "management key form still visible after timeout".to_string(),
                ));
            }
            tokio::time::sleep(self.poll_interval()).await;
        }
    }

    async fn start_oauth(
        &self,
        surface: &dyn Surface,
        account: &AccountCredential,
        secret_key: &str,
        timeout: Duration,
    ) -> Result<OAuthStart> {
        let signals = &self.config.console.signals;
        surface
            .goto(&self.config.console_url(&self.config.console.oauth_path))
            .await?;

        let marker = wait_for(timeout, self.poll_interval(), || async move {
            surface
                .body_text()
                .await
                .map(|text| self.signals.oauth_marker.is_match(&text).then_some(text))
        })
        .await;
        let Some(panel_text) = marker else {
            return Err(AutomationError::LinkNotFound(
                "OAuth panel never rendered; auth url unavailable".to_string(),
            ));
        };
        let snapshot = extract_auth_url(&panel_text, &self.signals.auth_url);
        let snapshot = snapshot.as_ref();

        let action_text = Some(signals.oauth_action_text.as_str());
        let enabled = wait_for(timeout.min(ENABLE_WAIT_CAP), self.poll_interval(), || async move {
            surface
                .control_enabled(&signals.oauth_action_selectors, action_text)
                .await
                .map(|state| state.filter(|enabled| *enabled))
        })
        .await
        .is_some();

        let mut auth_url = None;
        if enabled {
            let clicked = surface.click(&signals.oauth_action_selectors).await?
                || surface.click_text(&signals.oauth_action_text, None).await?;
            debug!(
                email = %account.redacted_email(),
                clicked,
                "Triggered console OAuth action"
            );
            if clicked {
                let wait = timeout.min(AUTH_URL_WAIT_CAP);
                auth_url = wait_for(wait, self.poll_interval(), || async move {
                    surface.body_text().await.map(|text| {
                        extract_auth_url(&text, &self.signals.auth_url)
                            .filter(|url| snapshot != Some(url))
                    })
                })
                .await;
            }
        } else {
            warn!("OAuth action control never became enabled");
        }

        if auth_url.is_none() {
            debug!("Falling back to the auth URL API");
            auth_url = self.fetch_auth_url_api(surface, secret_key).await;
        }
        let Some(auth_url) = auth_url else {
            return Err(AutomationError::LinkNotFound(
                "auth url not found in panel or API".to_string(),
            ));
        };

        let Some(state) = state_param(&auth_url) else {
            return Err(AutomationError::OAuthFailed(
                "authorization url carries no state parameter".to_string(),
            ));
        };
        info!(email = %account.redacted_email(), "OAuth attempt started");
        Ok(OAuthStart { auth_url, state })
    }

    async fn poll_status(
        &self,
        surface: &dyn Surface,
        token: Option<&str>,
        secret_key: &str,
        timeout: Duration,
    ) -> Result<ConsoleStatus> {
        let interval = self.config.timeouts.status_interval();
        let deadline = Instant::now() + timeout;
        loop {
            let status = match token {
                Some(token) => match self.query_status(token, secret_key).await {
                    Ok(status) => status,
                    Err(e) => {
                        debug!(error = %e, "Status query failed, retrying");
                        ConsoleStatus::Waiting
                    }
                },
                None => classify_status_text(&self.page_text(surface).await),
            };
            if !status.is_waiting() {
                debug!(?status, "Console status settled");
                return Ok(status);
            }
            if Instant::now() + interval > deadline {
                return Ok(ConsoleStatus::Waiting);
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn submit_callback(
        &self,
        callback_url: &str,
        state: &str,
        secret_key: &str,
    ) -> Result<()> {
        let Some(endpoint) = &self.config.console.callback_api else {
            return Err(AutomationError::CallbackSubmit(
                "no callback endpoint configured".to_string(),
            ));
        };
        let url = self.config.console_url(endpoint);
        let response = self
            .http
            .post(&url)
            .bearer_auth(secret_key)
            .header("X-Management-Key", secret_key)
            .json(&serde_json::json!({
                "provider": "codex",
                "redirect_url": callback_url,
                "state": state,
            }))
            .send()
            .await
            .map_err(|e| AutomationError::CallbackSubmit(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AutomationError::CallbackSubmit(format!(
                "HTTP {}: {}",
                status,
                truncate(&body, 200)
            )));
        }
        info!("Submitted captured callback to console");
        Ok(())
    }
}

/// Headers the management API accepts.
pub fn auth_headers(secret_key: &str) -> Vec<(String, String)> {
    vec![
        ("Authorization".to_string(), format!("Bearer {}", secret_key)),
        ("X-Management-Key".to_string(), secret_key.to_string()),
    ]
}

/// First authorization URL in rendered panel text.
pub fn extract_auth_url(text: &str, pattern: &regex::Regex) -> Option<String> {
    pattern.find(text).map(|m| {
        m.as_str()
            .trim_end_matches(|c: char| matches!(c, '.' | ',' | ')' | ']' | ';'))
            .to_string()
    })
}

/// Accepts a bare URL or JSON carrying one of the known URL fields,
/// optionally nested under `data`.
pub fn parse_auth_url_response(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Some(trimmed.to_string());
    }
    let value: Value = serde_json::from_str(trimmed).ok()?;
    let is_url = |s: &&str| s.starts_with("http://") || s.starts_with("https://");
    [Some(&value), value.get("data")]
        .into_iter()
        .flatten()
        .find_map(|obj| {
            URL_FIELDS
                .iter()
                .find_map(|field| obj.get(field).and_then(Value::as_str).filter(is_url))
        })
        .map(str::to_string)
}

/// Classify a status API body (JSON or plain text).
pub fn parse_status_response(body: &str) -> ConsoleStatus {
    let Ok(value) = serde_json::from_str::<Value>(body.trim()) else {
        return classify_bare_status(body);
    };
    if let Some(text) = value.as_str() {
        return classify_bare_status(text);
    }

    for obj in [Some(&value), value.get("data")].into_iter().flatten() {
        let message = MESSAGE_FIELDS
            .iter()
            .find_map(|field| obj.get(field).and_then(Value::as_str))
            .filter(|m| !m.trim().is_empty())
            .map(str::to_string);

        let field_status = STATUS_FIELDS.iter().find_map(|field| {
            obj.get(field)
                .and_then(Value::as_str)
                .and_then(classify_status_field)
        });
        match field_status {
            Some(ConsoleStatus::Error(_)) => return ConsoleStatus::Error(message),
            Some(status) => return status,
            None => {}
        }
        if let Some(message) = message {
            let status = classify_status_text(&message);
            if !status.is_waiting() {
                return status;
            }
        }
    }
    ConsoleStatus::Waiting
}

/// A body that is only a status word or a sentence, with no JSON object
/// around it.
fn classify_bare_status(text: &str) -> ConsoleStatus {
    match classify_status_field(text) {
        Some(ConsoleStatus::Error(_)) => ConsoleStatus::Error(Some(truncate(text.trim(), 200))),
        Some(status) => status,
        None => classify_status_text(text),
    }
}

/// Exact-token classification of a status field value.
pub fn classify_status_field(value: &str) -> Option<ConsoleStatus> {
    match value.trim().to_lowercase().as_str() {
        "ok" | "success" | "succeeded" | "completed" | "complete" | "done" | "authorized" => {
            Some(ConsoleStatus::Success)
        }
        "error" | "failed" | "failure" | "denied" | "expired" | "cancelled" | "canceled" => {
            Some(ConsoleStatus::Error(None))
        }
        "wait" | "waiting" | "pending" | "processing" | "in_progress" | "running" | "started" => {
            Some(ConsoleStatus::Waiting)
        }
        _ => None,
    }
}

/// Keyword classification of free text. Error keywords are checked first.
pub fn classify_status_text(text: &str) -> ConsoleStatus {
    let lower = text.to_lowercase();
    if ERROR_KEYWORDS.iter().any(|k| lower.contains(k)) {
        ConsoleStatus::Error(Some(truncate(text.trim(), 200)))
    } else if SUCCESS_KEYWORDS.iter().any(|k| lower.contains(k)) {
        ConsoleStatus::Success
    } else {
        ConsoleStatus::Waiting
    }
}

/// The non-empty `state` query parameter of `url`.
pub fn state_param(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(key, value)| key == "state" && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsoleSignals;
    use crate::surface::FetchResponse;
    use crate::surface::testing::MockSurface;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const AUTH_URL: &str = "https://auth.openai.com/oauth/authorize?client_id=app&state=abc123";

    fn console_for(base_url: &str) -> CpamcConsole {
        let mut config = AutomationConfig::default();
        config.console.base_url = base_url.to_string();
        config.timeouts.poll_interval_ms = 10;
        config.timeouts.status_interval_ms = 10;
        CpamcConsole::new(Arc::new(config)).unwrap()
    }

    fn key_selector() -> String {
        ConsoleSignals::default().key_input_selectors[0].clone()
    }

    fn account() -> AccountCredential {
        AccountCredential::new("a@x.com", "p1", "free")
    }

    #[test]
    fn extracts_auth_url_from_panel_text() {
        let signals = ConsoleSignals::default().compile().unwrap();
        let text = format!("Codex OAuth\nOpen this link: {}.\nWaiting...", AUTH_URL);
        assert_eq!(extract_auth_url(&text, &signals.auth_url).as_deref(), Some(AUTH_URL));
        assert_eq!(extract_auth_url("Codex OAuth", &signals.auth_url), None);
    }

    #[test]
    fn parses_auth_url_api_shapes() {
        assert_eq!(parse_auth_url_response(AUTH_URL).as_deref(), Some(AUTH_URL));
        let nested = format!(r#"{{"data":{{"auth_url":"{}"}}}}"#, AUTH_URL);
        assert_eq!(parse_auth_url_response(&nested).as_deref(), Some(AUTH_URL));
        let flat = format!(r#"{{"status":"ok","url":"{}"}}"#, AUTH_URL);
        assert_eq!(parse_auth_url_response(&flat).as_deref(), Some(AUTH_URL));
        assert_eq!(parse_auth_url_response(r#"{"url":"not a url"}"#), None);
        assert_eq!(parse_auth_url_response("<html>login</html>"), None);
    }

    #[test]
    fn parses_status_shapes() {
        assert_eq!(parse_status_response(r#"{"status":"ok"}"#), ConsoleStatus::Success);
        assert_eq!(parse_status_response(r#"{"status":"wait"}"#), ConsoleStatus::Waiting);
        assert_eq!(
            parse_status_response(r#"{"status":"error","error":"token exchange failed"}"#),
            ConsoleStatus::Error(Some("token exchange failed".into()))
        );
        assert_eq!(
            parse_status_response(r#"{"data":{"result":"success"}}"#),
            ConsoleStatus::Success
        );
        // `state` carrying the correlation token is not a status.
        assert_eq!(
            parse_status_response(r#"{"state":"abc123","msg":"认证成功"}"#),
            ConsoleStatus::Success
        );
        assert_eq!(
            parse_status_response("授权失败"),
            ConsoleStatus::Error(Some("授权失败".into()))
        );
        assert_eq!(parse_status_response("pending"), ConsoleStatus::Waiting);
    }

    #[test]
    fn bare_status_strings_use_status_words() {
        assert_eq!(parse_status_response(r#""ok""#), ConsoleStatus::Success);
        assert_eq!(parse_status_response("ok\n"), ConsoleStatus::Success);
        assert_eq!(parse_status_response(r#""done""#), ConsoleStatus::Success);
        assert_eq!(parse_status_response(r#""认证成功""#), ConsoleStatus::Success);
        assert_eq!(
            parse_status_response(r#""cancelled""#),
            ConsoleStatus::Error(Some("cancelled".into()))
        );
        assert_eq!(parse_status_response(r#""wait""#), ConsoleStatus::Waiting);
    }

    #[test]
    fn text_classification_checks_errors_first() {
        assert!(matches!(
            classify_status_text("Authorization failed after success redirect"),
            ConsoleStatus::Error(_)
        ));
        assert_eq!(classify_status_text("Authentication SUCCESSFUL"), ConsoleStatus::Success);
        assert_eq!(classify_status_text("waiting for callback"), ConsoleStatus::Waiting);
    }

    #[test]
    fn reads_state_parameter() {
        assert_eq!(state_param(AUTH_URL).as_deref(), Some("abc123"));
        assert_eq!(state_param("https://auth.openai.com/oauth/authorize?state="), None);
        assert_eq!(state_param("not a url"), None);
    }

    #[tokio::test]
    async fn login_submits_key_and_waits_for_form_to_clear() {
        let console = console_for("http://127.0.0.1:8317");
        let surface = MockSurface::new("console", "about:blank");
        let key = key_selector();
        surface.state().show(&[key.as_str()]);
        surface.state().show(&["button[type=\"submit\"]"]);
        let hidden = key.clone();
        surface.on("click:button[type=\"submit\"]", move |state| {
            state.hide(&[hidden.as_str()]);
        });

        console
            .login(surface.as_ref(), "secret", Duration::from_secs(1))
            .await
            .unwrap();
        let log = surface.log();
        assert_eq!(log[0], "goto:http://127.0.0.1:8317/management.html");
        assert!(log.contains(&format!("fill:{}", key)));
    }

    #[tokio::test]
    async fn login_fails_on_invalid_key_indicator() {
        let console = console_for("http://127.0.0.1:8317");
        let surface = MockSurface::new("console", "about:blank");
        let key = key_selector();
        surface.state().show(&[key.as_str()]);
        surface.on("key:Enter", |state| state.set_body("Invalid management key"));

        let err = console
            .login(surface.as_ref(), "wrong", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::ConsoleLogin(_)));
        assert_eq!(err.code(), crate::FailureCode::CpamcLoginFailed);
    }

    #[tokio::test]
    async fn login_times_out_while_form_visible() {
        let console = console_for("http://127.0.0.1:8317");
        let surface = MockSurface::new("console", "about:blank");
        surface.state().show(&[key_selector().as_str()]);
        let err = console
            .login(surface.as_ref(), "secret", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("management key"));
    }

    #[tokio::test]
    async fn start_oauth_reads_url_rendered_after_click() {
        let console = console_for("http://127.0.0.1:8317");
        let surface = MockSurface::new("console", "about:blank");
        surface.state().set_body("Codex OAuth");
        surface.state().enabled = Some(true);
        surface.state().buttons = vec!["Codex 登录".to_string()];
        surface.on("text:Codex 登录", |state| {
            state.set_body(&format!("Codex OAuth\n{}", AUTH_URL));
        });

        let started = console
            .start_oauth(surface.as_ref(), &account(), "secret", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(started.auth_url, AUTH_URL);
        assert_eq!(started.state, "abc123");
    }

    #[tokio::test]
    async fn start_oauth_falls_back_to_api_when_panel_url_is_stale() {
        let console = console_for("http://127.0.0.1:8317");
        let surface = MockSurface::new("console", "about:blank");
        let stale = "https://auth.openai.com/oauth/authorize?state=old";
        surface.state().set_body(&format!("Codex OAuth {}", stale));
        surface.state().enabled = Some(true);
        surface.state().buttons = vec!["Codex Login".to_string()];
        surface.state().fetch.push_back(FetchResponse {
            status: 200,
            body: format!(r#"{{"status":"ok","url":"{}"}}"#, AUTH_URL),
        });

        let started = console
            .start_oauth(surface.as_ref(), &account(), "secret", Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(started.state, "abc123");
        assert!(
            surface
                .log()
                .iter()
                .any(|e| e.starts_with("fetch:http://127.0.0.1:8317/v0/management/codex-auth-url"))
        );
    }

    #[tokio::test]
    async fn start_oauth_without_any_url_is_link_not_found() {
        let console = console_for("http://127.0.0.1:8317");
        let surface = MockSurface::new("console", "about:blank");
        surface.state().set_body("Codex OAuth");
        surface.state().enabled = Some(false);

        let err = console
            .start_oauth(surface.as_ref(), &account(), "secret", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::FailureCode::CpamcLinkNotFound);
    }

    #[tokio::test]
    async fn start_oauth_requires_state() {
        let console = console_for("http://127.0.0.1:8317");
        let surface = MockSurface::new("console", "about:blank");
        surface.state().set_body("Codex OAuth");
        surface.state().fetch.push_back(FetchResponse {
            status: 200,
            body: "https://auth.openai.com/oauth/authorize?client_id=app".to_string(),
        });

        let err = console
            .start_oauth(surface.as_ref(), &account(), "secret", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::FailureCode::CpamcOauthFailed);
    }

    #[tokio::test]
    async fn poll_status_queries_api_with_token_and_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/management/get-auth-status"))
            .and(query_param("state", "abc123"))
            .and(header("X-Management-Key", "secret"))
            .and(header("Authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":"ok"}"#))
            .mount(&server)
            .await;

        let console = console_for(&server.uri());
        let surface = MockSurface::new("console", "about:blank");
        let status = console
            .poll_status(surface.as_ref(), Some("abc123"), "secret", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(status, ConsoleStatus::Success);
    }

    #[tokio::test]
    async fn poll_status_times_out_as_waiting() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/management/get-auth-status"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":"wait"}"#))
            .mount(&server)
            .await;

        let console = console_for(&server.uri());
        let surface = MockSurface::new("console", "about:blank");
        let status = console
            .poll_status(surface.as_ref(), Some("abc123"), "secret", Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(status, ConsoleStatus::Waiting);
    }

    #[tokio::test]
    async fn poll_status_without_token_scans_panel_text() {
        let console = console_for("http://127.0.0.1:1");
        let surface = MockSurface::new("console", "about:blank");
        surface.state().bodies = ["等待回调", "等待回调", "认证成功"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let status = console
            .poll_status(surface.as_ref(), None, "secret", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(status, ConsoleStatus::Success);
    }

    #[tokio::test]
    async fn submit_callback_posts_redirect_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v0/management/oauth-callback"))
            .and(body_partial_json(serde_json::json!({
                "provider": "codex",
                "state": "abc123"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":"ok"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let console = console_for(&server.uri());
        console
            .submit_callback(
                "http://localhost:1455/auth/callback?code=c&state=abc123",
                "abc123",
                "secret",
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn submit_callback_failure_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("state mismatch"))
            .mount(&server)
            .await;

        let console = console_for(&server.uri());
        let err = console
            .submit_callback("http://localhost:1455/auth/callback?code=c", "abc123", "secret")
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::FailureCode::CallbackSubmitFailed);
        assert!(err.to_string().contains("state mismatch"));
    }
}
