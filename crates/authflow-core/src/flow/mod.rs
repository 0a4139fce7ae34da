//! Identity provider flow driver.
//!
//! One forward pass per account: email, optional password-path selection,
//! password, then a settle loop that watches every surface of the context
//! until a terminal signal shows up or the flow budget runs out. Provider
//! outcomes are reported as values in [`FlowOutcome`]; only infrastructure
//! failures surface as errors.

pub mod challenge;
pub mod consent;

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{AutomationConfig, CompiledSignals};
use crate::error::{AutomationError, Result};
use crate::models::AccountCredential;
use crate::surface::{Surface, SurfaceContext, SurfaceSet, SurfaceSnapshot, wait_for};

pub struct FlowRequest<'a> {
    /// Authorization URL from the console; the configured login URL is used
    /// when absent.
    pub auth_url: Option<&'a str>,
    pub account: &'a AccountCredential,
    pub timeout: Duration,
    /// Surfaces that must never become active (the console control page).
    pub excluded: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowOutcome {
    pub final_url: String,
    pub challenge: bool,
    pub invalid_credentials: bool,
    pub callback_url: Option<String>,
    pub reached_success: bool,
}

#[async_trait]
pub trait IdentityFlow: Send + Sync {
    async fn run(
        &self,
        context: &dyn SurfaceContext,
        surface: Arc<dyn Surface>,
        request: FlowRequest<'_>,
    ) -> Result<FlowOutcome>;
}

/// What one settle tick observed on the active surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickObservation {
    pub url: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    InvalidCredentials,
    Success,
    Callback(String),
    Pending,
}

/// Terminal classification of a tick, checked in order: rejected
/// credentials, success page, callback carrying a code.
pub fn classify_tick(observation: &TickObservation, signals: &CompiledSignals) -> Tick {
    if signals.invalid_credentials.is_match(&observation.text) {
        Tick::InvalidCredentials
    } else if signals.is_success_url(&observation.url) {
        Tick::Success
    } else if signals.is_callback_url(&observation.url) {
        Tick::Callback(observation.url.clone())
    } else {
        Tick::Pending
    }
}

pub struct ProviderFlowDriver {
    config: Arc<AutomationConfig>,
    signals: CompiledSignals,
}

impl ProviderFlowDriver {
    pub fn new(config: Arc<AutomationConfig>) -> Result<Self> {
        let signals = config.provider.signals.compile()?;
        Ok(Self { config, signals })
    }

    fn interval(&self) -> Duration {
        self.config.timeouts.poll_interval()
    }

    async fn wait_visible(
        &self,
        surface: &dyn Surface,
        selectors: &[String],
        timeout: Duration,
    ) -> bool {
        wait_for(timeout, self.interval(), || async move {
            surface
                .any_visible(selectors)
                .await
                .map(|visible| visible.then_some(()))
        })
        .await
        .is_some()
    }

    async fn enter_email(
        &self,
        surface: &dyn Surface,
        account: &AccountCredential,
    ) -> Result<bool> {
        let signals = &self.config.provider.signals;
        let step = self.config.timeouts.step();

        if surface.any_visible(&signals.login_gate_selectors).await? {
            debug!("Dismissing login gate");
            surface.click(&signals.login_gate_selectors).await?;
        }
        if !self.wait_visible(surface, &signals.email_selectors, step).await {
            warn!(email = %account.redacted_email(), "Email field never appeared");
            return Ok(false);
        }
        surface.fill(&signals.email_selectors, &account.email).await?;
        if signals.submit_email && !surface.click(&signals.email_submit_selectors).await? {
            surface.press_key("Enter").await?;
        }
        Ok(true)
    }

    /// Wait for the password field, taking a "continue with password" detour
    /// when the provider offers one.
    async fn reach_password(&self, surface: &dyn Surface) -> bool {
        let signals = &self.config.provider.signals;
        wait_for(self.config.timeouts.step(), self.interval(), || async move {
            if surface.any_visible(&signals.password_selectors).await? {
                return Ok(Some(()));
            }
            let took_path = surface.click(&signals.password_path_selectors).await?
                || surface.click_text(&signals.password_path_text, None).await?;
            if took_path {
                debug!("Selected password login path");
            }
            Ok::<_, AutomationError>(None)
        })
        .await
        .is_some()
    }

    async fn enter_password(
        &self,
        context: &dyn SurfaceContext,
        surface: &dyn Surface,
        account: &AccountCredential,
    ) -> Result<Option<String>> {
        let signals = &self.config.provider.signals;
        if !self.reach_password(surface).await {
            warn!(email = %account.redacted_email(), "Password field never appeared");
            return Ok(None);
        }

        let known: HashSet<String> = surface_ids(context).await;
        surface.fill(&signals.password_selectors, &account.password).await?;
        if !surface.click(&signals.password_submit_selectors).await? {
            surface.press_key("Enter").await?;
        }

        let known = &known;
        let popup = wait_for(self.config.timeouts.popup_grace(), self.interval(), || async move {
            context.surfaces().await.map(|all| {
                all.iter()
                    .map(|s| s.id().to_string())
                    .find(|id| !known.contains(id))
            })
        })
        .await;
        if let Some(id) = &popup {
            info!(surface_id = %id, "Provider opened a popup, following it");
        }
        Ok(popup)
    }

    /// Snapshot every surface and pick the active one.
    async fn resolve_active(
        &self,
        context: &dyn SurfaceContext,
        initiating: &Arc<dyn Surface>,
        previous: &str,
        excluded: &[String],
    ) -> Arc<dyn Surface> {
        let surfaces = match context.surfaces().await {
            Ok(surfaces) if !surfaces.is_empty() => surfaces,
            _ => return initiating.clone(),
        };
        let mut candidates = Vec::with_capacity(surfaces.len());
        for surface in &surfaces {
            if let Ok(url) = surface.url().await {
                candidates.push(SurfaceSnapshot {
                    id: surface.id().to_string(),
                    url,
                });
            }
        }
        let set =
            SurfaceSet::resolve(candidates, initiating.id(), previous, excluded, &self.signals);
        surfaces
            .into_iter()
            .find(|s| s.id() == set.active)
            .unwrap_or_else(|| initiating.clone())
    }
}

#[async_trait]
impl IdentityFlow for ProviderFlowDriver {
    async fn run(
        &self,
        context: &dyn SurfaceContext,
        surface: Arc<dyn Surface>,
        request: FlowRequest<'_>,
    ) -> Result<FlowOutcome> {
        let deadline = Instant::now() + request.timeout;
        let account = request.account;
        let target = request
            .auth_url
            .unwrap_or(self.config.provider.default_login_url.as_str());

        surface.goto(target).await?;
        let popup = if self.enter_email(surface.as_ref(), account).await? {
            self.enter_password(context, surface.as_ref(), account).await?
        } else {
            None
        };

        let signals = &self.config.provider.signals;
        let mut active_id = popup.unwrap_or_else(|| surface.id().to_string());
        let mut outcome = FlowOutcome::default();
        loop {
            let active = self
                .resolve_active(context, &surface, &active_id, &request.excluded)
                .await;
            if active.id() != active_id {
                debug!(from = %active_id, to = %active.id(), "Active surface changed");
                active_id = active.id().to_string();
            }

            let url = active.url().await.unwrap_or_default();
            let text = active.body_text().await.unwrap_or_default();
            outcome.final_url = url.clone();

            match classify_tick(&TickObservation { url, text }, &self.signals) {
                Tick::InvalidCredentials => {
                    info!(email = %account.redacted_email(), "Provider rejected credentials");
                    outcome.invalid_credentials = true;
                    return Ok(outcome);
                }
                Tick::Success => {
                    info!(email = %account.redacted_email(), "Provider flow reached success page");
                    outcome.reached_success = true;
                    return Ok(outcome);
                }
                Tick::Callback(callback) => {
                    info!(email = %account.redacted_email(), "Captured provider callback");
                    outcome.callback_url = Some(callback);
                    return Ok(outcome);
                }
                Tick::Pending => {}
            }

            let texts = active.frame_texts().await.unwrap_or_default();
            if let Some(step) =
                consent::click_through(active.as_ref(), &texts, signals, &self.signals).await
            {
                debug!(?step, "Consent click attempted");
            }
            match challenge::detect_challenge(
                active.as_ref(),
                &texts,
                &signals.challenge_selectors,
                &self.signals,
            )
            .await
            {
                Ok(true) => {
                    warn!(
                        email = %account.redacted_email(),
                        "Human verification challenge detected"
                    );
                    outcome.challenge = true;
                    return Ok(outcome);
                }
                Ok(false) => {}
                Err(e) => debug!(error = %e, "Challenge probe failed"),
            }

            if Instant::now() + self.interval() > deadline {
                warn!(
                    email = %account.redacted_email(),
                    final_url = %outcome.final_url,
                    "Provider flow timed out"
                );
                return Ok(outcome);
            }
            tokio::time::sleep(self.interval()).await;
        }
    }
}

async fn surface_ids(context: &dyn SurfaceContext) -> HashSet<String> {
    context
        .surfaces()
        .await
        .map(|all| all.iter().map(|s| s.id().to_string()).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SignalConfig;
    use crate::surface::testing::{MockContext, MockState, MockSurface};

    const AUTH_URL: &str = "https://auth.openai.com/oauth/authorize?client_id=app&state=abc123";
    const EMAIL: &str = "input[type=\"email\"]";
    const PASSWORD: &str = "input[type=\"password\"]";
    const SUBMIT: &str = "button[type=\"submit\"]";

    fn driver() -> ProviderFlowDriver {
        let mut config = AutomationConfig::default();
        config.timeouts.poll_interval_ms = 5;
        config.timeouts.step_secs = 1;
        config.timeouts.popup_grace_ms = 20;
        ProviderFlowDriver::new(Arc::new(config)).unwrap()
    }

    fn account() -> AccountCredential {
        AccountCredential::new("a@x.com", "p1", "free")
    }

    fn request<'a>(account: &'a AccountCredential, timeout: Duration) -> FlowRequest<'a> {
        FlowRequest {
            auth_url: Some(AUTH_URL),
            account,
            timeout,
            excluded: vec!["console".to_string()],
        }
    }

    /// Provider page that walks email -> password -> `after_password`.
    fn provider_surface(
        after_password: impl Fn(&mut MockState) + Send + Sync + 'static,
    ) -> Arc<MockSurface> {
        let surface = MockSurface::new("flow", "about:blank");
        surface.state().show(&[EMAIL, SUBMIT]);
        surface.on(&format!("fill:{}", EMAIL), |state| {
            state.hide(&[EMAIL]);
        });
        surface.on(&format!("click:{}", SUBMIT), |state| {
            if !state.log.iter().any(|e| e.starts_with("fill:input[type=\"password\"]")) {
                state.show(&[PASSWORD]);
            }
        });
        surface.on(&format!("fill:{}", PASSWORD), after_password);
        surface
    }

    async fn run_flow(surface: Arc<MockSurface>, timeout: Duration) -> FlowOutcome {
        let console = MockSurface::new("console", "http://127.0.0.1:8317/management.html#/oauth");
        let context = MockContext::new("ctx", vec![console.clone(), surface.clone()]);
        context.open_surface().await.unwrap();
        let flow_surface = context.open_surface().await.unwrap();
        let account = account();
        driver()
            .run(context.as_ref(), flow_surface, request(&account, timeout))
            .await
            .unwrap()
    }

    #[test]
    fn tick_classification_order() {
        let signals = SignalConfig::default().compile().unwrap();
        let tick = |url: &str, text: &str| {
            classify_tick(
                &TickObservation {
                    url: url.to_string(),
                    text: text.to_string(),
                },
                &signals,
            )
        };
        assert_eq!(
            tick("http://localhost:1455/success", "Incorrect email address or password"),
            Tick::InvalidCredentials
        );
        assert_eq!(tick("http://localhost:1455/success", ""), Tick::Success);
        let callback = "http://localhost:1455/auth/callback?code=ac_1&state=abc123";
        assert_eq!(tick(callback, ""), Tick::Callback(callback.to_string()));
        assert_eq!(tick("https://auth.openai.com/log-in", "Welcome back"), Tick::Pending);
    }

    #[tokio::test]
    async fn walks_to_success_page() {
        let surface = provider_surface(|state| {
            state.url = "http://localhost:1455/success".to_string();
        });
        let outcome = run_flow(surface.clone(), Duration::from_secs(2)).await;
        assert!(outcome.reached_success);
        assert!(!outcome.challenge && !outcome.invalid_credentials);
        assert_eq!(outcome.final_url, "http://localhost:1455/success");
        assert_eq!(surface.log()[0], format!("goto:{}", AUTH_URL));
    }

    #[tokio::test]
    async fn reports_rejected_credentials() {
        let surface = provider_surface(|state| {
            state.set_body("Incorrect email address or password");
        });
        let outcome = run_flow(surface, Duration::from_secs(2)).await;
        assert!(outcome.invalid_credentials);
        assert!(!outcome.reached_success);
    }

    #[tokio::test]
    async fn clicks_consent_then_captures_callback() {
        let surface = provider_surface(|state| {
            state.url = "https://auth.openai.com/sign-in-with-chatgpt/codex/consent".to_string();
            state.set_body("Log in to Codex\nVerify it's you before continuing");
            state.buttons = vec!["Cancel".to_string(), "Continue".to_string()];
        });
        surface.on("text:Continue", |state| {
            state.url = "http://localhost:1455/auth/callback?code=ac_1&state=abc123".to_string();
        });
        let outcome = run_flow(surface.clone(), Duration::from_secs(2)).await;
        assert_eq!(
            outcome.callback_url.as_deref(),
            Some("http://localhost:1455/auth/callback?code=ac_1&state=abc123")
        );
        assert!(!outcome.challenge);
        assert!(surface.log().contains(&"text:Continue".to_string()));
    }

    #[tokio::test]
    async fn takes_password_path_when_offered() {
        let surface = MockSurface::new("flow", "about:blank");
        surface.state().show(&[EMAIL]);
        surface.state().buttons = vec!["Continue with password".to_string()];
        surface.on("text:Continue with password", |state| state.show(&[PASSWORD]));
        surface.on(&format!("fill:{}", PASSWORD), |state| {
            state.url = "http://localhost:1455/success".to_string();
        });
        let outcome = run_flow(surface.clone(), Duration::from_secs(2)).await;
        assert!(outcome.reached_success);
        let log = surface.log();
        assert!(log.contains(&"key:Enter".to_string()));
        assert!(log.contains(&"text:Continue with password".to_string()));
    }

    #[tokio::test]
    async fn stops_on_challenge() {
        let surface = provider_surface(|state| {
            state.set_body("Please verify you are human");
        });
        let outcome = run_flow(surface, Duration::from_secs(2)).await;
        assert!(outcome.challenge);
        assert!(outcome.callback_url.is_none());
    }

    #[tokio::test]
    async fn follows_provider_popup() {
        let popup = MockSurface::new("popup", "https://auth.openai.com/authorize?popup=1");
        popup.on("scroll", |state| {
            state.url = "http://localhost:1455/success".to_string();
        });
        popup.state().set_body("Log in to Codex");
        let surface = provider_surface(|state| state.popup_open = true);
        surface.state().popup = Some(popup.clone());

        let outcome = run_flow(surface, Duration::from_secs(2)).await;
        assert!(outcome.reached_success);
        assert!(popup.log().contains(&"scroll".to_string()));
    }

    #[tokio::test]
    async fn follows_popup_on_unranked_url() {
        let popup = MockSurface::new("popup", "https://consent.example.com/approve");
        popup.on("scroll", |state| {
            state.url = "http://localhost:1455/success".to_string();
        });
        popup.state().set_body("Log in to Codex");
        let surface = provider_surface(|state| state.popup_open = true);
        surface.state().popup = Some(popup.clone());

        let outcome = run_flow(surface.clone(), Duration::from_secs(2)).await;
        assert!(outcome.reached_success);
        assert_eq!(outcome.final_url, "http://localhost:1455/success");
        assert!(popup.log().contains(&"scroll".to_string()));
        assert_eq!(surface.state().url, AUTH_URL);
    }

    #[tokio::test]
    async fn times_out_without_terminal_signal() {
        let surface = provider_surface(|state| {
            state.url = "https://auth.openai.com/log-in/password".to_string();
        });
        let outcome = run_flow(surface, Duration::from_millis(100)).await;
        assert_eq!(
            outcome,
            FlowOutcome {
                final_url: "https://auth.openai.com/log-in/password".to_string(),
                ..FlowOutcome::default()
            }
        );
    }
}
