//! Batch orchestrator.
//!
//! Accounts run strictly one after another, each in a fresh isolated
//! browser context that is closed whatever the outcome. Every input account
//! yields exactly one [`AuthResult`], in input order.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

use crate::artifact::{ArtifactVerifier, find_existing, sanitize_email};
use crate::config::AutomationConfig;
use crate::console::ConsoleController;
use crate::error::{AutomationError, FailureCode, Result};
use crate::flow::{FlowRequest, IdentityFlow};
use crate::models::{AccountCredential, AuthAttempt, AuthResult, RunReport};
use crate::reconcile::{self, Verdict};
use crate::surface::{SurfaceContext, SurfaceFactory};

/// Artifacts modified this long before an attempt started still count as
/// written by it (filesystem timestamp granularity).
const MTIME_SLACK: Duration = Duration::from_secs(2);

/// Progress hooks for callers that render per-account output.
pub trait BatchObserver: Send + Sync {
    fn on_account_start(&self, _position: usize, _total: usize, _account: &AccountCredential) {}

    fn on_account_done(&self, _position: usize, _total: usize, _result: &AuthResult) {}
}

pub struct NoopObserver;

impl BatchObserver for NoopObserver {}

pub struct BatchOrchestrator {
    config: Arc<AutomationConfig>,
    surfaces: Arc<dyn SurfaceFactory>,
    console: Arc<dyn ConsoleController>,
    flow: Arc<dyn IdentityFlow>,
    verifier: ArtifactVerifier,
    secret_key: String,
}

impl BatchOrchestrator {
    pub fn new(
        config: Arc<AutomationConfig>,
        surfaces: Arc<dyn SurfaceFactory>,
        console: Arc<dyn ConsoleController>,
        flow: Arc<dyn IdentityFlow>,
        secret_key: impl Into<String>,
    ) -> Self {
        let verifier = ArtifactVerifier::new(&config.paths.auth_dir, config.timeouts.artifact());
        Self {
            config,
            surfaces,
            console,
            flow,
            verifier,
            secret_key: secret_key.into(),
        }
    }

    pub fn with_verifier(mut self, verifier: ArtifactVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    /// Process `accounts` (up to the configured limit) and build the report.
    pub async fn run(
        &self,
        accounts: &[AccountCredential],
        observer: &dyn BatchObserver,
    ) -> RunReport {
        let limit = self.config.run.limit.unwrap_or(accounts.len());
        let selected = &accounts[..limit.min(accounts.len())];
        let total = selected.len();
        info!(total, "Starting batch");

        let mut results = Vec::with_capacity(total);
        for (position, account) in selected.iter().enumerate() {
            if position > 0 && !self.config.timeouts.account_delay().is_zero() {
                tokio::time::sleep(self.config.timeouts.account_delay()).await;
            }
            observer.on_account_start(position, total, account);
            let result = self.process(account).await;
            observer.on_account_done(position, total, &result);
            results.push(result);
        }

        let report = RunReport::new(
            results,
            &self.config.console.base_url,
            &self.verifier.auth_dir().display().to_string(),
        );
        info!(
            total = report.total,
            success = report.success,
            failed = report.failed,
            skipped = report.skipped,
            "Batch finished"
        );
        report
    }

    /// Run one account to a result. Never fails: errors become failed
    /// results.
    pub async fn process(&self, account: &AccountCredential) -> AuthResult {
        let mut attempt = AuthAttempt::begin();
        let email = account.redacted_email();

        if account.password.is_empty() {
            return AuthResult::failed(
                account,
                FailureCode::InvalidInput,
                "password is empty",
                attempt.started_at,
            );
        }
        if self.config.run.skip_existing
            && let Some(existing) = find_existing(self.verifier.auth_dir(), &account.email).await
        {
            info!(email = %email, "Artifact already present, skipping");
            return AuthResult::skipped(
                account,
                "artifact already exists",
                Some(existing.display().to_string()),
            );
        }

        let context = match self.surfaces.new_context().await {
            Ok(context) => context,
            Err(e) => {
                error!(email = %email, error = %e, "Failed to open browser context");
                return AuthResult::failed(account, e.code(), e.to_string(), attempt.started_at);
            }
        };

        let result = match self.attempt(context.as_ref(), account, &mut attempt).await {
            Ok(result) => result,
            Err(e) => {
                warn!(email = %email, code = %e.code(), error = %e, "Account attempt failed");
                AuthResult::failed(account, e.code(), e.to_string(), attempt.started_at)
            }
        };
        debug!(
            email = %email,
            elapsed_ms = (Utc::now() - attempt.started_at).num_milliseconds(),
            state = attempt.correlation_token.as_deref().unwrap_or_default(),
            final_url = %attempt.final_url,
            challenge = attempt.challenge_detected,
            invalid_credentials = attempt.invalid_credentials,
            callback = attempt.callback_url.is_some(),
            "Attempt finished"
        );

        if result.code.is_some() {
            self.capture_failure(context.as_ref(), account).await;
        }
        if let Err(e) = context.close().await {
            warn!(email = %email, error = %e, "Failed to close browser context");
        }
        result
    }

    async fn attempt(
        &self,
        context: &dyn SurfaceContext,
        account: &AccountCredential,
        attempt: &mut AuthAttempt,
    ) -> Result<AuthResult> {
        let timeouts = &self.config.timeouts;
        let since = SystemTime::now()
            .checked_sub(MTIME_SLACK)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let control = context.open_surface().await?;
        self.console
            .login(control.as_ref(), &self.secret_key, timeouts.login())
            .await?;
        let start = self
            .console
            .start_oauth(control.as_ref(), account, &self.secret_key, timeouts.oauth())
            .await?;
        attempt.correlation_token = Some(start.state.clone());

        let flow_surface = context.open_surface().await?;
        let outcome = self
            .flow
            .run(
                context,
                flow_surface,
                FlowRequest {
                    auth_url: Some(&start.auth_url),
                    account,
                    timeout: timeouts.flow(),
                    excluded: vec![control.id().to_string()],
                },
            )
            .await?;
        attempt.final_url = outcome.final_url.clone();
        attempt.challenge_detected = outcome.challenge;
        attempt.invalid_credentials = outcome.invalid_credentials;
        attempt.callback_url = outcome.callback_url.clone();

        let verdict = reconcile::settle(
            self.console.as_ref(),
            control.as_ref(),
            &outcome,
            &start.state,
            &self.secret_key,
            timeouts.status(),
        )
        .await?;

        match verdict {
            Verdict::Failed { code, message } => {
                Ok(AuthResult::failed(account, code, message, attempt.started_at))
            }
            Verdict::Success => match self.verifier.wait_for(&account.email, Some(since)).await {
                Ok(path) => {
                    info!(email = %account.redacted_email(), "Account authorized");
                    Ok(AuthResult::success(
                        account,
                        path.display().to_string(),
                        attempt.started_at,
                    ))
                }
                Err(e @ (AutomationError::WriteFailed(_) | AutomationError::TokenNotFound(_))) => {
                    Ok(AuthResult::failed(account, e.code(), e.to_string(), attempt.started_at))
                }
                Err(e) => Err(e),
            },
        }
    }

    /// Screenshot every surface of a failed attempt, if configured.
    async fn capture_failure(&self, context: &dyn SurfaceContext, account: &AccountCredential) {
        let Some(dir) = &self.config.paths.screenshot_dir else {
            return;
        };
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(dir = %dir.display(), error = %e, "Cannot create screenshot directory");
            return;
        }
        let Ok(surfaces) = context.surfaces().await else {
            return;
        };
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        for (n, surface) in surfaces.iter().enumerate() {
            let path = dir.join(format!("{}-{}-{}.png", sanitize_email(&account.email), stamp, n));
            if let Err(e) = surface.screenshot(&path).await {
                warn!(file = %path.display(), error = %e, "Failure screenshot not captured");
            }
        }
    }
}

/// Write the run report as pretty JSON, creating parent directories.
pub async fn write_report(path: &Path, report: &RunReport) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(report)?;
    tokio::fs::write(path, json).await?;
    Ok(path.to_path_buf())
}
