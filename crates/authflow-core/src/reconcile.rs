//! Status reconciliation between the provider flow and the console.
//!
//! Flow-level signals win: rejected credentials, then a challenge, then the
//! console's own verdict.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::console::{ConsoleController, ConsoleStatus};
use crate::error::{FailureCode, Result};
use crate::flow::FlowOutcome;
use crate::surface::Surface;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failed { code: FailureCode, message: String },
}

impl Verdict {
    fn failed(code: FailureCode, message: impl Into<String>) -> Self {
        Verdict::Failed {
            code,
            message: message.into(),
        }
    }
}

/// Combine flow and console observations into one verdict.
pub fn reconcile(flow: &FlowOutcome, console: &ConsoleStatus) -> Verdict {
    if flow.invalid_credentials {
        return Verdict::failed(FailureCode::LoginRejected, "provider rejected the credentials");
    }
    if flow.challenge {
        return Verdict::failed(
            FailureCode::ChallengeRequired,
            "human verification challenge required",
        );
    }
    match console {
        ConsoleStatus::Error(message) => Verdict::failed(
            FailureCode::CpamcOauthFailed,
            message.clone().unwrap_or_else(|| "console reported an error".to_string()),
        ),
        ConsoleStatus::Waiting if flow.reached_success || flow.callback_url.is_some() => {
            Verdict::failed(FailureCode::CpamcOauthFailed, "status timeout")
        }
        ConsoleStatus::Waiting => Verdict::failed(
            FailureCode::CallbackUrlNotCaptured,
            format!("no callback captured (last url: {})", flow.final_url),
        ),
        ConsoleStatus::Success => Verdict::Success,
    }
}

/// Read the console's view of the attempt and reconcile it with `flow`.
///
/// Skips polling when the flow already failed. When the console is still
/// waiting but the flow captured a callback, the callback is submitted and
/// the status polled once more with the remaining budget.
pub async fn settle(
    console: &dyn ConsoleController,
    control: &dyn Surface,
    flow: &FlowOutcome,
    state: &str,
    secret_key: &str,
    timeout: Duration,
) -> Result<Verdict> {
    if flow.invalid_credentials || flow.challenge {
        return Ok(reconcile(flow, &ConsoleStatus::Waiting));
    }

    let deadline = Instant::now() + timeout;
    let mut status = console
        .poll_status(control, Some(state), secret_key, timeout)
        .await?;

    if status.is_waiting()
        && let Some(callback) = &flow.callback_url
    {
        if let Err(e) = console.submit_callback(callback, state, secret_key).await {
            warn!(error = %e, "Callback submission failed");
            return Ok(Verdict::failed(FailureCode::CallbackSubmitFailed, e.to_string()));
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        info!(
            remaining_ms = remaining.as_millis() as u64,
            "Re-polling status after callback submission"
        );
        status = console
            .poll_status(control, Some(state), secret_key, remaining)
            .await?;
    }

    Ok(reconcile(flow, &status))
}
