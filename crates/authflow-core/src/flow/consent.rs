//! Consent click-through.
//!
//! The provider's "Log in to Codex" consent page renders its Continue button
//! inside scrollable containers and sometimes a child frame. Every step here
//! is best effort; the settle loop retries on the next tick.

use tracing::debug;

use crate::config::{CompiledSignals, SignalConfig};
use crate::surface::Surface;

/// True when any frame shows the consent heading.
pub fn is_consent_page(texts: &[String], signals: &CompiledSignals) -> bool {
    texts.iter().any(|text| signals.consent_page.is_match(text))
}

/// Which step activated the consent control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentClick {
    Text,
    ButtonRole,
    Keyboard,
}

/// Try to press Continue. Fallbacks only run while the consent page is
/// actually showing.
pub async fn click_through(
    surface: &dyn Surface,
    texts: &[String],
    config: &SignalConfig,
    signals: &CompiledSignals,
) -> Option<ConsentClick> {
    let consent = is_consent_page(texts, signals);
    if consent && let Err(e) = surface.scroll_to_end().await {
        debug!(error = %e, "Scroll before consent click failed");
    }

    let cancel = Some(config.cancel_pattern.as_str());
    if let Ok(true) = surface.click_text(&config.continue_pattern, cancel).await {
        return Some(ConsentClick::Text);
    }
    if !consent {
        return None;
    }

    if let Ok(true) = surface
        .click_button_role(&config.continue_pattern, cancel)
        .await
    {
        return Some(ConsentClick::ButtonRole);
    }

    let keyboard = async {
        surface.press_key("Tab").await?;
        surface.press_key("Enter").await
    };
    match keyboard.await {
        Ok(()) => Some(ConsentClick::Keyboard),
        Err(e) => {
            debug!(error = %e, "Keyboard consent fallback failed");
            None
        }
    }
}
