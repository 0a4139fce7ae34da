//! Page-signal probe.
//!
//! A [`Surface`] is one browsing target (page or popup) the automation can
//! observe and act on. The console controller and the identity flow only talk
//! to this trait, so tests drive them with scripted mocks while production
//! uses the CDP-backed implementation in [`cdp`].

pub mod cdp;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CompiledSignals;
use crate::error::Result;

pub use cdp::{CdpSurface, CdpSurfaceContext, CdpSurfaceFactory};

/// Response of an in-page `fetch`, executed with the page's cookies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait Surface: Send + Sync {
    fn id(&self) -> &str;

    async fn url(&self) -> Result<String>;

    async fn goto(&self, url: &str) -> Result<()>;

    /// True if any selector matches a visible element in any frame.
    async fn any_visible(&self, selectors: &[String]) -> Result<bool>;

    /// Fill the first visible match of `selectors`. False when none is found.
    async fn fill(&self, selectors: &[String], value: &str) -> Result<bool>;

    /// Click the first visible, enabled match of `selectors`.
    async fn click(&self, selectors: &[String]) -> Result<bool>;

    /// Click the first visible, enabled clickable-role element (any frame)
    /// whose text matches `pattern` and not `exclude`, with a real pointer
    /// sequence.
    async fn click_text(&self, pattern: &str, exclude: Option<&str>) -> Result<bool>;

    /// Structural fallback: `button`/`[role=button]` in the main frame only.
    async fn click_button_role(&self, pattern: &str, exclude: Option<&str>) -> Result<bool>;

    /// Enabled state of the first visible control matching `selectors`, or
    /// whose text matches `text_pattern`. `None` when no such control exists.
    async fn control_enabled(
        &self,
        selectors: &[String],
        text_pattern: Option<&str>,
    ) -> Result<Option<bool>>;

    /// Visible text of the main frame.
    async fn body_text(&self) -> Result<String>;

    /// Visible text of every frame, main frame first.
    async fn frame_texts(&self) -> Result<Vec<String>>;

    /// Scroll the document and every scrollable container to its end.
    async fn scroll_to_end(&self) -> Result<()>;

    async fn press_key(&self, key: &str) -> Result<()>;

    async fn fetch_text(&self, url: &str, headers: &[(String, String)]) -> Result<FetchResponse>;

    async fn screenshot(&self, path: &Path) -> Result<()>;
}

/// Isolated browsing context; closing it tears down every surface it owns.
#[async_trait]
pub trait SurfaceContext: Send + Sync {
    fn id(&self) -> &str;

    async fn open_surface(&self) -> Result<Arc<dyn Surface>>;

    /// Every live surface, including popups opened by the provider.
    async fn surfaces(&self) -> Result<Vec<Arc<dyn Surface>>>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait SurfaceFactory: Send + Sync {
    async fn new_context(&self) -> Result<Arc<dyn SurfaceContext>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceSnapshot {
    pub id: String,
    pub url: String,
}

/// Candidate surfaces of one tick and the one chosen as active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceSet {
    pub candidates: Vec<SurfaceSnapshot>,
    pub active: String,
}

const SUCCESS_RANK: u8 = 2;

/// Preference of a surface URL: callback > success > provider auth > other.
pub fn surface_rank(url: &str, signals: &CompiledSignals) -> u8 {
    if signals.is_callback_url(url) {
        SUCCESS_RANK + 1
    } else if signals.is_success_url(url) {
        SUCCESS_RANK
    } else if signals.is_auth_url(url) {
        1
    } else {
        0
    }
}

impl SurfaceSet {
    /// Pick the active surface among `candidates`.
    ///
    /// Surfaces listed in `excluded` (the console control surface) are never
    /// chosen. A popup that was already active stays active while it exists
    /// and nothing outranks it; the initiating surface only takes control
    /// back once it reaches a success or callback URL. Otherwise, among the
    /// best-ranked surfaces, ones other than `initiating` win. When no
    /// candidate ranks above zero the previous active surface is kept if it
    /// still exists.
    pub fn resolve(
        candidates: Vec<SurfaceSnapshot>,
        initiating: &str,
        previous: &str,
        excluded: &[String],
        signals: &CompiledSignals,
    ) -> Self {
        let eligible: Vec<(&SurfaceSnapshot, u8)> = candidates
            .iter()
            .filter(|c| !excluded.contains(&c.id))
            .map(|c| (c, surface_rank(&c.url, signals)))
            .collect();

        let held = eligible
            .iter()
            .find(|(c, _)| c.id == previous && c.id != initiating)
            .map(|(_, rank)| *rank)
            .filter(|held| {
                !eligible.iter().any(|(c, rank)| {
                    *rank > *held && (c.id != initiating || *rank >= SUCCESS_RANK)
                })
            });

        let best = eligible.iter().map(|(_, rank)| *rank).max().unwrap_or(0);
        let active = if held.is_some() {
            Some(previous.to_string())
        } else if best > 0 {
            let top: Vec<&SurfaceSnapshot> = eligible
                .iter()
                .filter(|(_, rank)| *rank == best)
                .map(|(c, _)| *c)
                .collect();
            top.iter()
                .find(|c| c.id != initiating)
                .or_else(|| top.first())
                .map(|c| c.id.clone())
        } else if eligible.iter().any(|(c, _)| c.id == previous) {
            Some(previous.to_string())
        } else if eligible.iter().any(|(c, _)| c.id == initiating) {
            Some(initiating.to_string())
        } else {
            eligible.first().map(|(c, _)| c.id.clone())
        };

        Self {
            active: active.unwrap_or_else(|| initiating.to_string()),
            candidates,
        }
    }
}

/// Poll `probe` every `interval` until it yields `Some` or `timeout` passes.
/// Probe errors count as "not yet".
pub async fn wait_for<T, F, Fut>(timeout: Duration, interval: Duration, mut probe: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Option<T>>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(Some(value)) = probe().await {
            return Some(value);
        }
        if tokio::time::Instant::now() + interval > deadline {
            return None;
        }
        tokio::time::sleep(interval).await;
    }
}
