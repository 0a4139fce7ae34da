//! CDP-backed surfaces.
//!
//! Element lookups run as small scripts in the page's isolated world. Main
//! frame clicks go through real pointer input at the element's centre;
//! elements inside child frames receive a dispatched pointer/mouse sequence
//! instead, since their coordinates are frame-relative.

use async_trait::async_trait;
use authflow_browser::{BrowserContext, BrowserPage, BrowserRuntime, js_literal};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{FetchResponse, Surface, SurfaceContext, SurfaceFactory};
use crate::error::{AutomationError, Result};

const PRELUDE: &str = r#"
const visible = (el) => {
  if (!el || !el.isConnected) return false;
  const s = getComputedStyle(el);
  if (s.visibility === 'hidden' || s.display === 'none' || Number(s.opacity) === 0) return false;
  const r = el.getBoundingClientRect();
  return r.width > 0 && r.height > 0;
};
const disabled = (el) => el.disabled === true || el.getAttribute('aria-disabled') === 'true';
const firstVisible = (sels, enabledOnly) => {
  for (const sel of sels) {
    let list;
    try { list = document.querySelectorAll(sel); } catch (e) { continue; }
    for (const el of list) {
      if (visible(el) && !(enabledOnly && disabled(el))) return el;
    }
  }
  return null;
};
const label = (el) => (el.innerText || el.value || el.getAttribute('aria-label') || '').trim();
const CLICKABLE = 'button, [role="button"], a, [role="link"], [role="menuitem"], input[type="submit"], input[type="button"]';
const byText = (root, pattern, exclude) => {
  const re = new RegExp(pattern, 'i');
  const ex = exclude ? new RegExp(exclude, 'i') : null;
  for (const el of root.querySelectorAll(CLICKABLE)) {
    if (!visible(el) || disabled(el)) continue;
    const text = label(el);
    if (!text || !re.test(text) || (ex && ex.test(text))) continue;
    return el;
  }
  return null;
};
const centre = (el) => {
  el.scrollIntoView({ block: 'center', inline: 'center' });
  const r = el.getBoundingClientRect();
  return { x: r.left + r.width / 2, y: r.top + r.height / 2 };
};
const press = (el) => {
  const r = el.getBoundingClientRect();
  const init = { bubbles: true, cancelable: true, composed: true, view: window, button: 0,
    clientX: r.left + r.width / 2, clientY: r.top + r.height / 2 };
  el.dispatchEvent(new PointerEvent('pointerdown', init));
  el.dispatchEvent(new MouseEvent('mousedown', init));
  el.dispatchEvent(new PointerEvent('pointerup', init));
  el.dispatchEvent(new MouseEvent('mouseup', init));
  el.click();
};
const setValue = (el, value) => {
  const proto = el instanceof HTMLTextAreaElement ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
  const setter = Object.getOwnPropertyDescriptor(proto, 'value').set;
  setter.call(el, value);
  el.dispatchEvent(new Event('input', { bubbles: true }));
};
const isTop = window === window.top;
"#;

const SCROLL_SCRIPT: &str = r#"(() => {
  for (const el of document.querySelectorAll('*')) {
    const s = getComputedStyle(el);
    if (el.scrollHeight > el.clientHeight && /(auto|scroll)/.test(s.overflowY)) {
      el.scrollTop = el.scrollHeight;
    }
  }
  const root = document.scrollingElement || document.documentElement;
  if (root) window.scrollTo(0, root.scrollHeight);
  return true;
})()"#;

const TEXT_SCRIPT: &str = "(() => document.body ? document.body.innerText : '')()";

fn script(body: &str) -> String {
    format!("(() => {{ {}\n{} }})()", PRELUDE, body)
}

fn point(value: &Value) -> Option<(f64, f64)> {
    Some((value.get("x")?.as_f64()?, value.get("y")?.as_f64()?))
}

pub struct CdpSurface {
    page: Arc<dyn BrowserPage>,
    navigation_timeout: Duration,
}

impl CdpSurface {
    pub fn new(page: Arc<dyn BrowserPage>, navigation_timeout: Duration) -> Self {
        Self {
            page,
            navigation_timeout,
        }
    }

    /// Locate in the main frame and click with real input, else fall back to
    /// a dispatched click inside child frames.
    async fn click_located(&self, locate: &str) -> Result<bool> {
        let main = self
            .page
            .evaluate(&script(&format!(
                "const el = {locate}; if (!el) return null; return centre(el);"
            )))
            .await?;
        if let Some((x, y)) = point(&main) {
            self.page.click_at(x, y).await?;
            return Ok(true);
        }

        let frames = self
            .page
            .evaluate_in_frames(&script(&format!(
                "if (isTop) return false; const el = {locate}; if (!el) return false; press(el); return true;"
            )))
            .await?;
        Ok(frames.iter().any(|v| v.as_bool() == Some(true)))
    }
}

#[async_trait]
impl Surface for CdpSurface {
    fn id(&self) -> &str {
        self.page.id()
    }

    async fn url(&self) -> Result<String> {
        Ok(self.page.url().await?)
    }

    async fn goto(&self, url: &str) -> Result<()> {
        Ok(self.page.goto(url, self.navigation_timeout).await?)
    }

    async fn any_visible(&self, selectors: &[String]) -> Result<bool> {
        let sels = js_literal(&selectors)?;
        let values = self
            .page
            .evaluate_in_frames(&script(&format!("return firstVisible({sels}, false) !== null;")))
            .await?;
        Ok(values.iter().any(|v| v.as_bool() == Some(true)))
    }

    async fn fill(&self, selectors: &[String], value: &str) -> Result<bool> {
        let sels = js_literal(&selectors)?;
        let focused = self
            .page
            .evaluate(&script(&format!(
                "const el = firstVisible({sels}, true); if (!el) return false; \
                 el.focus(); setValue(el, ''); return true;"
            )))
            .await?;
        if focused.as_bool() == Some(true) {
            self.page.insert_text(value).await?;
            self.page
                .evaluate(
                    "(() => { const el = document.activeElement; \
                     if (el) el.dispatchEvent(new Event('change', { bubbles: true })); return true; })()",
                )
                .await?;
            return Ok(true);
        }

        let literal = js_literal(&value)?;
        let frames = self
            .page
            .evaluate_in_frames(&script(&format!(
                "if (isTop) return false; const el = firstVisible({sels}, true); if (!el) return false; \
                 el.focus(); setValue(el, {literal}); \
                 el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true;"
            )))
            .await?;
        Ok(frames.iter().any(|v| v.as_bool() == Some(true)))
    }

    async fn click(&self, selectors: &[String]) -> Result<bool> {
        let sels = js_literal(&selectors)?;
        self.click_located(&format!("firstVisible({sels}, true)"))
            .await
    }

    async fn click_text(&self, pattern: &str, exclude: Option<&str>) -> Result<bool> {
        let pattern = js_literal(&pattern)?;
        let exclude = js_literal(&exclude)?;
        self.click_located(&format!("byText(document, {pattern}, {exclude})"))
            .await
    }

    async fn click_button_role(&self, pattern: &str, exclude: Option<&str>) -> Result<bool> {
        let pattern = js_literal(&pattern)?;
        let exclude = js_literal(&exclude)?;
        let located = self
            .page
            .evaluate(&script(&format!(
                "const re = new RegExp({pattern}, 'i'); \
                 const ex = {exclude} ? new RegExp({exclude}, 'i') : null; \
                 for (const el of document.querySelectorAll('button, [role=\"button\"]')) {{ \
                   const text = label(el); \
                   if (!visible(el) || disabled(el) || !re.test(text) || (ex && ex.test(text))) continue; \
                   return centre(el); \
                 }} \
                 return null;"
            )))
            .await?;
        match point(&located) {
            Some((x, y)) => {
                self.page.click_at(x, y).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn control_enabled(
        &self,
        selectors: &[String],
        text_pattern: Option<&str>,
    ) -> Result<Option<bool>> {
        let sels = js_literal(&selectors)?;
        let pattern = js_literal(&text_pattern)?;
        let state = self
            .page
            .evaluate(&script(&format!(
                "let el = firstVisible({sels}, false); \
                 if (!el && {pattern}) {{ \
                   const re = new RegExp({pattern}, 'i'); \
                   el = Array.from(document.querySelectorAll(CLICKABLE)).find((c) => visible(c) && re.test(label(c))) || null; \
                 }} \
                 return el ? !disabled(el) : null;"
            )))
            .await?;
        Ok(state.as_bool())
    }

    async fn body_text(&self) -> Result<String> {
        let text = self.page.evaluate(TEXT_SCRIPT).await?;
        Ok(text.as_str().unwrap_or_default().to_string())
    }

    async fn frame_texts(&self) -> Result<Vec<String>> {
        let values = self.page.evaluate_in_frames(TEXT_SCRIPT).await?;
        Ok(values
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    async fn scroll_to_end(&self) -> Result<()> {
        self.page.evaluate_in_frames(SCROLL_SCRIPT).await?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        Ok(self.page.press_key(key).await?)
    }

    async fn fetch_text(&self, url: &str, headers: &[(String, String)]) -> Result<FetchResponse> {
        let url = js_literal(&url)?;
        let headers: serde_json::Map<String, Value> = headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let headers = js_literal(&headers)?;
        let value = self
            .page
            .evaluate(&format!(
                "fetch({url}, {{ headers: {headers}, credentials: 'include' }})\
                 .then(async (r) => ({{ status: r.status, body: await r.text() }}))"
            ))
            .await?;
        serde_json::from_value(value).map_err(AutomationError::from)
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        Ok(self.page.screenshot(path).await?)
    }
}

pub struct CdpSurfaceContext {
    context: Arc<dyn BrowserContext>,
    navigation_timeout: Duration,
}

impl CdpSurfaceContext {
    pub fn new(context: Arc<dyn BrowserContext>, navigation_timeout: Duration) -> Self {
        Self {
            context,
            navigation_timeout,
        }
    }
}

#[async_trait]
impl SurfaceContext for CdpSurfaceContext {
    fn id(&self) -> &str {
        self.context.id()
    }

    async fn open_surface(&self) -> Result<Arc<dyn Surface>> {
        let page = self.context.new_page().await?;
        Ok(Arc::new(CdpSurface::new(page, self.navigation_timeout)))
    }

    async fn surfaces(&self) -> Result<Vec<Arc<dyn Surface>>> {
        let pages = self.context.pages().await?;
        Ok(pages
            .into_iter()
            .map(|page| {
                Arc::new(CdpSurface::new(page, self.navigation_timeout)) as Arc<dyn Surface>
            })
            .collect())
    }

    async fn close(&self) -> Result<()> {
        debug!(context_id = %self.context.id(), "Closing browser context");
        Ok(self.context.close().await?)
    }
}

/// Opens one isolated browser context per account.
pub struct CdpSurfaceFactory {
    runtime: Arc<dyn BrowserRuntime>,
    navigation_timeout: Duration,
}

impl CdpSurfaceFactory {
    pub fn new(runtime: Arc<dyn BrowserRuntime>, navigation_timeout: Duration) -> Self {
        Self {
            runtime,
            navigation_timeout,
        }
    }
}

#[async_trait]
impl SurfaceFactory for CdpSurfaceFactory {
    async fn new_context(&self) -> Result<Arc<dyn SurfaceContext>> {
        let context = self.runtime.new_context().await?;
        Ok(Arc::new(CdpSurfaceContext::new(
            context,
            self.navigation_timeout,
        )))
    }
}
