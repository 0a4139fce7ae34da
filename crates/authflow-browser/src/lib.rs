//! Chromium runtime for authflow.
//!
//! This crate provides an isolated-context browser service built directly on
//! the Chrome DevTools Protocol. It supports:
//! - Runtime probing for a usable Chromium executable
//! - Launching a private Chromium or attaching to a running one
//! - Context lifecycle management (fresh cookies/storage per context)
//! - Page primitives: navigation, evaluation across frames, real pointer and
//!   keyboard input, screenshots

pub mod cdp;
pub mod context;
pub mod launcher;
pub mod page;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

pub use cdp::CdpConnection;
pub use context::CdpContext;
pub use launcher::{ChromiumProcess, LaunchOptions, find_chromium};
pub use page::CdpPage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeProbe {
    pub chromium_path: Option<String>,
    pub cdp_endpoint: Option<String>,
    pub ready: bool,
    pub notes: Vec<String>,
}

/// A single page target (tab or popup).
#[async_trait]
pub trait BrowserPage: Send + Sync {
    fn id(&self) -> &str;

    async fn url(&self) -> Result<String>;

    async fn goto(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Evaluate an expression in the main frame, awaiting promises and
    /// returning the value serialized as JSON.
    async fn evaluate(&self, expression: &str) -> Result<Value>;

    /// Evaluate an expression in every frame of the page. Frames that
    /// cannot be evaluated are skipped.
    async fn evaluate_in_frames(&self, expression: &str) -> Result<Vec<Value>>;

    /// Move, press and release the primary mouse button at viewport
    /// coordinates.
    async fn click_at(&self, x: f64, y: f64) -> Result<()>;

    async fn press_key(&self, key: &str) -> Result<()>;

    async fn insert_text(&self, text: &str) -> Result<()>;

    async fn screenshot(&self, path: &Path) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Isolated browsing context owning its pages and popups.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    fn id(&self) -> &str;

    async fn new_page(&self) -> Result<Arc<dyn BrowserPage>>;

    /// Every live page of the context, including popups it spawned.
    async fn pages(&self) -> Result<Vec<Arc<dyn BrowserPage>>>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait BrowserRuntime: Send + Sync {
    async fn probe_runtime(&self) -> Result<RuntimeProbe>;

    async fn new_context(&self) -> Result<Arc<dyn BrowserContext>>;
}

#[derive(Debug, Clone, Default)]
pub struct BrowserOptions {
    pub launch: LaunchOptions,
    /// Attach to this DevTools endpoint instead of launching Chromium.
    pub cdp_url: Option<String>,
}

struct Running {
    conn: Arc<CdpConnection>,
    process: Option<ChromiumProcess>,
}

/// Browser service with lazy startup and context bookkeeping.
pub struct BrowserService {
    options: BrowserOptions,
    running: Mutex<Option<Running>>,
    contexts: RwLock<HashMap<String, Arc<CdpContext>>>,
}

impl BrowserService {
    pub fn new(options: BrowserOptions) -> Self {
        Self {
            options,
            running: Mutex::new(None),
            contexts: RwLock::new(HashMap::new()),
        }
    }

    async fn connection(&self) -> Result<Arc<CdpConnection>> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref()
            && !current.conn.is_closed()
        {
            return Ok(current.conn.clone());
        }

        let (ws_url, process) = match &self.options.cdp_url {
            Some(endpoint) => {
                info!(endpoint = %endpoint, "Attaching to running Chromium");
                (launcher::resolve_ws_url(endpoint).await?, None)
            }
            None => {
                let process = launcher::launch(&self.options.launch).await?;
                (process.ws_url().to_string(), Some(process))
            }
        };

        let conn = CdpConnection::connect(&ws_url).await?;
        *running = Some(Running {
            conn: conn.clone(),
            process,
        });
        Ok(conn)
    }

    /// Dispose every open context and stop the launched browser, if any.
    pub async fn shutdown(&self) -> Result<()> {
        let drained: Vec<_> = self.contexts.write().await.drain().collect();
        for (id, context) in drained {
            if let Err(e) = context.close().await {
                debug!(context_id = %id, error = %e, "Context already gone during shutdown");
            }
        }

        if let Some(running) = self.running.lock().await.take()
            && let Some(process) = running.process
        {
            process.shutdown().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserRuntime for BrowserService {
    async fn probe_runtime(&self) -> Result<RuntimeProbe> {
        let mut probe = RuntimeProbe {
            chromium_path: None,
            cdp_endpoint: self.options.cdp_url.clone(),
            ready: false,
            notes: Vec::new(),
        };

        if let Some(endpoint) = &self.options.cdp_url {
            match launcher::resolve_ws_url(endpoint).await {
                Ok(_) => probe.ready = true,
                Err(e) => probe
                    .notes
                    .push(format!("DevTools endpoint {} unreachable: {}", endpoint, e)),
            }
            return Ok(probe);
        }

        let path = self
            .options
            .launch
            .executable
            .clone()
            .filter(|p| p.is_file())
            .or_else(find_chromium);
        probe.chromium_path = path.as_ref().map(|p| p.display().to_string());
        probe.ready = path.is_some();

        if !probe.ready {
            probe.notes.push(
                "Chromium not found. Install Chrome/Chromium or set AUTHFLOW_CHROME to its executable."
                    .to_string(),
            );
        }
        Ok(probe)
    }

    async fn new_context(&self) -> Result<Arc<dyn BrowserContext>> {
        let conn = self.connection().await?;
        let context = Arc::new(CdpContext::create(conn).await?);

        let mut contexts = self.contexts.write().await;
        contexts.retain(|_, ctx| !ctx.is_closed());
        contexts.insert(context.id().to_string(), context.clone());
        Ok(context)
    }
}

/// Render a JSON value as a JavaScript literal for embedding in scripts.
pub fn js_literal<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| anyhow!("Failed to encode script argument: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn probe_reports_missing_executable() {
        let service = BrowserService::new(BrowserOptions {
            launch: LaunchOptions {
                executable: Some("/nonexistent/chromium".into()),
                ..LaunchOptions::default()
            },
            cdp_url: None,
        });
        let probe = service.probe_runtime().await.unwrap();
        if probe.chromium_path.is_none() {
            assert!(!probe.ready);
            assert_eq!(probe.notes.len(), 1);
        }
    }

    #[tokio::test]
    async fn shutdown_without_browser_is_noop() {
        let service = BrowserService::new(BrowserOptions::default());
        service.shutdown().await.unwrap();
        service.shutdown().await.unwrap();
    }

    #[test]
    fn js_literal_escapes_strings() {
        assert_eq!(js_literal(&"a\"b").unwrap(), r#""a\"b""#);
        assert_eq!(js_literal(&json!(["x", 1])).unwrap(), r#"["x",1]"#);
    }
}
