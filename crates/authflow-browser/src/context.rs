use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cdp::CdpConnection;
use crate::page::CdpPage;
use crate::{BrowserContext, BrowserPage};

/// An incognito-like browser context: cookies and storage are not shared
/// with any other context of the same browser.
pub struct CdpContext {
    conn: Arc<CdpConnection>,
    context_id: String,
    pages: Mutex<HashMap<String, Arc<CdpPage>>>,
    closed: AtomicBool,
}

impl CdpContext {
    pub(crate) async fn create(conn: Arc<CdpConnection>) -> Result<Self> {
        let created = conn
            .send(
                "Target.createBrowserContext",
                json!({ "disposeOnDetach": true }),
                None,
            )
            .await?;
        let Some(context_id) = created.get("browserContextId").and_then(Value::as_str) else {
            bail!("Target.createBrowserContext returned no browserContextId");
        };
        debug!(context_id, "Created browser context");

        Ok(Self {
            conn,
            context_id: context_id.to_string(),
            pages: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn page_target_ids(&self) -> Result<Vec<String>> {
        let targets = self.conn.send("Target.getTargets", json!({}), None).await?;
        Ok(context_page_ids(&targets, &self.context_id))
    }
}

#[async_trait]
impl BrowserContext for CdpContext {
    fn id(&self) -> &str {
        &self.context_id
    }

    async fn new_page(&self) -> Result<Arc<dyn BrowserPage>> {
        let created = self
            .conn
            .send(
                "Target.createTarget",
                json!({ "url": "about:blank", "browserContextId": self.context_id }),
                None,
            )
            .await?;
        let Some(target_id) = created.get("targetId").and_then(Value::as_str) else {
            bail!("Target.createTarget returned no targetId");
        };

        let page = Arc::new(CdpPage::attach(self.conn.clone(), target_id).await?);
        self.pages
            .lock()
            .await
            .insert(target_id.to_string(), page.clone());
        Ok(page)
    }

    async fn pages(&self) -> Result<Vec<Arc<dyn BrowserPage>>> {
        let live = self.page_target_ids().await?;
        let mut pages = self.pages.lock().await;
        pages.retain(|id, _| live.contains(id));

        let mut ordered: Vec<Arc<dyn BrowserPage>> = Vec::with_capacity(live.len());
        for target_id in live {
            if let Some(page) = pages.get(&target_id) {
                ordered.push(page.clone());
                continue;
            }
            // Popups opened by the page itself are attached on first sight.
            match CdpPage::attach(self.conn.clone(), &target_id).await {
                Ok(page) => {
                    let page = Arc::new(page);
                    pages.insert(target_id.clone(), page.clone());
                    ordered.push(page);
                }
                Err(e) => warn!(target_id = %target_id, error = %e, "Failed to attach page target"),
            }
        }
        Ok(ordered)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.pages.lock().await.clear();
        self.conn
            .send(
                "Target.disposeBrowserContext",
                json!({ "browserContextId": self.context_id }),
                None,
            )
            .await?;
        debug!(context_id = %self.context_id, "Disposed browser context");
        Ok(())
    }
}

/// Page target ids that belong to `context_id`, in the order the browser
/// reports them.
pub(crate) fn context_page_ids(targets: &Value, context_id: &str) -> Vec<String> {
    targets
        .get("targetInfos")
        .and_then(Value::as_array)
        .map(|infos| {
            infos
                .iter()
                .filter(|info| info.get("type").and_then(Value::as_str) == Some("page"))
                .filter(|info| {
                    info.get("browserContextId").and_then(Value::as_str) == Some(context_id)
                })
                .filter_map(|info| info.get("targetId").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
