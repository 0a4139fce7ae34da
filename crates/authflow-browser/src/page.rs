use anyhow::{Result, bail};
use async_trait::async_trait;
use base64::Engine;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::BrowserPage;
use crate::cdp::{CdpConnection, exception_message};

const LOAD_POLL_INTERVAL: Duration = Duration::from_millis(200);
const ISOLATED_WORLD: &str = "authflow";

/// One attached page target.
pub struct CdpPage {
    conn: Arc<CdpConnection>,
    target_id: String,
    session_id: String,
}

impl CdpPage {
    pub(crate) async fn attach(conn: Arc<CdpConnection>, target_id: &str) -> Result<Self> {
        let attached = conn
            .send(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
                None,
            )
            .await?;
        let Some(session_id) = attached.get("sessionId").and_then(Value::as_str) else {
            bail!("Target.attachToTarget returned no sessionId for {}", target_id);
        };

        let page = Self {
            conn,
            target_id: target_id.to_string(),
            session_id: session_id.to_string(),
        };
        page.command("Page.enable", json!({})).await?;
        Ok(page)
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    async fn command(&self, method: &str, params: Value) -> Result<Value> {
        self.conn.send(method, params, Some(&self.session_id)).await
    }

    async fn evaluate_in_context(
        &self,
        expression: &str,
        context_id: Option<i64>,
    ) -> Result<Value> {
        let mut params = json!({
            "expression": expression,
            "returnByValue": true,
            "awaitPromise": true,
            "userGesture": true,
        });
        if let Some(id) = context_id {
            params["contextId"] = json!(id);
        }

        let response = self.command("Runtime.evaluate", params).await?;
        if let Some(details) = response.get("exceptionDetails") {
            bail!("Evaluation failed: {}", exception_message(details));
        }
        Ok(response
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn mouse_event(&self, kind: &str, x: f64, y: f64, buttons: u8) -> Result<()> {
        self.command(
            "Input.dispatchMouseEvent",
            json!({
                "type": kind,
                "x": x,
                "y": y,
                "button": if kind == "mouseMoved" { "none" } else { "left" },
                "buttons": buttons,
                "clickCount": if kind == "mouseMoved" { 0 } else { 1 },
            }),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl BrowserPage for CdpPage {
    fn id(&self) -> &str {
        &self.target_id
    }

    async fn url(&self) -> Result<String> {
        let info = self
            .conn
            .send(
                "Target.getTargetInfo",
                json!({ "targetId": self.target_id }),
                None,
            )
            .await?;
        Ok(info
            .get("targetInfo")
            .and_then(|t| t.get("url"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        let response = self
            .conn
            .send_with_timeout(
                "Page.navigate",
                json!({ "url": url }),
                Some(&self.session_id),
                timeout,
            )
            .await?;
        if let Some(error) = response.get("errorText").and_then(Value::as_str)
            && !error.is_empty()
        {
            bail!("Navigation to {} failed: {}", url, error);
        }

        let started = Instant::now();
        while started.elapsed() < timeout {
            let state = self
                .evaluate("document.readyState")
                .await
                .unwrap_or(Value::Null);
            if matches!(state.as_str(), Some("interactive" | "complete")) {
                return Ok(());
            }
            tokio::time::sleep(LOAD_POLL_INTERVAL).await;
        }
        debug!(url, "Document still loading after navigation timeout");
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        self.evaluate_in_context(expression, None).await
    }

    async fn evaluate_in_frames(&self, expression: &str) -> Result<Vec<Value>> {
        let tree = self.command("Page.getFrameTree", json!({})).await?;
        let mut frame_ids = Vec::new();
        if let Some(root) = tree.get("frameTree") {
            collect_frame_ids(root, &mut frame_ids);
        }

        let mut values = Vec::with_capacity(frame_ids.len());
        for frame_id in frame_ids {
            let world = match self
                .command(
                    "Page.createIsolatedWorld",
                    json!({ "frameId": frame_id, "worldName": ISOLATED_WORLD }),
                )
                .await
            {
                Ok(world) => world,
                Err(e) => {
                    debug!(
                        frame_id = %frame_id,
                        error = %e,
                        "Skipping frame without execution context"
                    );
                    continue;
                }
            };
            let Some(context_id) = world.get("executionContextId").and_then(Value::as_i64) else {
                continue;
            };
            match self.evaluate_in_context(expression, Some(context_id)).await {
                Ok(value) => values.push(value),
                Err(e) => debug!(frame_id = %frame_id, error = %e, "Frame evaluation failed"),
            }
        }
        Ok(values)
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<()> {
        self.mouse_event("mouseMoved", x, y, 0).await?;
        self.mouse_event("mousePressed", x, y, 1).await?;
        self.mouse_event("mouseReleased", x, y, 0).await?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        let Some(def) = key_definition(key) else {
            bail!("Unsupported key: {}", key);
        };

        let mut down = json!({
            "type": "keyDown",
            "key": def.key,
            "code": def.code,
            "windowsVirtualKeyCode": def.key_code,
            "nativeVirtualKeyCode": def.key_code,
        });
        if let Some(text) = def.text {
            down["text"] = json!(text);
        }
        self.command("Input.dispatchKeyEvent", down).await?;
        self.command(
            "Input.dispatchKeyEvent",
            json!({
                "type": "keyUp",
                "key": def.key,
                "code": def.code,
                "windowsVirtualKeyCode": def.key_code,
                "nativeVirtualKeyCode": def.key_code,
            }),
        )
        .await?;
        Ok(())
    }

    async fn insert_text(&self, text: &str) -> Result<()> {
        self.command("Input.insertText", json!({ "text": text }))
            .await?;
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        let response = self
            .command("Page.captureScreenshot", json!({ "format": "png" }))
            .await?;
        let Some(data) = response.get("data").and_then(Value::as_str) else {
            bail!("Page.captureScreenshot returned no data");
        };
        let bytes = base64::engine::general_purpose::STANDARD.decode(data)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.conn
            .send(
                "Target.closeTarget",
                json!({ "targetId": self.target_id }),
                None,
            )
            .await?;
        Ok(())
    }
}

fn collect_frame_ids(node: &Value, out: &mut Vec<String>) {
    if let Some(id) = node
        .get("frame")
        .and_then(|f| f.get("id"))
        .and_then(Value::as_str)
    {
        out.push(id.to_string());
    }
    if let Some(children) = node.get("childFrames").and_then(Value::as_array) {
        for child in children {
            collect_frame_ids(child, out);
        }
    }
}

struct KeyDefinition {
    key: &'static str,
    code: &'static str,
    key_code: u32,
    text: Option<&'static str>,
}

fn key_definition(key: &str) -> Option<KeyDefinition> {
    let def = match key {
        "Enter" => KeyDefinition {
            key: "Enter",
            code: "Enter",
            key_code: 13,
            text: Some("\r"),
        },
        "Tab" => KeyDefinition {
            key: "Tab",
            code: "Tab",
            key_code: 9,
            text: None,
        },
        "Escape" => KeyDefinition {
            key: "Escape",
            code: "Escape",
            key_code: 27,
            text: None,
        },
        "Space" | " " => KeyDefinition {
            key: " ",
            code: "Space",
            key_code: 32,
            text: Some(" "),
        },
        "PageDown" => KeyDefinition {
            key: "PageDown",
            code: "PageDown",
            key_code: 34,
            text: None,
        },
        "End" => KeyDefinition {
            key: "End",
            code: "End",
            key_code: 35,
            text: None,
        },
        _ => return None,
    };
    Some(def)
}
