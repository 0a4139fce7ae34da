//! Minimal Chrome DevTools Protocol client.
//!
//! One WebSocket connection to the browser endpoint carries every command.
//! Page-level commands are routed with flattened `sessionId`s obtained from
//! `Target.attachToTarget`, so a single reader task correlates all responses.
//! Protocol events are not consumed; page state is read by polling.

use anyhow::{Result, anyhow, bail};
use futures_util::SinkExt;
use futures_util::stream::{SplitSink, StreamExt};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// Shared connection to a browser-level DevTools endpoint.
pub struct CdpConnection {
    writer: Mutex<WsWriter>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl CdpConnection {
    pub async fn connect(ws_url: &str) -> Result<Arc<Self>> {
        let (stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| anyhow!("Failed to connect to DevTools endpoint {}: {}", ws_url, e))?;
        let (writer, mut reader) = stream.split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader_pending = pending.clone();
        let reader_closed = closed.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                let msg = match frame {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("DevTools socket error: {}", e);
                        break;
                    }
                };

                let text = match msg.to_text() {
                    Ok(t) => t,
                    Err(_) => continue,
                };
                if text.is_empty() {
                    continue;
                }

                let payload: Value = match serde_json::from_str(text) {
                    Ok(v) => v,
                    Err(_) => continue,
                };

                dispatch_frame(payload, &reader_pending).await;
            }

            reader_closed.store(true, Ordering::SeqCst);
            let mut pending = reader_pending.lock().await;
            for (_, tx) in pending.drain() {
                let _ = tx.send(Err(anyhow!("DevTools connection closed")));
            }
            debug!("DevTools reader stopped");
        });

        Ok(Arc::new(Self {
            writer: Mutex::new(writer),
            pending,
            next_id: AtomicU64::new(1),
            closed,
            reader,
        }))
    }

    /// Send a command and wait for its response `result`.
    pub async fn send(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value> {
        self.send_with_timeout(method, params, session_id, COMMAND_TIMEOUT)
            .await
    }

    pub async fn send_with_timeout(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
        limit: Duration,
    ) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("DevTools connection closed");
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut frame = json!({ "id": id, "method": method, "params": params });
        if let Some(session_id) = session_id {
            frame["sessionId"] = Value::String(session_id.to_string());
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.send(WsMessage::Text(frame.to_string().into())).await {
                self.pending.lock().await.remove(&id);
                bail!("Failed to send {}: {}", method, e);
            }
        }

        match tokio::time::timeout(limit, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => bail!("DevTools connection dropped while waiting for {}", method),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                bail!("{} timed out after {} ms", method, limit.as_millis())
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Hand a command response to its waiter. Event frames carry no `id` and
/// are dropped.
async fn dispatch_frame(payload: Value, pending: &PendingMap) {
    let Some(id) = payload.get("id").and_then(Value::as_u64) else {
        return;
    };
    if let Some(tx) = pending.lock().await.remove(&id) {
        let _ = tx.send(response_result(&payload));
    }
}

fn response_result(payload: &Value) -> Result<Value> {
    if let Some(error) = payload.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown protocol error");
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        bail!("DevTools error {}: {}", code, message);
    }
    Ok(payload.get("result").cloned().unwrap_or(Value::Null))
}

/// Extract a readable message from `Runtime.evaluate` exception details.
pub(crate) fn exception_message(details: &Value) -> String {
    details
        .get("exception")
        .and_then(|e| e.get("description"))
        .and_then(Value::as_str)
        .or_else(|| details.get("text").and_then(Value::as_str))
        .unwrap_or("script threw an exception")
        .lines()
        .next()
        .unwrap_or_default()
        .to_string()
}
