//! Minimal Chrome DevTools Protocol client.
//!
//! One websocket per page target. Commands are JSON objects with a numeric
//! `id`; the reader task correlates responses back to the waiting caller and
//! forwards everything else (`{"method": ..., "params": ...}`) as events.

use super::BrowserError;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, BrowserError>>>>>;

/// A protocol event pushed by the browser.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

pub struct CdpClient {
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a target's `webSocketDebuggerUrl`. Events are sent to
    /// `events` until the socket closes.
    pub async fn connect(
        ws_url: &str,
        events: mpsc::UnboundedSender<CdpEvent>,
    ) -> Result<Self, BrowserError> {
        let (ws, _) = connect_async(ws_url)
            .await
            .map_err(|e| BrowserError::Connect(format!("{ws_url}: {e}")))?;
        let (mut sink, mut stream) = ws.split();

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    tracing::debug!(error = %e, "cdp write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = Arc::clone(&pending);
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => dispatch(&text, &reader_pending, &events),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(error = %e, "cdp read failed");
                        break;
                    }
                }
            }
            fail_pending(&reader_pending);
        });

        Ok(Self {
            outgoing,
            pending,
            next_id: AtomicU64::new(1),
            reader,
            writer,
        })
    }

    /// Send a command and wait for its result.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, BrowserError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        let frame = json!({ "id": id, "method": method, "params": params }).to_string();
        if self.outgoing.send(Message::Text(frame)).is_err() {
            lock(&self.pending).remove(&id);
            return Err(BrowserError::Closed);
        }

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(result)) => result.map_err(|e| match e {
                BrowserError::Protocol { message, .. } => BrowserError::Protocol {
                    method: method.to_string(),
                    message,
                },
                other => other,
            }),
            Ok(Err(_)) => Err(BrowserError::Closed),
            Err(_) => {
                lock(&self.pending).remove(&id);
                Err(BrowserError::Timeout {
                    method: method.to_string(),
                })
            }
        }
    }

    /// Stop the background tasks. Outstanding calls fail with `Closed`.
    pub fn shutdown(&self) {
        self.reader.abort();
        self.writer.abort();
        fail_pending(&self.pending);
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

fn lock(
    pending: &Pending,
) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Result<Value, BrowserError>>>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

fn fail_pending(pending: &Pending) {
    for (_, tx) in lock(pending).drain() {
        let _ = tx.send(Err(BrowserError::Closed));
    }
}

/// Route one incoming frame to its waiting caller or the event channel.
fn dispatch(text: &str, pending: &Pending, events: &mpsc::UnboundedSender<CdpEvent>) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring non-JSON cdp frame");
            return;
        }
    };

    if let Some(id) = frame.get("id").and_then(Value::as_u64) {
        let Some(tx) = lock(pending).remove(&id) else {
            return;
        };
        let result = match frame.get("error") {
            Some(err) => Err(BrowserError::Protocol {
                method: String::new(),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            }),
            None => Ok(frame.get("result").cloned().unwrap_or(Value::Null)),
        };
        let _ = tx.send(result);
        return;
    }

    if let Some(method) = frame.get("method").and_then(Value::as_str) {
        let _ = events.send(CdpEvent {
            method: method.to_string(),
            params: frame.get("params").cloned().unwrap_or(Value::Null),
        });
    }
}
