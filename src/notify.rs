//! Push notifications sent once a session reaches its target.
//!
//! Supported channels: PushPlus, Telegram bot, ServerChan. Credentials come
//! from `[push]` in the config or the matching environment variables.
use crate::config::PushConfig;
use serde_json::{json, Value};
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_INITIAL_SECS: u64 = 2;
const BACKOFF_MAX_SECS: u64 = 30;

/// A configured notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushMethod {
    PushPlus,
    Telegram,
    ServerChan,
}

impl PushMethod {
    pub fn parse(identifier: &str) -> Result<Self, SinkError> {
        match identifier.trim().to_ascii_lowercase().as_str() {
            "pushplus" => Ok(PushMethod::PushPlus),
            "telegram" => Ok(PushMethod::Telegram),
            "serverchan" | "server_chan" => Ok(PushMethod::ServerChan),
            other => Err(SinkError::Unavailable(format!(
                "unknown push method {other:?}"
            ))),
        }
    }
}

/// Errors from notification and CI sinks.
#[derive(Debug)]
pub enum SinkError {
    /// Sink missing or misconfigured. Not retried.
    Unavailable(String),
    /// The remote service answered but refused the message.
    Rejected(String),
    Http(reqwest::Error),
    Io(std::io::Error),
}

impl SinkError {
    /// Worth another attempt: connection trouble, timeouts and 5xx answers.
    /// Refusals and misconfiguration fail the same way every time.
    pub fn is_transient(&self) -> bool {
        match self {
            SinkError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Unavailable(msg) => write!(f, "sink unavailable: {msg}"),
            SinkError::Rejected(msg) => write!(f, "push rejected: {msg}"),
            SinkError::Http(e) => write!(f, "push request failed: {e}"),
            SinkError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::Http(e) => Some(e),
            SinkError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        SinkError::Http(e)
    }
}

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self {
        SinkError::Io(e)
    }
}

/// Receives the final human-readable session summary.
#[allow(async_fn_in_trait)]
pub trait NotificationSink {
    async fn notify(&self, message: &str, method: &str) -> Result<(), SinkError>;
}

/// Completion message pushed after the target is reached.
pub fn completion_message(read_minutes: u64) -> String {
    format!("🎉 WeRead auto-read complete!\n⏱️ Reading time: {read_minutes} minutes.")
}

/// Exponential backoff: `initial * 2^attempt`, capped at `max`.
pub fn backoff_delay(initial_delay_secs: u64, attempt: u32, max_delay_secs: u64) -> u64 {
    let shift = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    initial_delay_secs.saturating_mul(shift).min(max_delay_secs)
}

/// A fully resolved request for one channel.
#[derive(Debug, Clone, PartialEq)]
struct PushRequest {
    url: String,
    body: Value,
}

/// Base URLs of the push services.
#[derive(Debug, Clone)]
struct Endpoints {
    pushplus: String,
    telegram: String,
    serverchan: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            pushplus: "https://www.pushplus.plus".to_string(),
            telegram: "https://api.telegram.org".to_string(),
            serverchan: "https://sctapi.ftqq.com".to_string(),
        }
    }
}

/// HTTP push client backed by reqwest.
pub struct PushClient {
    http: reqwest::Client,
    endpoints: Endpoints,
    backoff_initial_secs: u64,
    pushplus_token: Option<String>,
    telegram_bot_token: Option<String>,
    telegram_chat_id: Option<String>,
    serverchan_key: Option<String>,
}

impl PushClient {
    pub fn new(config: &PushConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            http,
            endpoints: Endpoints::default(),
            backoff_initial_secs: BACKOFF_INITIAL_SECS,
            pushplus_token: config.pushplus_token.clone(),
            telegram_bot_token: config.telegram_bot_token.clone(),
            telegram_chat_id: config.telegram_chat_id.clone(),
            serverchan_key: config.serverchan_key.clone(),
        }
    }

    fn build_request(&self, method: PushMethod, message: &str) -> Result<PushRequest, SinkError> {
        let missing = |what: &str| SinkError::Unavailable(format!("{what} is not configured"));
        match method {
            PushMethod::PushPlus => {
                let token = self
                    .pushplus_token
                    .as_deref()
                    .ok_or_else(|| missing("push.pushplus_token"))?;
                Ok(PushRequest {
                    url: format!("{}/send", self.endpoints.pushplus),
                    body: json!({
                        "token": token,
                        "title": "WeRead auto-read",
                        "content": message,
                    }),
                })
            }
            PushMethod::Telegram => {
                let token = self
                    .telegram_bot_token
                    .as_deref()
                    .ok_or_else(|| missing("push.telegram_bot_token"))?;
                let chat_id = self
                    .telegram_chat_id
                    .as_deref()
                    .ok_or_else(|| missing("push.telegram_chat_id"))?;
                Ok(PushRequest {
                    url: format!("{}/bot{token}/sendMessage", self.endpoints.telegram),
                    body: json!({ "chat_id": chat_id, "text": message }),
                })
            }
            PushMethod::ServerChan => {
                let key = self
                    .serverchan_key
                    .as_deref()
                    .ok_or_else(|| missing("push.serverchan_key"))?;
                Ok(PushRequest {
                    url: format!("{}/{key}.send", self.endpoints.serverchan),
                    body: json!({ "title": "WeRead auto-read", "desp": message }),
                })
            }
        }
    }

    async fn send_once(&self, method: PushMethod, request: &PushRequest) -> Result<(), SinkError> {
        let resp = self
            .http
            .post(&request.url)
            .json(&request.body)
            .send()
            .await?
            .error_for_status()?;
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        check_response(method, &body)
    }
}

impl NotificationSink for PushClient {
    async fn notify(&self, message: &str, method: &str) -> Result<(), SinkError> {
        let method = PushMethod::parse(method)?;
        let request = self.build_request(method, message)?;

        let mut attempt = 0;
        loop {
            match self.send_once(method, &request).await {
                Ok(()) => {
                    tracing::info!(?method, "push notification sent");
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                    let delay =
                        backoff_delay(self.backoff_initial_secs, attempt, BACKOFF_MAX_SECS);
                    tracing::warn!(error = %e, attempt = attempt + 1, delay_secs = delay, "push failed, retrying");
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Each service reports application-level failure in its own envelope.
fn check_response(method: PushMethod, body: &Value) -> Result<(), SinkError> {
    let ok = match method {
        PushMethod::PushPlus => body["code"].as_i64() == Some(200),
        PushMethod::Telegram => body["ok"].as_bool() == Some(true),
        PushMethod::ServerChan => body["code"].as_i64() == Some(0),
    };
    if ok {
        Ok(())
    } else {
        Err(SinkError::Rejected(body.to_string()))
    }
}
