pub mod cdp;
pub mod chrome;

use std::time::Duration;

/// An outbound request seen by the page, as delivered by the browser's
/// network hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedRequest {
    pub url: String,
    pub body: Option<String>,
}

/// A cookie injected before the first navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

/// Errors produced by browser operations.
#[derive(Debug)]
pub enum BrowserError {
    /// Could not find or start the browser process.
    Launch(String),
    /// Websocket or HTTP connection to the DevTools endpoint failed.
    Connect(String),
    /// The browser answered a command with an error.
    Protocol { method: String, message: String },
    /// The selector did not resolve to a visible element in time.
    ElementNotFound { selector: String, waited: Duration },
    /// A command got no answer in time.
    Timeout { method: String },
    /// Navigation was refused by the page (e.g. DNS failure).
    Navigation { url: String, reason: String },
    /// The connection is gone.
    Closed,
    Io(std::io::Error),
}

impl std::fmt::Display for BrowserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrowserError::Launch(msg) => write!(f, "failed to launch browser: {msg}"),
            BrowserError::Connect(msg) => write!(f, "failed to connect to browser: {msg}"),
            BrowserError::Protocol { method, message } => {
                write!(f, "{method} failed: {message}")
            }
            BrowserError::ElementNotFound { selector, waited } => write!(
                f,
                "element {selector:?} not found after {}ms",
                waited.as_millis()
            ),
            BrowserError::Timeout { method } => write!(f, "{method} timed out"),
            BrowserError::Navigation { url, reason } => {
                write!(f, "navigation to {url} failed: {reason}")
            }
            BrowserError::Closed => write!(f, "browser connection closed"),
            BrowserError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for BrowserError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BrowserError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BrowserError {
    fn from(e: std::io::Error) -> Self {
        BrowserError::Io(e)
    }
}

/// The page-level primitives the session driver needs.
///
/// Request observation is not part of the trait: implementations push
/// `InterceptedRequest`s into the channel they were constructed with, and
/// the driver drains it.
#[allow(async_fn_in_trait)]
pub trait Browser {
    async fn set_cookies(&mut self, cookies: &[Cookie]) -> Result<(), BrowserError>;

    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    /// Wait up to `timeout` for `selector` to be visible, then click its
    /// centre.
    async fn click(&mut self, selector: &str, timeout: Duration) -> Result<(), BrowserError>;

    async fn mouse_move(&mut self, x: f64, y: f64) -> Result<(), BrowserError>;

    /// Capture the visible page as PNG bytes.
    async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError>;

    /// Viewport size in CSS pixels (width, height).
    fn viewport(&self) -> (u32, u32);

    async fn close(&mut self) -> Result<(), BrowserError>;
}
