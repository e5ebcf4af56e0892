//! Headless Chrome driven over the DevTools protocol.
//!
//! Launches Chrome in its own process group with a remote-debugging port,
//! finds the initial page target through the `/json/list` endpoint, and
//! attaches a `CdpClient` to it. Outbound requests reported by
//! `Network.requestWillBeSent` are forwarded to the driver's channel.
use super::cdp::{CdpClient, CdpEvent};
use super::{Browser, BrowserError, Cookie, InterceptedRequest};
use crate::config::BrowserConfig;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const CHROME_CANDIDATES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
];

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One entry of the `/json/list` target listing.
#[derive(Debug, Deserialize)]
struct TargetInfo {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    ws_url: Option<String>,
}

pub struct ChromeBrowser {
    child: Child,
    client: CdpClient,
    profile_dir: PathBuf,
    viewport: (u32, u32),
    pump: JoinHandle<()>,
}

impl ChromeBrowser {
    /// Start Chrome and attach to its first page.
    pub async fn launch(
        config: &BrowserConfig,
        requests: mpsc::UnboundedSender<InterceptedRequest>,
    ) -> Result<Self, BrowserError> {
        let binary = resolve_binary(config.chrome_path.as_deref())?;
        let profile_dir =
            std::env::temp_dir().join(format!("readloop-chrome-{}", std::process::id()));
        std::fs::create_dir_all(&profile_dir)?;

        let args = build_args(config, &profile_dir);
        tracing::info!(binary = %binary.display(), port = config.debug_port, "launching chrome");

        let child = Command::new(&binary)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0) // New process group for clean kill
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BrowserError::Launch(format!("{}: {e}", binary.display())))?;

        let startup = Duration::from_secs(config.startup_timeout_secs);
        let ws_url = discover_page(config.debug_port, startup).await?;
        tracing::debug!(%ws_url, "attaching to page target");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let client = CdpClient::connect(&ws_url, events_tx).await?;
        let pump = tokio::spawn(forward_requests(events_rx, requests));

        let browser = Self {
            child,
            client,
            profile_dir,
            viewport: (config.window_width, config.window_height),
            pump,
        };

        browser.client.call("Network.enable", json!({})).await?;
        browser.client.call("Page.enable", json!({})).await?;
        browser
            .client
            .call(
                "Emulation.setDeviceMetricsOverride",
                json!({
                    "width": config.window_width,
                    "height": config.window_height,
                    "deviceScaleFactor": 1,
                    "mobile": false,
                }),
            )
            .await?;

        Ok(browser)
    }

    /// Centre of the element matching `selector`, if it exists and has a box.
    async fn locate(&self, selector: &str) -> Result<Option<(f64, f64)>, BrowserError> {
        let quoted = serde_json::to_string(selector).map_err(|e| BrowserError::Protocol {
            method: "Runtime.evaluate".to_string(),
            message: e.to_string(),
        })?;
        let expression = format!(
            "(() => {{ const el = document.querySelector({quoted}); \
             if (!el) return null; \
             const r = el.getBoundingClientRect(); \
             if (r.width === 0 && r.height === 0) return null; \
             return {{ x: r.left + r.width / 2, y: r.top + r.height / 2 }}; }})()"
        );
        let result = self
            .client
            .call(
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true }),
            )
            .await?;
        let value = &result["result"]["value"];
        Ok(match (value["x"].as_f64(), value["y"].as_f64()) {
            (Some(x), Some(y)) => Some((x, y)),
            _ => None,
        })
    }

    /// Poll until `selector` resolves to a visible element.
    async fn wait_for_element(&self, selector: &str) -> Result<(f64, f64), BrowserError> {
        loop {
            if let Some(point) = self.locate(selector).await? {
                return Ok(point);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn mouse_event(&self, kind: &str, x: f64, y: f64) -> Result<(), BrowserError> {
        let mut params = json!({ "type": kind, "x": x, "y": y });
        if kind != "mouseMoved" {
            params["button"] = json!("left");
            params["clickCount"] = json!(1);
        }
        self.client
            .call("Input.dispatchMouseEvent", params)
            .await
            .map(|_| ())
    }
}

impl Browser for ChromeBrowser {
    async fn set_cookies(&mut self, cookies: &[Cookie]) -> Result<(), BrowserError> {
        let cookies: Vec<Value> = cookies
            .iter()
            .map(|c| {
                json!({
                    "name": c.name,
                    "value": c.value,
                    "domain": c.domain,
                    "path": c.path,
                })
            })
            .collect();
        self.client
            .call("Network.setCookies", json!({ "cookies": cookies }))
            .await
            .map(|_| ())
    }

    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        let result = self
            .client
            .call("Page.navigate", json!({ "url": url }))
            .await?;
        match result.get("errorText").and_then(Value::as_str) {
            Some(reason) => Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }

    async fn click(&mut self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        let lookup = self.wait_for_element(selector);
        let (x, y) = within_budget(selector, timeout, lookup).await?;
        self.mouse_event("mouseMoved", x, y).await?;
        self.mouse_event("mousePressed", x, y).await?;
        self.mouse_event("mouseReleased", x, y).await
    }

    async fn mouse_move(&mut self, x: f64, y: f64) -> Result<(), BrowserError> {
        self.mouse_event("mouseMoved", x, y).await
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError> {
        let result = self
            .client
            .call("Page.captureScreenshot", json!({ "format": "png" }))
            .await?;
        let data = result["data"]
            .as_str()
            .ok_or_else(|| BrowserError::Protocol {
                method: "Page.captureScreenshot".to_string(),
                message: "response has no data".to_string(),
            })?;
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| BrowserError::Protocol {
                method: "Page.captureScreenshot".to_string(),
                message: e.to_string(),
            })
    }

    fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        let _ = self.client.call("Browser.close", json!({})).await;
        self.client.shutdown();
        self.pump.abort();

        if let Some(pid) = self.child.id() {
            let pgid = nix::unistd::Pid::from_raw(pid as i32);
            if let Err(e) = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGTERM) {
                tracing::debug!(error = %e, pid, "chrome process group already gone");
            }
        }
        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(?status, "chrome exited"),
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to reap chrome"),
            Err(_) => {
                tracing::warn!("chrome did not exit after SIGTERM, killing");
                self.child.kill().await?;
            }
        }

        if let Err(e) = std::fs::remove_dir_all(&self.profile_dir) {
            tracing::debug!(error = %e, path = %self.profile_dir.display(), "profile cleanup failed");
        }
        Ok(())
    }
}

/// Bound an element lookup by the click budget. Slow protocol round trips
/// count against it too.
async fn within_budget<T>(
    selector: &str,
    budget: Duration,
    lookup: impl std::future::Future<Output = Result<T, BrowserError>>,
) -> Result<T, BrowserError> {
    tokio::time::timeout(budget, lookup)
        .await
        .unwrap_or_else(|_| {
            Err(BrowserError::ElementNotFound {
                selector: selector.to_string(),
                waited: budget,
            })
        })
}

/// Pick the Chrome binary: explicit path, `CHROME_PATH`, then `$PATH`.
fn resolve_binary(explicit: Option<&Path>) -> Result<PathBuf, BrowserError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os("CHROME_PATH").filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let search = std::env::var_os("PATH").unwrap_or_default();
    find_in_path(&search, CHROME_CANDIDATES).ok_or_else(|| {
        BrowserError::Launch(format!(
            "no Chrome binary found (tried {}); set browser.chrome_path or CHROME_PATH",
            CHROME_CANDIDATES.join(", ")
        ))
    })
}

fn find_in_path(search: &std::ffi::OsStr, names: &[&str]) -> Option<PathBuf> {
    std::env::split_paths(search).find_map(|dir| {
        names
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    })
}

fn build_args(config: &BrowserConfig, profile_dir: &Path) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", config.debug_port),
        format!("--user-data-dir={}", profile_dir.display()),
        format!(
            "--window-size={},{}",
            config.window_width, config.window_height
        ),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--no-sandbox".to_string(),
        "--disable-gpu".to_string(),
        "--mute-audio".to_string(),
    ];
    if config.headless {
        args.push("--headless=new".to_string());
    }
    args.push("about:blank".to_string());
    args
}

/// Poll the DevTools HTTP endpoint until a page target shows up.
async fn discover_page(port: u16, timeout: Duration) -> Result<String, BrowserError> {
    let url = format!("http://127.0.0.1:{port}/json/list");
    let client = reqwest::Client::new();
    let deadline = Instant::now() + timeout;
    let mut last_error = String::from("no page target");

    loop {
        match client.get(&url).send().await {
            Ok(resp) => match resp.json::<Vec<TargetInfo>>().await {
                Ok(targets) => {
                    if let Some(ws) = pick_page(targets) {
                        return Ok(ws);
                    }
                }
                Err(e) => last_error = e.to_string(),
            },
            Err(e) => last_error = e.to_string(),
        }
        if Instant::now() >= deadline {
            return Err(BrowserError::Connect(format!(
                "devtools endpoint {url} not ready after {}s: {last_error}",
                timeout.as_secs()
            )));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn pick_page(targets: Vec<TargetInfo>) -> Option<String> {
    targets
        .into_iter()
        .filter(|t| t.kind == "page")
        .find_map(|t| t.ws_url)
}

/// Turn `Network.requestWillBeSent` events into intercepted requests.
async fn forward_requests(
    mut events: mpsc::UnboundedReceiver<CdpEvent>,
    requests: mpsc::UnboundedSender<InterceptedRequest>,
) {
    while let Some(event) = events.recv().await {
        if let Some(request) = request_from_event(&event) {
            if requests.send(request).is_err() {
                break;
            }
        }
    }
}

fn request_from_event(event: &CdpEvent) -> Option<InterceptedRequest> {
    if event.method != "Network.requestWillBeSent" {
        return None;
    }
    let request = event.params.get("request")?;
    Some(InterceptedRequest {
        url: request.get("url")?.as_str()?.to_string(),
        body: request
            .get("postData")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}
