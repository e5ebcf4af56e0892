use crate::cookies;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default WeRead reader page opened at session start.
pub const DEFAULT_TARGET_URL: &str =
    "https://weread.qq.com/web/reader/ce032b305a9bc1ce0b0dd2akf4b32ef025ef4b9ec30acd6";

/// Top-level configuration loaded from readloop.toml.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub log_level: String,
    pub session: SessionConfig,
    pub telemetry: TelemetryConfig,
    pub watchdog: WatchdogConfig,
    pub browser: BrowserConfig,
    pub cookies: CookieConfig,
    pub push: PushConfig,
    pub diagnostics: DiagnosticsConfig,
    pub status: StatusConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub target_minutes: u64,
    pub target_url: String,
    pub settle_secs: u64,
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
    pub click_timeout_secs: u64,
    pub next_page_selector: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub endpoint: String,
    pub duration_field: String,
    pub auxiliary_field: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub diagnostic_after_secs: u64,
    pub reload_after_secs: u64,
    pub terminate_after_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub chrome_path: Option<PathBuf>,
    pub headless: bool,
    pub debug_port: u16,
    pub window_width: u32,
    pub window_height: u32,
    pub startup_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    pub domain: String,
    pub values: BTreeMap<String, String>,
    /// Raw `name=value; ...` header or a copied `curl` command.
    pub header: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub method: Option<String>,
    pub pushplus_token: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub serverchan_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub file: PathBuf,
}

/// Errors from loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl HarnessConfig {
    /// Load config from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Apply environment overrides, as set by CI secrets.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("READ_NUM") {
            match v.trim().parse() {
                Ok(n) => self.session.target_minutes = n,
                Err(_) => tracing::warn!(value = %v, "ignoring non-numeric READ_NUM"),
            }
        }
        if let Some(v) = get("PUSH_METHOD") {
            self.push.method = Some(v.trim().to_string());
        }
        if let Some(v) = get("WEREAD_COOKIE") {
            self.cookies.header = Some(v);
        }
        if let Some(v) = get("PUSHPLUS_TOKEN") {
            self.push.pushplus_token = Some(v);
        }
        if let Some(v) = get("TELEGRAM_BOT_TOKEN") {
            self.push.telegram_bot_token = Some(v);
        }
        if let Some(v) = get("TELEGRAM_CHAT_ID") {
            self.push.telegram_chat_id = Some(v);
        }
        if let Some(v) = get("SERVERCHAN_SPT") {
            self.push.serverchan_key = Some(v);
        }
    }

    /// Check invariants the session loop relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.target_minutes == 0 {
            return Err(ConfigError::Invalid(
                "session.target_minutes must be greater than 0".to_string(),
            ));
        }
        if self.session.target_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "session.target_url must not be empty".to_string(),
            ));
        }
        if self.session.min_delay_secs > self.session.max_delay_secs {
            return Err(ConfigError::Invalid(format!(
                "session.min_delay_secs ({}) exceeds max_delay_secs ({})",
                self.session.min_delay_secs, self.session.max_delay_secs
            )));
        }
        let w = &self.watchdog;
        if !(w.diagnostic_after_secs < w.reload_after_secs
            && w.reload_after_secs < w.terminate_after_secs)
        {
            return Err(ConfigError::Invalid(format!(
                "watchdog thresholds must be strictly ascending (got {}, {}, {})",
                w.diagnostic_after_secs, w.reload_after_secs, w.terminate_after_secs
            )));
        }
        Ok(())
    }

    /// Cookie jar for the session: the `header` source first, then explicit
    /// `values` on top.
    pub fn resolved_cookies(&self) -> BTreeMap<String, String> {
        let mut jar = self
            .cookies
            .header
            .as_deref()
            .map(cookies::parse_cookie_source)
            .unwrap_or_default();
        jar.extend(
            self.cookies
                .values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        jar
    }
}

// --- Default implementations ---

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            session: SessionConfig::default(),
            telemetry: TelemetryConfig::default(),
            watchdog: WatchdogConfig::default(),
            browser: BrowserConfig::default(),
            cookies: CookieConfig::default(),
            push: PushConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            status: StatusConfig::default(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_minutes: 60,
            target_url: DEFAULT_TARGET_URL.to_string(),
            settle_secs: 5,
            min_delay_secs: 28,
            max_delay_secs: 40,
            click_timeout_secs: 10,
            next_page_selector: "button[class*='renderTarget_pager_button_right']".to_string(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://weread.qq.com/web/book/read".to_string(),
            duration_field: "rt".to_string(),
            auxiliary_field: "review".to_string(),
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            diagnostic_after_secs: 60,
            reload_after_secs: 120,
            terminate_after_secs: 600,
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            debug_port: 9222,
            window_width: 1280,
            window_height: 720,
            startup_timeout_secs: 20,
        }
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            domain: ".weread.qq.com".to_string(),
            values: BTreeMap::new(),
            header: None,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("screenshot"),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from(".readloop.status"),
        }
    }
}
