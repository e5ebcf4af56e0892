mod browser;
mod config;
mod cookies;
mod diagnostics;
mod driver;
mod finish;
mod notify;
mod progress;
mod signals;
mod status;
mod summary;
mod telemetry;
mod watchdog;

use browser::chrome::ChromeBrowser;
use browser::Cookie;
use clap::Parser;
use config::HarnessConfig;
use diagnostics::DiagnosticStore;
use driver::{DriverSettings, SessionDriver, SessionError};
use notify::PushClient;
use progress::Target;
use signals::ShutdownSignal;
use status::{StatusFile, StatusTracker};
use std::path::PathBuf;
use std::process::ExitCode;
use summary::CiSink;
use telemetry::TelemetryExtractor;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use watchdog::EscalationPolicy;

/// Keeps a WeRead reading session alive in a supervised loop: open the
/// book, turn pages like a person would, watch the page's own reading-time
/// reports, and recover or abort when they stop.
#[derive(Parser, Debug)]
#[command(name = "readloop", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "readloop.toml")]
    config: PathBuf,

    /// Reading target in minutes (overrides config and READ_NUM)
    #[arg(short, long)]
    target_minutes: Option<u64>,

    /// Reader page to open (overrides config)
    #[arg(short, long)]
    url: Option<String>,

    /// Push notification channel: pushplus, telegram, serverchan
    #[arg(long)]
    push_method: Option<String>,

    /// Show the browser window
    #[arg(long)]
    no_headless: bool,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (watchdog checks, telemetry decisions)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings, errors and the final result
    #[arg(short, long)]
    quiet: bool,
}

const EXIT_CONFIG: u8 = 1;
const EXIT_STALLED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    init_tracing(&config.log_level, cli.verbose, cli.quiet);
    tracing::debug!(?cli, "parsed CLI arguments");

    if cli.dry_run {
        print_resolved(&config);
        return ExitCode::SUCCESS;
    }

    let Some(target) = Target::from_minutes(config.session.target_minutes) else {
        eprintln!("error: session.target_minutes must be greater than 0");
        return ExitCode::from(EXIT_CONFIG);
    };
    let shutdown = match ShutdownSignal::install() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: failed to install signal handlers: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let push_client = PushClient::new(&config.push);
    let push_method = config.push.method.clone();
    let ci = CiSink::from_env();

    let result = run(&config, target, shutdown).await;
    finish::finish_session(
        &result,
        &ci,
        push_method.as_deref().map(|m| (&push_client, m)),
    )
    .await;

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e @ SessionError::StallTimeout { .. }) => {
            tracing::error!(error = %e, "session aborted");
            ExitCode::from(EXIT_STALLED)
        }
        Err(e) => {
            tracing::error!(error = %e, "session failed");
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

fn load_config(cli: &Cli) -> Result<HarnessConfig, config::ConfigError> {
    let mut config = HarnessConfig::load(&cli.config)?;
    config.apply_env();

    if let Some(minutes) = cli.target_minutes {
        config.session.target_minutes = minutes;
    }
    if let Some(ref url) = cli.url {
        config.session.target_url = url.clone();
    }
    if let Some(ref method) = cli.push_method {
        config.push.method = Some(method.clone());
    }
    if cli.no_headless {
        config.browser.headless = false;
    }

    config.validate()?;
    Ok(config)
}

fn init_tracing(log_level: &str, verbose: bool, quiet: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

fn print_resolved(config: &HarnessConfig) {
    let jar = config.resolved_cookies();
    println!("readloop v{}", env!("CARGO_PKG_VERSION"));
    println!("Target:      {} minutes", config.session.target_minutes);
    println!("Page:        {}", config.session.target_url);
    println!(
        "Delay:       {}-{}s between pages",
        config.session.min_delay_secs, config.session.max_delay_secs
    );
    println!(
        "Watchdog:    capture {}s, reload {}s, abort {}s",
        config.watchdog.diagnostic_after_secs,
        config.watchdog.reload_after_secs,
        config.watchdog.terminate_after_secs
    );
    println!("Telemetry:   {}", config.telemetry.endpoint);
    println!(
        "Cookies:     {} ({})",
        jar.len(),
        cookies::redacted(&jar).join(", ")
    );
    println!(
        "Push:        {}",
        config.push.method.as_deref().unwrap_or("(none)")
    );
    println!("Screenshots: {}", config.diagnostics.dir.display());
    println!("Dry run: config validated, not running.");
}

async fn run(
    config: &HarnessConfig,
    target: Target,
    shutdown: ShutdownSignal,
) -> Result<driver::SessionOutcome, SessionError> {
    let jar = config.resolved_cookies();
    if jar.is_empty() {
        tracing::warn!("no cookies configured, the reader will likely show a login page");
    }
    let cookies: Vec<Cookie> = jar
        .into_iter()
        .map(|(name, value)| Cookie {
            name,
            value,
            domain: config.cookies.domain.clone(),
            path: "/".to_string(),
        })
        .collect();

    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
    let browser = ChromeBrowser::launch(&config.browser, requests_tx)
        .await
        .map_err(SessionError::Startup)?;

    let status = StatusTracker::new(config.status.file.clone(), target.seconds());
    tracing::debug!(path = %status.path().display(), "status file");

    let driver = SessionDriver::new(
        browser,
        requests_rx,
        TelemetryExtractor::new(&config.telemetry),
        EscalationPolicy::new(&config.watchdog),
        target,
        DriverSettings::from_config(&config.session),
        cookies,
        DiagnosticStore::new(config.diagnostics.dir.clone()),
        status,
        shutdown,
    );
    let result = driver.run().await;

    if matches!(result, Ok(driver::SessionOutcome::Completed(_))) {
        StatusFile::new(config.status.file.clone()).remove();
    }
    result
}
