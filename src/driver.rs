//! Session driver: the reading loop.
//!
//! Owns the browser, the progress accumulator and the request channel. Each
//! tick drains intercepted requests, asks the watchdog for a directive,
//! runs any recovery action, performs one reading step and then waits a
//! human-looking delay. Only the watchdog's `Terminate` ends the loop early.
use crate::browser::{Browser, BrowserError, Cookie, InterceptedRequest};
use crate::config::SessionConfig;
use crate::diagnostics::DiagnosticStore;
use crate::progress::{ProgressAccumulator, SessionProgress, Target};
use crate::signals::ShutdownSignal;
use crate::status::{SessionState, StatusTracker};
use crate::telemetry::TelemetryExtractor;
use crate::watchdog::{Directive, EscalationPolicy};
use rand::Rng;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Loop timing and page details, resolved from `[session]`.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub target_url: String,
    pub settle: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub click_timeout: Duration,
    pub next_page_selector: String,
}

impl DriverSettings {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            target_url: config.target_url.clone(),
            settle: Duration::from_secs(config.settle_secs),
            min_delay: Duration::from_secs(config.min_delay_secs),
            max_delay: Duration::from_secs(config.max_delay_secs),
            click_timeout: Duration::from_secs(config.click_timeout_secs),
            next_page_selector: config.next_page_selector.clone(),
        }
    }
}

/// Totals at the end of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub cumulative_seconds: u64,
    pub success_count: u64,
    pub elapsed: Duration,
}

impl SessionReport {
    pub fn read_minutes(&self) -> u64 {
        self.cumulative_seconds / 60
    }
}

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed(SessionReport),
    Interrupted(SessionReport),
}

/// Errors that end a session.
#[derive(Debug)]
pub enum SessionError {
    /// No successful telemetry for the watchdog's terminate window.
    StallTimeout {
        stalled_for: Duration,
        report: SessionReport,
    },
    /// Cookie injection or the first navigation failed.
    Startup(BrowserError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::StallTimeout {
                stalled_for,
                report,
            } => write!(
                f,
                "reading stalled: no telemetry for {}s (read {} minutes)",
                stalled_for.as_secs(),
                report.read_minutes()
            ),
            SessionError::Startup(e) => write!(f, "failed to open reading page: {e}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::StallTimeout { .. } => None,
            SessionError::Startup(e) => Some(e),
        }
    }
}

/// What interrupted an inter-tick wait.
enum WaitEvent {
    Elapsed,
    Request(Option<InterceptedRequest>),
    Shutdown,
}

pub struct SessionDriver<B: Browser> {
    browser: B,
    requests: mpsc::UnboundedReceiver<InterceptedRequest>,
    requests_open: bool,
    extractor: TelemetryExtractor,
    accumulator: ProgressAccumulator,
    policy: EscalationPolicy,
    target: Target,
    settings: DriverSettings,
    cookies: Vec<Cookie>,
    diagnostics: DiagnosticStore,
    status: StatusTracker,
    shutdown: ShutdownSignal,
    started_at: Instant,
}

impl<B: Browser> SessionDriver<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        browser: B,
        requests: mpsc::UnboundedReceiver<InterceptedRequest>,
        extractor: TelemetryExtractor,
        policy: EscalationPolicy,
        target: Target,
        settings: DriverSettings,
        cookies: Vec<Cookie>,
        diagnostics: DiagnosticStore,
        status: StatusTracker,
        shutdown: ShutdownSignal,
    ) -> Self {
        let now = Instant::now();
        Self {
            browser,
            requests,
            requests_open: true,
            extractor,
            accumulator: ProgressAccumulator::new(now),
            policy,
            target,
            settings,
            cookies,
            diagnostics,
            status,
            shutdown,
            started_at: now,
        }
    }

    /// Run until the target is reached, the session stalls, or shutdown is
    /// requested. The browser is closed on every exit path, including a
    /// forced stop in the middle of a step.
    pub async fn run(mut self) -> Result<SessionOutcome, SessionError> {
        let mut force = self.shutdown.clone();
        let finished = tokio::select! {
            r = self.run_loop() => Some(r),
            _ = force.forced() => None,
        };
        let result = match finished {
            Some(r) => r,
            None => {
                tracing::warn!("forced shutdown, abandoning the current step");
                self.status
                    .update(SessionState::Interrupted, &self.accumulator.snapshot());
                Ok(SessionOutcome::Interrupted(self.report()))
            }
        };
        if let Err(e) = self.browser.close().await {
            tracing::warn!(error = %e, "failed to close browser cleanly");
        }
        result
    }

    async fn run_loop(&mut self) -> Result<SessionOutcome, SessionError> {
        tracing::info!(
            target_mins = self.target.seconds() / 60,
            url = %self.settings.target_url,
            "starting reading session"
        );
        self.status
            .update(SessionState::Starting, &self.accumulator.snapshot());
        self.open().await.map_err(SessionError::Startup)?;

        // Staleness is measured from the moment the page is ready.
        self.accumulator = ProgressAccumulator::new(Instant::now());

        loop {
            self.drain_requests();

            if self.accumulator.reached_target(self.target) {
                let report = self.report();
                tracing::info!(
                    read_mins = report.read_minutes(),
                    reports = report.success_count,
                    "reading target reached"
                );
                self.status
                    .update(SessionState::Completed, &self.accumulator.snapshot());
                return Ok(SessionOutcome::Completed(report));
            }

            if self.shutdown.requested() {
                tracing::warn!("shutdown requested, stopping session");
                self.status
                    .update(SessionState::Interrupted, &self.accumulator.snapshot());
                return Ok(SessionOutcome::Interrupted(self.report()));
            }

            let progress = self.accumulator.snapshot();
            let now = Instant::now();
            let directive = self.policy.evaluate(&progress, now);
            self.handle_directive(directive, &progress, now).await?;

            if let Err(e) = self.read_step().await {
                tracing::warn!(error = %e, "interaction failure, page control unavailable");
                self.capture_failure("click").await;
            }

            let delay = self.random_delay();
            tracing::debug!(delay_secs = delay.as_secs(), "waiting before next page");
            self.wait(delay).await;
        }
    }

    async fn handle_directive(
        &mut self,
        directive: Directive,
        progress: &SessionProgress,
        now: Instant,
    ) -> Result<(), SessionError> {
        let stale = now.saturating_duration_since(progress.last_success_at);
        tracing::debug!(
            directive = directive.as_str(),
            stale_secs = stale.as_secs(),
            "watchdog check"
        );
        match directive {
            Directive::Continue => {
                self.status.update(SessionState::Reading, progress);
            }
            Directive::DiagnosticCapture => {
                tracing::warn!(stale_secs = stale.as_secs(), "telemetry is stale, capturing page");
                self.status.update(SessionState::DiagnosticCapture, progress);
                self.capture_periodic().await;
            }
            Directive::SoftReload => {
                tracing::warn!(stale_secs = stale.as_secs(), "telemetry is stale, reloading page");
                self.status.update(SessionState::SoftReload, progress);
                self.soft_reload().await;
            }
            Directive::Terminate => {
                tracing::error!(stale_secs = stale.as_secs(), "telemetry stalled, aborting session");
                self.status.update(SessionState::Stalled, progress);
                self.capture_failure("stall").await;
                return Err(SessionError::StallTimeout {
                    stalled_for: stale,
                    report: self.report(),
                });
            }
        }
        Ok(())
    }

    /// Inject cookies, open the target page and let it settle.
    async fn open(&mut self) -> Result<(), BrowserError> {
        if !self.cookies.is_empty() {
            self.browser.set_cookies(&self.cookies).await?;
            tracing::debug!(count = self.cookies.len(), "cookies injected");
        }
        self.browser.navigate(&self.settings.target_url).await?;
        tokio::time::sleep(self.settings.settle).await;
        tracing::info!("reading page opened");
        Ok(())
    }

    async fn soft_reload(&mut self) {
        match self.browser.navigate(&self.settings.target_url).await {
            Ok(()) => {
                tokio::time::sleep(self.settings.settle).await;
                tracing::info!("reading page reloaded");
            }
            Err(e) => tracing::warn!(error = %e, "soft reload failed"),
        }
    }

    /// Wander the pointer a little, then turn the page.
    async fn read_step(&mut self) -> Result<(), BrowserError> {
        for (x, y, pause) in self.pointer_path() {
            self.browser.mouse_move(x, y).await?;
            tokio::time::sleep(pause).await;
        }
        self.browser
            .click(&self.settings.next_page_selector, self.settings.click_timeout)
            .await
    }

    fn pointer_path(&self) -> Vec<(f64, f64, Duration)> {
        let (width, height) = self.browser.viewport();
        let (width, height) = (f64::from(width.max(1)), f64::from(height.max(1)));
        let mut rng = rand::thread_rng();
        let moves = rng.gen_range(2..=4);
        (0..moves)
            .map(|_| {
                (
                    rng.gen_range(0.0..width),
                    rng.gen_range(0.0..height),
                    Duration::from_millis(rng.gen_range(100..=400)),
                )
            })
            .collect()
    }

    fn random_delay(&self) -> Duration {
        let min = self.settings.min_delay.as_secs();
        let max = self.settings.max_delay.as_secs().max(min);
        Duration::from_secs(rand::thread_rng().gen_range(min..=max))
    }

    /// Sleep for `delay`, recording telemetry as it arrives. Returns early
    /// once the target is reached or shutdown is requested.
    async fn wait(&mut self, delay: Duration) {
        let deadline = Instant::now() + delay;
        loop {
            let event = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => WaitEvent::Elapsed,
                req = self.requests.recv(), if self.requests_open => WaitEvent::Request(req),
                _ = self.shutdown.wait() => WaitEvent::Shutdown,
            };
            match event {
                WaitEvent::Elapsed | WaitEvent::Shutdown => return,
                WaitEvent::Request(Some(req)) => {
                    self.ingest(req);
                    if self.accumulator.reached_target(self.target) {
                        return;
                    }
                }
                WaitEvent::Request(None) => {
                    tracing::warn!("request hook closed, telemetry will no longer be observed");
                    self.requests_open = false;
                }
            }
        }
    }

    fn drain_requests(&mut self) {
        while self.requests_open {
            match self.requests.try_recv() {
                Ok(req) => self.ingest(req),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    tracing::warn!("request hook closed, telemetry will no longer be observed");
                    self.requests_open = false;
                }
            }
        }
    }

    fn ingest(&mut self, req: InterceptedRequest) {
        if let Some(observation) = self.extractor.extract(&req.url, req.body.as_deref()) {
            self.accumulator.record(observation, Instant::now());
        }
    }

    async fn capture_periodic(&mut self) {
        match self.browser.screenshot().await {
            Ok(png) => match self.diagnostics.write_periodic(&png) {
                Ok(path) => tracing::info!(path = %path.display(), "diagnostic screenshot saved"),
                Err(e) => tracing::warn!(error = %e, "failed to save diagnostic screenshot"),
            },
            Err(e) => tracing::warn!(error = %e, "diagnostic screenshot failed"),
        }
    }

    async fn capture_failure(&mut self, reason: &str) {
        match self.browser.screenshot().await {
            Ok(png) => match self.diagnostics.write_failure(reason, &png) {
                Ok(path) => tracing::error!(path = %path.display(), "failure screenshot saved"),
                Err(e) => tracing::warn!(error = %e, "failed to save failure screenshot"),
            },
            Err(e) => tracing::warn!(error = %e, "failure screenshot failed"),
        }
    }

    fn report(&self) -> SessionReport {
        let p = self.accumulator.snapshot();
        SessionReport {
            cumulative_seconds: p.cumulative_seconds,
            success_count: p.success_count,
            elapsed: self.started_at.elapsed(),
        }
    }
}
