use crate::driver::{SessionError, SessionOutcome};
use crate::notify::{completion_message, NotificationSink};
use crate::summary::CiSink;

/// Report how the session ended: one CI summary line, step outputs, and a
/// push notification on success only.
///
/// Sink failures are logged as warnings and never change the result.
pub async fn finish_session<S: NotificationSink>(
    result: &Result<SessionOutcome, SessionError>,
    ci: &CiSink,
    push: Option<(&S, &str)>,
) {
    let (line, status, minutes) = match result {
        Ok(SessionOutcome::Completed(report)) => (
            format!(
                "🎉 Reading complete: {} minutes across {} reports.",
                report.read_minutes(),
                report.success_count
            ),
            "completed",
            Some(report.read_minutes()),
        ),
        Ok(SessionOutcome::Interrupted(report)) => (
            format!(
                "⏹️ Reading interrupted after {} minutes.",
                report.read_minutes()
            ),
            "interrupted",
            Some(report.read_minutes()),
        ),
        Err(SessionError::StallTimeout {
            stalled_for,
            report,
        }) => (
            format!(
                "❌ Reading stalled: no telemetry for {}s, {} minutes read.",
                stalled_for.as_secs(),
                report.read_minutes()
            ),
            "stalled",
            Some(report.read_minutes()),
        ),
        Err(e @ SessionError::Startup(_)) => (format!("❌ {e}"), "startup_failed", None),
    };

    if let Err(e) = ci.append_summary(&line) {
        tracing::warn!(error = %e, "failed to write step summary");
    }
    if let Err(e) = ci.set_output("result", status) {
        tracing::warn!(error = %e, "failed to write step output");
    }
    if let Some(minutes) = minutes {
        if let Err(e) = ci.set_output("read_minutes", &minutes.to_string()) {
            tracing::debug!(error = %e, "failed to write step output");
        }
    }

    let Ok(SessionOutcome::Completed(report)) = result else {
        return;
    };
    match push {
        Some((sink, method)) => {
            tracing::info!(method, "sending completion notice");
            if let Err(e) = sink
                .notify(&completion_message(report.read_minutes()), method)
                .await
            {
                tracing::warn!(error = %e, "completion notice not delivered");
            }
        }
        None => tracing::debug!("no push method configured"),
    }
}
