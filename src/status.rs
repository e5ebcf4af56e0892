//! Status file: writes `.readloop.status` as JSON on every state transition.
//!
//! Uses atomic write pattern: write to temp file then rename.
use crate::progress::SessionProgress;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Session states written to the status file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Starting,
    Reading,
    DiagnosticCapture,
    SoftReload,
    Completed,
    Stalled,
    Interrupted,
}

/// The JSON payload written to the status file.
#[derive(Debug, Clone, Serialize)]
pub struct StatusData {
    pub pid: u32,
    pub state: SessionState,
    pub target_seconds: u64,
    pub cumulative_seconds: u64,
    pub success_count: u64,
    pub stale_secs: u64,
    pub session_start: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

/// Manages the status file lifecycle.
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Atomically write status data to the status file.
    ///
    /// Writes to a temporary file in the same directory, then renames
    /// so readers never see a partial write.
    pub fn write(&self, data: &StatusData) -> Result<(), StatusError> {
        let json =
            serde_json::to_string_pretty(data).map_err(|e| StatusError::Serialize { source: e })?;

        let dir = self.path.parent().unwrap_or(Path::new("."));
        let tmp_path = dir.join(format!(".readloop.status.tmp.{}", std::process::id()));

        std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| StatusError::Write {
            path: tmp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| StatusError::Rename {
            from: tmp_path,
            to: self.path.clone(),
            source: e,
        })?;

        Ok(())
    }

    /// Remove the status file (on clean completion).
    pub fn remove(&self) {
        let _ = std::fs::remove_file(&self.path);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Builds a StatusData for each update from the latest progress snapshot.
pub struct StatusTracker {
    file: StatusFile,
    pid: u32,
    target_seconds: u64,
    session_start: DateTime<Utc>,
}

impl StatusTracker {
    pub fn new(status_path: PathBuf, target_seconds: u64) -> Self {
        Self {
            file: StatusFile::new(status_path),
            pid: std::process::id(),
            target_seconds,
            session_start: Utc::now(),
        }
    }

    /// Write the status file. Failures are logged, never fatal.
    pub fn update(&self, state: SessionState, progress: &SessionProgress) {
        let data = StatusData {
            pid: self.pid,
            state,
            target_seconds: self.target_seconds,
            cumulative_seconds: progress.cumulative_seconds,
            success_count: progress.success_count,
            stale_secs: progress.last_success_at.elapsed().as_secs(),
            session_start: self.session_start,
            last_update: Utc::now(),
        };

        if let Err(e) = self.file.write(&data) {
            tracing::warn!(error = %e, "failed to write status file");
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Errors from status file operations.
#[derive(Debug)]
pub enum StatusError {
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusError::Serialize { source } => write!(f, "failed to serialize status: {source}"),
            StatusError::Write { path, source } => {
                write!(
                    f,
                    "failed to write temp status file {}: {source}",
                    path.display()
                )
            }
            StatusError::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename {} -> {}: {source}",
                    from.display(),
                    to.display()
                )
            }
        }
    }
}

impl std::error::Error for StatusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StatusError::Serialize { source } => Some(source),
            StatusError::Write { source, .. } => Some(source),
            StatusError::Rename { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressAccumulator;
    use crate::telemetry::Observation;
    use tempfile::tempdir;
    use tokio::time::Instant;

    fn sample(state: SessionState) -> StatusData {
        StatusData {
            pid: 1,
            state,
            target_seconds: 3600,
            cumulative_seconds: 0,
            success_count: 0,
            stale_secs: 0,
            session_start: Utc::now(),
            last_update: Utc::now(),
        }
    }

    #[test]
    fn test_status_file_atomic_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".readloop.status");
        let sf = StatusFile::new(path.clone());

        let mut data = sample(SessionState::Reading);
        data.pid = 12345;
        data.cumulative_seconds = 930;
        data.success_count = 31;
        sf.write(&data).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed["pid"], 12345);
        assert_eq!(parsed["state"], "reading");
        assert_eq!(parsed["target_seconds"], 3600);
        assert_eq!(parsed["cumulative_seconds"], 930);
        assert_eq!(parsed["success_count"], 31);

        let tmp_path = dir
            .path()
            .join(format!(".readloop.status.tmp.{}", std::process::id()));
        assert!(
            !tmp_path.exists(),
            "temp file should be cleaned up by rename"
        );
    }

    #[test]
    fn test_status_file_remove() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".readloop.status");
        let sf = StatusFile::new(path.clone());

        sf.write(&sample(SessionState::Starting)).unwrap();
        assert!(path.exists());

        sf.remove();
        assert!(!path.exists());
    }

    #[test]
    fn test_all_session_states_serialize() {
        let states = vec![
            (SessionState::Starting, "starting"),
            (SessionState::Reading, "reading"),
            (SessionState::DiagnosticCapture, "diagnostic_capture"),
            (SessionState::SoftReload, "soft_reload"),
            (SessionState::Completed, "completed"),
            (SessionState::Stalled, "stalled"),
            (SessionState::Interrupted, "interrupted"),
        ];

        for (state, expected_str) in states {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", expected_str));
        }
    }

    #[test]
    fn test_status_tracker_reflects_progress() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".readloop.status");
        let tracker = StatusTracker::new(path.clone(), 120);

        let now = Instant::now();
        let mut acc = ProgressAccumulator::new(now);
        tracker.update(SessionState::Starting, &acc.snapshot());

        acc.record(
            Observation {
                duration_seconds: 45,
                has_auxiliary_event: false,
            },
            now,
        );
        tracker.update(SessionState::Reading, &acc.snapshot());

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["state"], "reading");
        assert_eq!(parsed["target_seconds"], 120);
        assert_eq!(parsed["cumulative_seconds"], 45);
        assert_eq!(parsed["success_count"], 1);
        assert!(parsed["session_start"].is_string());
        assert_eq!(tracker.path(), path.as_path());
    }

    #[test]
    fn test_status_file_write_to_nonexistent_dir_fails() {
        let sf = StatusFile::new(PathBuf::from("/nonexistent/dir/.readloop.status"));
        assert!(sf.write(&sample(SessionState::Starting)).is_err());
    }

    #[test]
    fn test_status_error_display() {
        let err = StatusError::Write {
            path: PathBuf::from("/tmp/test"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no perms"),
        };
        let msg = err.to_string();
        assert!(msg.contains("failed to write temp status file"));
        assert!(msg.contains("no perms"));
    }
}
