//! Screenshot storage for diagnosing stalled or failing sessions.
//!
//! Watchdog captures overwrite a single `latest.png`; failure captures get a
//! timestamped name so each one survives for later inspection.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

const PERIODIC_FILE: &str = "latest.png";

#[derive(Debug)]
pub enum DiagnosticsError {
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for DiagnosticsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiagnosticsError::CreateDir { path, source } => {
                write!(f, "failed to create {}: {}", path.display(), source)
            }
            DiagnosticsError::Write { path, source } => {
                write!(f, "failed to write {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for DiagnosticsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiagnosticsError::CreateDir { source, .. } => Some(source),
            DiagnosticsError::Write { source, .. } => Some(source),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiagnosticStore {
    dir: PathBuf,
}

impl DiagnosticStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[cfg(test)]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fixed path overwritten by every watchdog capture.
    pub fn periodic_path(&self) -> PathBuf {
        self.dir.join(PERIODIC_FILE)
    }

    /// `fail_{reason}_{YYYYmmdd_HHMMSS}.png`
    pub fn failure_path(&self, reason: &str, at: DateTime<Local>) -> PathBuf {
        self.dir
            .join(format!("fail_{reason}_{}.png", at.format("%Y%m%d_%H%M%S")))
    }

    pub fn write_periodic(&self, png: &[u8]) -> Result<PathBuf, DiagnosticsError> {
        let path = self.periodic_path();
        self.write(&path, png)?;
        Ok(path)
    }

    pub fn write_failure(&self, reason: &str, png: &[u8]) -> Result<PathBuf, DiagnosticsError> {
        let path = self.failure_path(reason, Local::now());
        self.write(&path, png)?;
        Ok(path)
    }

    fn write(&self, path: &Path, png: &[u8]) -> Result<(), DiagnosticsError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| DiagnosticsError::CreateDir {
            path: self.dir.clone(),
            source: e,
        })?;
        std::fs::write(path, png).map_err(|e| DiagnosticsError::Write {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_failure_path_is_timestamped() {
        let store = DiagnosticStore::new("screenshot");
        let at = Local.with_ymd_and_hms(2026, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(
            store.failure_path("click", at),
            PathBuf::from("screenshot/fail_click_20260309_070501.png")
        );
    }

    #[test]
    fn test_periodic_overwrites_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiagnosticStore::new(dir.path().join("shots"));

        let first = store.write_periodic(b"one").unwrap();
        let second = store.write_periodic(b"two").unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read(&second).unwrap(), b"two");
        assert_eq!(std::fs::read_dir(store.dir()).unwrap().count(), 1);
    }

    #[test]
    fn test_write_failure_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiagnosticStore::new(dir.path().join("nested/shots"));
        let path = store.write_failure("click", b"\x89PNG").unwrap();
        assert!(path.starts_with(store.dir()));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("fail_click_"));
        assert!(name.ends_with(".png"));
    }

    #[test]
    fn test_unwritable_dir_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let store = DiagnosticStore::new(blocker.join("shots"));
        let err = store.write_periodic(b"png").unwrap_err();
        assert!(matches!(err, DiagnosticsError::CreateDir { .. }));
    }
}
