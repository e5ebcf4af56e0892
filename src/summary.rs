//! GitHub Actions integration: step summary and step outputs.
//!
//! Both files are append-only and named by environment variables. Outside of
//! Actions they are simply absent, which is logged and otherwise ignored.

use crate::notify::SinkError;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct CiSink {
    summary_path: Option<PathBuf>,
    output_path: Option<PathBuf>,
}

impl CiSink {
    /// Read `GITHUB_STEP_SUMMARY` and `GITHUB_OUTPUT`.
    pub fn from_env() -> Self {
        let path = |key: &str| {
            std::env::var_os(key)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        Self {
            summary_path: path("GITHUB_STEP_SUMMARY"),
            output_path: path("GITHUB_OUTPUT"),
        }
    }

    #[cfg(test)]
    pub fn new(summary_path: Option<PathBuf>, output_path: Option<PathBuf>) -> Self {
        Self {
            summary_path,
            output_path,
        }
    }

    /// Append one markdown line to the step summary.
    pub fn append_summary(&self, line: &str) -> Result<(), SinkError> {
        let path = self.summary_path.as_deref().ok_or_else(|| {
            SinkError::Unavailable(
                "GITHUB_STEP_SUMMARY not set, running outside of GitHub Actions?".to_string(),
            )
        })?;
        append_line(path, line)
    }

    /// Record `key=value` as a step output. Newlines in the value are
    /// flattened to spaces.
    pub fn set_output(&self, key: &str, value: &str) -> Result<(), SinkError> {
        let path = self.output_path.as_deref().ok_or_else(|| {
            SinkError::Unavailable(
                "GITHUB_OUTPUT not set, running outside of GitHub Actions?".to_string(),
            )
        })?;
        let cleaned = value.replace(['\r', '\n'], " ");
        append_line(path, &format!("{key}={cleaned}"))
    }
}

fn append_line(path: &Path, line: &str) -> Result<(), SinkError> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{line}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_summary_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let summary = dir.path().join("summary.md");
        std::fs::write(&summary, "# Run\n").unwrap();

        let sink = CiSink::new(Some(summary.clone()), None);
        sink.append_summary("first").unwrap();
        sink.append_summary("second").unwrap();

        assert_eq!(
            std::fs::read_to_string(&summary).unwrap(),
            "# Run\nfirst\nsecond\n"
        );
    }

    #[test]
    fn test_set_output_flattens_newlines() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("output");
        let sink = CiSink::new(None, Some(output.clone()));
        sink.set_output("result", "line one\nline two").unwrap();
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "result=line one line two\n"
        );
    }

    #[test]
    fn test_missing_paths_are_unavailable() {
        let sink = CiSink::default();
        assert!(matches!(
            sink.append_summary("x"),
            Err(SinkError::Unavailable(_))
        ));
        assert!(matches!(
            sink.set_output("k", "v"),
            Err(SinkError::Unavailable(_))
        ));
    }

    #[test]
    fn test_unwritable_path_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CiSink::new(Some(dir.path().join("missing/summary.md")), None);
        assert!(matches!(sink.append_summary("x"), Err(SinkError::Io(_))));
    }
}
