//! Telemetry extraction: recognise the reader's own progress reports among
//! outbound requests and pull a reading duration out of their JSON body.
use crate::config::TelemetryConfig;
use serde_json::{Map, Value};

/// One parsed progress report from the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Seconds of reading the page claims since its previous report.
    pub duration_seconds: u64,
    /// Whether the payload carried an auxiliary event (e.g. a review).
    pub has_auxiliary_event: bool,
}

/// Errors raised while decoding a telemetry body.
#[derive(Debug)]
pub enum TelemetryError {
    /// Body is not a JSON object.
    MalformedPayload { reason: String },
}

impl std::fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TelemetryError::MalformedPayload { reason } => {
                write!(f, "malformed telemetry payload: {reason}")
            }
        }
    }
}

impl std::error::Error for TelemetryError {}

/// Matches requests against the telemetry endpoint and decodes their payload.
#[derive(Debug, Clone)]
pub struct TelemetryExtractor {
    endpoint: String,
    duration_field: String,
    auxiliary_field: String,
}

impl TelemetryExtractor {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            duration_field: config.duration_field.clone(),
            auxiliary_field: config.auxiliary_field.clone(),
        }
    }

    /// Inspect one outbound request.
    ///
    /// Returns `None` when the URL is not the telemetry endpoint, the request
    /// carries no body, or the body cannot be decoded. Malformed bodies are
    /// logged and otherwise ignored.
    pub fn extract(&self, request_url: &str, request_body: Option<&str>) -> Option<Observation> {
        if !request_url.contains(&self.endpoint) {
            return None;
        }
        let body = request_body?;

        match self.parse_payload(body) {
            Ok(observation) => Some(observation),
            Err(e) => {
                tracing::warn!(error = %e, url = request_url, "ignoring telemetry request");
                None
            }
        }
    }

    fn parse_payload(&self, body: &str) -> Result<Observation, TelemetryError> {
        let value: Value =
            serde_json::from_str(body).map_err(|e| TelemetryError::MalformedPayload {
                reason: e.to_string(),
            })?;
        let payload = value
            .as_object()
            .ok_or_else(|| TelemetryError::MalformedPayload {
                reason: "expected a JSON object".to_string(),
            })?;

        Ok(Observation {
            duration_seconds: payload
                .get(&self.duration_field)
                .map(coerce_seconds)
                .unwrap_or(0),
            has_auxiliary_event: has_field(payload, &self.auxiliary_field),
        })
    }
}

fn has_field(payload: &Map<String, Value>, key: &str) -> bool {
    payload.get(key).is_some_and(|v| !v.is_null())
}

/// Coerce a JSON value to whole seconds. Anything that cannot be read as a
/// non-negative number counts as zero.
fn coerce_seconds(value: &Value) -> u64 {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                u
            } else if let Some(f) = n.as_f64() {
                if f.is_finite() && f > 0.0 {
                    f.trunc() as u64
                } else {
                    0
                }
            } else {
                0
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or(0),
        Value::Bool(b) => u64::from(*b),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READ_URL: &str = "https://weread.qq.com/web/book/read";

    fn extractor() -> TelemetryExtractor {
        TelemetryExtractor::new(&TelemetryConfig::default())
    }

    #[test]
    fn test_non_matching_url_is_ignored() {
        let ex = extractor();
        assert_eq!(
            ex.extract("https://weread.qq.com/web/book/info", Some(r#"{"rt":30}"#)),
            None
        );
    }

    #[test]
    fn test_missing_body_is_ignored() {
        assert_eq!(extractor().extract(READ_URL, None), None);
    }

    #[test]
    fn test_extracts_duration() {
        let obs = extractor()
            .extract(READ_URL, Some(r#"{"appId":"wb1","rt":32,"ts":1}"#))
            .unwrap();
        assert_eq!(obs.duration_seconds, 32);
        assert!(!obs.has_auxiliary_event);
    }

    #[test]
    fn test_url_match_is_substring() {
        let obs = extractor()
            .extract(&format!("{READ_URL}?v=2"), Some(r#"{"rt":5}"#))
            .unwrap();
        assert_eq!(obs.duration_seconds, 5);
    }

    #[test]
    fn test_malformed_bodies_yield_no_match() {
        let ex = extractor();
        for body in ["", "rt=30", "{\"rt\":", "[1,2,3]", "42", "\"rt\""] {
            assert_eq!(ex.extract(READ_URL, Some(body)), None, "body: {body:?}");
        }
    }

    #[test]
    fn test_missing_duration_defaults_to_zero() {
        let obs = extractor().extract(READ_URL, Some(r#"{"ts":1}"#)).unwrap();
        assert_eq!(obs.duration_seconds, 0);
    }

    #[test]
    fn test_duration_coercion() {
        let ex = extractor();
        let cases = [
            (r#"{"rt":"45"}"#, 45),
            (r#"{"rt":" 12 "}"#, 12),
            (r#"{"rt":29.9}"#, 29),
            (r#"{"rt":true}"#, 1),
            (r#"{"rt":-5}"#, 0),
            (r#"{"rt":"abc"}"#, 0),
            (r#"{"rt":null}"#, 0),
            (r#"{"rt":[30]}"#, 0),
            (r#"{"rt":{"v":30}}"#, 0),
        ];
        for (body, expected) in cases {
            let obs = ex.extract(READ_URL, Some(body)).unwrap();
            assert_eq!(obs.duration_seconds, expected, "body: {body}");
        }
    }

    #[test]
    fn test_auxiliary_event_presence() {
        let ex = extractor();
        let obs = ex
            .extract(READ_URL, Some(r#"{"rt":0,"review":{"id":"x"}}"#))
            .unwrap();
        assert!(obs.has_auxiliary_event);

        let obs = ex.extract(READ_URL, Some(r#"{"rt":0,"review":1}"#)).unwrap();
        assert!(obs.has_auxiliary_event);

        let obs = ex
            .extract(READ_URL, Some(r#"{"rt":0,"review":null}"#))
            .unwrap();
        assert!(!obs.has_auxiliary_event);
    }

    #[test]
    fn test_custom_field_names() {
        let config = TelemetryConfig {
            endpoint: "/report".to_string(),
            duration_field: "secs".to_string(),
            auxiliary_field: "note".to_string(),
        };
        let ex = TelemetryExtractor::new(&config);
        let obs = ex
            .extract("https://example.com/report", Some(r#"{"secs":7,"note":"hi"}"#))
            .unwrap();
        assert_eq!(
            obs,
            Observation {
                duration_seconds: 7,
                has_auxiliary_event: true
            }
        );
    }

    #[test]
    fn test_malformed_payload_display() {
        let err = TelemetryError::MalformedPayload {
            reason: "expected a JSON object".to_string(),
        };
        assert!(err.to_string().contains("malformed telemetry payload"));
    }
}
