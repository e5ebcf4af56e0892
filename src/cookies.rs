//! Cookie source parsing.
//!
//! Accepts either a plain `Cookie` header value (`a=1; b=2`) or a `curl`
//! command copied from the browser's network panel ("Copy as cURL (bash)"),
//! from which the cookie header is pulled out.
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// `-H 'Cookie: ...'`, `--header "cookie: ..."`, `-b '...'`, `--cookie '...'`
static CURL_COOKIE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r#"(?i)(?:-H|--header)\s+'cookie:\s*([^']*)'"#).unwrap(),
        Regex::new(r#"(?i)(?:-H|--header)\s+"cookie:\s*([^"]*)""#).unwrap(),
        Regex::new(r#"(?:-b|--cookie)\s+'([^']*)'"#).unwrap(),
        Regex::new(r#"(?:-b|--cookie)\s+"([^"]*)""#).unwrap(),
    ]
});

/// Parse a cookie header or curl command into name → value pairs.
///
/// Later duplicates win. Pairs without `=` or with an empty name are dropped.
pub fn parse_cookie_source(source: &str) -> BTreeMap<String, String> {
    let trimmed = source.trim();
    let header = if trimmed.starts_with("curl ") {
        match extract_curl_cookie(trimmed) {
            Some(h) => h,
            None => {
                tracing::warn!("curl command has no cookie header");
                return BTreeMap::new();
            }
        }
    } else {
        trimmed
    };
    parse_cookie_header(header)
}

fn extract_curl_cookie(command: &str) -> Option<&str> {
    CURL_COOKIE_PATTERNS
        .iter()
        .find_map(|re| re.captures(command))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn parse_cookie_header(header: &str) -> BTreeMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Render cookie names with their values masked, for logs and dry runs.
pub fn redacted(jar: &BTreeMap<String, String>) -> Vec<String> {
    jar.keys().map(|name| format!("{name}=***")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_header() {
        let jar = parse_cookie_source("wr_vid=123; wr_skey=abc ;wr_name=reader");
        assert_eq!(jar.len(), 3);
        assert_eq!(jar["wr_vid"], "123");
        assert_eq!(jar["wr_skey"], "abc");
        assert_eq!(jar["wr_name"], "reader");
    }

    #[test]
    fn test_value_may_contain_equals() {
        let jar = parse_cookie_source("token=a=b==");
        assert_eq!(jar["token"], "a=b==");
    }

    #[test]
    fn test_skips_malformed_pairs() {
        let jar = parse_cookie_source("novalue; =orphan; ok=1;;");
        assert_eq!(jar.len(), 1);
        assert_eq!(jar["ok"], "1");
    }

    #[test]
    fn test_parse_curl_header_single_quotes() {
        let cmd = "curl 'https://weread.qq.com/web/book/read' \\\n  -H 'accept: application/json' \\\n  -H 'cookie: wr_vid=9; wr_skey=zz' \\\n  --data-raw '{\"rt\":30}'";
        let jar = parse_cookie_source(cmd);
        assert_eq!(jar["wr_vid"], "9");
        assert_eq!(jar["wr_skey"], "zz");
    }

    #[test]
    fn test_parse_curl_header_double_quotes() {
        let cmd = r#"curl "https://weread.qq.com/" -H "Cookie: a=1; b=2""#;
        let jar = parse_cookie_source(cmd);
        assert_eq!(jar["a"], "1");
        assert_eq!(jar["b"], "2");
    }

    #[test]
    fn test_parse_curl_b_flag() {
        let cmd = "curl 'https://weread.qq.com/' -b 'wr_skey=q1; wr_vid=7'";
        let jar = parse_cookie_source(cmd);
        assert_eq!(jar["wr_skey"], "q1");
        assert_eq!(jar["wr_vid"], "7");
    }

    #[test]
    fn test_curl_without_cookie_is_empty() {
        let jar = parse_cookie_source("curl 'https://weread.qq.com/' -H 'accept: */*'");
        assert!(jar.is_empty());
    }

    #[test]
    fn test_redacted_hides_values() {
        let jar = parse_cookie_source("wr_skey=secret; wr_vid=1");
        let shown = redacted(&jar);
        assert_eq!(shown, vec!["wr_skey=***", "wr_vid=***"]);
    }
}
