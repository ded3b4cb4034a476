//! URI handling utilities
//!
//! Percent encoding/decoding, URI validation, `file://` root decoding, and
//! the URI-template matcher resource registration builds on. A template
//! like `/items/{id}` matches `/items/42` and binds `id = "42"`; variables
//! never span a `/`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use url::Url;

use crate::core::error::{McpError, McpResult};

static TEMPLATE_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("template variable pattern"));

/// Whether a URI pattern contains `{variable}` expressions
pub fn is_template(pattern: &str) -> bool {
    TEMPLATE_VAR.is_match(pattern)
}

/// A compiled URI template
#[derive(Debug, Clone)]
pub struct UriTemplate {
    pattern: String,
    matcher: Regex,
    variables: Vec<String>,
}

impl UriTemplate {
    /// Compile a URI template into a matcher.
    ///
    /// Literal segments are matched verbatim; each `{variable}` matches one
    /// or more characters up to the next `/`.
    pub fn compile(pattern: &str) -> McpResult<Self> {
        let mut regex_src = String::from("^");
        let mut variables = Vec::new();
        let mut last = 0;

        for capture in TEMPLATE_VAR.captures_iter(pattern) {
            let whole = capture.get(0).expect("capture 0 always present");
            let name = capture[1].to_string();
            if variables.contains(&name) {
                return Err(McpError::InvalidUri(format!(
                    "Duplicate template variable '{name}' in '{pattern}'"
                )));
            }
            regex_src.push_str(&regex::escape(&pattern[last..whole.start()]));
            regex_src.push_str(&format!("(?P<{name}>[^/]+)"));
            variables.push(name);
            last = whole.end();
        }
        regex_src.push_str(&regex::escape(&pattern[last..]));
        regex_src.push('$');

        let matcher = Regex::new(&regex_src)
            .map_err(|e| McpError::InvalidUri(format!("Invalid URI template '{pattern}': {e}")))?;

        Ok(Self {
            pattern: pattern.to_string(),
            matcher,
            variables,
        })
    }

    /// The original template pattern
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Variable names in template order
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Match a URI against the template, extracting path variables.
    ///
    /// Extracted values are percent-decoded.
    pub fn matches(&self, uri: &str) -> Option<HashMap<String, String>> {
        let captures = self.matcher.captures(uri)?;
        let mut bound = HashMap::new();
        for name in &self.variables {
            let raw = captures.name(name)?.as_str();
            let value = percent_decode(raw).unwrap_or_else(|_| raw.to_string());
            bound.insert(name.clone(), value);
        }
        Some(bound)
    }
}

/// Simple percent decoding for URI components
pub fn percent_decode(s: &str) -> McpResult<String> {
    let mut result = String::new();
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '%' {
            let hex1 = chars
                .next()
                .ok_or_else(|| McpError::InvalidUri("Incomplete percent encoding".to_string()))?;
            let hex2 = chars
                .next()
                .ok_or_else(|| McpError::InvalidUri("Incomplete percent encoding".to_string()))?;

            let hex_str = format!("{hex1}{hex2}");
            let byte = u8::from_str_radix(&hex_str, 16).map_err(|_| {
                McpError::InvalidUri(format!("Invalid hex in percent encoding: {hex_str}"))
            })?;

            result.push(byte as char);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

/// Simple percent encoding for URI components
pub fn percent_encode(s: &str) -> String {
    let mut result = String::new();

    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{byte:02X}"));
            }
        }
    }

    result
}

/// Validate that a string is a plausible resource URI or path
pub fn validate_uri(uri: &str) -> McpResult<()> {
    if uri.is_empty() {
        return Err(McpError::InvalidUri("URI cannot be empty".to_string()));
    }

    if uri.contains('\0') || uri.contains('\n') || uri.contains('\r') {
        return Err(McpError::InvalidUri(
            "URI contains invalid characters".to_string(),
        ));
    }

    if uri.contains("://") {
        Url::parse(uri).map_err(|e| McpError::InvalidUri(format!("Invalid URI '{uri}': {e}")))?;
    }

    Ok(())
}

/// Decode a `file://` root URI into a filesystem path.
///
/// Non-file URIs are returned percent-decoded but otherwise verbatim.
pub fn root_uri_to_path(uri: &str) -> McpResult<String> {
    if let Some(rest) = uri.strip_prefix("file://") {
        return percent_decode(rest);
    }
    percent_decode(uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_template() {
        assert!(is_template("/items/{id}"));
        assert!(is_template("file:///logs/{date}/{level}"));
        assert!(!is_template("/items/all"));
        assert!(!is_template("file:///static.txt"));
    }

    #[test]
    fn test_template_match_single_variable() {
        let template = UriTemplate::compile("/items/{id}").unwrap();
        let bound = template.matches("/items/42").unwrap();
        assert_eq!(bound.get("id"), Some(&"42".to_string()));
        assert!(template.matches("/items/42/details").is_none());
        assert!(template.matches("/other/42").is_none());
    }

    #[test]
    fn test_template_match_multiple_variables() {
        let template = UriTemplate::compile("repo://{owner}/{name}/readme").unwrap();
        let bound = template.matches("repo://octo/hello/readme").unwrap();
        assert_eq!(bound.get("owner"), Some(&"octo".to_string()));
        assert_eq!(bound.get("name"), Some(&"hello".to_string()));
    }

    #[test]
    fn test_template_variables_never_span_slash() {
        let template = UriTemplate::compile("/files/{name}").unwrap();
        assert!(template.matches("/files/a/b").is_none());
    }

    #[test]
    fn test_template_values_percent_decoded() {
        let template = UriTemplate::compile("/files/{name}").unwrap();
        let bound = template.matches("/files/hello%20world").unwrap();
        assert_eq!(bound.get("name"), Some(&"hello world".to_string()));
    }

    #[test]
    fn test_duplicate_variable_rejected() {
        assert!(UriTemplate::compile("/x/{a}/{a}").is_err());
    }

    #[test]
    fn test_percent_encode_decode() {
        let original = "hello world!@#$%";
        let encoded = percent_encode(original);
        let decoded = percent_decode(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_validate_uri() {
        assert!(validate_uri("https://example.com").is_ok());
        assert!(validate_uri("/absolute/path").is_ok());
        assert!(validate_uri("relative/path").is_ok());
        assert!(validate_uri("").is_err());
        assert!(validate_uri("invalid\0uri").is_err());
    }

    #[test]
    fn test_root_uri_to_path() {
        assert_eq!(root_uri_to_path("file:///ws").unwrap(), "/ws");
        assert_eq!(
            root_uri_to_path("file:///my%20project").unwrap(),
            "/my project"
        );
        assert_eq!(root_uri_to_path("/plain/path").unwrap(), "/plain/path");
    }
}
