//! Request and outcome types shared by every adapter

use crate::{Error, ErrorKind, Result};
use http::{Method, Uri};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Timeout applied when the caller gives none (or zero)
pub const DEFAULT_TIMEOUT_MS: u64 = 20_000;

/// Longest accepted timeout
pub const MAX_TIMEOUT_MS: u64 = 600_000;

/// Validated HTTP request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    uri: Uri,
    headers: Vec<(String, String)>,
    body: Option<String>,
    timeout: Duration,
}

impl HttpRequest {
    /// Validate method and URL; `timeout_ms` of 0 means the default
    pub fn new(method: &str, url: &str, timeout_ms: u64) -> Result<Self> {
        let method = Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| Error::InvalidRequest(format!("Invalid method '{}'", method)))?;
        let uri: Uri = url
            .trim()
            .parse()
            .map_err(|e| Error::InvalidRequest(format!("Invalid URL '{}': {}", url, e)))?;
        match uri.scheme_str() {
            Some("http") | Some("https") => {}
            _ => {
                return Err(Error::InvalidRequest(format!(
                    "URL '{}' must be absolute http or https",
                    url
                )))
            }
        }
        if uri.host().map_or(true, str::is_empty) {
            return Err(Error::InvalidRequest(format!("URL '{}' has no host", url)));
        }
        let timeout_ms = match timeout_ms {
            0 => DEFAULT_TIMEOUT_MS,
            ms => ms.min(MAX_TIMEOUT_MS),
        };
        Ok(Self {
            method,
            uri,
            headers: Vec::new(),
            body: None,
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    /// `GET url` with the default timeout
    pub fn get(url: &str) -> Result<Self> {
        Self::new("GET", url, 0)
    }

    /// Append a header; names and values must be valid HTTP tokens
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        http::HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::InvalidRequest(format!("Invalid header name '{}'", name)))?;
        http::HeaderValue::from_str(value)
            .map_err(|_| Error::InvalidRequest(format!("Invalid value for header '{}'", name)))?;
        self.headers.push((name.to_string(), value.to_string()));
        Ok(self)
    }

    /// Set the request body
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Parsed URL
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// URL as given
    pub fn url(&self) -> String {
        self.uri.to_string()
    }

    /// Host without brackets or port
    pub fn host(&self) -> &str {
        let host = self.uri.host().unwrap_or_default();
        host.trim_start_matches('[').trim_end_matches(']')
    }

    /// Explicit port, else the scheme default
    pub fn port(&self) -> u16 {
        self.uri
            .port_u16()
            .unwrap_or(if self.is_https() { 443 } else { 80 })
    }

    /// Whether the request uses TLS
    pub fn is_https(&self) -> bool {
        self.uri.scheme_str() == Some("https")
    }

    /// Headers in insertion order
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First header with this name, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether a header with this name is present, compared case-insensitively
    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// Remove and return every header with this name
    pub(crate) fn take_header(&mut self, name: &str) -> Option<String> {
        let mut taken = None;
        self.headers.retain(|(k, v)| {
            if k.eq_ignore_ascii_case(name) {
                taken.get_or_insert_with(|| v.clone());
                false
            } else {
                true
            }
        });
        taken
    }

    /// Body
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Deadline covering connect, handshake and read
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// What every adapter returns, success or not
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOutcome {
    /// HTTP status, `None` on any failure
    pub status: Option<u16>,
    /// Response body, empty on failure
    pub body: String,
    /// Wall time spent
    pub duration_ms: u64,
    /// Failure description
    pub error: Option<String>,
    /// Failure class
    pub error_kind: Option<ErrorKind>,
}

impl RequestOutcome {
    /// Successful response
    pub fn success(status: u16, body: String, started: Instant) -> Self {
        Self {
            status: Some(status),
            body,
            duration_ms: elapsed_ms(started),
            error: None,
            error_kind: None,
        }
    }

    /// Failed request
    pub fn failure(error: &Error, started: Instant) -> Self {
        Self {
            status: None,
            body: String::new(),
            duration_ms: elapsed_ms(started),
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
        }
    }

    /// Collapse a result into an outcome
    pub fn from_result(result: Result<(u16, String)>, started: Instant) -> Self {
        match result {
            Ok((status, body)) => Self::success(status, body, started),
            Err(e) => Self::failure(&e, started),
        }
    }

    /// Whether the request failed because of a pin check
    pub fn is_pin_mismatch(&self) -> bool {
        self.error_kind == Some(ErrorKind::PinMismatch)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        let request = HttpRequest::new("get", "https://example.com:8443/a?b=1", 0).unwrap();
        assert_eq!(*request.method(), Method::GET);
        assert_eq!(request.host(), "example.com");
        assert_eq!(request.port(), 8443);
        assert_eq!(request.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));

        assert!(HttpRequest::new("GE T", "https://example.com", 0).is_err());
        assert!(HttpRequest::new("GET", "ftp://example.com", 0).is_err());
        assert!(HttpRequest::new("GET", "/relative", 0).is_err());
        assert!(HttpRequest::new("GET", "not a url", 0).is_err());
    }

    #[test]
    fn test_timeout_clamped() {
        let request = HttpRequest::new("GET", "http://h", u64::MAX).unwrap();
        assert_eq!(request.timeout(), Duration::from_millis(MAX_TIMEOUT_MS));
        assert_eq!(HttpRequest::new("GET", "http://h", 5).unwrap().timeout().as_millis(), 5);
    }

    #[test]
    fn test_default_ports_and_ipv6_host() {
        assert_eq!(HttpRequest::get("https://h/").unwrap().port(), 443);
        assert_eq!(HttpRequest::get("http://h/").unwrap().port(), 80);
        assert_eq!(HttpRequest::get("https://[::1]:9/").unwrap().host(), "::1");
    }

    #[test]
    fn test_headers_case_insensitive() {
        let mut request = HttpRequest::get("https://h/")
            .unwrap()
            .with_header("X-Curl-CaInfo", "/tmp/ca.pem")
            .unwrap()
            .with_header("Accept", "*/*")
            .unwrap();
        assert!(request.has_header("x-curl-cainfo"));
        assert_eq!(request.take_header("X-CURL-CAINFO").as_deref(), Some("/tmp/ca.pem"));
        assert!(!request.has_header("X-Curl-CaInfo"));
        assert_eq!(request.headers().len(), 1);

        assert!(HttpRequest::get("https://h/")
            .unwrap()
            .with_header("bad header", "v")
            .is_err());
    }

    #[test]
    fn test_outcome_serializes_with_null_fields() {
        let outcome = RequestOutcome::failure(&Error::Timeout("read".into()), Instant::now());
        let json = serde_json::to_value(&outcome).unwrap();
        assert!(json["status"].is_null());
        assert_eq!(json["body"], "");
        assert_eq!(json["errorKind"], "timeout");
        assert!(json["durationMs"].is_u64());
    }
}
