//! Transport error classification
//!
//! Upstream backends do not share a stable error contract, so failures are
//! sorted into a small set of classes that drive the router's retry policy:
//!
//! | Class | Same backend | Other backends |
//! |-------|--------------|----------------|
//! | timeout, connection_refused, dns, http_5xx | retried | yes |
//! | http_4xx, unknown | no | yes |
//! | provider_mismatch, invalid_response | no | no |

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Timeout,
    ConnectionRefused,
    Dns,
    #[serde(rename = "http_4xx")]
    Http4xx,
    #[serde(rename = "http_5xx")]
    Http5xx,
    ProviderMismatch,
    InvalidResponse,
    Unknown,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Timeout => "timeout",
            ErrorClass::ConnectionRefused => "connection_refused",
            ErrorClass::Dns => "dns",
            ErrorClass::Http4xx => "http_4xx",
            ErrorClass::Http5xx => "http_5xx",
            ErrorClass::ProviderMismatch => "provider_mismatch",
            ErrorClass::InvalidResponse => "invalid_response",
            ErrorClass::Unknown => "unknown",
        }
    }

    /// Worth another attempt on the same backend
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorClass::Timeout | ErrorClass::ConnectionRefused | ErrorClass::Dns | ErrorClass::Http5xx
        )
    }

    /// Aborts the whole operation, no failover
    pub fn is_terminal(&self) -> bool {
        matches!(self, ErrorClass::ProviderMismatch | ErrorClass::InvalidResponse)
    }

    pub fn from_status(status: u16) -> Self {
        match status {
            500..=599 => ErrorClass::Http5xx,
            400..=499 => ErrorClass::Http4xx,
            _ => ErrorClass::Unknown,
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure of one transport attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{class}: {message}")]
pub struct TransportError {
    pub class: ErrorClass,
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            status: None,
            message: message.into(),
        }
    }

    /// Non-success HTTP response
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::from_status(status),
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn timeout(after_ms: u64) -> Self {
        Self::new(ErrorClass::Timeout, format!("attempt timed out after {} ms", after_ms))
    }

    pub fn provider_mismatch(expected: &str, actual: &str) -> Self {
        Self::new(
            ErrorClass::ProviderMismatch,
            format!("provider mismatch: expected {}, got {}", expected, actual),
        )
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::InvalidResponse, message)
    }

    /// Classify opaque error text
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let (class, status) = classify_message(&message);
        Self { class, status, message }
    }

    pub fn is_retryable(&self) -> bool {
        self.class.is_retryable()
    }

    pub fn is_terminal(&self) -> bool {
        self.class.is_terminal()
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let message = err.to_string();
        if err.is_timeout() {
            return Self::new(ErrorClass::Timeout, message);
        }
        if let Some(status) = err.status() {
            return Self::http(status.as_u16(), message);
        }
        if err.is_decode() {
            return Self::new(ErrorClass::Unknown, message);
        }
        // reqwest hides the io error kind behind its own Display, so the
        // source chain is matched as text.
        let mut detail = message.clone();
        let mut source = std::error::Error::source(&err);
        while let Some(inner) = source {
            detail.push_str(": ");
            detail.push_str(&inner.to_string());
            source = inner.source();
        }
        // Status comes from the response only; the text embeds the request URL.
        match classify_by_rules(&detail.to_lowercase()) {
            Some(class) => Self::new(class, detail),
            None if err.is_connect() => Self::new(ErrorClass::ConnectionRefused, detail),
            None => Self::new(ErrorClass::Unknown, detail),
        }
    }
}

type Rule = (&'static str, fn(&str) -> bool, ErrorClass);

/// Named rules, evaluated in order against lowercased text
const RULES: &[Rule] = &[
    ("provider_mismatch", says_provider_mismatch, ErrorClass::ProviderMismatch),
    ("timeout", says_timeout, ErrorClass::Timeout),
    ("connection_refused", says_connection_refused, ErrorClass::ConnectionRefused),
    ("dns", says_dns, ErrorClass::Dns),
];

fn says_provider_mismatch(m: &str) -> bool {
    m.contains("provider mismatch")
}

fn says_timeout(m: &str) -> bool {
    m.contains("timed out") || m.contains("timeout") || m.contains("aborted")
}

fn says_connection_refused(m: &str) -> bool {
    m.contains("connection refused")
        || m.contains("econnrefused")
        || m.contains("connection reset")
        || m.contains("network error")
        || m.contains("failed to fetch")
}

fn says_dns(m: &str) -> bool {
    m.contains("dns")
        || m.contains("failed to lookup address")
        || m.contains("name or service not known")
        || m.contains("enotfound")
}

fn classify_by_rules(lower: &str) -> Option<ErrorClass> {
    RULES.iter().find(|(_, matches, _)| matches(lower)).map(|(name, _, class)| {
        tracing::trace!(rule = name, "Classified transport error");
        *class
    })
}

/// Ordered classification of opaque upstream error text
///
/// After the named rules, an explicit `HTTP nnn` or `status nnn` token in
/// 100..=599 is taken as the HTTP status. Bare numbers are not.
pub fn classify_message(message: &str) -> (ErrorClass, Option<u16>) {
    let lower = message.to_lowercase();

    if let Some(class) = classify_by_rules(&lower) {
        return (class, None);
    }

    match embedded_status(&lower) {
        Some(status) => (ErrorClass::from_status(status), Some(status)),
        None => (ErrorClass::Unknown, None),
    }
}

fn embedded_status(text: &str) -> Option<u16> {
    let words: Vec<&str> = text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_ascii_alphanumeric()))
        .collect();
    words
        .windows(2)
        .filter(|pair| pair[0] == "http" || pair[0] == "status")
        .filter(|pair| pair[1].len() == 3)
        .filter_map(|pair| pair[1].parse::<u16>().ok())
        .find(|status| (100..=599).contains(status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_and_terminal_sets() {
        let retryable: Vec<_> = [
            ErrorClass::Timeout,
            ErrorClass::ConnectionRefused,
            ErrorClass::Dns,
            ErrorClass::Http4xx,
            ErrorClass::Http5xx,
            ErrorClass::ProviderMismatch,
            ErrorClass::InvalidResponse,
            ErrorClass::Unknown,
        ]
        .into_iter()
        .filter(|c| c.is_retryable())
        .collect();
        assert_eq!(
            retryable,
            vec![ErrorClass::Timeout, ErrorClass::ConnectionRefused, ErrorClass::Dns, ErrorClass::Http5xx]
        );

        assert!(ErrorClass::ProviderMismatch.is_terminal());
        assert!(ErrorClass::InvalidResponse.is_terminal());
        assert!(!ErrorClass::Http4xx.is_terminal());
        assert!(!ErrorClass::Unknown.is_terminal());
    }

    #[test]
    fn test_from_status() {
        assert_eq!(ErrorClass::from_status(404), ErrorClass::Http4xx);
        assert_eq!(ErrorClass::from_status(429), ErrorClass::Http4xx);
        assert_eq!(ErrorClass::from_status(503), ErrorClass::Http5xx);
        assert_eq!(ErrorClass::from_status(302), ErrorClass::Unknown);
    }

    #[test]
    fn test_classify_rules_in_order() {
        assert_eq!(classify_message("Provider mismatch after timeout").0, ErrorClass::ProviderMismatch);
        assert_eq!(classify_message("request timed out").0, ErrorClass::Timeout);
        assert_eq!(classify_message("tcp connect error: Connection refused (os error 111)").0, ErrorClass::ConnectionRefused);
        assert_eq!(classify_message("failed to lookup address information").0, ErrorClass::Dns);
        assert_eq!(classify_message("something odd").0, ErrorClass::Unknown);
    }

    #[test]
    fn test_classify_embedded_status() {
        assert_eq!(classify_message("upstream status 502 bad gateway"), (ErrorClass::Http5xx, Some(502)));
        assert_eq!(classify_message("HTTP 404: file missing"), (ErrorClass::Http4xx, Some(404)));
        assert_eq!(classify_message("Status: 503"), (ErrorClass::Http5xx, Some(503)));
        // four digits is not a status
        assert_eq!(classify_message("HTTP 8080 closed").0, ErrorClass::Unknown);
    }

    #[test]
    fn test_digits_in_urls_are_not_statuses() {
        let message = "error sending request for url \
            (http://gw.example.org/gateway/fetch/0xabcd?deal_id=512&owner=nil1xyz): \
            connection closed before message completed";
        assert_eq!(classify_message(message), (ErrorClass::Unknown, None));
        assert_eq!(classify_message("gateway returned 502 bad gateway"), (ErrorClass::Unknown, None));
        assert_eq!(classify_message("request to http://127.0.0.1:8080/x failed"), (ErrorClass::Unknown, None));
    }

    #[tokio::test]
    async fn test_reqwest_error_ignores_url_digits() {
        let err = reqwest::get("http://127.0.0.1:1/gateway/fetch/0xab?deal_id=512")
            .await
            .unwrap_err();
        let err = TransportError::from(err);
        assert_eq!(err.status, None);
        assert_eq!(err.class, ErrorClass::ConnectionRefused);
    }

    #[test]
    fn test_error_display() {
        let err = TransportError::http(404, "file not found in deal");
        assert_eq!(err.to_string(), "http_4xx: file not found in deal");
        assert_eq!(err.status, Some(404));
    }
}
