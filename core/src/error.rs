//! Error types for the request/response composition layer.
//!
//! # Design
//! Builder errors (`InvalidUrl`, `InvalidConfig`) are returned synchronously
//! from the call that caused them. Everything that happens after dispatch
//! travels inside a failed [`Promise`](crate::Promise) instead, and keeps
//! travelling through `map`/`flat_map` chains until something recovers it.
//!
//! `WsError` is `Clone` because a single promise outcome is handed to every
//! continuation registered on it. Underlying library errors are therefore
//! flattened into their message rather than kept as a boxed source.

use std::time::Duration;

/// Errors produced while building, dispatching or reading a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WsError {
    /// The request URL is empty, unparsable, not http(s), or has no host.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// A builder or client setting was rejected (bad header, negative
    /// timeout, unsupported auth scheme, malformed client config).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The transport could not reach the server or the connection broke.
    #[error("connection error: {0}")]
    Connection(String),

    /// The exchange did not complete within the allotted window.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// TLS handshake or certificate verification failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The response body does not match the requested representation.
    #[error("parse error: {0}")]
    Parse(String),

    /// The response body exceeded the client's size limit (in bytes).
    #[error("response body larger than {0} bytes")]
    BodyTooLarge(u64),

    /// A continuation panicked or failed before producing its next step.
    #[error("continuation failed: {0}")]
    Chain(String),

    /// Every completer was dropped while the promise was still pending.
    #[error("promise abandoned before completion")]
    Abandoned,
}

impl WsError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, WsError::Timeout(_))
    }

    pub fn is_connect(&self) -> bool {
        matches!(self, WsError::Connection(_))
    }

    /// Returns `true` for errors raised synchronously by builders.
    pub fn is_builder(&self) -> bool {
        matches!(self, WsError::InvalidUrl(_) | WsError::InvalidConfig(_))
    }
}

/// A `Result` alias where the `Err` case is [`WsError`].
pub type Result<T> = std::result::Result<T, WsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_detail() {
        let err = WsError::InvalidUrl("missing host".to_string());
        assert_eq!(err.to_string(), "invalid URL: missing host");

        let err = WsError::Timeout(Duration::from_millis(1));
        assert_eq!(err.to_string(), "timed out after 1ms");

        let err = WsError::BodyTooLarge(1024);
        assert_eq!(err.to_string(), "response body larger than 1024 bytes");
        assert!(!err.is_connect());
    }

    #[test]
    fn classification_helpers() {
        assert!(WsError::Timeout(Duration::ZERO).is_timeout());
        assert!(WsError::Connection("refused".into()).is_connect());
        assert!(WsError::InvalidConfig("bad header".into()).is_builder());
        assert!(!WsError::Parse("eof".into()).is_builder());
    }
}
