//! Read-only view over a completed HTTP exchange.
//!
//! # Design
//! The body is buffered once when the exchange completes. Parsed views
//! ([`as_json`](WsResponse::as_json), [`as_xml`](WsResponse::as_xml)) are
//! computed on first use and cached in `OnceLock`s that live as long as the
//! response, including parse failures, so a body is never parsed twice.
//! [`body_as_stream`](WsResponse::body_as_stream) is a reader over the same
//! buffer: consuming it leaves every other accessor intact.
//!
//! `WsResponse` is a cheap handle (`Arc` inside) because one response is
//! handed to every continuation registered on its promise.

use std::borrow::Cow;
use std::fmt;
use std::io::{self, BufRead, Read};
use std::sync::{Arc, OnceLock};

use bytes::{Buf, Bytes};
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{Result, WsError};
use crate::http::HttpExchange;
use crate::xml::XmlDocument;

#[derive(Clone)]
pub struct WsResponse {
    inner: Arc<Inner>,
}

struct Inner {
    status: u16,
    url: Url,
    headers: HeaderMap,
    body: Bytes,
    json: OnceLock<Result<serde_json::Value>>,
    xml: OnceLock<Result<XmlDocument>>,
}

impl WsResponse {
    pub fn from_exchange(exchange: HttpExchange) -> Self {
        Self {
            inner: Arc::new(Inner {
                status: exchange.status,
                url: exchange.url,
                headers: exchange.headers,
                body: exchange.body,
                json: OnceLock::new(),
                xml: OnceLock::new(),
            }),
        }
    }

    pub fn status(&self) -> u16 {
        self.inner.status
    }

    /// Canonical reason phrase, `"Unknown"` for non-standard codes.
    pub fn status_text(&self) -> &'static str {
        StatusCode::from_u16(self.inner.status)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("Unknown")
    }

    /// URL the response was served from, after redirects.
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// First value of header `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Every value of header `name`, in received order.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.inner
            .headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    pub fn raw_body(&self) -> &Bytes {
        &self.inner.body
    }

    /// Body as text; invalid UTF-8 sequences are replaced.
    pub fn body(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.inner.body)
    }

    /// Parsed JSON tree, computed on first call and cached.
    pub fn as_json(&self) -> Result<&serde_json::Value> {
        self.inner
            .json
            .get_or_init(|| {
                log::trace!("parsing {} byte body as JSON", self.inner.body.len());
                serde_json::from_slice(&self.inner.body)
                    .map_err(|e| WsError::Parse(format!("body is not valid JSON: {e}")))
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Deserialize the body into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.inner.body)
            .map_err(|e| WsError::Parse(format!("body does not match the expected shape: {e}")))
    }

    /// Parsed XML document, computed on first call and cached.
    pub fn as_xml(&self) -> Result<&XmlDocument> {
        self.inner
            .xml
            .get_or_init(|| XmlDocument::parse(&self.inner.body))
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Single-pass reader over the buffered body.
    pub fn body_as_stream(&self) -> BodyStream {
        BodyStream {
            reader: self.inner.body.clone().reader(),
        }
    }
}

impl From<HttpExchange> for WsResponse {
    fn from(exchange: HttpExchange) -> Self {
        Self::from_exchange(exchange)
    }
}

impl fmt::Debug for WsResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsResponse")
            .field("status", &self.inner.status)
            .field("url", &self.inner.url.as_str())
            .field("headers", &self.inner.headers)
            .field("body_len", &self.inner.body.len())
            .finish()
    }
}

/// Sequential, finite byte stream over a response body.
pub struct BodyStream {
    reader: bytes::buf::Reader<Bytes>,
}

impl Read for BodyStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl BufRead for BodyStream {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.reader.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.reader.consume(amt)
    }
}
