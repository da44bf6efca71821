//! HTTP exchange types handed across the transport boundary.
//!
//! # Design
//! These types describe a request and its raw response as plain data. The
//! builder assembles an [`HttpRequest`] with every default already resolved
//! (final URL, final headers, encoded body, effective redirect policy), and
//! a [`Transport`](crate::Transport) turns it into an [`HttpExchange`]. The
//! core never touches sockets itself, which keeps it deterministic under a
//! scripted transport in tests.

use std::time::Duration;

use bytes::Bytes;
use http::HeaderMap;
use url::Url;

use crate::request::Credentials;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl From<HttpMethod> for http::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => http::Method::GET,
            HttpMethod::Head => http::Method::HEAD,
            HttpMethod::Post => http::Method::POST,
            HttpMethod::Put => http::Method::PUT,
            HttpMethod::Patch => http::Method::PATCH,
            HttpMethod::Delete => http::Method::DELETE,
            HttpMethod::Options => http::Method::OPTIONS,
        }
    }
}

/// A fully assembled request, ready for a transport.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    /// Final URL, query parameters applied.
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub follow_redirects: bool,
    /// Effective timeout: the request's own, else the client's.
    pub timeout: Option<Duration>,
    /// Credentials for challenge-based schemes (Digest, NTLM). Basic
    /// credentials are already folded into `headers`.
    pub credentials: Option<Credentials>,
}

/// The raw outcome of one HTTP round-trip.
#[derive(Debug, Clone)]
pub struct HttpExchange {
    pub status: u16,
    /// URL the response was finally served from, after any redirects.
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}
