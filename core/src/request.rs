//! Immutable request configuration and the fluent builder on top of it.
//!
//! # Design
//! [`RequestSpec`] is a persistent value: every setter returns a new spec and
//! leaves the receiver untouched. Each part lives behind its own `Arc`, so a
//! setter copies only the part it changes and shares the rest with its
//! predecessor. A spec can therefore be kept as a template and specialized
//! any number of times without aliasing surprises.
//!
//! [`WsRequest`] pairs a spec with the [`Client`] it was created from. Its
//! verb methods resolve the spec against the client's configuration into an
//! [`HttpRequest`] and return a [`Promise`] immediately.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http::header::{ACCEPT_ENCODING, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::body::Body;
use crate::client::{Client, ClientConfig};
use crate::error::{Result, WsError};
use crate::http::{HttpMethod, HttpRequest};
use crate::promise::Promise;
use crate::response::WsResponse;

/// Authentication scheme for [`RequestSpec::set_auth`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    Basic,
    Digest,
    Ntlm,
}

/// Username, password and the scheme to present them with.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub scheme: AuthScheme,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("scheme", &self.scheme)
            .finish()
    }
}

/// Immutable description of a request to be dispatched.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    url: Arc<Url>,
    headers: Arc<HeaderMap>,
    query: Arc<Vec<(String, String)>>,
    timeout: Option<Duration>,
    auth: Option<Arc<Credentials>>,
    follow_redirects: Option<bool>,
    body: Arc<Body>,
}

impl RequestSpec {
    /// Start a spec for `url`.
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self {
            url: Arc::new(parse_url(url)?),
            headers: Arc::new(HeaderMap::new()),
            query: Arc::new(Vec::new()),
            timeout: None,
            auth: None,
            follow_redirects: None,
            body: Arc::new(Body::Empty),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of header `name`, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Query parameters added with `set_query_parameter`, in insertion order.
    pub fn query_parameters(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn auth(&self) -> Option<&Credentials> {
        self.auth.as_deref()
    }

    /// `None` means "use the client default".
    pub fn follow_redirects(&self) -> Option<bool> {
        self.follow_redirects
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE.as_str())
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Set header `name`, replacing any previous value.
    pub fn set_header(&self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| WsError::InvalidConfig(format!("invalid header name `{name}`")))?;
        let value = HeaderValue::from_str(value).map_err(|_| {
            WsError::InvalidConfig(format!("invalid value for header `{name}`"))
        })?;
        let mut next = self.clone();
        Arc::make_mut(&mut next.headers).insert(name, value);
        Ok(next)
    }

    /// Append a query parameter. Repeated names are kept, in order.
    pub fn set_query_parameter(&self, name: &str, value: &str) -> Self {
        let mut next = self.clone();
        Arc::make_mut(&mut next.query).push((name.to_string(), value.to_string()));
        next
    }

    pub fn set_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self.clone()
        }
    }

    /// Millisecond variant of [`set_timeout`](Self::set_timeout); negative
    /// values are rejected.
    pub fn set_timeout_millis(&self, millis: i64) -> Result<Self> {
        let millis = u64::try_from(millis)
            .map_err(|_| WsError::InvalidConfig(format!("timeout must be non-negative, got {millis}ms")))?;
        Ok(self.set_timeout(Duration::from_millis(millis)))
    }

    pub fn set_auth(&self, username: &str, password: &str, scheme: AuthScheme) -> Self {
        Self {
            auth: Some(Arc::new(Credentials {
                username: username.to_string(),
                password: password.to_string(),
                scheme,
            })),
            ..self.clone()
        }
    }

    pub fn set_follow_redirects(&self, follow: bool) -> Self {
        Self {
            follow_redirects: Some(follow),
            ..self.clone()
        }
    }

    /// Shorthand for `set_header("Content-Type", mime)`.
    pub fn set_content_type(&self, mime: &str) -> Result<Self> {
        self.set_header(CONTENT_TYPE.as_str(), mime)
    }

    pub fn set_body(&self, body: impl Into<Body>) -> Self {
        Self {
            body: Arc::new(body.into()),
            ..self.clone()
        }
    }

    /// Resolve this spec against client defaults into a dispatchable request.
    ///
    /// An explicit `Content-Type` wins over the one inferred from the body,
    /// and an explicit `User-Agent` wins over the client's.
    pub fn assemble(&self, method: HttpMethod, config: &ClientConfig) -> Result<HttpRequest> {
        let mut url = (*self.url).clone();
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }

        let mut headers = (*self.headers).clone();
        if !headers.contains_key(CONTENT_TYPE) {
            if let Some(inferred) = self.body.inferred_content_type() {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(inferred));
            }
        }
        if !headers.contains_key(USER_AGENT) {
            let agent = HeaderValue::from_str(config.user_agent())
                .map_err(|_| WsError::InvalidConfig("invalid user agent".to_string()))?;
            headers.insert(USER_AGENT, agent);
        }
        if !config.compression_enabled() && !headers.contains_key(ACCEPT_ENCODING) {
            headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        }

        let mut credentials = None;
        if let Some(auth) = &self.auth {
            match auth.scheme {
                AuthScheme::Basic => {
                    headers.insert(AUTHORIZATION, basic_auth(&auth.username, &auth.password)?);
                }
                AuthScheme::Digest | AuthScheme::Ntlm => credentials = Some((**auth).clone()),
            }
        }

        Ok(HttpRequest {
            method,
            url,
            headers,
            body: self.body.to_bytes()?,
            follow_redirects: self.follow_redirects.unwrap_or(config.follow_redirects()),
            timeout: self.timeout.or(config.request_timeout()),
            credentials,
        })
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(WsError::InvalidUrl("URL is empty".to_string()));
    }
    let url = Url::parse(raw).map_err(|e| WsError::InvalidUrl(format!("{raw}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(WsError::InvalidUrl(format!("{raw}: unsupported scheme `{}`", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(WsError::InvalidUrl(format!("{raw}: missing host")));
    }
    Ok(url)
}

fn basic_auth(username: &str, password: &str) -> Result<HeaderValue> {
    let encoded = STANDARD.encode(format!("{username}:{password}"));
    let mut header = HeaderValue::from_str(&format!("Basic {encoded}"))
        .map_err(|_| WsError::InvalidConfig("invalid basic credentials".to_string()))?;
    header.set_sensitive(true);
    Ok(header)
}

/// A [`RequestSpec`] bound to the [`Client`] that will dispatch it.
#[derive(Debug, Clone)]
pub struct WsRequest {
    client: Client,
    spec: RequestSpec,
}

impl WsRequest {
    pub(crate) fn new(client: Client, spec: RequestSpec) -> Self {
        Self { client, spec }
    }

    fn with_spec(&self, spec: RequestSpec) -> Self {
        Self {
            client: self.client.clone(),
            spec,
        }
    }

    pub fn spec(&self) -> &RequestSpec {
        &self.spec
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn set_header(&self, name: &str, value: &str) -> Result<Self> {
        Ok(self.with_spec(self.spec.set_header(name, value)?))
    }

    pub fn set_query_parameter(&self, name: &str, value: &str) -> Self {
        self.with_spec(self.spec.set_query_parameter(name, value))
    }

    /// Override the client's request timeout for this request only.
    pub fn set_timeout(&self, timeout: Duration) -> Self {
        self.with_spec(self.spec.set_timeout(timeout))
    }

    pub fn set_timeout_millis(&self, millis: i64) -> Result<Self> {
        Ok(self.with_spec(self.spec.set_timeout_millis(millis)?))
    }

    /// Attach credentials. Fails if the client's transport cannot present
    /// `scheme`.
    pub fn set_auth(&self, username: &str, password: &str, scheme: AuthScheme) -> Result<Self> {
        if !self.client.transport().supports_auth(scheme) {
            return Err(WsError::InvalidConfig(format!(
                "{scheme:?} authentication is not supported by this client's transport"
            )));
        }
        Ok(self.with_spec(self.spec.set_auth(username, password, scheme)))
    }

    pub fn set_follow_redirects(&self, follow: bool) -> Self {
        self.with_spec(self.spec.set_follow_redirects(follow))
    }

    pub fn set_content_type(&self, mime: &str) -> Result<Self> {
        Ok(self.with_spec(self.spec.set_content_type(mime)?))
    }

    pub fn set_body(&self, body: impl Into<Body>) -> Self {
        self.with_spec(self.spec.set_body(body))
    }

    pub fn get(&self) -> Promise<WsResponse> {
        self.execute(HttpMethod::Get)
    }

    pub fn head(&self) -> Promise<WsResponse> {
        self.execute(HttpMethod::Head)
    }

    pub fn delete(&self) -> Promise<WsResponse> {
        self.execute(HttpMethod::Delete)
    }

    pub fn options(&self) -> Promise<WsResponse> {
        self.execute(HttpMethod::Options)
    }

    pub fn post(&self, body: impl Into<Body>) -> Promise<WsResponse> {
        self.set_body(body).execute(HttpMethod::Post)
    }

    pub fn put(&self, body: impl Into<Body>) -> Promise<WsResponse> {
        self.set_body(body).execute(HttpMethod::Put)
    }

    pub fn patch(&self, body: impl Into<Body>) -> Promise<WsResponse> {
        self.set_body(body).execute(HttpMethod::Patch)
    }

    /// Dispatch with `method` and whatever body was set on the spec.
    pub fn execute(&self, method: HttpMethod) -> Promise<WsResponse> {
        match self.spec.assemble(method, self.client.config()) {
            Ok(request) => self.client.dispatch(request),
            Err(error) => Promise::failed(error),
        }
    }
}
