//! The transport seam and its ureq-backed implementation.
//!
//! # Design
//! The core hands a fully assembled [`HttpRequest`] to a [`Transport`] and
//! gets a [`Promise`] of the raw [`HttpExchange`] back. Everything below that
//! line (sockets, TLS, pooling, proxies, redirects) belongs to the transport.
//!
//! [`UreqTransport`] runs each blocking `ureq` call on the owning client's
//! blocking pool. It keeps two agents built from the same configuration, one
//! that follows redirects and one that returns 3xx responses as they are,
//! and picks one per request. Error statuses are returned as data, never as
//! errors; interpreting them is left to the caller.
//!
//! The overall deadline comes from [`HttpRequest::timeout`] and is applied to
//! each request on its own. Digest credentials are only sent after the
//! server answers `401` with a Digest challenge, and then exactly once.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use http::{HeaderValue, StatusCode};
use tokio::runtime::Handle;
use ureq::tls::TlsConfig;
use ureq::ResponseExt;
use url::Url;

use crate::client::ClientConfig;
use crate::error::{Result, WsError};
use crate::http::{HttpExchange, HttpRequest};
use crate::promise::Promise;
use crate::request::AuthScheme;

const MAX_REDIRECTS: u32 = 10;

/// Performs HTTP exchanges on behalf of a [`Client`](crate::Client).
pub trait Transport: Send + Sync + 'static {
    /// Start the exchange and return without waiting for it.
    fn dispatch(&self, request: HttpRequest) -> Promise<HttpExchange>;

    /// Whether credentials of `scheme` can be presented. Basic credentials
    /// arrive pre-encoded in the `Authorization` header; other schemes are
    /// passed in [`HttpRequest::credentials`].
    fn supports_auth(&self, scheme: AuthScheme) -> bool {
        scheme == AuthScheme::Basic
    }
}

/// Blocking `ureq` agents driven from the client's blocking pool.
///
/// Digest credentials are answered on the first `401` carrying a Digest
/// challenge. NTLM is not supported.
pub struct UreqTransport {
    following: ureq::Agent,
    direct: ureq::Agent,
    handle: Handle,
    max_body: u64,
}

impl UreqTransport {
    pub fn new(config: &ClientConfig, handle: Handle) -> Result<Self> {
        Ok(Self {
            following: agent(config, MAX_REDIRECTS)?,
            direct: agent(config, 0)?,
            handle,
            max_body: config.max_response_size().unwrap_or(u64::MAX),
        })
    }
}

impl Transport for UreqTransport {
    fn dispatch(&self, request: HttpRequest) -> Promise<HttpExchange> {
        let agent = if request.follow_redirects {
            self.following.clone()
        } else {
            self.direct.clone()
        };
        let max_body = self.max_body;
        Promise::spawn_blocking(&self.handle, move || execute(&agent, request, max_body))
    }

    fn supports_auth(&self, scheme: AuthScheme) -> bool {
        matches!(scheme, AuthScheme::Basic | AuthScheme::Digest)
    }
}

fn agent(config: &ClientConfig, max_redirects: u32) -> Result<ureq::Agent> {
    let proxy = match config.proxy() {
        Some(server) => Some(
            ureq::Proxy::new(&server.to_url())
                .map_err(|e| WsError::InvalidConfig(format!("invalid proxy: {e}")))?,
        ),
        None if config.use_proxy_properties() => ureq::Proxy::try_from_env(),
        None => None,
    };
    let tls = TlsConfig::builder()
        .disable_verification(config.accept_any_certificate())
        .use_sni(config.tls().use_sni)
        .build();

    // The overall deadline is per request (see `send`), never per agent.
    let mut builder = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .max_redirects(max_redirects)
        .timeout_connect(config.connection_timeout())
        .proxy(proxy)
        .tls_config(tls);
    if let Some(idle) = config.idle_timeout() {
        builder = builder.max_idle_age(idle);
    }
    Ok(builder.build().new_agent())
}

fn execute(agent: &ureq::Agent, request: HttpRequest, max_body: u64) -> Result<HttpExchange> {
    let mut response = send(agent, &request, None)?;
    if response.status() == StatusCode::UNAUTHORIZED {
        if let Some(answer) = digest_answer(&request, response.headers())? {
            log::debug!("answering digest challenge from {}", request.url);
            response = send(agent, &request, Some(answer))?;
        }
    }

    let url = &request.url;
    let window = request.timeout.unwrap_or_default();
    let status = response.status().as_u16();
    let final_url = Url::parse(&response.get_uri().to_string()).unwrap_or_else(|_| url.clone());
    let (parts, mut received) = response.into_parts();
    let body = received
        .with_config()
        .limit(max_body)
        .read_to_vec()
        .map_err(|e| classify(url, e, window))?;
    log::trace!("{url} answered {status} with {} bytes", body.len());

    Ok(HttpExchange {
        status,
        url: final_url,
        headers: parts.headers,
        body: Bytes::from(body),
    })
}

fn send(
    agent: &ureq::Agent,
    request: &HttpRequest,
    authorization: Option<HeaderValue>,
) -> Result<http::Response<ureq::Body>> {
    let mut builder = http::Request::builder()
        .method(http::Method::from(request.method))
        .uri(request.url.as_str());
    if let Some(target) = builder.headers_mut() {
        *target = request.headers.clone();
        if let Some(value) = authorization {
            target.insert(AUTHORIZATION, value);
        }
    }

    let sent = if request.body.is_empty() {
        builder.body(()).map(|req| run(agent, req, request.timeout))
    } else {
        builder
            .body(request.body.to_vec())
            .map(|req| run(agent, req, request.timeout))
    };
    sent.map_err(|e| WsError::InvalidUrl(format!("{}: {e}", request.url)))?
        .map_err(|e| classify(&request.url, e, request.timeout.unwrap_or_default()))
}

fn run<B: ureq::AsSendBody>(
    agent: &ureq::Agent,
    request: http::Request<B>,
    timeout: Option<Duration>,
) -> std::result::Result<http::Response<ureq::Body>, ureq::Error> {
    let request = agent.configure_request(request).timeout_global(timeout).build();
    agent.run(request)
}

/// `Authorization` value answering a Digest challenge in `headers`, if the
/// request carries Digest credentials and the server issued one.
fn digest_answer(request: &HttpRequest, headers: &http::HeaderMap) -> Result<Option<HeaderValue>> {
    let Some(credentials) = request
        .credentials
        .as_ref()
        .filter(|c| c.scheme == AuthScheme::Digest)
    else {
        return Ok(None);
    };
    let Some(challenge) = headers
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.trim_start().starts_with("Digest"))
    else {
        return Ok(None);
    };

    let mut prompt = digest_auth::parse(challenge)
        .map_err(|e| WsError::Parse(format!("bad digest challenge: {e}")))?;
    let uri = match request.url.query() {
        Some(query) => format!("{}?{query}", request.url.path()),
        None => request.url.path().to_string(),
    };
    let body = (!request.body.is_empty()).then_some(request.body.as_ref());
    let context = digest_auth::AuthContext::new_with_method(
        credentials.username.as_str(),
        credentials.password.as_str(),
        uri.as_str(),
        body,
        request.method.as_str().into(),
    );
    let answer = prompt
        .respond(&context)
        .map_err(|e| WsError::Parse(format!("cannot answer digest challenge: {e}")))?;

    let mut value = HeaderValue::from_str(&answer.to_header_string())
        .map_err(|_| WsError::InvalidConfig("invalid digest credentials".to_string()))?;
    value.set_sensitive(true);
    Ok(Some(value))
}

fn classify(url: &Url, error: ureq::Error, window: Duration) -> WsError {
    let host = url.host_str().unwrap_or_default();
    match error {
        ureq::Error::Timeout(_) => WsError::Timeout(window),
        ureq::Error::BodyExceedsLimit(limit) => WsError::BodyTooLarge(limit),
        ureq::Error::HostNotFound => WsError::Connection(format!("{host}: host not found")),
        ureq::Error::ConnectionFailed => WsError::Connection(format!("{host}: connection failed")),
        ureq::Error::Tls(reason) => WsError::Tls(format!("{host}: {reason}")),
        // rustls reports handshake and certificate failures as InvalidData.
        ureq::Error::Io(e) if url.scheme() == "https" && e.kind() == io::ErrorKind::InvalidData => {
            WsError::Tls(format!("{host}: {e}"))
        }
        ureq::Error::Io(e) => WsError::Connection(format!("{host}: {e}")),
        other => WsError::Connection(format!("{host}: {other}")),
    }
}
