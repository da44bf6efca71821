//! Client configuration, client handles and the process-wide default client.
//!
//! # Design
//! A [`Client`] owns one immutable [`ClientConfig`], one [`Transport`] and a
//! small tokio runtime that runs blocking transport calls and timeout timers.
//! Handles are cheap clones of an `Arc`; the runtime is released on
//! [`Client::close`] or when the last handle is dropped, whichever comes
//! first. Once closed, dispatch fails with a connection error.
//!
//! The default client lives in a lock-guarded slot. It is created on first
//! use; the slot is re-checked under the write lock so concurrent first
//! callers still end up sharing one instance. [`shutdown_default_client`]
//! is the explicit teardown hook.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use http::HeaderValue;
use serde::{Deserialize, Serialize};
use tokio::runtime::{Handle, Runtime};

use crate::error::{Result, WsError};
use crate::http::HttpRequest;
use crate::promise::Promise;
use crate::request::{RequestSpec, WsRequest};
use crate::response::WsResponse;
use crate::transport::{Transport, UreqTransport};

/// User agent sent when the configuration does not name one.
pub const DEFAULT_USER_AGENT: &str = concat!("ws-core/", env!("CARGO_PKG_VERSION"));

const RUNTIME_THREADS: usize = 2;

/// Explicit proxy server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyServer {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxyServer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// `http://[user:pass@]host:port`
    pub fn to_url(&self) -> String {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!("http://{user}:{pass}@{}:{}", self.host, self.port),
            (Some(user), None) => format!("http://{user}@{}:{}", self.host, self.port),
            _ => format!("http://{}:{}", self.host, self.port),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TlsSettings {
    /// Send the server name indication extension.
    pub use_sni: bool,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self { use_sni: true }
    }
}

/// Immutable client configuration.
///
/// Durations are serialized as whole milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(with = "optional_millis")]
    connection_timeout: Option<Duration>,
    #[serde(with = "optional_millis")]
    idle_timeout: Option<Duration>,
    #[serde(with = "optional_millis")]
    request_timeout: Option<Duration>,
    follow_redirects: bool,
    use_proxy_properties: bool,
    proxy: Option<ProxyServer>,
    user_agent: Option<String>,
    compression_enabled: bool,
    accept_any_certificate: bool,
    tls: TlsSettings,
    max_response_size: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection_timeout: None,
            idle_timeout: None,
            request_timeout: None,
            follow_redirects: false,
            use_proxy_properties: false,
            proxy: None,
            user_agent: None,
            compression_enabled: true,
            accept_any_certificate: false,
            tls: TlsSettings::default(),
            max_response_size: None,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Start a builder from this configuration.
    pub fn to_builder(&self) -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: self.clone(),
        }
    }

    /// Parse a JSON configuration. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ClientConfig = serde_json::from_str(json)
            .map_err(|e| WsError::InvalidConfig(format!("client config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if let Some(agent) = &self.user_agent {
            HeaderValue::from_str(agent)
                .map_err(|_| WsError::InvalidConfig(format!("invalid user agent {agent:?}")))?;
        }
        if let Some(proxy) = &self.proxy {
            if proxy.host.trim().is_empty() {
                return Err(WsError::InvalidConfig("proxy host is empty".to_string()));
            }
            if proxy.port == 0 {
                return Err(WsError::InvalidConfig("proxy port must be non-zero".to_string()));
            }
        }
        Ok(())
    }

    pub fn connection_timeout(&self) -> Option<Duration> {
        self.connection_timeout
    }

    /// How long a pooled connection may sit unused before it is dropped.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Default per-request timeout, overridable per request.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    pub fn follow_redirects(&self) -> bool {
        self.follow_redirects
    }

    /// Take the proxy from the `HTTP_PROXY`-family environment variables
    /// when no explicit proxy is set.
    pub fn use_proxy_properties(&self) -> bool {
        self.use_proxy_properties
    }

    pub fn proxy(&self) -> Option<&ProxyServer> {
        self.proxy.as_ref()
    }

    pub fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }

    pub fn compression_enabled(&self) -> bool {
        self.compression_enabled
    }

    /// Skip certificate verification entirely.
    pub fn accept_any_certificate(&self) -> bool {
        self.accept_any_certificate
    }

    pub fn tls(&self) -> &TlsSettings {
        &self.tls
    }

    /// Largest response body accepted, in bytes. `None` means unlimited.
    pub fn max_response_size(&self) -> Option<u64> {
        self.max_response_size
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = Some(timeout);
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = Some(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    pub fn use_proxy_properties(mut self, enabled: bool) -> Self {
        self.config.use_proxy_properties = enabled;
        self
    }

    pub fn proxy(mut self, proxy: ProxyServer) -> Self {
        self.config.proxy = Some(proxy);
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(agent.into());
        self
    }

    pub fn compression_enabled(mut self, enabled: bool) -> Self {
        self.config.compression_enabled = enabled;
        self
    }

    pub fn accept_any_certificate(mut self, accept: bool) -> Self {
        self.config.accept_any_certificate = accept;
        self
    }

    pub fn tls(mut self, tls: TlsSettings) -> Self {
        self.config.tls = tls;
        self
    }

    pub fn max_response_size(mut self, bytes: u64) -> Self {
        self.config.max_response_size = Some(bytes);
        self
    }

    pub fn build(self) -> Result<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => {
                let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
                serializer.serialize_some(&millis)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

/// Factory for requests bound to one configuration.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    closed: AtomicBool,
}

impl ClientInner {
    fn release_runtime(&self) {
        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            // Never blocks, so it is safe from inside the runtime itself.
            runtime.shutdown_background();
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.release_runtime();
    }
}

impl Client {
    /// A client backed by the bundled ureq transport.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let runtime = build_runtime()?;
        let transport = UreqTransport::new(&config, runtime.handle().clone())?;
        Ok(Self::from_parts(config, Arc::new(transport), runtime))
    }

    /// A client that dispatches through `transport`.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let runtime = build_runtime()?;
        Ok(Self::from_parts(config, transport, runtime))
    }

    fn from_parts(config: ClientConfig, transport: Arc<dyn Transport>, runtime: Runtime) -> Self {
        log::info!("starting client (user agent {:?})", config.user_agent());
        Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                handle: runtime.handle().clone(),
                runtime: Mutex::new(Some(runtime)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Start a request to `url` using this client's defaults.
    pub fn url(&self, url: &str) -> Result<WsRequest> {
        Ok(WsRequest::new(self.clone(), RequestSpec::new(url)?))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The transport this client dispatches through.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Handle to the runtime that runs transport work and timers.
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// Release the runtime. Idempotent; affects every handle to this client.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("closing client");
        self.inner.release_runtime();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn dispatch(&self, request: HttpRequest) -> Promise<WsResponse> {
        if self.is_closed() {
            return Promise::failed(WsError::Connection("client is closed".to_string()));
        }
        log::debug!("dispatching {} {}", request.method.as_str(), request.url);
        let timeout = request.timeout;
        let response = self
            .inner
            .transport
            .dispatch(request)
            .map(WsResponse::from_exchange);
        match timeout {
            Some(limit) => response.within(limit, &self.inner.handle),
            None => response,
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn build_runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(RUNTIME_THREADS)
        .thread_name("ws-client")
        .enable_all()
        .build()
        .map_err(|e| WsError::InvalidConfig(format!("cannot start client runtime: {e}")))
}

static DEFAULT_CLIENT: RwLock<Option<Client>> = RwLock::new(None);

/// The process-wide client, created with [`ClientConfig::default`] on first
/// use.
pub fn default_client() -> Result<Client> {
    if let Some(client) = DEFAULT_CLIENT
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
    {
        return Ok(client.clone());
    }
    let mut slot = DEFAULT_CLIENT.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(client) = slot.as_ref() {
        return Ok(client.clone());
    }
    let client = Client::new(ClientConfig::default())?;
    *slot = Some(client.clone());
    Ok(client)
}

/// Replace the default client, returning the previous one (left open).
pub fn set_default_client(client: Client) -> Option<Client> {
    DEFAULT_CLIENT
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(client)
}

/// Close and remove the default client. Returns `false` if none existed.
pub fn shutdown_default_client() -> bool {
    let previous = DEFAULT_CLIENT
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    match previous {
        Some(client) => {
            client.close();
            true
        }
        None => false,
    }
}
