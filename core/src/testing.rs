//! In-process transport for unit tests.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use http::HeaderMap;

use crate::error::Result;
use crate::http::{HttpExchange, HttpRequest};
use crate::promise::{self, Promise};
use crate::request::AuthScheme;
use crate::transport::Transport;

type Handler = Box<dyn Fn(&HttpRequest) -> Result<HttpExchange> + Send + Sync>;

/// Answers every request with `handler`, on a fresh thread after `delay`.
/// Requests are recorded in dispatch order.
pub(crate) struct ScriptedTransport {
    handler: Handler,
    delay: Duration,
    log: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> Result<HttpExchange> + Send + Sync + 'static,
    {
        Self::with_delay(Duration::from_millis(1), handler)
    }

    pub(crate) fn with_delay<F>(delay: Duration, handler: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> Result<HttpExchange> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            delay,
            log: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().unwrap().clone()
    }

    /// Request paths in dispatch order.
    pub(crate) fn paths(&self) -> Vec<String> {
        self.requests().iter().map(|r| r.url.path().to_string()).collect()
    }
}

impl Transport for ScriptedTransport {
    fn dispatch(&self, request: HttpRequest) -> Promise<HttpExchange> {
        self.log.lock().unwrap().push(request.clone());
        let outcome = (self.handler)(&request);
        let (completer, promise) = promise::channel();
        let delay = self.delay;
        thread::spawn(move || {
            thread::sleep(delay);
            completer.complete(outcome);
        });
        promise
    }

    fn supports_auth(&self, _scheme: AuthScheme) -> bool {
        true
    }
}

pub(crate) fn exchange(request: &HttpRequest, status: u16, body: &str) -> HttpExchange {
    HttpExchange {
        status,
        url: request.url.clone(),
        headers: HeaderMap::new(),
        body: Bytes::copy_from_slice(body.as_bytes()),
    }
}
