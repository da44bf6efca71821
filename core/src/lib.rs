//! Asynchronous HTTP request building and response composition.
//!
//! # Overview
//! Requests are described by immutable, fluent [`WsRequest`] values obtained
//! from a [`Client`] (or from the process-wide default via [`url`]). Calling
//! a verb method dispatches the request through the client's [`Transport`]
//! and returns a [`Promise`] right away. Promises compose with `map`,
//! `flat_map`/`try_flat_map` and `recover_with`, so a chain of dependent
//! calls reads top to bottom without blocking the caller.
//!
//! ```no_run
//! use ws_core::WsResponse;
//!
//! # fn main() -> ws_core::Result<()> {
//! let title = ws_core::url("http://localhost:3000/feed")?
//!     .set_header("Accept", "application/json")?
//!     .get()
//!     .try_map(|resp: WsResponse| Ok(resp.as_json()?["title"].clone()));
//! # Ok(())
//! # }
//! ```
//!
//! # Design
//! - Builder errors come back synchronously as `Result`; anything after
//!   dispatch is a failed promise.
//! - Responses buffer their body once; JSON and XML views are parsed lazily
//!   and cached.
//! - The core never touches sockets. [`UreqTransport`] is the bundled
//!   transport; any [`Transport`] implementation can be plugged in with
//!   [`Client::with_transport`].

pub mod body;
pub mod client;
pub mod error;
pub mod http;
pub mod promise;
pub mod request;
pub mod response;
pub mod transport;
pub mod xml;

#[cfg(test)]
mod testing;

pub use body::Body;
pub use client::{
    default_client, set_default_client, shutdown_default_client, Client, ClientConfig,
    ClientConfigBuilder, ProxyServer, TlsSettings,
};
pub use error::{Result, WsError};
pub use self::http::{HttpExchange, HttpMethod, HttpRequest};
pub use promise::{Completer, Promise};
pub use request::{AuthScheme, Credentials, RequestSpec, WsRequest};
pub use response::{BodyStream, WsResponse};
pub use transport::{Transport, UreqTransport};
pub use xml::{XmlDocument, XmlElement, XmlNode};

/// Start a request on the [default client](default_client).
pub fn url(url: &str) -> Result<WsRequest> {
    default_client()?.url(url)
}
