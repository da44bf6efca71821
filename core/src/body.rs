//! Request bodies.

use std::io::{self, Read};

use bytes::Bytes;
use serde::Serialize;

use crate::error::{Result, WsError};

/// The payload of a request, tagged by shape so a content type can be
/// inferred when the caller did not set one.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Body {
    #[default]
    Empty,
    Text(String),
    Json(serde_json::Value),
    /// `application/x-www-form-urlencoded` pairs, encoded in order.
    Form(Vec<(String, String)>),
    Bytes(Bytes),
}

impl Body {
    /// Serialize `value` into a JSON body.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Body> {
        serde_json::to_value(value)
            .map(Body::Json)
            .map_err(|e| WsError::InvalidConfig(format!("body is not serializable: {e}")))
    }

    pub fn form<I, K, V>(pairs: I) -> Body
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Body::Form(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Drain a binary stream into a body. The stream is read to the end
    /// before the request is dispatched.
    pub fn from_reader<R: Read>(mut reader: R) -> io::Result<Body> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(Body::Bytes(Bytes::from(buf)))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }

    /// Content type implied by the body's shape, used only when no explicit
    /// `Content-Type` header was set.
    pub fn inferred_content_type(&self) -> Option<&'static str> {
        match self {
            Body::Empty => None,
            Body::Text(_) => Some("text/plain; charset=utf-8"),
            Body::Json(_) => Some("application/json"),
            Body::Form(_) => Some("application/x-www-form-urlencoded"),
            Body::Bytes(_) => Some("application/octet-stream"),
        }
    }

    pub(crate) fn to_bytes(&self) -> Result<Bytes> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Text(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
            Body::Json(value) => serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(|e| WsError::InvalidConfig(format!("body is not serializable: {e}"))),
            Body::Form(pairs) => Ok(Bytes::from(
                url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(pairs)
                    .finish(),
            )),
            Body::Bytes(bytes) => Ok(bytes.clone()),
        }
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::Text(text.to_string())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Text(text)
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        Body::Json(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(bytes))
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Bytes(bytes)
    }
}
