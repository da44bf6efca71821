//! Local HTTP fixture for exercising `ws-core` end to end.
//!
//! Every route is deterministic except `/slow`, which waits before
//! answering. `/chain/{step}` records the order in which it was hit so tests
//! can check that dependent requests went out one after another.
//! `/digest` only answers requests that solve its fixed Digest challenge.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};

pub const COMMENT_COUNT: u32 = 12;

pub const DIGEST_USER: &str = "user";
pub const DIGEST_PASSWORD: &str = "secret";
const DIGEST_CHALLENGE: &str =
    r#"Digest realm="feeds@mock", qop="auth", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", opaque="5ccc069c403ebaf9f0171e9517f40e41", algorithm=MD5"#;

pub const FEED_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8"?>"#,
    r#"<feed><title>Latest news</title>"#,
    r#"<entry id="1">first &amp; foremost</entry>"#,
    r#"<entry id="2">second</entry></feed>"#,
);

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feed {
    pub title: String,
    pub comments_url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Comments {
    pub count: u32,
}

/// What `/echo` saw.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub headers: BTreeMap<String, Vec<String>>,
    pub query: Vec<(String, String)>,
    pub body: String,
}

#[derive(Deserialize)]
pub struct SlowParams {
    #[serde(default)]
    pub ms: u64,
}

pub type Hits = Arc<RwLock<Vec<String>>>;

pub fn app() -> Router {
    let hits: Hits = Arc::new(RwLock::new(Vec::new()));
    Router::new()
        .route("/feed", get(feed))
        .route("/comments", get(comments))
        .route("/echo", any(echo))
        .route("/slow", get(slow))
        .route("/redirect", get(redirect))
        .route("/xml", get(xml))
        .route("/status/{code}", any(status))
        .route("/chain/{step}", get(chain))
        .route("/hits", get(list_hits))
        .route("/digest", any(digest))
        .route("/bytes/{len}", get(bytes))
        .with_state(hits)
}

pub const DEFAULT_PORT: u16 = 3000;

/// Loopback address for the binary. A missing or unparsable `port` falls
/// back to [`DEFAULT_PORT`].
pub fn listen_addr(port: Option<&str>) -> String {
    let port = match port.map(str::parse::<u16>) {
        Some(Ok(port)) => port,
        Some(Err(_)) => {
            log::warn!("ignoring invalid PORT, using {DEFAULT_PORT}");
            DEFAULT_PORT
        }
        None => DEFAULT_PORT,
    };
    format!("127.0.0.1:{port}")
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("mock server ready on http://{addr}");
    }
    axum::serve(listener, app()).await
}

fn base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}")
}

async fn feed(headers: HeaderMap) -> Json<Feed> {
    Json(Feed {
        title: "Latest news".to_string(),
        comments_url: format!("{}/comments", base_url(&headers)),
    })
}

async fn comments() -> Json<Comments> {
    Json(Comments {
        count: COMMENT_COUNT,
    })
}

async fn echo(
    method: Method,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
    body: Bytes,
) -> Json<Echo> {
    let mut seen: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in &headers {
        seen.entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    Json(Echo {
        method: method.to_string(),
        headers: seen,
        query,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

async fn slow(Query(params): Query<SlowParams>) -> &'static str {
    tokio::time::sleep(Duration::from_millis(params.ms)).await;
    "finally"
}

async fn redirect() -> impl IntoResponse {
    (StatusCode::FOUND, [(header::LOCATION, "/feed")])
}

async fn xml() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/xml")], FEED_XML)
}

async fn status(Path(code): Path<u16>) -> Result<(StatusCode, String), StatusCode> {
    let status = StatusCode::from_u16(code).map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok((status, status.canonical_reason().unwrap_or("Unknown").to_string()))
}

/// `one` answers with the URL of `two`, `two` with the URL of `three`,
/// `three` with `done`.
async fn chain(
    State(hits): State<Hits>,
    Path(step): Path<String>,
    headers: HeaderMap,
) -> Result<String, StatusCode> {
    let next = match step.as_str() {
        "one" => Some("two"),
        "two" => Some("three"),
        "three" => None,
        _ => return Err(StatusCode::NOT_FOUND),
    };
    log::debug!("chain step {step}");
    hits.write().await.push(step);
    Ok(match next {
        Some(next) => format!("{}/chain/{next}", base_url(&headers)),
        None => "done".to_string(),
    })
}

async fn list_hits(State(hits): State<Hits>) -> Json<Vec<String>> {
    Json(hits.read().await.clone())
}

/// `len` bytes of `a`.
async fn bytes(Path(len): Path<usize>) -> Vec<u8> {
    vec![b'a'; len]
}

async fn digest(method: Method, uri: Uri, headers: HeaderMap) -> Response {
    let target = uri.path_and_query().map_or(uri.path(), |pq| pq.as_str());
    let solved = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Digest "))
        .is_some_and(|answer| digest_solved(method.as_str(), target, answer));
    if solved {
        return (StatusCode::OK, "authenticated").into_response();
    }
    log::debug!("digest challenge issued for {target}");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, DIGEST_CHALLENGE)],
        "credentials required",
    )
        .into_response()
}

/// `key=value` / `key="value"` pairs of a Digest `Authorization` header.
fn digest_fields(answer: &str) -> HashMap<String, String> {
    answer
        .split(',')
        .filter_map(|field| field.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().trim_matches('"').to_string()))
        .collect()
}

fn digest_solved(method: &str, target: &str, answer: &str) -> bool {
    let fields = digest_fields(answer);
    let field = |name: &str| fields.get(name).map(String::as_str);
    if field("username") != Some(DIGEST_USER) || field("uri") != Some(target) {
        return false;
    }
    let (Some(cnonce), Some(response)) = (field("cnonce"), field("response")) else {
        return false;
    };
    let Ok(mut prompt) = digest_auth::parse(DIGEST_CHALLENGE) else {
        return false;
    };
    let mut context = digest_auth::AuthContext::new_with_method(
        DIGEST_USER,
        DIGEST_PASSWORD,
        target,
        None::<&[u8]>,
        method.into(),
    );
    context.set_custom_cnonce(cnonce.to_string());
    prompt
        .respond(&context)
        .is_ok_and(|expected| expected.response == response)
}
