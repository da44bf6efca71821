//! End-to-end tests against the live mock server.
//!
//! # Design
//! Each test starts its own mock server on a random port and talks to it
//! through a real [`Client`] backed by the bundled ureq transport, so request
//! assembly, dispatch, redirects and response parsing are all exercised over
//! actual sockets.

use std::net::SocketAddr;
use std::time::Duration;

use mock_server::{Comments, Echo, COMMENT_COUNT, DIGEST_PASSWORD, DIGEST_USER};
use serde_json::json;
use ws_core::{AuthScheme, Body, Client, ClientConfig, Promise, WsError, WsResponse};

const WAIT: Duration = Duration::from_secs(10);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn start_server() -> SocketAddr {
    init_logging();
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });
    addr
}

fn client() -> Client {
    Client::new(ClientConfig::default()).unwrap()
}

fn echo(resp: &WsResponse) -> Echo {
    resp.json().unwrap()
}

#[test]
fn feed_then_comments() {
    let addr = start_server();
    let client = client();
    let inner = client.clone();

    let summary = client
        .url(&format!("http://{addr}/feed"))
        .unwrap()
        .set_header("Accept", "application/json")
        .unwrap()
        .get()
        .try_flat_map(move |feed| {
            let next = feed.as_json()?["commentsUrl"]
                .as_str()
                .ok_or_else(|| WsError::Parse("feed without commentsUrl".into()))?
                .to_string();
            Ok(inner.url(&next)?.get())
        })
        .try_map(|resp| {
            let comments: Comments = resp.json()?;
            Ok(format!("Number of comments: {}", comments.count))
        });

    assert_eq!(
        summary.get(WAIT).unwrap(),
        format!("Number of comments: {COMMENT_COUNT}")
    );
}

#[test]
fn headers_and_query_reach_the_server() {
    let addr = start_server();
    let resp = client()
        .url(&format!("http://{addr}/echo"))
        .unwrap()
        .set_header("X-Trace", "first")
        .unwrap()
        .set_header("X-Trace", "second")
        .unwrap()
        .set_query_parameter("k", "1")
        .set_query_parameter("k", "2")
        .set_query_parameter("q", "a b")
        .get()
        .get(WAIT)
        .unwrap();

    assert_eq!(resp.status(), 200);
    let seen = echo(&resp);
    assert_eq!(seen.method, "GET");
    assert_eq!(seen.headers["x-trace"], vec!["second"]);
    assert!(seen.headers["user-agent"][0].starts_with("ws-core/"));
    assert_eq!(
        seen.query,
        vec![
            ("k".to_string(), "1".to_string()),
            ("k".to_string(), "2".to_string()),
            ("q".to_string(), "a b".to_string()),
        ]
    );
}

#[test]
fn unreachable_host_recovers_to_the_mock() {
    let addr = start_server();
    let client = client();
    let backup = client.clone();

    let primary = client.url("http://127.0.0.1:1/feed").unwrap().get();
    let err = primary.get(WAIT).unwrap_err();
    assert!(err.is_connect(), "unexpected error: {err:?}");

    let recovered = primary.recover_with(move |_| match backup.url(&format!("http://{addr}/comments")) {
        Ok(request) => request.get(),
        Err(error) => Promise::failed(error),
    });
    let comments: Comments = recovered.get(WAIT).unwrap().json().unwrap();
    assert_eq!(comments.count, COMMENT_COUNT);
}

#[test]
fn chained_requests_go_out_in_order() {
    let addr = start_server();
    let client = client();
    let (second, third) = (client.clone(), client.clone());

    let last = client
        .url(&format!("http://{addr}/chain/one"))
        .unwrap()
        .get()
        .try_flat_map(move |one| Ok(second.url(&one.body())?.get()))
        .try_flat_map(move |two| Ok(third.url(&two.body())?.get()));
    assert_eq!(last.get(WAIT).unwrap().body(), "done");

    let hits: Vec<String> = client
        .url(&format!("http://{addr}/hits"))
        .unwrap()
        .get()
        .get(WAIT)
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(hits, vec!["one", "two", "three"]);
}

#[test]
fn request_timeout_fails_the_promise() {
    let addr = start_server();
    let err = client()
        .url(&format!("http://{addr}/slow"))
        .unwrap()
        .set_query_parameter("ms", "500")
        .set_timeout(Duration::from_millis(1))
        .get()
        .get(WAIT)
        .unwrap_err();
    assert!(err.is_timeout(), "unexpected error: {err:?}");
}

#[test]
fn request_timeout_can_outlast_the_client_default() {
    let addr = start_server();
    let config = ClientConfig::builder()
        .request_timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let client = Client::new(config).unwrap();
    let slow = client
        .url(&format!("http://{addr}/slow"))
        .unwrap()
        .set_query_parameter("ms", "400");

    let err = slow.get().get(WAIT).unwrap_err();
    assert_eq!(err, WsError::Timeout(Duration::from_millis(100)));

    let resp = slow.set_timeout(Duration::from_secs(3)).get().get(WAIT).unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.body(), "finally");
}

#[test]
fn large_bodies_are_read_in_full() {
    let addr = start_server();
    let len = 12 * 1024 * 1024;
    let resp = client()
        .url(&format!("http://{addr}/bytes/{len}"))
        .unwrap()
        .get()
        .get(WAIT)
        .unwrap();
    assert_eq!(resp.raw_body().len(), len);
}

#[test]
fn configured_body_limit_is_enforced() {
    let addr = start_server();
    let config = ClientConfig::builder().max_response_size(1024).build().unwrap();
    let client = Client::new(config).unwrap();

    let small = client.url(&format!("http://{addr}/bytes/512")).unwrap().get().get(WAIT).unwrap();
    assert_eq!(small.raw_body().len(), 512);

    let err = client
        .url(&format!("http://{addr}/bytes/4096"))
        .unwrap()
        .get()
        .get(WAIT)
        .unwrap_err();
    assert_eq!(err, WsError::BodyTooLarge(1024));
}

#[test]
fn broken_chain_step_fails_without_panicking() {
    let addr = start_server();
    let client = client();
    let next = client.clone();

    let result = client
        .url(&format!("http://{addr}/status/200"))
        .unwrap()
        .get()
        .try_flat_map(move |resp| Ok(next.url(&resp.body())?.get()));
    match result.get(WAIT) {
        Err(WsError::Chain(message)) => assert!(message.contains("invalid URL"), "{message}"),
        other => panic!("expected a chain error, got {other:?}"),
    }
}

#[test]
fn redirects_follow_the_request_setting() {
    let addr = start_server();
    let request = client().url(&format!("http://{addr}/redirect")).unwrap();

    let direct = request.get().get(WAIT).unwrap();
    assert_eq!(direct.status(), 302);
    assert_eq!(direct.header("location"), Some("/feed"));

    let followed = request.set_follow_redirects(true).get().get(WAIT).unwrap();
    assert_eq!(followed.status(), 200);
    assert_eq!(followed.url().path(), "/feed");
    assert_eq!(followed.as_json().unwrap()["title"], "Latest news");
}

#[test]
fn client_config_turns_on_redirects() {
    let addr = start_server();
    let config = ClientConfig::builder().follow_redirects(true).build().unwrap();
    let client = Client::new(config).unwrap();

    let resp = client
        .url(&format!("http://{addr}/redirect"))
        .unwrap()
        .get()
        .get(WAIT)
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[test]
fn error_statuses_are_responses() {
    let addr = start_server();
    let resp = client()
        .url(&format!("http://{addr}/status/503"))
        .unwrap()
        .get()
        .get(WAIT)
        .unwrap();
    assert_eq!(resp.status(), 503);
    assert_eq!(resp.status_text(), "Service Unavailable");
    assert_eq!(resp.body(), "Service Unavailable");
}

#[test]
fn xml_body() {
    let addr = start_server();
    let resp = client()
        .url(&format!("http://{addr}/xml"))
        .unwrap()
        .get()
        .get(WAIT)
        .unwrap();

    let doc = resp.as_xml().unwrap();
    assert_eq!(doc.root().name, "feed");
    assert_eq!(doc.find("title").unwrap().text(), "Latest news");
    let entries = doc.root().find_all("entry");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].attribute("id"), Some("1"));
    assert_eq!(entries[0].text(), "first & foremost");
}

#[test]
fn basic_auth_header() {
    let addr = start_server();
    let resp = client()
        .url(&format!("http://{addr}/echo"))
        .unwrap()
        .set_auth("user", "secret", AuthScheme::Basic)
        .unwrap()
        .get()
        .get(WAIT)
        .unwrap();
    assert_eq!(echo(&resp).headers["authorization"], vec!["Basic dXNlcjpzZWNyZXQ="]);
}

#[test]
fn digest_auth_answers_the_challenge() {
    let addr = start_server();
    let request = client()
        .url(&format!("http://{addr}/digest"))
        .unwrap()
        .set_query_parameter("page", "1");

    let anonymous = request.get().get(WAIT).unwrap();
    assert_eq!(anonymous.status(), 401);

    let resp = request
        .set_auth(DIGEST_USER, DIGEST_PASSWORD, AuthScheme::Digest)
        .unwrap()
        .get()
        .get(WAIT)
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.body(), "authenticated");

    let wrong = request
        .set_auth(DIGEST_USER, "guess", AuthScheme::Digest)
        .unwrap()
        .get()
        .get(WAIT)
        .unwrap();
    assert_eq!(wrong.status(), 401);
}

#[test]
fn ntlm_auth_is_rejected_up_front() {
    let addr = start_server();
    let err = client()
        .url(&format!("http://{addr}/echo"))
        .unwrap()
        .set_auth("user", "secret", AuthScheme::Ntlm)
        .unwrap_err();
    assert!(err.is_builder());
}

#[test]
fn bodies_carry_their_content_type() {
    let addr = start_server();
    let request = client().url(&format!("http://{addr}/echo")).unwrap();

    let seen = echo(&request.post(json!({"a": 1})).get(WAIT).unwrap());
    assert_eq!(seen.method, "POST");
    assert_eq!(seen.headers["content-type"], vec!["application/json"]);
    assert_eq!(seen.body, r#"{"a":1}"#);

    let seen = echo(&request.put(Body::form([("k", "a b")])).get(WAIT).unwrap());
    assert_eq!(seen.headers["content-type"], vec!["application/x-www-form-urlencoded"]);
    assert_eq!(seen.body, "k=a+b");

    let explicit = request
        .set_content_type("application/vnd.feed+json")
        .unwrap()
        .patch(json!({"b": 2}))
        .get(WAIT)
        .unwrap();
    let seen = echo(&explicit);
    assert_eq!(seen.method, "PATCH");
    assert_eq!(seen.headers["content-type"], vec!["application/vnd.feed+json"]);
}

#[test]
fn compression_off_asks_for_identity() {
    let addr = start_server();
    let config = ClientConfig::builder()
        .compression_enabled(false)
        .user_agent("feed-reader/1")
        .build()
        .unwrap();
    let resp = Client::new(config)
        .unwrap()
        .url(&format!("http://{addr}/echo"))
        .unwrap()
        .get()
        .get(WAIT)
        .unwrap();

    let seen = echo(&resp);
    assert_eq!(seen.headers["accept-encoding"], vec!["identity"]);
    assert_eq!(seen.headers["user-agent"], vec!["feed-reader/1"]);
}

#[test]
fn closed_client_fails_new_requests() {
    let addr = start_server();
    let client = client();
    let request = client.url(&format!("http://{addr}/feed")).unwrap();
    client.close();

    let err = request.get().get(WAIT).unwrap_err();
    assert!(err.is_connect());
}

#[tokio::test]
async fn promises_can_be_awaited() {
    let addr = start_server();
    let client = client();

    let resp = client
        .url(&format!("http://{addr}/feed"))
        .unwrap()
        .get()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let feed = resp.as_json().unwrap();
    assert_eq!(feed["commentsUrl"], format!("http://{addr}/comments"));
}
