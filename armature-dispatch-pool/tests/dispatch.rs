//! End-to-end dispatch scenarios, backed by `wiremock` stand-ins for the
//! upstream endpoints.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use armature_dispatch_pool::{DefaultSessionIdBuilder, GlobalSettings, Priority, Server, SessionIdBuilder};
use tokio::sync::{mpsc, oneshot};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock_server() -> MockServer {
    MockServer::start().await
}

fn server_for(hosts: &[&MockServer]) -> Server {
    let hostnames = hosts
        .iter()
        .map(|m| m.uri())
        .collect::<Vec<_>>()
        .join(",");
    Server::create(&hostnames, 10, 1000, false)
}

async fn recv_cb(rx: oneshot::Receiver<armature_dispatch_pool::Response>) -> armature_dispatch_pool::Response {
    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("response callback did not fire in time")
        .expect("responder sender dropped without firing")
}

#[tokio::test]
async fn round_robins_requests_across_endpoints_in_order() {
    let a = mock_server().await;
    let b = mock_server().await;
    let c = mock_server().await;
    for m in [&a, &b, &c] {
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200))
            .mount(m)
            .await;
    }

    let server = server_for(&[&a, &b, &c]);

    let (tx, mut rx) = mpsc::unbounded_channel();
    for _ in 0..6 {
        let tx = tx.clone();
        server.schedule(
            http::Method::GET,
            "/ping",
            Vec::new(),
            Vec::new(),
            Priority::Normal,
            move |resp| {
                let _ = tx.send(resp);
            },
        );
    }
    drop(tx);

    let mut seen = 0;
    while let Some(resp) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("dispatch did not complete in time")
    {
        assert!(resp.is_success());
        seen += 1;
    }
    assert_eq!(seen, 6);

    for m in [&a, &b, &c] {
        assert_eq!(m.received_requests().await.unwrap().len(), 2);
    }
}

#[tokio::test]
async fn transport_failure_cools_down_the_endpoint_and_retries_on_the_next_one() {
    // Endpoint `a` is never started as a listener at all -- connecting to it
    // fails immediately, which is the transport-level failure this pool
    // retries rather than a real non-2xx response.
    let dead_addr = {
        let probe = std::net::TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);
        addr
    };

    let b = mock_server().await;
    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&b)
        .await;

    let hostnames = format!("http://{dead_addr},{}", b.uri());
    let server = Server::create(&hostnames, 10, 1000, false);
    server.set_retries(2);

    let (tx, rx) = oneshot::channel();
    server.schedule(
        http::Method::GET,
        "/ping",
        Vec::new(),
        Vec::new(),
        Priority::Normal,
        move |resp| {
            let _ = tx.send(resp);
        },
    );

    let response = recv_cb(rx).await;
    assert!(response.is_success(), "request should eventually land on the healthy endpoint");
    assert_eq!(b.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn normal_requests_retry_on_the_default_retry_count_without_set_retries() {
    // No `server.set_retries(..)` call here -- a `Normal` request must still
    // survive one transport failure against a dead endpoint on the pool's
    // built-in default retry count.
    let dead_addr = {
        let probe = std::net::TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);
        addr
    };

    let b = mock_server().await;
    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&b)
        .await;

    let hostnames = format!("http://{dead_addr},{}", b.uri());
    let server = Server::create(&hostnames, 10, 1000, false);

    let (tx, rx) = oneshot::channel();
    server.schedule(
        http::Method::GET,
        "/ping",
        Vec::new(),
        Vec::new(),
        Priority::Normal,
        move |resp| {
            let _ = tx.send(resp);
        },
    );

    let response = recv_cb(rx).await;
    assert!(
        response.is_success(),
        "a Normal request must be retried by default, not treated like Dropable"
    );
}

#[tokio::test]
async fn dropable_requests_are_shed_once_outstanding_exceeds_the_limit() {
    let m = mock_server().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&m)
        .await;

    let server = Server::create(&m.uri(), 10, 1, false);

    let mut accepted = 0;
    for _ in 0..5 {
        let accepted_now = server.schedule(
            http::Method::GET,
            "/slow",
            Vec::new(),
            Vec::new(),
            Priority::Dropable,
            |_resp| {},
        );
        if accepted_now {
            accepted += 1;
        }
    }

    assert!(accepted < 5, "some dropable requests should have been shed");
    assert!(server.dropped_count() > 0);
}

#[tokio::test]
async fn high_priority_requests_are_served_ahead_of_normal_and_dropable() {
    let m = mock_server().await;
    Mock::given(method("GET"))
        .and(path("/ordered"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&m)
        .await;

    let server = Server::create(&m.uri(), 1, 1000, false);

    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let record = |order: Arc<std::sync::Mutex<Vec<&'static str>>>, label: &'static str| {
        move |_resp: armature_dispatch_pool::Response| {
            order.lock().unwrap().push(label);
        }
    };

    // Submitted out of priority order; the queue must still drain
    // High-before-Normal-before-Dropable.
    server.schedule(
        http::Method::GET,
        "/ordered",
        Vec::new(),
        Vec::new(),
        Priority::Dropable,
        record(order.clone(), "dropable"),
    );
    server.schedule(
        http::Method::GET,
        "/ordered",
        Vec::new(),
        Vec::new(),
        Priority::Normal,
        record(order.clone(), "normal"),
    );
    server.schedule(
        http::Method::GET,
        "/ordered",
        Vec::new(),
        Vec::new(),
        Priority::High,
        record(order.clone(), "high"),
    );

    // Give the dispatcher time to drain all three.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let seen = order.lock().unwrap().clone();
    assert_eq!(seen.first(), Some(&"high"));
}

#[tokio::test]
async fn large_bodies_are_gzip_compressed_on_the_way_out() {
    let m = mock_server().await;
    Mock::given(method("POST"))
        .and(path("/bulk"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&m)
        .await;

    let server = Server::create(&m.uri(), 10, 1000, true);

    let body = vec![b'x'; 4096];
    let response = server.send_sync(http::Method::POST, "/bulk", body, Vec::new()).await;
    assert!(response.is_success());

    let requests = m.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].headers.get("content-encoding").map(|v| v.to_str().unwrap()),
        Some("gzip")
    );
    assert!(requests[0].body.len() < 4096, "compressed body should be smaller than the raw payload");
}

#[tokio::test]
async fn connection_registry_tracks_open_connections_by_session_id() {
    let builder = DefaultSessionIdBuilder;
    let local = std::net::SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 12345);
    let remote = std::net::SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 9200);
    let id = builder.build_v4(local, remote);

    // Before any real connection with this exact 5-tuple is opened by this
    // test's pool, the id should not be tracked.
    assert!(!armature_dispatch_pool::is_arkime(0, &id));

    let m = mock_server().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&m)
        .await;

    let server = Server::create(&m.uri(), 10, 1000, false);
    let before = armature_dispatch_pool::open_connection_count();
    assert_eq!(server.connection_count(), 0, "no connection opened yet for this server");
    let response = server.get("/health").await;
    assert!(response.is_success());
    let after = armature_dispatch_pool::open_connection_count();
    assert!(after >= before, "serving a request over a fresh connection should grow the registry");
    assert!(
        server.connection_count() >= 1,
        "this server's own connection counter should reflect the connection it just opened"
    );
}

#[tokio::test]
async fn header_callback_observes_response_headers_not_request_headers() {
    let m = mock_server().await;
    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(200).insert_header("x-upstream", "es-node-1"))
        .mount(&m)
        .await;

    let server = Server::create(&m.uri(), 10, 1000, false);

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen_cb = seen.clone();
    server.set_header_callback(Arc::new(move |url, key, value| {
        seen_cb.lock().unwrap().push((url.to_string(), key.to_string(), value.to_string()));
    }));

    let response = server.get("/ping").await;
    assert!(response.is_success());

    let seen = seen.lock().unwrap();
    assert!(
        seen.iter().any(|(_, key, value)| key.eq_ignore_ascii_case("x-upstream") && value == "es-node-1"),
        "header callback should observe the response header the upstream sent back: {seen:?}"
    );
}

#[tokio::test]
async fn quitting_bypasses_admission_drops() {
    let m = mock_server().await;
    Mock::given(method("GET"))
        .and(path("/flush"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
        .mount(&m)
        .await;

    let global = Arc::new(GlobalSettings::default());
    let server = Server::create_with(
        &m.uri(),
        10,
        1,
        false,
        global.clone(),
        Arc::new(DefaultSessionIdBuilder),
    );

    for _ in 0..3 {
        server.schedule(
            http::Method::GET,
            "/flush",
            Vec::new(),
            Vec::new(),
            Priority::Dropable,
            |_resp| {},
        );
    }

    global.set_quitting(true);
    let accepted_while_quitting = server.schedule(
        http::Method::GET,
        "/flush",
        Vec::new(),
        Vec::new(),
        Priority::Dropable,
        |_resp| {},
    );
    assert!(accepted_while_quitting, "quitting must bypass admission drops");
}
