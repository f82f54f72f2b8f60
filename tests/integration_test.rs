// tests/integration_test.rs

//! End-to-end tests: a real server on a loopback socket, talked to over
//! WebSocket by the client library. Covers the bootstrap state machine and
//! the request/notification scenarios of the protocol.

use fospd::client::Client;
use fospd::config::Config;
use fospd::connection::{Connection, ServerConnection};
use fospd::core::protocol::{Method, Request, Status};
use fospd::core::state::ServerState;
use fospd::core::storage::MemoryDriver;
use fospd::core::url::Url;
use serde_json::json;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

const DOMAIN: &str = "example.test";

struct TestServer {
    addr: SocketAddr,
    _state: Arc<ServerState>,
    _basepath: TempDir,
}

async fn start_server() -> TestServer {
    let basepath = TempDir::new().unwrap();
    let config = Config {
        localdomain: DOMAIN.to_string(),
        listen: "127.0.0.1:0".to_string(),
        listensecure: None,
        database: "memory".to_string(),
        basepath: basepath.path().to_string_lossy().to_string(),
        keyfile: None,
        certfile: None,
        logging: BTreeMap::new(),
        request_timeout_secs: 5,
    };
    let driver = Arc::new(MemoryDriver::new(basepath.path()));
    let state = ServerState::new(config, driver);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accept_state = state.clone();
    tokio::spawn(async move {
        loop {
            let Ok((socket, peer_addr)) = listener.accept().await else {
                break;
            };
            let state = accept_state.clone();
            tokio::spawn(async move {
                if let Ok(ws) = tokio_tungstenite::accept_async(socket).await {
                    let connection = Connection::spawn(ws, state.request_timeout());
                    ServerConnection::accept(connection, state, peer_addr);
                }
            });
        }
    });

    TestServer {
        addr,
        _state: state,
        _basepath: basepath,
    }
}

async fn open_client(server: &TestServer) -> Client {
    Client::open(&format!("127.0.0.1:{}", server.addr.port()))
        .await
        .unwrap()
}

/// A negotiated and authenticated session for a freshly registered user.
async fn login(server: &TestServer, name: &str, password: &str) -> Client {
    let client = open_client(server).await;
    let response = client.register(name, password).await.unwrap();
    assert_eq!(response.code, 201, "registration of {name}");
    let response = client.authenticate(name, password).await.unwrap();
    assert_eq!(response.code, 200, "authentication of {name}");
    client
}

fn url(user: &str, path: &str) -> Url {
    Url::parse(&format!("{user}@{DOMAIN}{path}")).unwrap()
}

#[tokio::test]
async fn test_connect_version_handshake() {
    let server = start_server().await;

    // A wrong version is refused and the connection stays open in the
    // Opened state, so a correct CONNECT afterwards still succeeds.
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{}", server.addr.port()))
        .await
        .unwrap();
    let connection = Connection::spawn(ws, Duration::from_secs(5));

    let bad = Request::new(Method::Connect, None)
        .with_body(serde_json::to_vec(&json!({"version": "9.9"})).unwrap());
    let response = connection.send_request(bad).await.unwrap();
    assert_eq!(response.status, Status::Failed);
    assert_eq!(response.code, 400);

    let good = Request::new(Method::Connect, None)
        .with_body(serde_json::to_vec(&json!({"version": "0.1"})).unwrap());
    let response = connection.send_request(good).await.unwrap();
    assert_eq!(response.status, Status::Succeeded);
    assert_eq!(response.code, 200);
    connection.close().await;
}

#[tokio::test]
async fn test_requests_before_negotiation_are_rejected() {
    let server = start_server().await;
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{}", server.addr.port()))
        .await
        .unwrap();
    let connection = Connection::spawn(ws, Duration::from_secs(5));

    let premature = Request::new(Method::Get, Some(url("alice", "/x")));
    let response = connection.send_request(premature).await.unwrap();
    assert_eq!(response.status, Status::Failed);
    assert_eq!(response.code, 400);
    connection.close().await;
}

#[tokio::test]
async fn test_register_twice_conflicts() {
    let server = start_server().await;
    let client = open_client(&server).await;

    let first = client.register("alice", "secret").await.unwrap();
    assert_eq!(first.status, Status::Succeeded);
    assert_eq!(first.code, 201);

    let second = client.register("alice", "secret").await.unwrap();
    assert_eq!(second.status, Status::Failed);
    assert_eq!(second.code, 409);
    client.close().await;
}

#[tokio::test]
async fn test_auth_with_wrong_password_fails() {
    let server = start_server().await;
    let client = open_client(&server).await;
    client.register("alice", "secret").await.unwrap();

    let response = client.authenticate("alice", "wrong").await.unwrap();
    assert_eq!(response.status, Status::Failed);
    assert_eq!(response.code, 401);

    // Requests remain forbidden until an AUTH succeeds.
    let response = client.get(&url("alice", "")).await.unwrap();
    assert_eq!(response.code, 400);

    let response = client.authenticate("alice", "secret").await.unwrap();
    assert_eq!(response.code, 200);
    let response = client.get(&url("alice", "")).await.unwrap();
    assert_eq!(response.code, 200);
    client.close().await;
}

#[tokio::test]
async fn test_create_get_and_acl_grant() {
    let server = start_server().await;
    let alice = login(&server, "alice", "secret").await;
    let bob = login(&server, "bob", "hunter2").await;

    let target = url("alice", "/x");
    let response = alice
        .create(&target, br#"{"data": "one"}"#.to_vec())
        .await
        .unwrap();
    assert_eq!(response.code, 201);

    // bob has no rights yet.
    let response = bob.get(&target).await.unwrap();
    assert_eq!(response.status, Status::Failed);
    assert_eq!(response.code, 403);

    // alice grants bob read access on the data facet.
    let grant = format!(r#"{{"acl": {{"users": {{"bob@{DOMAIN}": {{"data": ["read"]}}}}}}}}"#);
    let response = alice.patch(&target, grant.into_bytes()).await.unwrap();
    assert_eq!(response.code, 204);

    let response = bob.get(&target).await.unwrap();
    assert_eq!(response.code, 200);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["data"], json!("one"));
    assert_eq!(body["owner"], json!(format!("alice@{DOMAIN}")));

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn test_get_of_missing_object_is_not_found() {
    let server = start_server().await;
    let alice = login(&server, "alice", "secret").await;
    let response = alice.get(&url("alice", "/nowhere")).await.unwrap();
    assert_eq!(response.status, Status::Failed);
    assert_eq!(response.code, 404);
    alice.close().await;
}

#[tokio::test]
async fn test_list_children() {
    let server = start_server().await;
    let alice = login(&server, "alice", "secret").await;
    for path in ["/b", "/a"] {
        alice
            .create(&url("alice", path), Vec::new())
            .await
            .unwrap();
    }
    let response = alice.list(&url("alice", "")).await.unwrap();
    assert_eq!(response.code, 200);
    let names: Vec<String> = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(names, ["a", "b"]);
    alice.close().await;
}

#[tokio::test]
async fn test_subscription_notification_fanout() {
    let server = start_server().await;
    let alice = login(&server, "alice", "secret").await;
    let mut notifications = alice.take_notifications().unwrap();

    // alice subscribes at her root to UPDATED events for the whole tree.
    let subscribe = format!(
        r#"{{"subscriptions": {{"alice@{DOMAIN}": {{"depth": -1, "events": ["updated"]}}}}}}"#
    );
    let response = alice
        .patch(&url("alice", ""), subscribe.into_bytes())
        .await
        .unwrap();
    assert_eq!(response.code, 204);

    alice
        .create(&url("alice", "/x"), br#"{"data": "one"}"#.to_vec())
        .await
        .unwrap();
    let response = alice
        .patch(&url("alice", "/x"), br#"{"data": "two"}"#.to_vec())
        .await
        .unwrap();
    assert_eq!(response.code, 204);

    // Exactly one UPDATED notification arrives, for /x. The earlier
    // CREATE does not notify because only "updated" was subscribed —
    // except the subscribe PATCH itself also updated the root.
    let mut seen = Vec::new();
    while let Ok(Some(notification)) =
        tokio::time::timeout(Duration::from_secs(2), notifications.recv()).await
    {
        seen.push((notification.event.as_keyword(), notification.url.to_string()));
        if seen
            .iter()
            .any(|(_, url)| url == &format!("alice@{DOMAIN}/x"))
        {
            break;
        }
    }
    assert!(
        seen.contains(&("UPDATED", format!("alice@{DOMAIN}/x"))),
        "expected an UPDATED notification for /x, saw {seen:?}"
    );
    alice.close().await;
}

#[tokio::test]
async fn test_attachment_write_then_read() {
    let server = start_server().await;
    let alice = login(&server, "alice", "secret").await;
    let target = url("alice", "/file");
    alice.create(&target, Vec::new()).await.unwrap();

    let response = alice.write(&target, b"twelve bytes".to_vec()).await.unwrap();
    assert_eq!(response.code, 204);

    let response = alice.get(&target).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["attachment"]["size"], json!(12));

    let response = alice.read(&target).await.unwrap();
    assert_eq!(response.code, 200);
    assert_eq!(&response.body[..], b"twelve bytes");
    alice.close().await;
}

#[tokio::test]
async fn test_delete_scenarios() {
    let server = start_server().await;
    let alice = login(&server, "alice", "secret").await;

    // The root is indestructible.
    let response = alice.delete(&url("alice", "")).await.unwrap();
    assert_eq!(response.status, Status::Failed);
    assert_eq!(response.code, 400);

    alice.create(&url("alice", "/x"), Vec::new()).await.unwrap();
    alice
        .create(&url("alice", "/x/y"), Vec::new())
        .await
        .unwrap();
    let response = alice.delete(&url("alice", "/x")).await.unwrap();
    assert_eq!(response.code, 204);

    for path in ["/x", "/x/y"] {
        let response = alice.get(&url("alice", path)).await.unwrap();
        assert_eq!(response.code, 404, "{path} should be gone");
    }
    alice.close().await;
}

#[tokio::test]
async fn test_deleted_notification_reaches_subscribers() {
    let server = start_server().await;
    let alice = login(&server, "alice", "secret").await;
    let mut notifications = alice.take_notifications().unwrap();

    let subscribe = format!(
        r#"{{"subscriptions": {{"alice@{DOMAIN}": {{"depth": -1, "events": ["deleted"]}}}}}}"#
    );
    alice
        .patch(&url("alice", ""), subscribe.into_bytes())
        .await
        .unwrap();
    alice.create(&url("alice", "/x"), Vec::new()).await.unwrap();
    alice.delete(&url("alice", "/x")).await.unwrap();

    let notification = tokio::time::timeout(Duration::from_secs(2), notifications.recv())
        .await
        .expect("a DELETED notification should arrive")
        .unwrap();
    assert_eq!(notification.event.as_keyword(), "DELETED");
    assert_eq!(notification.url.to_string(), format!("alice@{DOMAIN}/x"));
    assert!(notification.body.is_empty());
    alice.close().await;
}
