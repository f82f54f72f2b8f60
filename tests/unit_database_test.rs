use chrono::Utc;
use fospd::FospError;
use fospd::config::Config;
use fospd::core::object::{Object, parse_patch};
use fospd::core::state::ServerState;
use fospd::core::storage::MemoryDriver;
use fospd::core::url::Url;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

const DOMAIN: &str = "example.test";

fn test_config(basepath: &TempDir) -> Config {
    Config {
        localdomain: DOMAIN.to_string(),
        listen: "127.0.0.1:0".to_string(),
        listensecure: None,
        database: "memory".to_string(),
        basepath: basepath.path().to_string_lossy().to_string(),
        keyfile: None,
        certfile: None,
        logging: BTreeMap::new(),
        request_timeout_secs: 5,
    }
}

fn test_state(basepath: &TempDir) -> Arc<ServerState> {
    let driver = Arc::new(MemoryDriver::new(basepath.path()));
    ServerState::new(test_config(basepath), driver)
}

fn alice() -> String {
    format!("alice@{DOMAIN}")
}

fn bob() -> String {
    format!("bob@{DOMAIN}")
}

fn url(path: &str) -> Url {
    Url::parse(&format!("alice@{DOMAIN}{path}")).unwrap()
}

async fn registered_state(basepath: &TempDir) -> Arc<ServerState> {
    let state = test_state(basepath);
    state.database.register("alice", "secret").await.unwrap();
    state.database.register("bob", "hunter2").await.unwrap();
    state
}

#[tokio::test]
async fn test_register_provisions_the_root() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    let before = Utc::now();
    state.database.register("alice", "secret").await.unwrap();

    let root = state.database.get(&alice(), &url("")).await.unwrap();
    assert_eq!(root.owner, alice());
    assert_eq!(root.btime, root.mtime);
    assert!(root.btime.unwrap() >= before);
    // The owner sees the provisioned ACL.
    assert!(root.acl.owner.is_some());
}

#[tokio::test]
async fn test_register_twice_conflicts() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    state.database.register("alice", "secret").await.unwrap();
    let err = state.database.register("alice", "other").await.unwrap_err();
    assert_eq!(err, FospError::UserAlreadyExists);
}

#[tokio::test]
async fn test_authenticate() {
    let dir = TempDir::new().unwrap();
    let state = registered_state(&dir).await;
    assert!(state.database.authenticate("alice", "secret").await);
    assert!(!state.database.authenticate("alice", "wrong").await);
    assert!(!state.database.authenticate("nobody", "secret").await);
}

#[tokio::test]
async fn test_create_get_roundtrip() {
    let dir = TempDir::new().unwrap();
    let state = registered_state(&dir).await;
    let before = Utc::now();

    let object = Object {
        data: Some(json!({"text": "one"})),
        ..Object::default()
    };
    state
        .database
        .create(&alice(), &url("/x"), object)
        .await
        .unwrap();

    let fetched = state.database.get(&alice(), &url("/x")).await.unwrap();
    assert_eq!(fetched.data, Some(json!({"text": "one"})));
    assert_eq!(fetched.owner, alice());
    assert_eq!(fetched.btime, fetched.mtime);
    assert!(fetched.btime.unwrap() >= before);
}

#[tokio::test]
async fn test_create_requires_parent() {
    let dir = TempDir::new().unwrap();
    let state = registered_state(&dir).await;
    let err = state
        .database
        .create(&alice(), &url("/missing/child"), Object::default())
        .await
        .unwrap_err();
    assert_eq!(err, FospError::ParentNotFound);
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_create_at_root_is_rejected() {
    let dir = TempDir::new().unwrap();
    let state = registered_state(&dir).await;
    let err = state
        .database
        .create(&alice(), &url(""), Object::default())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn test_get_without_rights_is_forbidden() {
    let dir = TempDir::new().unwrap();
    let state = registered_state(&dir).await;
    state
        .database
        .create(&alice(), &url("/x"), Object::default())
        .await
        .unwrap();

    let err = state.database.get(&bob(), &url("/x")).await.unwrap_err();
    assert_eq!(err, FospError::NotAuthorized);
    assert_eq!(err.status_code(), 403);
}

#[tokio::test]
async fn test_acl_grant_via_patch_opens_access() {
    let dir = TempDir::new().unwrap();
    let state = registered_state(&dir).await;
    let object = Object {
        data: Some(json!("one")),
        ..Object::default()
    };
    state
        .database
        .create(&alice(), &url("/x"), object)
        .await
        .unwrap();

    // bob cannot read /x yet, and cannot grant himself access either.
    let grant = parse_patch(
        format!(r#"{{"acl": {{"users": {{"{}": {{"data": ["read"]}}}}}}}}"#, bob()).as_bytes(),
    )
    .unwrap();
    let err = state
        .database
        .patch(&bob(), &url("/x"), &grant)
        .await
        .unwrap_err();
    assert_eq!(err, FospError::NotAuthorized);

    state
        .database
        .patch(&alice(), &url("/x"), &grant)
        .await
        .unwrap();

    let view = state.database.get(&bob(), &url("/x")).await.unwrap();
    assert_eq!(view.data, Some(json!("one")));
    // The grant covered data only; the ACL facet stays hidden.
    assert!(view.acl.is_empty());
}

#[tokio::test]
async fn test_patch_updates_mtime_but_not_btime() {
    let dir = TempDir::new().unwrap();
    let state = registered_state(&dir).await;
    state
        .database
        .create(&alice(), &url("/x"), Object::default())
        .await
        .unwrap();
    let created = state.database.get(&alice(), &url("/x")).await.unwrap();

    let patch = parse_patch(br#"{"data": "changed"}"#).unwrap();
    state
        .database
        .patch(&alice(), &url("/x"), &patch)
        .await
        .unwrap();

    let patched = state.database.get(&alice(), &url("/x")).await.unwrap();
    assert_eq!(patched.btime, created.btime);
    assert!(patched.mtime >= created.mtime);
    assert_eq!(patched.data, Some(json!("changed")));
}

#[tokio::test]
async fn test_patch_with_wrong_types_fails_whole_request() {
    let dir = TempDir::new().unwrap();
    let state = registered_state(&dir).await;
    state
        .database
        .create(&alice(), &url("/x"), Object::default())
        .await
        .unwrap();

    let patch = parse_patch(br#"{"acl": {"users": ["bob"]}}"#).unwrap();
    let err = state
        .database
        .patch(&alice(), &url("/x"), &patch)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);

    // The failed patch left the object untouched.
    let object = state.database.get(&alice(), &url("/x")).await.unwrap();
    assert!(object.acl.users.is_empty());
}

#[tokio::test]
async fn test_list_children() {
    let dir = TempDir::new().unwrap();
    let state = registered_state(&dir).await;
    for path in ["/b", "/a", "/a/nested"] {
        state
            .database
            .create(&alice(), &url(path), Object::default())
            .await
            .unwrap();
    }
    let children = state.database.list(&alice(), &url("")).await.unwrap();
    assert_eq!(children, ["a", "b"]);

    let err = state.database.list(&bob(), &url("")).await.unwrap_err();
    assert_eq!(err, FospError::NotAuthorized);
}

#[tokio::test]
async fn test_delete_subtree() {
    let dir = TempDir::new().unwrap();
    let state = registered_state(&dir).await;
    for path in ["/x", "/x/y", "/x/y/z"] {
        state
            .database
            .create(&alice(), &url(path), Object::default())
            .await
            .unwrap();
    }
    state.database.delete(&alice(), &url("/x")).await.unwrap();

    for path in ["/x", "/x/y", "/x/y/z"] {
        let err = state.database.get(&alice(), &url(path)).await.unwrap_err();
        assert_eq!(err, FospError::NotFound, "{path} should be gone");
    }
}

#[tokio::test]
async fn test_delete_root_is_rejected() {
    let dir = TempDir::new().unwrap();
    let state = registered_state(&dir).await;
    let err = state
        .database
        .delete(&alice(), &url(""))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn test_delete_requires_rights_on_the_parent() {
    let dir = TempDir::new().unwrap();
    let state = registered_state(&dir).await;
    state
        .database
        .create(&alice(), &url("/x"), Object::default())
        .await
        .unwrap();
    let err = state
        .database
        .delete(&bob(), &url("/x"))
        .await
        .unwrap_err();
    assert_eq!(err, FospError::NotAuthorized);
}

#[tokio::test]
async fn test_attachment_write_read_updates_size() {
    let dir = TempDir::new().unwrap();
    let state = registered_state(&dir).await;
    state
        .database
        .create(&alice(), &url("/x"), Object::default())
        .await
        .unwrap();

    let written = state
        .database
        .write_attachment(&alice(), &url("/x"), "twelve bytes".into())
        .await
        .unwrap();
    assert_eq!(written, 12);

    let object = state.database.get(&alice(), &url("/x")).await.unwrap();
    let attachment = object.attachment.unwrap();
    assert_eq!(attachment.size, 12);
    assert_eq!(attachment.name, "x");

    let data = state
        .database
        .read_attachment(&alice(), &url("/x"))
        .await
        .unwrap();
    assert_eq!(&data[..], b"twelve bytes");

    // bob has no data rights on /x.
    let err = state
        .database
        .read_attachment(&bob(), &url("/x"))
        .await
        .unwrap_err();
    assert_eq!(err, FospError::NotAuthorized);
}

#[tokio::test]
async fn test_groups_from_config_object() {
    let dir = TempDir::new().unwrap();
    let state = registered_state(&dir).await;

    // Build alice's group object granting "friends" read on /x.
    state
        .database
        .create(&alice(), &url("/config"), Object::default())
        .await
        .unwrap();
    let groups = Object {
        data: Some(json!({"friends": [bob()]})),
        ..Object::default()
    };
    state
        .database
        .create(&alice(), &url("/config/groups"), groups)
        .await
        .unwrap();

    let object = Object {
        data: Some(json!("shared")),
        ..Object::default()
    };
    state
        .database
        .create(&alice(), &url("/x"), object)
        .await
        .unwrap();
    let grant =
        parse_patch(br#"{"acl": {"groups": {"friends": {"data": ["read"]}}}}"#).unwrap();
    state
        .database
        .patch(&alice(), &url("/x"), &grant)
        .await
        .unwrap();

    let view = state.database.get(&bob(), &url("/x")).await.unwrap();
    assert_eq!(view.data, Some(json!("shared")));
}
