//! Session lifecycle against a mock API: sign-in, sign-up and forced sign-out.

use std::sync::Arc;
use std::time::Duration;

use ironlog_core::api::{ApiClient, ApiError, ApiRequest, AuthFailure};
use ironlog_core::auth::{MemoryStore, SessionError, SessionManager, SessionStatus, SessionStore, StorageKey};
use ironlog_core::models::UserUpdate;
use ironlog_core::Config;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn user_json() -> serde_json::Value {
    json!({
        "id": "8b1c",
        "name": "Ana",
        "email": "ana@example.com",
        "avatar": null
    })
}

fn manager(server: &MockServer) -> (SessionManager, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let client = ApiClient::new(&Config::for_api(server.uri()), store.clone()).unwrap();
    (SessionManager::new(client), store)
}

async fn mount_sign_in(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .and(body_json(json!({ "email": "ana@example.com", "password": "123456" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user": user_json(),
            "token": "T1",
            "refresh_token": "R1"
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_sign_in_persists_and_publishes() {
    let server = MockServer::start().await;
    mount_sign_in(&server).await;
    let (manager, store) = manager(&server);
    let mut status = manager.subscribe();

    let session = manager.sign_in("ana@example.com", "123456").await.unwrap();

    assert_eq!(session.token, "T1");
    assert_eq!(session.user.name, "Ana");
    assert_eq!(manager.client().current_token().as_deref(), Some("T1"));
    assert_eq!(store.get(StorageKey::RefreshToken).unwrap().as_deref(), Some("R1"));
    assert!(store.get(StorageKey::User).unwrap().is_some());

    status.changed().await.unwrap();
    assert!(matches!(*status.borrow(), SessionStatus::SignedIn(ref u) if u.id == "8b1c"));
}

#[tokio::test]
async fn test_failed_sign_in_mutates_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "status": "error",
            "message": "Incorrect email or password."
        })))
        .mount(&server)
        .await;
    let (manager, store) = manager(&server);

    let err = manager.sign_in("ana@example.com", "wrong").await.unwrap_err();

    assert!(matches!(
        err,
        SessionError::Api(ApiError::Domain { status: 401, ref message }) if message == "Incorrect email or password."
    ));
    assert!(store.is_empty());
    assert!(manager.client().current_token().is_none());
    assert!(manager.status().is_loading());
}

#[tokio::test]
async fn test_incomplete_sign_in_payload_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "T1" })))
        .mount(&server)
        .await;
    let (manager, store) = manager(&server);

    let err = manager.sign_in("ana@example.com", "123456").await.unwrap_err();

    assert!(matches!(err, SessionError::Api(ApiError::InvalidResponse(_))));
    assert!(store.is_empty());
    assert!(!manager.is_signed_in());
}

#[tokio::test]
async fn test_sign_up_creates_user_then_signs_in() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users"))
        .and(body_json(json!({ "name": "Ana", "email": "ana@example.com", "password": "123456" })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    mount_sign_in(&server).await;
    let (manager, _store) = manager(&server);

    let session = manager.sign_up("Ana", "ana@example.com", "123456").await.unwrap();

    assert_eq!(session.refresh_token.as_deref(), Some("R1"));
    assert!(manager.is_signed_in());
}

#[tokio::test]
async fn test_failed_refresh_signs_out_through_manager() {
    let server = MockServer::start().await;
    mount_sign_in(&server).await;
    Mock::given(method("GET"))
        .and(path("/history"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "token.expired" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sessions/refresh-token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "token.invalid" })))
        .expect(1)
        .mount(&server)
        .await;
    let (manager, store) = manager(&server);
    manager.sign_in("ana@example.com", "123456").await.unwrap();

    let err = manager.client().fetch_history().await.unwrap_err();

    assert!(matches!(err, ApiError::RefreshFailed(_)));
    assert!(store.is_empty());
    assert!(manager.client().current_token().is_none());
    assert_eq!(manager.status(), SessionStatus::SignedOut);

    // A racing user-initiated sign-out afterwards is harmless.
    manager.sign_out().unwrap();
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_successful_refresh_updates_session_tokens() {
    let server = MockServer::start().await;
    mount_sign_in(&server).await;
    Mock::given(method("GET"))
        .and(path("/groups"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "token.expired" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/groups"))
        .and(header("authorization", "Bearer T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["shoulders"])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sessions/refresh-token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "token": "T2", "refresh_token": "R2" })),
        )
        .mount(&server)
        .await;
    let (manager, _store) = manager(&server);
    manager.sign_in("ana@example.com", "123456").await.unwrap();

    let groups = manager.client().fetch_groups().await.unwrap();

    assert_eq!(groups, vec!["shoulders"]);
    let session = manager.session().unwrap();
    assert_eq!(session.token, "T2");
    assert_eq!(session.refresh_token.as_deref(), Some("R2"));
    assert!(manager.is_signed_in());
}

#[tokio::test]
async fn test_update_account_mirrors_name_locally() {
    let server = MockServer::start().await;
    mount_sign_in(&server).await;
    Mock::given(method("PUT"))
        .and(path("/users"))
        .and(header("authorization", "Bearer T1"))
        .and(body_json(json!({ "name": "Ana Souza" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    let (manager, store) = manager(&server);
    manager.sign_in("ana@example.com", "123456").await.unwrap();

    let user = manager
        .update_account(UserUpdate {
            name: "Ana Souza".to_string(),
            ..UserUpdate::default()
        })
        .await
        .unwrap();

    assert_eq!(user.name, "Ana Souza");
    let stored: Arc<dyn SessionStore> = store;
    assert_eq!(stored.user().unwrap().map(|u| u.name), Some("Ana Souza".to_string()));
}

#[tokio::test]
async fn test_sign_out_during_refresh_discards_new_tokens() {
    let server = MockServer::start().await;
    mount_sign_in(&server).await;
    Mock::given(method("GET"))
        .and(path("/history"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "token.expired" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/history"))
        .and(header("authorization", "Bearer T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sessions/refresh-token"))
        .and(body_json(json!({ "refresh_token": "R1" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "token": "T2", "refresh_token": "R2" }))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (manager, store) = manager(&server);
    manager.sign_in("ana@example.com", "123456").await.unwrap();
    let client = manager.client().clone();

    let request = client.send(ApiRequest::get("/history"));
    let sign_out = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.sign_out()
    };
    let (result, signed_out) = tokio::join!(request, sign_out);

    signed_out.unwrap();
    assert_eq!(result.unwrap_err(), ApiError::Auth(AuthFailure::SessionEnded));
    for key in StorageKey::ALL {
        assert!(store.get(key).unwrap().is_none(), "{key:?} left in storage");
    }
    assert!(client.current_token().is_none());
    assert_eq!(manager.status(), SessionStatus::SignedOut);
    assert!(manager.session().is_none());
    assert!(!client.is_refreshing());
}
