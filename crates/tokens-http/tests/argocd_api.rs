//! Wire-level tests of the Argo CD session against a mock gateway.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use argocd_tokens::{
    BackendSettings, ConfigUpdate, CredentialConnector, CredentialPort, FieldData, IssuanceId,
    PluginConfig, PortError, Principal, PrincipalKind, RetryPolicy, TokenBackend, TokenError,
    TokenRequest, fields::ACCOUNT_SCHEMA, testutil::test_config,
};
use argocd_tokens_http::ArgoCdConnector;
use argocd_tokens_storage::MemoryBackend;
use httpmock::prelude::*;
use serde_json::json;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config_for(server: &MockServer) -> PluginConfig {
    PluginConfig {
        argo_cd_url: server.address().to_string(),
        plaintext: true,
        ..test_config()
    }
}

async fn session(server: &MockServer, kind: PrincipalKind) -> Box<dyn CredentialPort> {
    ArgoCdConnector::default()
        .connect(&config_for(server), kind, CancellationToken::new())
        .await
        .expect("connect")
}

// ---------------------------------------------------------------------------
// Mint
// ---------------------------------------------------------------------------

#[tokio::test]
async fn account_mint_posts_expected_body() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/account/ci-bot/token")
                .header("authorization", "Bearer t")
                .json_body(json!({"name": "ci-bot", "expiresIn": 3600, "id": "abc-123"}));
            then.status(200).json_body(json!({"token": "jwt-value"}));
        })
        .await;

    let port = session(&server, PrincipalKind::Account).await;
    let token = port
        .mint(&Principal::account("ci-bot"), Duration::from_secs(3600), &IssuanceId::from("abc-123"))
        .await
        .unwrap();

    assert_eq!(token.as_str(), "jwt-value");
    mock.assert_async().await;
}

#[tokio::test]
async fn project_mint_posts_expected_body() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/projects/web/roles/ci/token")
                .json_body(json!({"project": "web", "role": "ci", "expiresIn": 600, "id": "p-1"}));
            then.status(200).json_body(json!({"token": "project-jwt"}));
        })
        .await;

    let port = session(&server, PrincipalKind::ProjectRole).await;
    let token = port
        .mint(&Principal::project_role("web", "ci"), Duration::from_secs(600), &IssuanceId::from("p-1"))
        .await
        .unwrap();

    assert_eq!(token.as_str(), "project-jwt");
    mock.assert_async().await;
}

#[tokio::test]
async fn mint_error_body_is_surfaced() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/account/ghost/token");
            then.status(404).json_body(json!({
                "error": "account 'ghost' does not exist",
                "code": 5,
                "message": "account 'ghost' does not exist",
            }));
        })
        .await;

    let port = session(&server, PrincipalKind::Account).await;
    let err = port
        .mint(&Principal::account("ghost"), Duration::from_secs(60), &IssuanceId::from("x"))
        .await
        .unwrap_err();

    match err {
        PortError::Remote { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "account 'ghost' does not exist");
        },
        other => panic!("expected Remote, got {other:?}"),
    }
}

#[tokio::test]
async fn mint_without_token_is_invalid() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/account/ci-bot/token");
            then.status(200).json_body(json!({}));
        })
        .await;

    let port = session(&server, PrincipalKind::Account).await;
    let err = port
        .mint(&Principal::account("ci-bot"), Duration::from_secs(60), &IssuanceId::from("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::InvalidResponse { .. }));
}

#[tokio::test]
async fn mint_is_cancellable() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/account/ci-bot/token");
            then.status(200).json_body(json!({"token": "late"})).delay(Duration::from_secs(5));
        })
        .await;

    let cancel = CancellationToken::new();
    let port = ArgoCdConnector::default()
        .connect(&config_for(&server), PrincipalKind::Account, cancel.clone())
        .await
        .unwrap();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = port
        .mint(&Principal::account("ci-bot"), Duration::from_secs(60), &IssuanceId::from("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::Cancelled));
}

#[tokio::test]
async fn mint_rejects_wrong_kind_without_request() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.any_request();
            then.status(200);
        })
        .await;

    let port = session(&server, PrincipalKind::Account).await;
    let err = port
        .mint(&Principal::project_role("web", "ci"), Duration::from_secs(60), &IssuanceId::from("x"))
        .await
        .unwrap_err();

    assert!(matches!(err, PortError::KindMismatch { .. }));
    assert_eq!(mock.hits_async().await, 0);
}

// ---------------------------------------------------------------------------
// Destroy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn account_destroy_uses_id_in_path() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/api/v1/account/ci-bot/token/abc-123");
            then.status(200).json_body(json!({}));
        })
        .await;

    let port = session(&server, PrincipalKind::Account).await;
    port.destroy(&Principal::account("ci-bot"), &IssuanceId::from("abc-123")).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn project_destroy_uses_id_query() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(DELETE)
                .path("/api/v1/projects/web/roles/ci/token/0")
                .query_param("id", "p-1");
            then.status(200).json_body(json!({}));
        })
        .await;

    let port = session(&server, PrincipalKind::ProjectRole).await;
    port.destroy(&Principal::project_role("web", "ci"), &IssuanceId::from("p-1")).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn destroy_404_is_not_found() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(DELETE);
            then.status(404);
        })
        .await;

    let port = session(&server, PrincipalKind::Account).await;
    let err = port.destroy(&Principal::account("ci-bot"), &IssuanceId::from("gone")).await.unwrap_err();
    assert!(matches!(err, PortError::NotFound { ref id } if id == "gone"));
}

#[tokio::test]
async fn destroy_server_error_is_remote() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(DELETE);
            then.status(500).body("upstream connect error");
        })
        .await;

    let port = session(&server, PrincipalKind::Account).await;
    let err = port.destroy(&Principal::account("ci-bot"), &IssuanceId::from("x")).await.unwrap_err();
    assert_eq!(err.to_string(), "argo cd rejected request (500): upstream connect error");
}

// ---------------------------------------------------------------------------
// Through the backend
// ---------------------------------------------------------------------------

async fn backend(server: &MockServer) -> TokenBackend<MemoryBackend> {
    let settings = BackendSettings::builder()
        .retry_policy(RetryPolicy::immediate(4))
        .build()
        .expect("settings");
    let backend =
        TokenBackend::new(MemoryBackend::new(), Arc::new(ArgoCdConnector::default()), settings);
    backend
        .write_config(
            &ConfigUpdate::builder()
                .argo_cd_url(server.address().to_string())
                .admin_token("admin-token")
                .plaintext(true)
                .build(),
        )
        .await
        .expect("config write");
    backend
}

#[tokio::test]
async fn issue_and_revoke_round_trip() {
    let server = MockServer::start_async().await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/account/ci-bot/token")
                .header("authorization", "Bearer admin-token")
                .json_body_partial(r#"{"name": "ci-bot", "expiresIn": 1800}"#);
            then.status(200).json_body(json!({"token": "jwt"}));
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE).path_contains("/api/v1/account/ci-bot/token/");
            then.status(200).json_body(json!({}));
        })
        .await;

    let backend = backend(&server).await;
    let secret = backend
        .issue(
            &TokenRequest::new(Principal::account("ci-bot"), Some(Duration::from_secs(1800))),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(secret.data.token.as_str(), "jwt");
    create.assert_async().await;

    backend.revoke(secret.secret_type, &secret.internal, CancellationToken::new()).await.unwrap();
    delete.assert_async().await;
    assert!(backend.leases().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn persistent_failure_is_attempted_four_times() {
    let server = MockServer::start_async().await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/account/ci-bot/token");
            then.status(503).json_body(json!({"message": "argocd-server is restarting"}));
        })
        .await;

    let backend = backend(&server).await;
    let err = backend
        .issue(&TokenRequest::new(Principal::account("ci-bot"), None), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, TokenError::MintFailed { attempts: 4, .. }));
    assert!(err.to_string().contains("argocd-server is restarting"));
    assert_eq!(create.hits_async().await, 4);
}

#[tokio::test]
async fn sub_second_ttl_never_requests_a_non_expiring_token() {
    let server = MockServer::start_async().await;
    let non_expiring = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/account/ci-bot/token")
                .json_body_partial(r#"{"expiresIn": 0}"#);
            then.status(200).json_body(json!({"token": "forever"}));
        })
        .await;
    let default_lifetime = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/account/ci-bot/token")
                .json_body_partial(r#"{"expiresIn": 3600}"#);
            then.status(200).json_body(json!({"token": "jwt"}));
        })
        .await;

    let backend = backend(&server).await;
    let data = FieldData::from_value(ACCOUNT_SCHEMA, json!({"account_name": "ci-bot", "ttl": "500ms"}))
        .unwrap();
    let secret = backend.issue_account_token(&data, CancellationToken::new()).await.unwrap();

    assert_eq!(secret.data.token.as_str(), "jwt");
    assert_eq!(secret.lease, Duration::from_secs(3600));
    assert_eq!(non_expiring.hits_async().await, 0);
    default_lifetime.assert_async().await;
}
