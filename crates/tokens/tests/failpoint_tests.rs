#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
//! Integration tests for fail-point injection.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p argocd-tokens --features failpoints --test failpoint_tests
//! ```

use std::sync::Arc;

use argocd_tokens::{
    BackendSettings, ConfigUpdate, RetryPolicy, TokenBackend, TokenError, TokenRequest,
    principal::Principal, testutil::MockCredentialConnector,
};
use argocd_tokens_storage::MemoryBackend;
use tokio_util::sync::CancellationToken;

fn backend(connector: &MockCredentialConnector) -> TokenBackend<MemoryBackend> {
    let settings =
        BackendSettings::builder().retry_policy(RetryPolicy::immediate(4)).build().expect("settings");
    TokenBackend::new(MemoryBackend::new(), Arc::new(connector.clone()), settings)
}

fn update() -> ConfigUpdate {
    ConfigUpdate::builder().argo_cd_url("argocd.example.com").admin_token("t").build()
}

// Fail points are process-global; keep every scenario in one test so they
// cannot interleave.
#[tokio::test]
async fn injected_faults() {
    let scenario = fail::FailScenario::setup();

    // Three injected transport failures are absorbed by the fourth attempt.
    let connector = MockCredentialConnector::new();
    let tokens = backend(&connector);
    tokens.write_config(&update()).await.expect("config write");
    fail::cfg("mint-attempt", "3*return(boom)").expect("failed to configure fail point");
    let secret = tokens
        .issue(&TokenRequest::new(Principal::account("ci-bot"), None), CancellationToken::new())
        .await
        .expect("fourth attempt should succeed");
    assert_eq!(connector.mint_calls().len(), 1);
    assert_eq!(connector.mint_calls()[0].id, secret.internal.id);

    // Four failures exhaust the schedule and the injected message surfaces.
    fail::cfg("mint-attempt", "4*return(boom)").expect("failed to configure fail point");
    let err = tokens
        .issue(&TokenRequest::new(Principal::account("ci-bot"), None), CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        TokenError::MintFailed { attempts, source, .. } => {
            assert_eq!(attempts, 4);
            assert!(source.to_string().contains("boom"));
        },
        other => panic!("expected MintFailed, got {other:?}"),
    }
    fail::remove("mint-attempt");

    // A failed commit leaves the stored configuration untouched.
    fail::cfg("config-before-commit", "return").expect("failed to configure fail point");
    let err = tokens
        .write_config(&ConfigUpdate::builder().insecure(true).build())
        .await
        .unwrap_err();
    assert!(matches!(err, TokenError::Storage { .. }));
    fail::remove("config-before-commit");
    assert!(!tokens.read_config().await.expect("config read").insecure);

    scenario.teardown();
}
