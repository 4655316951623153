//! Test doubles for the credential port.
//!
//! [`MockCredentialConnector`] stands in for the remote Argo CD instance. It
//! keeps the set of live tokens, records every call, and can be told to fail
//! in the ways the engine has to cope with.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use crate::{
    config::PluginConfig,
    issuance::IssuanceId,
    port::{CredentialConnector, CredentialPort, PortError},
    principal::{Principal, PrincipalKind},
};

/// One recorded mint call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintCall {
    /// Who the token was requested for.
    pub principal: Principal,
    /// Requested lifetime.
    pub lifetime: Duration,
    /// Credential id sent with the call.
    pub id: IssuanceId,
}

/// One recorded destroy call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyCall {
    /// Owner of the token.
    pub principal: Principal,
    /// Credential id.
    pub id: IssuanceId,
}

#[derive(Default)]
struct State {
    mint_calls: Vec<MintCall>,
    destroy_calls: Vec<DestroyCall>,
    live: BTreeMap<IssuanceId, Principal>,
    failing_mints: Option<(u32, String)>,
    destroy_error: Option<PortError>,
    mint_delay: Option<Duration>,
    fail_connect: bool,
    fail_close: bool,
    connects: Vec<(String, PrincipalKind)>,
    opened: usize,
    closed: usize,
}

/// In-memory stand-in for the remote credential API.
///
/// Clones share state, so a test keeps one handle while the engine owns
/// another.
#[derive(Clone, Default)]
pub struct MockCredentialConnector {
    state: Arc<Mutex<State>>,
}

impl MockCredentialConnector {
    /// Creates a connector with no failures configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `count` mint calls with a remote error whose message
    /// is `"{message} (attempt {n})"`, `n` counting all mint calls so far.
    pub fn fail_next_mints(&self, count: u32, message: impl Into<String>) {
        self.state.lock().failing_mints = Some((count, message.into()));
    }

    /// Fails every destroy call with `error`.
    pub fn fail_destroys_with(&self, error: PortError) {
        self.state.lock().destroy_error = Some(error);
    }

    /// Lets destroy calls succeed again.
    pub fn heal_destroys(&self) {
        self.state.lock().destroy_error = None;
    }

    /// Makes mint calls wait `delay` before answering.
    pub fn delay_mints(&self, delay: Duration) {
        self.state.lock().mint_delay = Some(delay);
    }

    /// Refuses new sessions.
    pub fn fail_connect(&self, fail: bool) {
        self.state.lock().fail_connect = fail;
    }

    /// Fails session close.
    pub fn fail_close(&self, fail: bool) {
        self.state.lock().fail_close = fail;
    }

    /// Returns every mint call in order.
    #[must_use]
    pub fn mint_calls(&self) -> Vec<MintCall> {
        self.state.lock().mint_calls.clone()
    }

    /// Returns every destroy call in order.
    #[must_use]
    pub fn destroy_calls(&self) -> Vec<DestroyCall> {
        self.state.lock().destroy_calls.clone()
    }

    /// Returns the ids of tokens that exist on the fake remote side.
    #[must_use]
    pub fn live_tokens(&self) -> Vec<IssuanceId> {
        self.state.lock().live.keys().cloned().collect()
    }

    /// Returns the endpoint and kind of every session opened.
    #[must_use]
    pub fn connects(&self) -> Vec<(String, PrincipalKind)> {
        self.state.lock().connects.clone()
    }

    /// Returns the number of sessions opened and not closed.
    #[must_use]
    pub fn sessions_open(&self) -> usize {
        let state = self.state.lock();
        state.opened.saturating_sub(state.closed)
    }
}

#[async_trait]
impl CredentialConnector for MockCredentialConnector {
    async fn connect(
        &self,
        config: &PluginConfig,
        kind: PrincipalKind,
        cancel: CancellationToken,
    ) -> Result<Box<dyn CredentialPort>, PortError> {
        {
            let mut state = self.state.lock();
            if state.fail_connect {
                return Err(PortError::transport("connection refused"));
            }
            state.connects.push((config.argo_cd_url.clone(), kind));
        }
        Ok(Box::new(MockPort::new(kind, self.clone()).with_cancel(cancel)))
    }
}

/// A session on a [`MockCredentialConnector`].
pub struct MockPort {
    kind: PrincipalKind,
    connector: MockCredentialConnector,
    cancel: CancellationToken,
}

impl MockPort {
    /// Opens a session of `kind` directly, bypassing `connect`.
    #[must_use]
    pub fn new(kind: PrincipalKind, connector: MockCredentialConnector) -> Self {
        connector.state.lock().opened += 1;
        Self { kind, connector, cancel: CancellationToken::new() }
    }

    /// Ties the session to `cancel`.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[async_trait]
impl CredentialPort for MockPort {
    fn kind(&self) -> PrincipalKind {
        self.kind
    }

    async fn mint(
        &self,
        principal: &Principal,
        lifetime: Duration,
        id: &IssuanceId,
    ) -> Result<Zeroizing<String>, PortError> {
        PortError::check_kind(self.kind, principal)?;
        if self.cancel.is_cancelled() {
            return Err(PortError::Cancelled);
        }

        let (failure, delay) = {
            let mut state = self.connector.state.lock();
            state.mint_calls.push(MintCall {
                principal: principal.clone(),
                lifetime,
                id: id.clone(),
            });
            let attempt = state.mint_calls.len();
            let failure = match &mut state.failing_mints {
                Some((remaining, message)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(PortError::remote(500, format!("{message} (attempt {attempt})")))
                },
                _ => None,
            };
            (failure, state.mint_delay)
        };
        if let Some(err) = failure {
            return Err(err);
        }

        if let Some(delay) = delay {
            tokio::select! {
                () = self.cancel.cancelled() => return Err(PortError::Cancelled),
                () = tokio::time::sleep(delay) => {},
            }
        }

        self.connector.state.lock().live.insert(id.clone(), principal.clone());
        Ok(Zeroizing::new(format!("argocd-token-{id}")))
    }

    async fn destroy(&self, principal: &Principal, id: &IssuanceId) -> Result<(), PortError> {
        PortError::check_kind(self.kind, principal)?;
        let mut state = self.connector.state.lock();
        state.destroy_calls.push(DestroyCall { principal: principal.clone(), id: id.clone() });
        if let Some(err) = &state.destroy_error {
            return Err(err.clone());
        }
        match state.live.remove(id) {
            Some(_) => Ok(()),
            None => Err(PortError::not_found(id.as_str())),
        }
    }

    async fn close(self: Box<Self>) -> Result<(), PortError> {
        let mut state = self.connector.state.lock();
        state.closed += 1;
        if state.fail_close {
            return Err(PortError::transport("session already torn down"));
        }
        Ok(())
    }
}

/// A valid configuration with 6h ceilings for both kinds.
#[must_use]
pub fn test_config() -> PluginConfig {
    PluginConfig {
        argo_cd_url: "argocd.example.com".into(),
        admin_token: Zeroizing::new("t".into()),
        account_token_max_ttl: Duration::from_secs(6 * 60 * 60),
        project_token_max_ttl: Duration::from_secs(6 * 60 * 60),
        insecure: false,
        plaintext: false,
    }
}
