//! One authenticated session against an Argo CD instance.

use std::{future::Future, time::Duration};

use argocd_tokens::{CredentialPort, IssuanceId, PortError, Principal, PrincipalKind};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use crate::wire::{AccountTokenRequest, ProjectTokenRequest, TokenResponse, error_message};

/// A [`CredentialPort`] over the Argo CD REST gateway.
///
/// Every call races the caller's cancellation token; a fired token drops
/// the request in flight and yields [`PortError::Cancelled`].
#[derive(Debug)]
pub struct ArgoCdSession {
    client: Client,
    base: Url,
    kind: PrincipalKind,
    cancel: CancellationToken,
}

impl ArgoCdSession {
    pub(crate) fn new(
        client: Client,
        base: Url,
        kind: PrincipalKind,
        cancel: CancellationToken,
    ) -> Self {
        Self { client, base, kind, cancel }
    }

    fn url(&self, segments: &[&str]) -> Result<Url, PortError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| PortError::transport(format!("{} cannot carry a path", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn token_url(&self, principal: &Principal) -> Result<Url, PortError> {
        match principal {
            Principal::Account { account_name } => {
                self.url(&["api", "v1", "account", account_name.as_str(), "token"])
            },
            Principal::ProjectRole { project_name, project_role_name } => self.url(&[
                "api",
                "v1",
                "projects",
                project_name.as_str(),
                "roles",
                project_role_name.as_str(),
                "token",
            ]),
        }
    }

    fn delete_url(&self, principal: &Principal, id: &IssuanceId) -> Result<Url, PortError> {
        match principal {
            Principal::Account { account_name } => {
                self.url(&["api", "v1", "account", account_name.as_str(), "token", id.as_str()])
            },
            Principal::ProjectRole { project_name, project_role_name } => {
                let mut url = self.url(&[
                    "api",
                    "v1",
                    "projects",
                    project_name.as_str(),
                    "roles",
                    project_role_name.as_str(),
                    "token",
                    "0",
                ])?;
                url.query_pairs_mut().append_pair("id", id.as_str());
                Ok(url)
            },
        }
    }

    async fn cancellable<F>(&self, call: F) -> Result<Response, PortError>
    where
        F: Future<Output = reqwest::Result<Response>>,
    {
        tokio::select! {
            () = self.cancel.cancelled() => Err(PortError::Cancelled),
            result = call => result.map_err(transport_error),
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, PortError> {
        self.cancellable(request.send()).await
    }
}

fn transport_error(err: reqwest::Error) -> PortError {
    let message = if err.is_timeout() {
        "request to argo cd timed out"
    } else if err.is_connect() {
        "could not connect to argo cd"
    } else {
        "request to argo cd failed"
    };
    PortError::transport_with_source(message, err)
}

async fn remote_error(response: Response) -> PortError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let mut message = error_message(&body);
    if message.is_empty() {
        message = status.canonical_reason().unwrap_or("no message").to_owned();
    }
    PortError::remote(status.as_u16(), message)
}

#[async_trait]
impl CredentialPort for ArgoCdSession {
    fn kind(&self) -> PrincipalKind {
        self.kind
    }

    #[tracing::instrument(
        skip(self, principal, id),
        fields(principal = %principal, id = %id, lifetime_secs = lifetime.as_secs())
    )]
    async fn mint(
        &self,
        principal: &Principal,
        lifetime: Duration,
        id: &IssuanceId,
    ) -> Result<Zeroizing<String>, PortError> {
        PortError::check_kind(self.kind, principal)?;
        let url = self.token_url(principal)?;
        let expires_in = lifetime.as_secs();
        let request = match principal {
            Principal::Account { account_name } => self.client.post(url).json(&AccountTokenRequest {
                name: account_name,
                expires_in,
                id: id.as_str(),
            }),
            Principal::ProjectRole { project_name, project_role_name } => {
                self.client.post(url).json(&ProjectTokenRequest {
                    project: project_name,
                    role: project_role_name,
                    expires_in,
                    id: id.as_str(),
                })
            },
        };

        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }

        let body: TokenResponse = tokio::select! {
            () = self.cancel.cancelled() => return Err(PortError::Cancelled),
            body = response.json() => body.map_err(|e| {
                PortError::invalid_response(format!("token response is not valid json: {e}"))
            })?,
        };
        if body.token.is_empty() {
            return Err(PortError::invalid_response("token response carries no token"));
        }
        Ok(body.token)
    }

    #[tracing::instrument(skip(self, principal, id), fields(principal = %principal, id = %id))]
    async fn destroy(&self, principal: &Principal, id: &IssuanceId) -> Result<(), PortError> {
        PortError::check_kind(self.kind, principal)?;
        let url = self.delete_url(principal, id)?;

        let response = self.send(self.client.delete(url)).await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(PortError::not_found(id.as_str())),
            _ => Err(remote_error(response).await),
        }
    }

    async fn close(self: Box<Self>) -> Result<(), PortError> {
        tracing::debug!(kind = %self.kind, "argo cd session closed");
        Ok(())
    }
}
