//! Session factory.

use std::time::Duration;

use argocd_tokens::{CredentialConnector, CredentialPort, PluginConfig, PortError, PrincipalKind};
use async_trait::async_trait;
use reqwest::{
    Client, Url,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
};
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use crate::session::ArgoCdSession;

/// Default timeout for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a whole request, response body included.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens [`ArgoCdSession`]s from the stored configuration.
#[derive(Debug, Clone, bon::Builder)]
pub struct ArgoCdConnector {
    /// Connection establishment timeout.
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)]
    connect_timeout: Duration,

    /// Per-request timeout.
    #[builder(default = DEFAULT_REQUEST_TIMEOUT)]
    request_timeout: Duration,
}

impl Default for ArgoCdConnector {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Returns the base URL for `config`: `https://<endpoint>/`, or `http://`
/// when `plaintext` is set.
///
/// # Errors
///
/// Returns [`PortError::Transport`] if the endpoint does not form a URL.
pub fn base_url(config: &PluginConfig) -> Result<Url, PortError> {
    let scheme = if config.plaintext { "http" } else { "https" };
    Url::parse(&format!("{scheme}://{}/", config.argo_cd_url)).map_err(|e| {
        PortError::transport_with_source(
            format!("argo cd address {} does not form a url", config.argo_cd_url),
            e,
        )
    })
}

impl ArgoCdConnector {
    fn client(&self, config: &PluginConfig) -> Result<Client, PortError> {
        let bearer = Zeroizing::new(format!("Bearer {}", config.admin_token.as_str()));
        let mut auth = HeaderValue::from_str(&bearer)
            .map_err(|_| PortError::transport("admin token is not a valid header value"))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(config.insecure)
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| PortError::transport_with_source("error while creating http client", e))
    }
}

#[async_trait]
impl CredentialConnector for ArgoCdConnector {
    #[tracing::instrument(skip(self, config, cancel), fields(argo_cd_url = %config.argo_cd_url))]
    async fn connect(
        &self,
        config: &PluginConfig,
        kind: PrincipalKind,
        cancel: CancellationToken,
    ) -> Result<Box<dyn CredentialPort>, PortError> {
        let base = base_url(config)?;
        let client = self.client(config)?;
        if config.insecure {
            tracing::warn!("tls certificate verification disabled for argo cd session");
        }
        tracing::debug!(%kind, "argo cd session opened");
        Ok(Box::new(ArgoCdSession::new(client, base, kind, cancel)))
    }
}
