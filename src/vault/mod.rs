//! Vault auth endpoints used by the handshake.
//!
//! [`AuthBackend`] is the collaborator contract the controller depends on: role lookup,
//! OIDC code exchange, and SAML token polling. [`VaultAuthClient`] implements it over
//! HTTP with `reqwest`; tests substitute scripted backends.
//!
//! Every request is sent with the crate user agent, an optional `X-Vault-Namespace`
//! header, and runs inside an `info_span` carrying method and URL. Non-success
//! responses are mapped to [`BackendError`] using the first entry of Vault's `errors`
//! array as the detail.

pub mod challenge;
pub mod oidc;
pub mod saml;
pub mod token;

pub use self::challenge::ClientVerifier;
pub use self::token::{LoginResponse, MfaConstraint, MfaMethod, MfaRequirement, SessionToken};

use crate::handshake::{AuthType, HandshakeRequest};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Map, Value};
use std::{collections::BTreeMap, time::Duration};
use thiserror::Error;
use tracing::{Instrument, debug, info_span};
use url::Url;

const VAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    Forbidden(String),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Result of a role lookup.
#[derive(Debug, Clone, Default)]
pub struct RoleInfo {
    pub provider_url: Option<String>,
    pub poll_id: Option<String>,
    pub verifier: Option<ClientVerifier>,
}

/// Provider callback parameters delivered to the host (OIDC).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackPayload {
    pub path: String,
    pub state: String,
    pub code: String,
}

/// Everything needed to poll for a SAML token.
#[derive(Debug, Clone)]
pub struct PollTarget {
    pub mount_path: String,
    pub namespace: String,
    pub poll_id: String,
    pub verifier: ClientVerifier,
}

#[derive(Debug, Clone)]
pub enum PollStatus {
    Ready(LoginResponse),
    NotReady,
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Look up the role and obtain the provider URL.
    async fn fetch_role(&self, request: &HandshakeRequest) -> Result<RoleInfo, BackendError>;

    /// Trade an OIDC authorization code for a Vault login response.
    async fn exchange_callback(
        &self,
        namespace: &str,
        payload: &CallbackPayload,
    ) -> Result<LoginResponse, BackendError>;

    /// Check whether the SAML login finished.
    async fn poll_for_token(&self, target: &PollTarget) -> Result<PollStatus, BackendError>;
}

#[derive(Debug)]
pub(crate) struct VaultResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl VaultResponse {
    pub(crate) fn into_success(self) -> Result<Value, BackendError> {
        if self.status.is_success() {
            Ok(self.body)
        } else {
            Err(classify(self.status, &self.body))
        }
    }
}

#[derive(Debug, Clone)]
pub struct VaultAuthClient {
    client: Client,
    vault_addr: String,
    redirect_uri: Option<String>,
}

impl VaultAuthClient {
    /// Build a client for the Vault server at `vault_addr`.
    ///
    /// # Errors
    /// Returns an error if the address is not a valid http(s) URL or the HTTP client
    /// cannot be built.
    pub fn new(vault_addr: &str) -> Result<Self> {
        // validate early, every request goes through endpoint_url again
        endpoint_url(vault_addr, "/")?;

        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(VAULT_REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            vault_addr: vault_addr.trim_end_matches('/').to_string(),
            redirect_uri: None,
        })
    }

    /// Redirect URI sent with OIDC role lookups.
    #[must_use]
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    #[must_use]
    pub fn vault_addr(&self) -> &str {
        &self.vault_addr
    }

    pub(crate) async fn send(
        &self,
        method: Method,
        path: &str,
        namespace: &str,
        body: Option<&Value>,
        query: &[(&str, &str)],
    ) -> Result<VaultResponse, BackendError> {
        let url = endpoint_url(&self.vault_addr, &format!("/v1/{path}"))
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let mut request = self.client.request(method.clone(), &url);
        if !namespace.is_empty() {
            request = request.header("X-Vault-Namespace", namespace);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        if !query.is_empty() {
            request = request.query(query);
        }

        let span = info_span!(
            "vault.request",
            http.method = %method,
            url = %url
        );
        let response = request
            .send()
            .instrument(span)
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            match serde_json::from_slice(&bytes) {
                Ok(body) => body,
                Err(e) if status.is_success() => {
                    return Err(BackendError::InvalidResponse(e.to_string()));
                }
                Err(_) => Value::Null,
            }
        };

        debug!("{} {} -> {}", method, url, status);

        Ok(VaultResponse { status, body })
    }
}

#[async_trait]
impl AuthBackend for VaultAuthClient {
    async fn fetch_role(&self, request: &HandshakeRequest) -> Result<RoleInfo, BackendError> {
        match request.auth_type {
            AuthType::Oidc => {
                self.oidc_auth_url(
                    &request.mount_path,
                    &request.namespace,
                    &request.role_or_options,
                )
                .await
            }
            AuthType::Saml => {
                self.saml_sso_service_url(
                    &request.mount_path,
                    &request.namespace,
                    &request.role_or_options,
                )
                .await
            }
        }
    }

    async fn exchange_callback(
        &self,
        namespace: &str,
        payload: &CallbackPayload,
    ) -> Result<LoginResponse, BackendError> {
        self.oidc_callback(namespace, payload).await
    }

    async fn poll_for_token(&self, target: &PollTarget) -> Result<PollStatus, BackendError> {
        self.saml_token(target).await
    }
}

/// Join `path` onto the Vault address.
///
/// # Errors
/// Returns an error if `url` cannot be parsed, has no host, or uses an unsupported scheme.
pub fn endpoint_url(url: &str, path: &str) -> Result<String> {
    let url = Url::parse(url)?;

    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(anyhow!("Error parsing URL: unsupported scheme {scheme}"));
    }

    if url.host().is_none() {
        return Err(anyhow!("Error parsing URL: no host specified"));
    }

    let base = url.as_str().trim_end_matches('/');

    Ok(format!("{base}{path}"))
}

/// Mount paths are accepted with or without surrounding slashes.
#[must_use]
pub fn normalize_mount(mount_path: &str) -> &str {
    mount_path.trim_matches('/')
}

fn vault_error_message(json_response: &Value) -> String {
    json_response
        .get("errors")
        .and_then(Value::as_array)
        .and_then(|errors| errors.first())
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

fn classify(status: StatusCode, body: &Value) -> BackendError {
    let message = vault_error_message(body);
    let detail = if message.is_empty() {
        status.to_string()
    } else {
        message
    };

    match status {
        StatusCode::NOT_FOUND => BackendError::NotFound(detail),
        StatusCode::FORBIDDEN => BackendError::Forbidden(detail),
        s if s.is_client_error() => BackendError::Rejected(detail),
        _ => BackendError::Server(detail),
    }
}

/// Role/options as a JSON body, skipping empty values so Vault applies its defaults.
fn options_payload(options: &BTreeMap<String, String>) -> Map<String, Value> {
    options
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| (key.clone(), Value::from(value.as_str())))
        .collect()
}
