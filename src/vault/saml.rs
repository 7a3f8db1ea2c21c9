use super::{
    BackendError, ClientVerifier, LoginResponse, PollStatus, PollTarget, RoleInfo,
    VaultAuthClient, endpoint_url, normalize_mount, options_payload,
};
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

impl VaultAuthClient {
    /// Assertion consumer service URL Vault expects for this mount.
    ///
    /// # Errors
    /// Returns `BackendError::Transport` if the Vault address is invalid.
    pub fn acs_url(&self, mount_path: &str, namespace: &str) -> Result<String, BackendError> {
        let namespace = namespace.trim_matches('/');
        let path = if namespace.is_empty() {
            format!("/v1/auth/{}/callback", normalize_mount(mount_path))
        } else {
            format!("/v1/{namespace}/auth/{}/callback", normalize_mount(mount_path))
        };

        endpoint_url(&self.vault_addr, &path).map_err(|e| BackendError::Transport(e.to_string()))
    }

    /// Start a SAML login: returns the IdP SSO URL, the token poll id, and the client
    /// verifier needed to collect the token later.
    ///
    /// # Errors
    /// Returns `BackendError` if Vault rejects the lookup or omits the poll id.
    #[instrument(skip(self, options))]
    pub async fn saml_sso_service_url(
        &self,
        mount_path: &str,
        namespace: &str,
        options: &BTreeMap<String, String>,
    ) -> Result<RoleInfo, BackendError> {
        let verifier = ClientVerifier::generate();

        let mut payload = options_payload(options);
        payload.insert(
            "acs_url".into(),
            Value::from(self.acs_url(mount_path, namespace)?),
        );
        payload.insert("client_challenge".into(), Value::from(verifier.challenge()));

        let body = self
            .send(
                Method::PUT,
                &format!("auth/{}/sso_service_url", normalize_mount(mount_path)),
                namespace,
                Some(&Value::Object(payload)),
                &[],
            )
            .await?
            .into_success()?;

        let data = body.get("data");
        let provider_url = data
            .and_then(|data| data.get("sso_service_url"))
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .map(str::to_string);
        let poll_id = data
            .and_then(|data| data.get("token_poll_id"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        Ok(RoleInfo {
            provider_url,
            poll_id,
            verifier: Some(verifier),
        })
    }

    /// Poll for the token of a SAML login. `401` means the user has not finished yet.
    ///
    /// # Errors
    /// Returns `BackendError` for any other non-success answer.
    #[instrument(skip(self, target), fields(mount = %target.mount_path))]
    pub async fn saml_token(&self, target: &PollTarget) -> Result<PollStatus, BackendError> {
        let payload = json!({
            "token_poll_id": target.poll_id,
            "client_verifier": target.verifier.expose(),
        });

        let response = self
            .send(
                Method::PUT,
                &format!("auth/{}/token", normalize_mount(&target.mount_path)),
                &target.namespace,
                Some(&payload),
                &[],
            )
            .await?;

        if response.status == StatusCode::UNAUTHORIZED {
            debug!("SAML token not ready yet");
            return Ok(PollStatus::NotReady);
        }

        let body = response.into_success()?;

        Ok(PollStatus::Ready(LoginResponse::from_response(&body)?))
    }
}
