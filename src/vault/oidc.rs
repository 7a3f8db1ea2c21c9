use super::{
    BackendError, CallbackPayload, LoginResponse, RoleInfo, VaultAuthClient, normalize_mount,
    options_payload,
};
use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::instrument;

impl VaultAuthClient {
    /// Request the provider authorization URL for an OIDC role.
    ///
    /// Vault answers with an empty `auth_url` when the redirect URI is not allowed by the
    /// role; that is reported as a missing provider URL, not as an error.
    ///
    /// # Errors
    /// Returns `BackendError` if no redirect URI is configured or Vault rejects the lookup.
    #[instrument(skip(self, options))]
    pub async fn oidc_auth_url(
        &self,
        mount_path: &str,
        namespace: &str,
        options: &BTreeMap<String, String>,
    ) -> Result<RoleInfo, BackendError> {
        let redirect_uri = self.redirect_uri.as_deref().ok_or_else(|| {
            BackendError::Rejected("no redirect_uri configured for OIDC login".to_string())
        })?;

        let mut payload = options_payload(options);
        payload.insert("redirect_uri".into(), Value::from(redirect_uri));

        let body = self
            .send(
                Method::POST,
                &format!("auth/{}/oidc/auth_url", normalize_mount(mount_path)),
                namespace,
                Some(&Value::Object(payload)),
                &[],
            )
            .await?
            .into_success()?;

        let provider_url = body
            .get("data")
            .and_then(|data| data.get("auth_url"))
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .map(str::to_string);

        Ok(RoleInfo {
            provider_url,
            ..RoleInfo::default()
        })
    }

    /// Exchange the provider callback for a Vault login response.
    ///
    /// # Errors
    /// Returns `BackendError` if Vault rejects the callback or the response has no usable
    /// `auth` block.
    #[instrument(skip(self, payload), fields(path = %payload.path))]
    pub async fn oidc_callback(
        &self,
        namespace: &str,
        payload: &CallbackPayload,
    ) -> Result<LoginResponse, BackendError> {
        let body = self
            .send(
                Method::GET,
                &format!("auth/{}/oidc/callback", normalize_mount(&payload.path)),
                namespace,
                None,
                &[
                    ("state", payload.state.as_str()),
                    ("code", payload.code.as_str()),
                ],
            )
            .await?
            .into_success()?;

        LoginResponse::from_response(&body)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::vault::BackendError;
    use secrecy::ExposeSecret;
    use serde_json::json;
    use std::net::TcpListener;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    #[tokio::test]
    async fn auth_url_sends_role_and_redirect_uri() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/oidc/oidc/auth_url"))
            .and(header("X-Vault-Namespace", "team"))
            .and(body_json(json!({
                "role": "eng",
                "redirect_uri": "http://localhost:8250/oidc/callback"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "auth_url": "https://idp.example.com/authorize?state=s1" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = VaultAuthClient::new(&server.uri())
            .unwrap()
            .with_redirect_uri("http://localhost:8250/oidc/callback");
        let options = BTreeMap::from([("role".to_string(), "eng".to_string())]);
        let role = client
            .oidc_auth_url("oidc/", "team", &options)
            .await
            .unwrap();

        assert_eq!(
            role.provider_url.as_deref(),
            Some("https://idp.example.com/authorize?state=s1")
        );
        assert!(role.poll_id.is_none());
    }

    #[tokio::test]
    async fn empty_auth_url_is_missing() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/oidc/oidc/auth_url"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "data": { "auth_url": "" } })),
            )
            .mount(&server)
            .await;

        let client = VaultAuthClient::new(&server.uri())
            .unwrap()
            .with_redirect_uri("http://localhost:8250/oidc/callback");
        let role = client
            .oidc_auth_url("oidc", "", &BTreeMap::new())
            .await
            .unwrap();
        assert!(role.provider_url.is_none());
    }

    #[tokio::test]
    async fn auth_url_requires_redirect_uri() {
        let client = VaultAuthClient::new("http://127.0.0.1:8200").unwrap();
        let err = client
            .oidc_auth_url("oidc", "", &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected(_)));
    }

    #[tokio::test]
    async fn unknown_role_is_not_found() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/oidc/oidc/auth_url"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "errors": ["role \"nope\" could not be found"]
            })))
            .mount(&server)
            .await;

        let client = VaultAuthClient::new(&server.uri())
            .unwrap()
            .with_redirect_uri("http://localhost:8250/oidc/callback");
        let options = BTreeMap::from([("role".to_string(), "nope".to_string())]);
        let err = client
            .oidc_auth_url("oidc", "", &options)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BackendError::NotFound("role \"nope\" could not be found".to_string())
        );
    }

    #[tokio::test]
    async fn callback_returns_token() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/auth/oidc/oidc/callback"))
            .and(query_param("state", "s1"))
            .and(query_param("code", "c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "auth": { "client_token": "hvs.oidc", "policies": ["default"] }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = VaultAuthClient::new(&server.uri()).unwrap();
        let payload = CallbackPayload {
            path: "oidc".to_string(),
            state: "s1".to_string(),
            code: "c1".to_string(),
        };
        let LoginResponse::Token(token) = client.oidc_callback("", &payload).await.unwrap() else {
            panic!("expected a token");
        };
        assert_eq!(token.token.expose_secret(), "hvs.oidc");
    }

    #[tokio::test]
    async fn callback_requiring_mfa() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/auth/oidc/oidc/callback"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "auth": {
                    "client_token": "",
                    "policies": null,
                    "token_policies": null,
                    "metadata": null,
                    "mfa_requirement": {
                        "mfa_request_id": "req-1",
                        "mfa_constraints": {
                            "corp": {
                                "any": [{ "type": "totp", "id": "m-1", "uses_passcode": true }]
                            }
                        }
                    }
                }
            })))
            .mount(&server)
            .await;

        let client = VaultAuthClient::new(&server.uri()).unwrap();
        let payload = CallbackPayload {
            path: "oidc".to_string(),
            state: "s1".to_string(),
            code: "c1".to_string(),
        };
        let LoginResponse::MfaRequired(requirement) =
            client.oidc_callback("", &payload).await.unwrap()
        else {
            panic!("expected an MFA requirement");
        };
        assert_eq!(requirement.mfa_request_id, "req-1");
    }

    #[tokio::test]
    async fn rejected_callback() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/auth/oidc/oidc/callback"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "errors": ["Expired or missing OAuth state."]
            })))
            .mount(&server)
            .await;

        let client = VaultAuthClient::new(&server.uri()).unwrap();
        let payload = CallbackPayload {
            path: "oidc".to_string(),
            state: "stale".to_string(),
            code: "c1".to_string(),
        };
        let err = client.oidc_callback("", &payload).await.unwrap_err();
        assert_eq!(
            err,
            BackendError::Rejected("Expired or missing OAuth state.".to_string())
        );
    }
}
