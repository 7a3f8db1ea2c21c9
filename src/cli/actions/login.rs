use crate::{
    environment::LocalEnvironment,
    handshake::{AuthType, HandshakeConfig, HandshakeController, HandshakeOutcome, LoginMethod},
    vault::{MfaRequirement, SessionToken, VaultAuthClient},
};
use anyhow::{Context, Result, anyhow};
use secrecy::ExposeSecret;
use std::{fmt::Write as _, net::SocketAddr, sync::Arc, time::Duration};
use tracing::{debug, info};

#[derive(Debug)]
pub struct Args {
    pub method: LoginMethod,
    pub mount_path: String,
    pub namespace: String,
    pub vault_addr: String,
    pub listen: SocketAddr,
    pub callback_host: String,
    pub timeout: Option<Duration>,
    pub token_only: bool,
}

/// Execute the login action.
/// # Errors
/// Returns an error if the callback listener cannot start or the handshake does not end
/// with a token.
pub async fn execute(args: Args) -> Result<()> {
    let auth_type = args.method.auth_type();

    // SAML never calls back to us, any free port will do
    let listen = match auth_type {
        AuthType::Oidc => args.listen,
        AuthType::Saml => SocketAddr::new(args.listen.ip(), 0),
    };

    let environment = Arc::new(
        LocalEnvironment::bind(listen, &args.callback_host, &args.mount_path)
            .await
            .context("failed to start the OIDC callback listener")?,
    );

    let client = VaultAuthClient::new(&args.vault_addr)?
        .with_redirect_uri(environment.redirect_uri());
    debug!(
        "vault: {}, method: {}, mount: {}, redirect_uri: {}",
        client.vault_addr(),
        auth_type,
        args.mount_path,
        environment.redirect_uri()
    );

    let config = HandshakeConfig::new().with_message_timeout(args.timeout);
    let controller = HandshakeController::new(Arc::new(client), environment.clone(), config);

    let mut opened = environment.opened();
    let announce = tokio::spawn(async move {
        while opened.changed().await.is_ok() {
            let url = opened.borrow_and_update().clone();
            if let Some(url) = url {
                eprintln!(
                    "Complete the login via your identity provider. \
                     Open this URL in your browser:\n\n    {url}\n"
                );
            }
        }
    });

    let request = args.method.into_request(&args.mount_path, &args.namespace);
    let start = controller.start(request);
    tokio::pin!(start);

    let outcome = tokio::select! {
        outcome = &mut start => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, cancelling login");
            controller.cancel();
            start.await
        }
    };

    announce.abort();
    environment.shutdown();

    match outcome {
        HandshakeOutcome::Authenticated(token) => {
            if args.token_only {
                println!("{}", token.token.expose_secret());
            } else {
                print!("{}", render_token(&token));
            }
            Ok(())
        }
        HandshakeOutcome::MfaRequired(requirement) => {
            eprint!("{}", render_mfa(&requirement));
            Err(anyhow!(
                "MFA validation required, request id: {}",
                requirement.mfa_request_id
            ))
        }
        HandshakeOutcome::Failed(failure) => Err(anyhow!(failure.message)),
    }
}

fn render_duration(seconds: u64) -> String {
    if seconds == 0 {
        return "∞".to_string();
    }

    let (hours, rest) = (seconds / 3600, seconds % 3600);
    let (minutes, seconds) = (rest / 60, rest % 60);
    let mut out = String::new();
    if hours > 0 {
        let _ = write!(out, "{hours}h");
    }
    if minutes > 0 {
        let _ = write!(out, "{minutes}m");
    }
    if seconds > 0 {
        let _ = write!(out, "{seconds}s");
    }
    out
}

fn render_token(token: &SessionToken) -> String {
    let mut out = String::from("Success! You are now authenticated.\n\n");
    let rows = [
        ("token", token.token.expose_secret().to_string()),
        ("token_accessor", token.accessor.clone()),
        ("token_duration", render_duration(token.lease_duration)),
        ("token_renewable", token.renewable.to_string()),
        ("token_policies", format!("{:?}", token.policies)),
    ];
    for (key, value) in rows {
        let _ = writeln!(out, "{key:<18}{value}");
    }
    if let Some(entity_id) = &token.entity_id {
        let _ = writeln!(out, "{:<18}{entity_id}", "entity_id");
    }
    out
}

fn render_mfa(requirement: &MfaRequirement) -> String {
    let mut out = format!(
        "The login requires MFA validation (request id {}).\n",
        requirement.mfa_request_id
    );
    for (name, constraint) in &requirement.mfa_constraints {
        let _ = writeln!(out, "  {name}:");
        for method in &constraint.any {
            let passcode = if method.uses_passcode {
                ", passcode"
            } else {
                ""
            };
            let _ = writeln!(
                out,
                "    {} {}{passcode}{}",
                method.method_type,
                method.id,
                method
                    .name
                    .as_deref()
                    .map(|name| format!(" ({name})"))
                    .unwrap_or_default()
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::{MfaConstraint, MfaMethod};
    use secrecy::SecretString;
    use std::collections::BTreeMap;

    #[test]
    fn test_render_duration() {
        assert_eq!(render_duration(0), "∞");
        assert_eq!(render_duration(45), "45s");
        assert_eq!(render_duration(3600), "1h");
        assert_eq!(render_duration(3725), "1h2m5s");
    }

    #[test]
    fn test_render_token() {
        let token = SessionToken {
            token: SecretString::from("hvs.abc".to_string()),
            accessor: "acc".to_string(),
            policies: vec!["default".to_string(), "dev".to_string()],
            lease_duration: 2_764_800,
            renewable: true,
            entity_id: Some("ent-1".to_string()),
        };

        let out = render_token(&token);
        assert!(out.starts_with("Success!"));
        assert!(out.contains("token             hvs.abc\n"));
        assert!(out.contains("token_duration    768h\n"));
        assert!(out.contains("token_policies    [\"default\", \"dev\"]\n"));
        assert!(out.contains("entity_id         ent-1\n"));
    }

    #[test]
    fn test_render_mfa() {
        let requirement = MfaRequirement {
            mfa_request_id: "req-1".to_string(),
            mfa_constraints: BTreeMap::from([(
                "corp".to_string(),
                MfaConstraint {
                    any: vec![MfaMethod {
                        method_type: "totp".to_string(),
                        id: "m-1".to_string(),
                        uses_passcode: true,
                        name: Some("authenticator".to_string()),
                    }],
                },
            )]),
        };

        let out = render_mfa(&requirement);
        assert!(out.contains("request id req-1"));
        assert!(out.contains("  corp:\n    totp m-1, passcode (authenticator)\n"));
    }
}
