use crate::cli::{
    actions::{Action, login::Args},
    commands::login::CMD_LOGIN,
};
use crate::handshake::{AuthType, LoginMethod};
use anyhow::{Context, Result, anyhow};
use std::{collections::BTreeMap, net::SocketAddr, time::Duration};

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    match matches.subcommand() {
        Some((CMD_LOGIN, sub)) => login(sub).map(Action::Login),
        Some((other, _)) => Err(anyhow!("unknown command: {other}")),
        None => Err(anyhow!("missing command")),
    }
}

fn login(matches: &clap::ArgMatches) -> Result<Args> {
    let method = matches
        .get_one::<String>("method")
        .map_or("oidc", String::as_str);
    let auth_type: AuthType = method.parse().map_err(|e: String| anyhow!(e))?;

    let mount_path = matches
        .get_one::<String>("path")
        .map_or(method, String::as_str)
        .trim_matches('/')
        .to_string();
    if mount_path.is_empty() {
        return Err(anyhow!("--path must not be empty"));
    }

    let role = matches
        .get_one::<String>("role")
        .filter(|role| !role.is_empty())
        .cloned();
    let options: BTreeMap<String, String> = matches
        .get_many::<(String, String)>("option")
        .map(|pairs| pairs.cloned().collect())
        .unwrap_or_default();

    let login_method = match auth_type {
        AuthType::Oidc => LoginMethod::Oidc { role, options },
        AuthType::Saml => LoginMethod::Saml { role, options },
    };

    let vault_addr = matches
        .get_one::<String>("vault-addr")
        .cloned()
        .context("missing required argument: --vault-addr")?;
    crate::vault::endpoint_url(&vault_addr, "/").context("invalid VAULT_ADDR")?;

    let namespace = matches
        .get_one::<String>("namespace")
        .cloned()
        .unwrap_or_default();

    let listen_address = matches
        .get_one::<std::net::IpAddr>("listen-address")
        .copied()
        .context("missing required argument: --listen-address")?;
    let callback_port = matches.get_one::<u16>("callback-port").copied().unwrap_or(8250);
    let callback_host = matches
        .get_one::<String>("callback-host")
        .cloned()
        .unwrap_or_else(|| "localhost".to_string());

    let timeout = matches
        .get_one::<u64>("timeout")
        .copied()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);

    Ok(Args {
        method: login_method,
        mount_path,
        namespace,
        vault_addr,
        listen: SocketAddr::new(listen_address, callback_port),
        callback_host,
        timeout,
        token_only: matches.get_flag("token-only"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cli::commands;

    fn dispatch(args: &[&str]) -> Result<Args> {
        let mut argv = vec!["vault-sso", "login"];
        argv.extend_from_slice(args);
        let matches = commands::new().get_matches_from(argv);
        let Action::Login(args) = handler(&matches)?;
        Ok(args)
    }

    #[test]
    fn test_defaults_mount_to_method() {
        temp_env::with_vars_unset(
            [
                "VAULT_ADDR",
                "VAULT_NAMESPACE",
                "VAULT_SSO_PATH",
                "VAULT_SSO_ROLE",
                "VAULT_SSO_TIMEOUT",
            ],
            || {
                let args = dispatch(&["--method", "jwt"]).unwrap();
                assert_eq!(args.mount_path, "jwt");
                assert_eq!(
                    args.method,
                    LoginMethod::Oidc {
                        role: None,
                        options: BTreeMap::new()
                    }
                );
                assert_eq!(args.listen, "127.0.0.1:8250".parse().unwrap());
                assert_eq!(args.timeout, Some(Duration::from_secs(300)));
            },
        );
    }

    #[test]
    fn test_saml_with_role_and_options() {
        temp_env::with_vars_unset(["VAULT_SSO_PATH", "VAULT_SSO_ROLE"], || {
            let args = dispatch(&[
                "--method",
                "saml",
                "--path",
                "/corp/",
                "--role",
                "eng",
                "-o",
                "group=ops",
                "--timeout",
                "0",
            ])
            .unwrap();

            assert_eq!(args.mount_path, "corp");
            assert_eq!(
                args.method,
                LoginMethod::Saml {
                    role: Some("eng".to_string()),
                    options: BTreeMap::from([("group".to_string(), "ops".to_string())]),
                }
            );
            assert_eq!(args.timeout, None);
        });
    }

    #[test]
    fn test_rejects_invalid_vault_addr() {
        assert!(dispatch(&["--vault-addr", "vault.tld"]).is_err());
        assert!(dispatch(&["--vault-addr", "ftp://vault.tld"]).is_err());
    }
}
