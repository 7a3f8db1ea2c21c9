use clap::{Arg, ArgAction, Command, builder::ValueParser};

pub const CMD_LOGIN: &str = "login";

/// Parse `key=value` pairs passed with `-o`.
#[must_use]
pub fn validator_key_value() -> ValueParser {
    ValueParser::from(move |pair: &str| -> std::result::Result<(String, String), String> {
        match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => Err(format!("expected key=value, got '{pair}'")),
        }
    })
}

#[must_use]
pub fn command() -> Command {
    Command::new(CMD_LOGIN)
        .about("Log in to Vault through an OIDC or SAML identity provider")
        .arg(
            Arg::new("method")
                .short('m')
                .long("method")
                .help("Auth method type")
                .env("VAULT_SSO_METHOD")
                .default_value("oidc")
                .value_parser(["oidc", "jwt", "saml"]),
        )
        .arg(
            Arg::new("path")
                .long("path")
                .help("Mount path of the auth method (default: the method name)")
                .env("VAULT_SSO_PATH"),
        )
        .arg(
            Arg::new("role")
                .short('r')
                .long("role")
                .help("Role to log in with (default: the mount's default role)")
                .env("VAULT_SSO_ROLE"),
        )
        .arg(
            Arg::new("option")
                .short('o')
                .long("option")
                .help("Extra key=value sent with the role lookup, may be repeated")
                .action(ArgAction::Append)
                .value_parser(validator_key_value()),
        )
        .arg(
            Arg::new("namespace")
                .short('n')
                .long("namespace")
                .help("Vault namespace")
                .env("VAULT_NAMESPACE")
                .default_value(""),
        )
        .arg(
            Arg::new("vault-addr")
                .long("vault-addr")
                .help("Vault address, example: https://vault.tld:8200")
                .env("VAULT_ADDR")
                .default_value("https://127.0.0.1:8200"),
        )
        .arg(
            Arg::new("listen-address")
                .long("listen-address")
                .help("Address the OIDC callback listener binds to")
                .env("VAULT_SSO_LISTEN_ADDRESS")
                .default_value("127.0.0.1")
                .value_parser(clap::value_parser!(std::net::IpAddr)),
        )
        .arg(
            Arg::new("callback-host")
                .long("callback-host")
                .help("Host name used in the OIDC redirect URI")
                .env("VAULT_SSO_CALLBACK_HOST")
                .default_value("localhost"),
        )
        .arg(
            Arg::new("callback-port")
                .long("callback-port")
                .help("Port of the OIDC callback listener")
                .env("VAULT_SSO_CALLBACK_PORT")
                .default_value("8250")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .help("Seconds to wait for the identity provider, 0 waits forever")
                .env("VAULT_SSO_TIMEOUT")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("token-only")
                .long("token-only")
                .help("Print only the token")
                .action(ArgAction::SetTrue),
        )
}
