//! # vault-sso (browser login for Vault auth mounts)
//!
//! `vault-sso` drives the external identity provider handshake used by Vault's
//! `oidc`/`jwt` and `saml` auth methods: look up the role's provider URL, open the
//! provider in a separate window, wait for the provider's answer, and turn it into a
//! Vault session token.
//!
//! ## Handshake
//!
//! The [`handshake::HandshakeController`] owns the provider window and races three
//! independent watchers against each other:
//!
//! - **`PopupWatcher`** polls the window handle and reports a premature close.
//! - **`OriginWatcher`** closes the window if the host is going away.
//! - **`ResultChannel`** delivers the provider's answer, either as an inbound callback
//!   message (OIDC) or by polling Vault for the token (SAML).
//!
//! Whichever finishes first decides the outcome; every other watcher is stopped and the
//! window closed before the outcome is returned. A failed handshake leaves no window,
//! timer, or subscription behind.
//!
//! ## Environment
//!
//! Window, message, and unload primitives are injected through
//! [`environment::SessionEnvironment`], so the controller runs the same way against a
//! browser bridge, the terminal [`environment::LocalEnvironment`], or test fakes.

pub mod cli;
pub mod environment;
pub mod handshake;
pub mod vault;

#[cfg(test)]
pub(crate) mod testing;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
