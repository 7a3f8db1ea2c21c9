//! External identity provider handshake.
//!
//! ### Flow Overview
//! 1. **Role lookup**: ask Vault for the provider URL of the requested role (and, for
//!    SAML, a token poll id plus a client verifier).
//! 2. **Provider window**: open the provider URL and start `PopupWatcher`,
//!    `OriginWatcher`, and the `ResultChannel`.
//! 3. **Race**: the first of callback result, window closed, or caller cancellation
//!    decides the outcome. Everything else is stopped.
//! 4. **Exchange**: an OIDC code is traded for a Vault token; SAML already has one.
//!
//! All failures end up in [`HandshakeOutcome::Failed`] with a [`FailureReason`] and a
//! user-facing message; `start()` never returns an error.

pub mod channel;
pub mod config;
pub mod controller;
pub mod origin;
pub mod popup;
pub mod reporter;
pub mod session;

pub use self::channel::ResultChannel;
pub use self::config::{HandshakeConfig, PollPolicy};
pub use self::controller::HandshakeController;
pub use self::origin::OriginWatcher;
pub use self::popup::PopupWatcher;
pub use self::reporter::{ErrorReporter, FailureReason};
pub use self::session::{ProviderSession, WindowView};

use crate::vault::{CallbackPayload, LoginResponse, MfaRequirement, SessionToken};
use std::{collections::BTreeMap, fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthType {
    Oidc,
    Saml,
}

impl AuthType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Oidc => "oidc",
            Self::Saml => "saml",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            // jwt mounts use the same browser flow when the role is an OIDC role
            "oidc" | "jwt" => Ok(Self::Oidc),
            "saml" => Ok(Self::Saml),
            other => Err(format!("unsupported login method: {other}")),
        }
    }
}

/// Immutable input of one handshake attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub auth_type: AuthType,
    pub mount_path: String,
    pub role_or_options: BTreeMap<String, String>,
    pub namespace: String,
}

/// Login form output, resolved once at submit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginMethod {
    Oidc {
        role: Option<String>,
        options: BTreeMap<String, String>,
    },
    Saml {
        role: Option<String>,
        options: BTreeMap<String, String>,
    },
}

impl LoginMethod {
    #[must_use]
    pub const fn auth_type(&self) -> AuthType {
        match self {
            Self::Oidc { .. } => AuthType::Oidc,
            Self::Saml { .. } => AuthType::Saml,
        }
    }

    /// Build the handshake request. An explicit role wins over a `role` entry in options.
    #[must_use]
    pub fn into_request(self, mount_path: &str, namespace: &str) -> HandshakeRequest {
        let auth_type = self.auth_type();
        let (role, mut options) = match self {
            Self::Oidc { role, options } | Self::Saml { role, options } => (role, options),
        };

        if let Some(role) = role {
            options.insert("role".to_string(), role);
        }

        HandshakeRequest {
            auth_type,
            mount_path: mount_path.trim_matches('/').to_string(),
            role_or_options: options,
            namespace: namespace.trim_matches('/').to_string(),
        }
    }
}

/// What a successful callback carries.
#[derive(Debug, Clone)]
pub enum Credential {
    /// OIDC: provider code still to be exchanged.
    Code(CallbackPayload),
    /// SAML: the poll already produced the login response.
    Login(LoginResponse),
}

/// Terminal signal of a result channel, produced at most once.
#[derive(Debug, Clone)]
pub enum CallbackResult {
    Success(Credential),
    MissingParams,
    ProviderError(String),
    Timeout,
    WindowClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeFailure {
    pub reason: FailureReason,
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum HandshakeOutcome {
    Authenticated(SessionToken),
    MfaRequired(MfaRequirement),
    Failed(HandshakeFailure),
}

impl HandshakeOutcome {
    #[must_use]
    pub fn failure_reason(&self) -> Option<&FailureReason> {
        match self {
            Self::Failed(failure) => Some(&failure.reason),
            _ => None,
        }
    }
}

impl From<LoginResponse> for HandshakeOutcome {
    fn from(response: LoginResponse) -> Self {
        match response {
            LoginResponse::Token(token) => Self::Authenticated(token),
            LoginResponse::MfaRequired(requirement) => Self::MfaRequired(requirement),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    FetchingRole,
    AwaitingProvider,
    Exchanging,
    Succeeded,
    Failed,
    Cancelled,
}

impl HandshakeState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::FetchingRole | Self::AwaitingProvider | Self::Exchanging
        )
    }
}
