use super::{HandshakeFailure, controller::Watchers};
use thiserror::Error;
use tracing::{info, warn};

/// Why a handshake attempt ended without a session token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("role lookup failed: {0}")]
    RoleLookupFailed(String),
    #[error("role has no provider URL")]
    MissingProviderUrl,
    #[error("popup blocked: {0}")]
    PopupBlocked(String),
    #[error("provider window closed prematurely")]
    WindowClosedPrematurely,
    #[error("callback is missing parameters")]
    MissingParams,
    #[error("provider error: {0}")]
    ProviderError(String),
    #[error("timed out waiting for the provider")]
    Timeout,
    #[error("token exchange failed: {0}")]
    ExchangeFailed(String),
    #[error("cancelled")]
    Cancelled,
    #[error("a handshake is already in progress")]
    Busy,
}

impl FailureReason {
    /// Configuration problems that resubmitting will not fix.
    #[must_use]
    pub const fn is_configuration_error(&self) -> bool {
        matches!(self, Self::MissingProviderUrl)
    }
}

/// Maps failure reasons to user-facing text and makes sure nothing keeps running once the
/// text is shown.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorReporter;

impl ErrorReporter {
    #[must_use]
    pub fn message(reason: &FailureReason) -> String {
        match reason {
            FailureReason::RoleLookupFailed(detail) => {
                format!("Could not look up the login role: {detail}")
            }
            FailureReason::MissingProviderUrl => "The role did not return a provider URL. \
                Check that the redirect URI is allowed for this role; contact your \
                administrator if the problem persists."
                .to_string(),
            FailureReason::PopupBlocked(detail) => format!(
                "The provider window could not be opened ({detail}). Allow popups and try again."
            ),
            FailureReason::WindowClosedPrematurely => "The provider window was closed before \
                authentication was complete. Sign in again to retry."
                .to_string(),
            FailureReason::MissingParams => "The callback from the provider did not supply all \
                of the required parameters. Sign in again to retry; contact your administrator \
                if the problem persists."
                .to_string(),
            FailureReason::ProviderError(detail) => {
                format!("Authentication failed: {detail}")
            }
            FailureReason::Timeout => {
                "Timed out waiting for the identity provider. Sign in again to retry.".to_string()
            }
            FailureReason::ExchangeFailed(detail) => {
                format!("Vault could not complete the login: {detail}")
            }
            FailureReason::Cancelled => "Authentication was cancelled.".to_string(),
            FailureReason::Busy => "A login is already in progress.".to_string(),
        }
    }

    /// Stop every watcher and close the provider window, then build the failure.
    pub(crate) async fn report(
        &self,
        reason: FailureReason,
        watchers: &mut Watchers,
    ) -> HandshakeFailure {
        watchers.stop_all().await;

        let message = Self::message(&reason);
        if reason == FailureReason::Cancelled {
            info!("handshake cancelled");
        } else {
            warn!("handshake failed: {}", reason);
        }

        HandshakeFailure { reason, message }
    }
}
