use super::{
    AuthType, CallbackResult, Credential, HandshakeFailure, HandshakeOutcome, HandshakeRequest,
    HandshakeState,
    channel::ResultChannel,
    config::HandshakeConfig,
    origin::OriginWatcher,
    popup::PopupWatcher,
    reporter::{ErrorReporter, FailureReason},
    session::ProviderSession,
};
use crate::environment::{PopupFeatures, SessionEnvironment};
use crate::vault::{AuthBackend, CallbackPayload, LoginResponse, PollTarget};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Everything an attempt keeps running while it waits for the provider.
#[derive(Debug, Default)]
pub(crate) struct Watchers {
    pub(crate) session: Option<ProviderSession>,
    pub(crate) popup: Option<PopupWatcher>,
    pub(crate) origin: Option<OriginWatcher>,
    pub(crate) channel: Option<ResultChannel>,
}

impl Watchers {
    /// Stop watchers, then close the window. Idempotent.
    pub(crate) async fn stop_all(&mut self) {
        if let Some(mut popup) = self.popup.take() {
            popup.stop().await;
        }
        if let Some(mut origin) = self.origin.take() {
            origin.stop().await;
        }
        if let Some(mut channel) = self.channel.take() {
            channel.stop().await;
        }
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }

    #[cfg(test)]
    pub(crate) fn is_stopped(&self) -> bool {
        self.popup.as_ref().is_none_or(PopupWatcher::is_stopped)
            && self.origin.as_ref().is_none_or(OriginWatcher::is_stopped)
            && self.channel.as_ref().is_none_or(ResultChannel::is_stopped)
            && self.session.as_ref().is_none_or(|session| !session.is_open())
    }
}

/// Drives one provider handshake at a time.
pub struct HandshakeController {
    backend: Arc<dyn AuthBackend>,
    environment: Arc<dyn SessionEnvironment>,
    config: HandshakeConfig,
    state: watch::Sender<HandshakeState>,
    active: Mutex<Option<(u64, CancellationToken)>>,
    attempts: AtomicU64,
    reporter: ErrorReporter,
}

impl std::fmt::Debug for HandshakeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeController")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Clears the active attempt when `start()` returns or its future is dropped.
struct Attempt<'a> {
    controller: &'a HandshakeController,
    id: u64,
    token: CancellationToken,
    finished: bool,
}

impl Attempt<'_> {
    fn finish(mut self, state: HandshakeState) {
        self.finished = true;
        self.controller.end(self.id, state);
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.token.cancel();
            self.controller.end(self.id, HandshakeState::Cancelled);
        }
    }
}

impl HandshakeController {
    #[must_use]
    pub fn new(
        backend: Arc<dyn AuthBackend>,
        environment: Arc<dyn SessionEnvironment>,
        config: HandshakeConfig,
    ) -> Self {
        let (state, _) = watch::channel(HandshakeState::Idle);

        Self {
            backend,
            environment,
            config: config.normalize(),
            state,
            active: Mutex::new(None),
            attempts: AtomicU64::new(0),
            reporter: ErrorReporter,
        }
    }

    #[must_use]
    pub fn state(&self) -> HandshakeState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<HandshakeState> {
        self.state.subscribe()
    }

    /// Cancel the attempt in flight. No-op when idle or already finished; safe to call
    /// any number of times.
    pub fn cancel(&self) {
        if let Some((id, token)) = self.lock_active().as_ref()
            && !token.is_cancelled()
        {
            debug!(attempt = id, "cancelling handshake");
            token.cancel();
        }
    }

    /// Run a handshake to its single terminal outcome. Never fails: every problem ends up
    /// in [`HandshakeOutcome::Failed`].
    #[instrument(
        skip(self, request),
        fields(method = %request.auth_type, mount = %request.mount_path)
    )]
    pub async fn start(&self, request: HandshakeRequest) -> HandshakeOutcome {
        let Some(attempt) = self.begin() else {
            let reason = FailureReason::Busy;
            return HandshakeOutcome::Failed(HandshakeFailure {
                message: ErrorReporter::message(&reason),
                reason,
            });
        };

        let mut watchers = Watchers::default();
        let outcome = match self.run(&request, &attempt.token, &mut watchers).await {
            Ok(outcome) => outcome,
            Err(reason) => {
                HandshakeOutcome::Failed(self.reporter.report(reason, &mut watchers).await)
            }
        };
        watchers.stop_all().await;

        let state = match &outcome {
            HandshakeOutcome::Authenticated(token) => {
                info!(accessor = %token.accessor, "handshake succeeded");
                HandshakeState::Succeeded
            }
            HandshakeOutcome::MfaRequired(requirement) => {
                info!(
                    mfa_request_id = %requirement.mfa_request_id,
                    "handshake needs MFA validation"
                );
                HandshakeState::Succeeded
            }
            HandshakeOutcome::Failed(failure) if failure.reason == FailureReason::Cancelled => {
                HandshakeState::Cancelled
            }
            HandshakeOutcome::Failed(_) => HandshakeState::Failed,
        };
        attempt.finish(state);

        outcome
    }

    async fn run(
        &self,
        request: &HandshakeRequest,
        cancel: &CancellationToken,
        watchers: &mut Watchers,
    ) -> Result<HandshakeOutcome, FailureReason> {
        let role = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(FailureReason::Cancelled),
            role = self.backend.fetch_role(request) => role,
        }
        .map_err(|e| FailureReason::RoleLookupFailed(e.to_string()))?;

        let provider_url = role
            .provider_url
            .filter(|url| !url.is_empty())
            .ok_or(FailureReason::MissingProviderUrl)?;

        let poll_target = match request.auth_type {
            AuthType::Oidc => None,
            AuthType::Saml => {
                let (Some(poll_id), Some(verifier)) = (role.poll_id, role.verifier) else {
                    return Err(FailureReason::RoleLookupFailed(
                        "no token poll id in SAML response".to_string(),
                    ));
                };
                Some(PollTarget {
                    mount_path: request.mount_path.clone(),
                    namespace: request.namespace.clone(),
                    poll_id,
                    verifier,
                })
            }
        };

        if cancel.is_cancelled() {
            return Err(FailureReason::Cancelled);
        }

        self.transition(HandshakeState::AwaitingProvider);

        let (width, height) = self.config.popup_size();
        let features = PopupFeatures::centered(width, height, self.environment.host_geometry());
        let handle = self
            .environment
            .open(&provider_url, features)
            .map_err(|e| FailureReason::PopupBlocked(e.to_string()))?;

        let session = ProviderSession::new(handle);
        let view = session.view();
        watchers.session = Some(session);

        let mut popup = PopupWatcher::start(view.clone(), self.config.popup_interval(), cancel);
        let origin = OriginWatcher::start(self.environment.as_ref(), view, cancel);
        let mut channel = match poll_target {
            None => ResultChannel::messages(
                self.environment.as_ref(),
                self.config.message_timeout(),
                cancel,
            ),
            Some(target) => ResultChannel::polling(
                Arc::clone(&self.backend),
                target,
                self.config.poll(),
                cancel,
            ),
        };

        // Biased on purpose: when a result and a close are both ready, the result wins,
        // so a provider that posts its callback and then closes itself still succeeds.
        // Recorded under "Result versus close" in DESIGN.md.
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            Some(result) = channel.next() => Some(result),
            true = popup.closed() => Some(CallbackResult::WindowClosed),
        };

        watchers.popup = Some(popup);
        watchers.origin = Some(origin);
        watchers.channel = Some(channel);

        let credential = match result {
            None => return Err(FailureReason::Cancelled),
            Some(CallbackResult::Success(credential)) => credential,
            Some(CallbackResult::WindowClosed) => {
                return Err(FailureReason::WindowClosedPrematurely);
            }
            Some(CallbackResult::MissingParams) => return Err(FailureReason::MissingParams),
            Some(CallbackResult::ProviderError(detail)) => {
                return Err(FailureReason::ProviderError(detail));
            }
            Some(CallbackResult::Timeout) => return Err(FailureReason::Timeout),
        };

        self.transition(HandshakeState::Exchanging);
        watchers.stop_all().await;

        let login = match credential {
            Credential::Login(login) => login,
            Credential::Code(payload) => self.exchange(request, &payload, cancel).await?,
        };

        Ok(HandshakeOutcome::from(login))
    }

    async fn exchange(
        &self,
        request: &HandshakeRequest,
        payload: &CallbackPayload,
        cancel: &CancellationToken,
    ) -> Result<LoginResponse, FailureReason> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(FailureReason::Cancelled),
            login = self.backend.exchange_callback(&request.namespace, payload) => {
                login.map_err(|e| FailureReason::ExchangeFailed(e.to_string()))
            }
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<(u64, CancellationToken)>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) -> Option<Attempt<'_>> {
        let mut active = self.lock_active();
        if active.is_some() {
            debug!("handshake already in progress");
            return None;
        }

        let id = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        *active = Some((id, token.clone()));
        self.transition(HandshakeState::FetchingRole);

        Some(Attempt {
            controller: self,
            id,
            token,
            finished: false,
        })
    }

    fn end(&self, id: u64, state: HandshakeState) {
        let mut active = self.lock_active();
        if active.as_ref().is_some_and(|(current, _)| *current == id) {
            *active = None;
            self.transition(state);
        }
    }

    fn transition(&self, next: HandshakeState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "handshake state");
        }
    }
}
