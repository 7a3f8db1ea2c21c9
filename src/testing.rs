//! In-crate fakes for the environment and the Vault backend.

use crate::environment::{
    CALLBACK_SOURCE, EnvironmentError, InboundMessage, Listeners, PopupFeatures,
    SessionEnvironment, Subscription, WindowHandle,
};
use crate::handshake::HandshakeRequest;
use crate::vault::{
    AuthBackend, BackendError, CallbackPayload, ClientVerifier, LoginResponse, PollStatus,
    PollTarget, RoleInfo, SessionToken,
};
use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{Value, json};
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

pub const ORIGIN: &str = "https://vault.example.com";

#[derive(Debug, Default)]
pub struct FakeWindow {
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

impl FakeWindow {
    /// The user closes the window; not counted as a programmatic close.
    pub fn user_closes(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl WindowHandle for FakeWindow {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeEnvironment {
    messages: Listeners<InboundMessage>,
    unload: Listeners<()>,
    windows: Mutex<Vec<(String, PopupFeatures, Arc<FakeWindow>)>>,
    block_popups: AtomicBool,
    closed_on_open: AtomicBool,
}

impl FakeEnvironment {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn block_popups(&self) {
        self.block_popups.store(true, Ordering::SeqCst);
    }

    /// Windows report closed right after opening (popup killed by the browser).
    pub fn close_windows_on_open(&self) {
        self.closed_on_open.store(true, Ordering::SeqCst);
    }

    pub fn window(&self) -> Option<Arc<FakeWindow>> {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .map(|(_, _, window)| Arc::clone(window))
    }

    pub fn opened(&self) -> Vec<(String, PopupFeatures)> {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(url, features, _)| (url.clone(), *features))
            .collect()
    }

    pub fn post(&self, message: InboundMessage) -> usize {
        self.messages.dispatch(&message)
    }

    /// Post a same-origin, trusted message.
    pub fn post_callback(&self, data: Value) -> usize {
        self.post(InboundMessage {
            origin: ORIGIN.to_string(),
            trusted: true,
            data,
        })
    }

    pub fn unload(&self) -> usize {
        self.unload.dispatch(&())
    }

    pub fn message_listeners(&self) -> usize {
        self.messages.len()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.messages.len() + self.unload.len()
    }
}

impl SessionEnvironment for FakeEnvironment {
    fn origin(&self) -> String {
        ORIGIN.to_string()
    }

    fn open(
        &self,
        url: &str,
        features: PopupFeatures,
    ) -> Result<Arc<dyn WindowHandle>, EnvironmentError> {
        if self.block_popups.load(Ordering::SeqCst) {
            return Err(EnvironmentError::PopupBlocked("blocked by test".to_string()));
        }

        let window = Arc::new(FakeWindow::default());
        if self.closed_on_open.load(Ordering::SeqCst) {
            window.user_closes();
        }

        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((url.to_string(), features, Arc::clone(&window)));

        Ok(window)
    }

    fn subscribe_messages(&self) -> Subscription<InboundMessage> {
        self.messages.subscribe()
    }

    fn subscribe_unload(&self) -> Subscription<()> {
        self.unload.subscribe()
    }
}

pub fn callback_data(path: &str, state: &str, code: &str) -> Value {
    json!({ "source": CALLBACK_SOURCE, "path": path, "state": state, "code": code })
}

pub fn token_response(token: &str) -> LoginResponse {
    LoginResponse::Token(SessionToken {
        token: SecretString::from(token.to_string()),
        accessor: format!("{token}-accessor"),
        policies: vec!["default".to_string()],
        lease_duration: 3600,
        renewable: true,
        entity_id: None,
    })
}

pub fn oidc_role() -> RoleInfo {
    RoleInfo {
        provider_url: Some("https://idp.example.com/authorize?state=s1".to_string()),
        ..RoleInfo::default()
    }
}

pub fn saml_role() -> RoleInfo {
    RoleInfo {
        provider_url: Some("https://idp.example.com/sso?SAMLRequest=x".to_string()),
        poll_id: Some("poll-1".to_string()),
        verifier: Some(ClientVerifier::from_secret(SecretString::from(
            "verifier".to_string(),
        ))),
    }
}

pub fn poll_target() -> PollTarget {
    PollTarget {
        mount_path: "saml".to_string(),
        namespace: String::new(),
        poll_id: "poll-1".to_string(),
        verifier: ClientVerifier::from_secret(SecretString::from("verifier".to_string())),
    }
}

/// Backend answering from a script and counting calls.
pub struct ScriptedBackend {
    role: Mutex<Result<RoleInfo, BackendError>>,
    exchange: Mutex<Result<LoginResponse, BackendError>>,
    exchange_delay: Mutex<Duration>,
    polls: Mutex<VecDeque<Result<PollStatus, BackendError>>>,
    poll_delay: Mutex<Duration>,
    role_calls: AtomicUsize,
    exchange_calls: AtomicUsize,
    poll_calls: AtomicUsize,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self {
            role: Mutex::new(Ok(oidc_role())),
            exchange: Mutex::new(Ok(token_response("hvs.exchanged"))),
            exchange_delay: Mutex::new(Duration::ZERO),
            polls: Mutex::new(VecDeque::new()),
            poll_delay: Mutex::new(Duration::ZERO),
            role_calls: AtomicUsize::new(0),
            exchange_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
        }
    }
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_role(&self, role: Result<RoleInfo, BackendError>) {
        *self.role.lock().unwrap_or_else(PoisonError::into_inner) = role;
    }

    pub fn set_exchange(&self, exchange: Result<LoginResponse, BackendError>) {
        *self.exchange.lock().unwrap_or_else(PoisonError::into_inner) = exchange;
    }

    pub fn set_exchange_delay(&self, delay: Duration) {
        *self
            .exchange_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Queue poll answers; once drained every poll answers `NotReady`.
    pub fn push_polls(&self, polls: impl IntoIterator<Item = Result<PollStatus, BackendError>>) {
        self.polls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(polls);
    }

    pub fn set_poll_delay(&self, delay: Duration) {
        *self.poll_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn role_calls(&self) -> usize {
        self.role_calls.load(Ordering::SeqCst)
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthBackend for ScriptedBackend {
    async fn fetch_role(&self, _request: &HandshakeRequest) -> Result<RoleInfo, BackendError> {
        self.role_calls.fetch_add(1, Ordering::SeqCst);
        self.role
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn exchange_callback(
        &self,
        _namespace: &str,
        _payload: &CallbackPayload,
    ) -> Result<LoginResponse, BackendError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self
            .exchange_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.exchange
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn poll_for_token(&self, _target: &PollTarget) -> Result<PollStatus, BackendError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.poll_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.polls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(Ok(PollStatus::NotReady))
    }
}
