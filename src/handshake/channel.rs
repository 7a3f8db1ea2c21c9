//! Delivery of the provider's response.
//!
//! Two variants behind one contract. The message variant waits for the callback message
//! posted by the provider window (OIDC). The polling variant asks Vault for the token until
//! it is ready (SAML). Either emits a single [`CallbackResult`] and then releases its
//! timers and listeners, whether or not anybody reads the result.

use super::{CallbackResult, Credential, config::PollPolicy};
use crate::environment::{InboundMessage, SessionEnvironment, Subscription};
use crate::vault::{AuthBackend, CallbackPayload, PollStatus, PollTarget};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{Instant, sleep_until, timeout_at},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

#[derive(Debug)]
pub struct ResultChannel {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    result: Option<oneshot::Receiver<CallbackResult>>,
}

impl ResultChannel {
    /// Listen for the provider callback message. `timeout` bounds the wait in addition to
    /// the popup watcher.
    #[must_use]
    pub fn messages(
        environment: &dyn SessionEnvironment,
        timeout: Option<Duration>,
        parent: &CancellationToken,
    ) -> Self {
        let subscription = environment.subscribe_messages();
        let origin = environment.origin();
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        Self::spawn(parent, |cancel, tx| {
            listen(subscription, origin, deadline, cancel, tx)
        })
    }

    /// Poll Vault for the token under `policy`.
    #[must_use]
    pub fn polling(
        backend: Arc<dyn AuthBackend>,
        target: PollTarget,
        policy: PollPolicy,
        parent: &CancellationToken,
    ) -> Self {
        Self::spawn(parent, |cancel, tx| poll(backend, target, policy, cancel, tx))
    }

    fn spawn<F, Fut>(parent: &CancellationToken, run: F) -> Self
    where
        F: FnOnce(CancellationToken, oneshot::Sender<CallbackResult>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = parent.child_token();
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(run(cancel.clone(), tx));

        Self {
            cancel,
            task: Some(task),
            result: Some(rx),
        }
    }

    /// The single result of this channel. `None` once it was taken or the channel stopped
    /// without producing one.
    pub async fn next(&mut self) -> Option<CallbackResult> {
        let rx = self.result.as_mut()?;
        let result = rx.await.ok();
        self.result = None;
        result
    }

    /// Stop the channel and wait until its listeners and timers are released. Idempotent.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        self.result = None;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for ResultChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn emit(cancel: &CancellationToken, tx: oneshot::Sender<CallbackResult>, result: CallbackResult) {
    if cancel.is_cancelled() {
        trace!("channel stopped, dropping late result");
        return;
    }
    let _ = tx.send(result);
}

async fn listen(
    mut messages: Subscription<InboundMessage>,
    origin: String,
    deadline: Option<Instant>,
    cancel: CancellationToken,
    tx: oneshot::Sender<CallbackResult>,
) {
    let expired = async {
        match deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(expired);

    let result = loop {
        let message = tokio::select! {
            biased;
            () = cancel.cancelled() => break None,
            () = &mut expired => {
                warn!("no provider callback before the deadline");
                break Some(CallbackResult::Timeout);
            }
            message = messages.recv() => message,
        };

        let Some(message) = message else {
            break None;
        };

        match parse_callback(&origin, &message) {
            Some(result) => break Some(result),
            None => trace!(origin = %message.origin, "ignoring message"),
        }
    };

    messages.unsubscribe();

    if let Some(result) = result {
        emit(&cancel, tx, result);
    }
}

/// Turn an inbound message into a result. `None` means the message is not a callback
/// from our own origin and must be ignored.
pub(crate) fn parse_callback(origin: &str, message: &InboundMessage) -> Option<CallbackResult> {
    if message.origin != origin || !message.trusted || !message.is_callback() {
        return None;
    }

    let field = |name: &str| {
        message
            .data
            .get(name)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    };

    if let Some(error) = field("error") {
        return Some(CallbackResult::ProviderError(error.to_string()));
    }

    match (field("path"), field("state"), field("code")) {
        (Some(path), Some(state), Some(code)) => {
            Some(CallbackResult::Success(Credential::Code(CallbackPayload {
                path: path.to_string(),
                state: state.to_string(),
                code: code.to_string(),
            })))
        }
        _ => Some(CallbackResult::MissingParams),
    }
}

async fn poll(
    backend: Arc<dyn AuthBackend>,
    target: PollTarget,
    policy: PollPolicy,
    cancel: CancellationToken,
    tx: oneshot::Sender<CallbackResult>,
) {
    let deadline = Instant::now() + policy.timeout;
    let mut attempts: u32 = 0;

    let result = loop {
        if Instant::now() >= deadline {
            warn!(attempts, "SAML token not ready before the deadline");
            break Some(CallbackResult::Timeout);
        }

        attempts += 1;
        let answer = tokio::select! {
            biased;
            () = cancel.cancelled() => break None,
            answer = timeout_at(deadline, backend.poll_for_token(&target)) => answer,
        };

        match answer {
            Err(_) => {
                warn!(attempts, "SAML token poll still running at the deadline");
                break Some(CallbackResult::Timeout);
            }
            Ok(Ok(PollStatus::Ready(login))) => {
                debug!(attempts, "SAML token ready");
                break Some(CallbackResult::Success(Credential::Login(login)));
            }
            Ok(Ok(PollStatus::NotReady)) => {
                trace!(attempts, "SAML token not ready");
            }
            Ok(Err(e)) => {
                warn!(attempts, "SAML token poll failed: {}", e);
                break Some(CallbackResult::ProviderError(e.to_string()));
            }
        }

        if attempts >= policy.max_attempts {
            warn!(attempts, "SAML token not ready after the last attempt");
            break Some(CallbackResult::Timeout);
        }

        let wake = deadline.min(Instant::now() + policy.interval);
        tokio::select! {
            biased;
            () = cancel.cancelled() => break None,
            () = sleep_until(wake) => {}
        }
    };

    if let Some(result) = result {
        emit(&cancel, tx, result);
    }
}
