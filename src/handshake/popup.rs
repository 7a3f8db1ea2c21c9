use super::session::WindowView;
use std::time::Duration;
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Checks the provider window on a fixed period and signals once when it is found closed.
#[derive(Debug)]
pub struct PopupWatcher {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    closed: Option<oneshot::Receiver<()>>,
}

impl PopupWatcher {
    /// Spawn the watcher. It stops on its own after signalling, when `parent` is cancelled,
    /// or when the view detaches from its session.
    #[must_use]
    pub fn start(view: WindowView, period: Duration, parent: &CancellationToken) -> Self {
        let cancel = parent.child_token();
        let (tx, rx) = oneshot::channel();

        let task = tokio::spawn(watch(view, period, cancel.clone(), tx));

        Self {
            cancel,
            task: Some(task),
            closed: Some(rx),
        }
    }

    /// Resolves `true` once the window has been observed closed, `false` if the watcher
    /// stopped without seeing it close. Resolves at most one `true` in total.
    pub async fn closed(&mut self) -> bool {
        let Some(rx) = self.closed.as_mut() else {
            return false;
        };
        let seen = rx.await.is_ok();
        self.closed = None;
        seen
    }

    /// Stop the watcher and wait for its task to finish. Idempotent.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        self.closed = None;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for PopupWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn watch(
    view: WindowView,
    period: Duration,
    cancel: CancellationToken,
    tx: oneshot::Sender<()>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        match view.is_closed() {
            Some(false) => {}
            Some(true) => {
                if !cancel.is_cancelled() {
                    debug!("provider window closed");
                    let _ = tx.send(());
                }
                return;
            }
            None => return,
        }
    }
}
