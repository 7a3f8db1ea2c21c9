use super::session::WindowView;
use crate::environment::SessionEnvironment;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Closes the provider window when the host is about to unload. Best effort: it never
/// reports to the controller.
#[derive(Debug)]
pub struct OriginWatcher {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl OriginWatcher {
    #[must_use]
    pub fn start(
        environment: &dyn SessionEnvironment,
        view: WindowView,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let mut unload = environment.subscribe_unload();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                event = unload.recv() => {
                    if event.is_some() {
                        debug!("host unloading, closing provider window");
                        view.request_close();
                    }
                }
            }
            unload.unsubscribe();
        });

        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Stop watching and release the unload subscription. Idempotent.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for OriginWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
