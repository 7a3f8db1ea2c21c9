//! The opened provider window and the restricted view watchers get of it.
//!
//! `ProviderSession` owns the window handle. Watchers get a `WindowView` that can query
//! the closed state and request a close through a shared slot; closing the session
//! empties the slot, so every view goes inert at the same moment.

use crate::environment::WindowHandle;
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};
use tracing::debug;

type Slot = Arc<Mutex<Option<Arc<dyn WindowHandle>>>>;

fn lock(slot: &Slot) -> MutexGuard<'_, Option<Arc<dyn WindowHandle>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ProviderSession {
    slot: Slot,
    opened_at: Instant,
}

impl ProviderSession {
    #[must_use]
    pub fn new(handle: Arc<dyn WindowHandle>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(handle))),
            opened_at: Instant::now(),
        }
    }

    #[must_use]
    pub const fn opened_at(&self) -> Instant {
        self.opened_at
    }

    #[must_use]
    pub fn view(&self) -> WindowView {
        WindowView {
            slot: Arc::clone(&self.slot),
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        lock(&self.slot)
            .as_ref()
            .is_some_and(|handle| !handle.is_closed())
    }

    /// Close the window if still open and detach every view. Idempotent.
    pub fn close(&mut self) {
        let handle = lock(&self.slot).take();

        if let Some(handle) = handle
            && !handle.is_closed()
        {
            debug!(
                "closing provider window after {:?}",
                self.opened_at.elapsed()
            );
            handle.close();
        }
    }
}

impl Drop for ProviderSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ProviderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSession")
            .field("open", &self.is_open())
            .field("opened_at", &self.opened_at)
            .finish()
    }
}

/// Capability view: query closed state, request close.
#[derive(Clone)]
pub struct WindowView {
    slot: Slot,
}

impl WindowView {
    /// `None` once the owning session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> Option<bool> {
        let handle = lock(&self.slot).clone();
        handle.map(|handle| handle.is_closed())
    }

    /// Ask the window to close. No-op once the owning session is gone.
    pub fn request_close(&self) {
        let handle = lock(&self.slot).clone();
        if let Some(handle) = handle {
            handle.close();
        }
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        lock(&self.slot).is_some()
    }
}

impl std::fmt::Debug for WindowView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowView")
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeWindow;

    #[test]
    fn test_view_goes_inert_after_close() {
        let window = Arc::new(FakeWindow::default());
        let mut session = ProviderSession::new(window.clone());
        let view = session.view();

        assert_eq!(view.is_closed(), Some(false));
        assert!(session.is_open());

        session.close();
        assert!(window.is_closed());
        assert_eq!(window.close_calls(), 1);
        assert_eq!(view.is_closed(), None);

        // idempotent, and the stale view cannot reach the window
        session.close();
        view.request_close();
        assert_eq!(window.close_calls(), 1);
    }

    #[test]
    fn test_close_skips_already_closed_window() {
        let window = Arc::new(FakeWindow::default());
        window.user_closes();
        let session = ProviderSession::new(window.clone());
        drop(session);
        assert_eq!(window.close_calls(), 0);
    }

    #[test]
    fn test_view_request_close() {
        let window = Arc::new(FakeWindow::default());
        let session = ProviderSession::new(window.clone());
        session.view().request_close();
        assert!(window.is_closed());
        assert!(!session.is_open());
    }
}
