//! Host primitives used by the handshake.
//!
//! The handshake never touches a real browser. Everything it needs from the host (open a
//! window, watch it, receive callback messages, learn that the host is going away) goes
//! through [`SessionEnvironment`]. Subscriptions hand back an explicit [`Subscription`]
//! whose `unsubscribe` detaches the listener; dropping it does the same.
//!
//! Security boundary: only messages that are same-origin, trusted, and tagged with
//! [`CALLBACK_SOURCE`] are ever treated as provider callbacks. Environments report what
//! they observed in [`InboundMessage`] and leave the filtering to the result channel.

pub mod local;
pub use self::local::LocalEnvironment;

use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};
use thiserror::Error;
use tokio::sync::mpsc;

/// Tag carried by provider callback payloads.
pub const CALLBACK_SOURCE: &str = "oidc-callback";

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("popup blocked: {0}")]
    PopupBlocked(String),
    #[error("invalid provider URL: {0}")]
    InvalidUrl(String),
    #[error("callback listener failed: {0}")]
    Listener(String),
}

/// Handle to an external window.
pub trait WindowHandle: Send + Sync {
    fn is_closed(&self) -> bool;

    /// Request the window to close. Closing an already closed window is a no-op.
    fn close(&self);
}

/// A message as observed by the host, before any filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub origin: String,
    pub trusted: bool,
    pub data: Value,
}

impl InboundMessage {
    #[must_use]
    pub fn is_callback(&self) -> bool {
        self.data.get("source").and_then(Value::as_str) == Some(CALLBACK_SOURCE)
    }
}

/// Position and size of the host window on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostGeometry {
    pub screen_x: i32,
    pub screen_y: i32,
    pub outer_width: u32,
    pub outer_height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupFeatures {
    pub width: u32,
    pub height: u32,
    pub left: i32,
    pub top: i32,
}

impl PopupFeatures {
    /// Fixed client area centered on the host window, or at the screen origin when the
    /// host geometry is unknown.
    #[must_use]
    pub fn centered(width: u32, height: u32, host: Option<HostGeometry>) -> Self {
        let (left, top) = host.map_or((0, 0), |host| {
            (
                host.screen_x + half(host.outer_width) - half(width),
                host.screen_y + half(host.outer_height) - half(height),
            )
        });

        Self {
            width,
            height,
            left,
            top,
        }
    }

    /// `window.open` feature string.
    #[must_use]
    pub fn to_feature_string(&self) -> String {
        format!(
            "width={},height={},resizable,scrollbars=yes,top={},left={}",
            self.width, self.height, self.top, self.left
        )
    }
}

fn half(value: u32) -> i32 {
    i32::try_from(value / 2).unwrap_or(i32::MAX)
}

/// The injected host environment.
pub trait SessionEnvironment: Send + Sync {
    /// Origin of the host page, e.g. `https://vault.example.com:8200`.
    fn origin(&self) -> String;

    fn host_geometry(&self) -> Option<HostGeometry> {
        None
    }

    /// Open the provider window.
    ///
    /// # Errors
    /// Returns `EnvironmentError` if the window cannot be opened.
    fn open(
        &self,
        url: &str,
        features: PopupFeatures,
    ) -> Result<Arc<dyn WindowHandle>, EnvironmentError>;

    fn subscribe_messages(&self) -> Subscription<InboundMessage>;

    /// Fires once the host is about to unload (navigation, reload, tab close, Ctrl-C).
    fn subscribe_unload(&self) -> Subscription<()>;
}

/// A live listener registration.
pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl<T> Subscription<T> {
    pub fn new(
        receiver: mpsc::UnboundedReceiver<T>,
        unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            receiver,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Wait for the next event. Returns `None` once unsubscribed or when the source is gone.
    pub async fn recv(&mut self) -> Option<T> {
        if self.unsubscribe.is_none() {
            return None;
        }
        self.receiver.recv().await
    }

    /// Detach the listener. Safe to call any number of times.
    pub fn unsubscribe(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
            self.receiver.close();
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.unsubscribe.is_some()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Fan-out registry backing [`Subscription`]s.
pub struct Listeners<T> {
    next_id: Arc<AtomicU64>,
    senders: Arc<Mutex<HashMap<u64, mpsc::UnboundedSender<T>>>>,
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            next_id: Arc::clone(&self.next_id),
            senders: Arc::clone(&self.senders),
        }
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(0)),
            senders: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T: Clone + Send + 'static> Listeners<T> {
    #[must_use]
    pub fn subscribe(&self) -> Subscription<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);

        let senders = Arc::clone(&self.senders);
        Subscription::new(rx, move || {
            senders
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
        })
    }

    /// Deliver `event` to every live listener, returns how many received it.
    pub fn dispatch(&self, event: &T) -> usize {
        let senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders
            .values()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
