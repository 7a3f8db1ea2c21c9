//! Terminal environment: the provider "window" is the user's browser and the callback
//! arrives on a loopback HTTP listener.
//!
//! The listener serves `GET /oidc/callback`. Each request is turned into a trusted,
//! same-origin callback message and fanned out to message subscribers, which is the
//! same shape a browser bridge would deliver through `postMessage`. The terminal cannot
//! observe the browser tab, so the window handle reports closed only after `close()`.

use super::{
    CALLBACK_SOURCE, EnvironmentError, InboundMessage, Listeners, PopupFeatures,
    SessionEnvironment, Subscription, WindowHandle,
};
use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::{net::TcpListener, sync::watch};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use url::Url;

pub const CALLBACK_ROUTE: &str = "/oidc/callback";

const PAGE_SUCCESS: &str = "<!DOCTYPE html><html><head><title>vault-sso</title></head>\
<body><h2>Login complete</h2>\
<p>You can close this window and return to the terminal.</p></body></html>";

const PAGE_ERROR: &str = "<!DOCTYPE html><html><head><title>vault-sso</title></head>\
<body><h2>Login failed</h2>\
<p>The identity provider returned an error. Check the terminal for details.</p></body></html>";

#[derive(Debug, Default)]
struct LocalWindow {
    closed: AtomicBool,
}

impl WindowHandle for LocalWindow {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Clone)]
struct CallbackState {
    origin: String,
    mount_path: String,
    messages: Listeners<InboundMessage>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    state: Option<String>,
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

pub struct LocalEnvironment {
    origin: String,
    messages: Listeners<InboundMessage>,
    unload: Listeners<()>,
    opened: watch::Sender<Option<String>>,
    shutdown: CancellationToken,
}

impl LocalEnvironment {
    /// Bind the callback listener and start serving it.
    ///
    /// `public_host` is the host name used in the origin and redirect URI (the role's
    /// `allowed_redirect_uris` must list it verbatim).
    ///
    /// # Errors
    /// Returns `EnvironmentError::Listener` if the address cannot be bound.
    pub async fn bind(
        listen: SocketAddr,
        public_host: &str,
        mount_path: &str,
    ) -> Result<Self, EnvironmentError> {
        let listener = TcpListener::bind(listen)
            .await
            .map_err(|e| EnvironmentError::Listener(format!("{listen}: {e}")))?;

        let port = listener
            .local_addr()
            .map_err(|e| EnvironmentError::Listener(e.to_string()))?
            .port();

        let origin = format!("http://{public_host}:{port}");
        let messages = Listeners::default();
        let unload = Listeners::default();
        let shutdown = CancellationToken::new();

        let app = router(CallbackState {
            origin: origin.clone(),
            mount_path: mount_path.trim_matches('/').to_string(),
            messages: messages.clone(),
        });

        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await
            {
                error!("callback listener stopped: {}", e);
            }
        });

        let signal_shutdown = shutdown.clone();
        let signal_unload = unload.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = signal_shutdown.cancelled() => {}
                result = tokio::signal::ctrl_c() => {
                    if result.is_ok() {
                        debug!("interrupt received, notifying unload listeners");
                        signal_unload.dispatch(&());
                    }
                }
            }
        });

        info!("callback listener on {}", origin);

        Ok(Self {
            origin,
            messages,
            unload,
            opened: watch::Sender::new(None),
            shutdown,
        })
    }

    /// Redirect URI to register on the OIDC role.
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!("{}{CALLBACK_ROUTE}", self.origin)
    }

    /// Receives the provider URL each time a window is opened.
    #[must_use]
    pub fn opened(&self) -> watch::Receiver<Option<String>> {
        self.opened.subscribe()
    }

    #[must_use]
    pub fn message_listeners(&self) -> usize {
        self.messages.len()
    }

    /// Stop the callback listener.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for LocalEnvironment {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl SessionEnvironment for LocalEnvironment {
    fn origin(&self) -> String {
        self.origin.clone()
    }

    fn open(
        &self,
        url: &str,
        features: PopupFeatures,
    ) -> Result<Arc<dyn WindowHandle>, EnvironmentError> {
        let url = Url::parse(url).map_err(|e| EnvironmentError::InvalidUrl(e.to_string()))?;

        if self.shutdown.is_cancelled() {
            return Err(EnvironmentError::PopupBlocked(
                "callback listener is not running".to_string(),
            ));
        }

        debug!("opening provider window ({})", features.to_feature_string());
        self.opened.send_replace(Some(url.to_string()));

        Ok(Arc::new(LocalWindow::default()))
    }

    fn subscribe_messages(&self) -> Subscription<InboundMessage> {
        self.messages.subscribe()
    }

    fn subscribe_unload(&self) -> Subscription<()> {
        self.unload.subscribe()
    }
}

fn router(state: CallbackState) -> Router {
    Router::new()
        .route(CALLBACK_ROUTE, get(callback))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

// axum handler for the provider redirect
async fn callback(
    State(state): State<Arc<CallbackState>>,
    Query(query): Query<CallbackQuery>,
) -> impl IntoResponse {
    let mut data = Map::new();
    data.insert("source".into(), Value::from(CALLBACK_SOURCE));
    data.insert("path".into(), Value::from(state.mount_path.as_str()));

    if let Some(value) = query.state {
        data.insert("state".into(), Value::from(value));
    }
    if let Some(value) = query.code {
        data.insert("code".into(), Value::from(value));
    }

    let failed = query.error.is_some();
    if let Some(error) = query.error {
        let detail = match query.error_description {
            Some(description) if !description.is_empty() => format!("{error}: {description}"),
            _ => error,
        };
        data.insert("error".into(), Value::from(detail));
    }

    let message = InboundMessage {
        origin: state.origin.clone(),
        trusted: true,
        data: Value::Object(data),
    };

    if state.messages.dispatch(&message) == 0 {
        warn!("provider callback received with no login in progress");
        return (
            StatusCode::CONFLICT,
            Html("<!DOCTYPE html><html><body><h2>No login in progress</h2></body></html>"),
        );
    }

    if failed {
        (StatusCode::OK, Html(PAGE_ERROR))
    } else {
        (StatusCode::OK, Html(PAGE_SUCCESS))
    }
}
