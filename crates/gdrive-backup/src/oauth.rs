//! Loopback redirect listener for the OAuth installed-app flow.
//!
//! Implements:
//! - GET / - receives `code`, `state` or `error` from the consent page

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use reqwest::Url;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::token_manager::ClientConfig;

/// Consent page URL for the given client, scope and redirect.
pub fn authorization_url(
    client: &ClientConfig,
    scope: &str,
    redirect_uri: &str,
    state: &str,
) -> anyhow::Result<Url> {
    let url = Url::parse_with_params(
        &client.auth_uri,
        &[
            ("response_type", "code"),
            ("client_id", client.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("scope", scope),
            ("state", state),
            ("access_type", "offline"),
            ("prompt", "consent"),
        ],
    )?;
    Ok(url)
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

type CodeSender = Arc<Mutex<Option<oneshot::Sender<anyhow::Result<String>>>>>;

#[derive(Clone)]
struct CallbackState {
    expected_state: String,
    sender: CodeSender,
}

/// A bound `127.0.0.1` listener waiting for the consent redirect.
pub struct LoopbackReceiver {
    listener: TcpListener,
    redirect_uri: String,
}

impl LoopbackReceiver {
    /// Bind an ephemeral port on the loopback interface.
    pub async fn bind() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            redirect_uri: format!("http://127.0.0.1:{}/", port),
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Serve until one redirect arrives and return its authorization code.
    ///
    /// Fails when the consent was denied, the `state` does not match, or
    /// nothing arrives within `timeout`.
    pub async fn wait_for_code(self, state: &str, timeout: Duration) -> anyhow::Result<String> {
        let (tx, rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let app = Router::new()
            .route("/", get(callback_handler))
            .with_state(CallbackState {
                expected_state: state.to_string(),
                sender: Arc::new(Mutex::new(Some(tx))),
            });

        let listener = self.listener;
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        let result = tokio::time::timeout(timeout, rx).await;
        let _ = shutdown_tx.send(());
        if let Err(e) = server.await {
            warn!("Loopback listener task failed: {}", e);
        }

        match result {
            Ok(Ok(code)) => code,
            Ok(Err(_)) => anyhow::bail!("authorization listener closed before a redirect arrived"),
            Err(_) => anyhow::bail!("timed out after {:?} waiting for authorization", timeout),
        }
    }
}

async fn callback_handler(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    debug!("Authorization redirect received");

    let outcome = match params {
        CallbackParams {
            error: Some(error), ..
        } => Err(anyhow::anyhow!("authorization denied: {}", error)),
        CallbackParams {
            state: Some(got), ..
        } if got != state.expected_state => {
            Err(anyhow::anyhow!("authorization state mismatch"))
        }
        CallbackParams {
            code: Some(code),
            state: Some(_),
            ..
        } => Ok(code),
        _ => Err(anyhow::anyhow!("authorization redirect carried no code")),
    };

    let page = if outcome.is_ok() {
        "<html><body>Authorization complete. You may close this window.</body></html>"
    } else {
        "<html><body>Authorization failed. Check the terminal for details.</body></html>"
    };

    let sender = state.sender.lock().ok().and_then(|mut guard| guard.take());
    if let Some(sender) = sender {
        let _ = sender.send(outcome);
    }
    Html(page)
}
