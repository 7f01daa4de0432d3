//! Loopback callback server
//!
//! A one-shot HTTP listener on the configured `callback_url` that receives
//! the authorization redirect from Keycloak. State validation is left to
//! [`KeycloakGuard::authenticate_callback`](crate::guard::KeycloakGuard::authenticate_callback).

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State},
    response::{Html, IntoResponse},
    routing::get,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info};
use url::Url;

use crate::{Error, Result};

/// Authorization redirect query parameters
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,

    /// State nonce echoed by Keycloak
    pub state: Option<String>,

    /// Error code
    pub error: Option<String>,

    /// Error description
    pub error_description: Option<String>,
}

/// Code and state received on the callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackResult {
    /// Authorization code
    pub code: String,

    /// State nonce, empty when Keycloak sent none
    pub state: String,
}

type Reply = oneshot::Sender<Result<CallbackResult>>;

/// Bound, not yet serving, callback listener
pub struct CallbackServer {
    listener: TcpListener,
    path: String,
}

impl CallbackServer {
    /// Bind to the loopback port named by `callback_url`.
    /// Only `localhost` and `127.0.0.1` callbacks can be served.
    pub async fn bind(callback_url: &str) -> Result<Self> {
        let url = Url::parse(callback_url)
            .map_err(|e| Error::Config(format!("Invalid callback_url '{callback_url}': {e}")))?;

        match url.host_str() {
            Some("localhost" | "127.0.0.1") => {}
            _ => {
                return Err(Error::Config(format!(
                    "callback_url must point at localhost to receive the code: {callback_url}"
                )));
            }
        }

        let port = url.port_or_known_default().unwrap_or(80);
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind callback server: {e}")))?;

        Ok(Self {
            listener,
            path: url.path().to_string(),
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| Error::Internal(format!("Failed to get callback server address: {e}")))
    }

    /// Serve until the first redirect arrives or `timeout` elapses
    pub async fn wait(self, timeout: Duration) -> Result<CallbackResult> {
        let addr = self.local_addr()?;
        let Self { listener, path } = self;
        info!(addr = %addr, path = %path, "Callback server listening");

        let (tx, rx) = oneshot::channel();
        let reply = Arc::new(Mutex::new(Some(tx)));

        let app = Router::new()
            .route(&path, get(handle_callback))
            .with_state(reply);

        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .map_err(|e| Error::Internal(format!("Callback server error: {e}")))
        });

        let result = tokio::time::timeout(timeout, rx).await;
        server.abort();

        match result {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Internal(
                "Callback channel closed unexpectedly".to_string(),
            )),
            Err(_) => Err(Error::Transport(format!(
                "No authorization callback within {}s",
                timeout.as_secs()
            ))),
        }
    }
}

async fn handle_callback(
    State(reply): State<Arc<Mutex<Option<Reply>>>>,
    Query(params): Query<CallbackParams>,
) -> impl IntoResponse {
    debug!(?params, "Received authorization callback");

    let (result, page) = match params {
        CallbackParams {
            error: Some(error),
            error_description,
            ..
        } => {
            let description = error_description.unwrap_or_else(|| "Unknown error".to_string());
            let page = error_page(&error, &description);
            (
                Err(Error::Transport(format!(
                    "Authorization failed: {error} - {description}"
                ))),
                page,
            )
        }
        CallbackParams { code: None, .. } => (
            Err(Error::Transport("Missing authorization code".to_string())),
            error_page("missing_code", "Authorization code not provided"),
        ),
        CallbackParams {
            code: Some(code),
            state,
            ..
        } => (
            Ok(CallbackResult {
                code,
                state: state.unwrap_or_default(),
            }),
            success_page(),
        ),
    };

    if let Some(tx) = reply.lock().await.take() {
        let _ = tx.send(result);
    }

    Html(page)
}

fn success_page() -> String {
    r#"<!DOCTYPE html>
<html>
<head><title>Signed in</title></head>
<body style="font-family: sans-serif; text-align: center; margin-top: 20vh">
    <h1>Signed in</h1>
    <p>You can close this window and return to the terminal.</p>
    <script>setTimeout(() => window.close(), 3000);</script>
</body>
</html>"#
        .to_string()
}

fn error_page(error: &str, description: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Sign-in failed</title></head>
<body style="font-family: sans-serif; text-align: center; margin-top: 20vh">
    <h1>Sign-in failed</h1>
    <p>{description}</p>
    <p style="font-family: monospace; opacity: 0.7">Error: {error}</p>
</body>
</html>"#
    )
}
