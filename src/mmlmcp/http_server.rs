//! Shared plumbing for the axum servers in this crate.
//!
//! Every server binds its own [`TcpListener`], reads back the bound address (so port `0` yields
//! an ephemeral port the caller can discover) and runs `axum::serve` on a spawned task. The
//! returned [`RunningServer`] owns the shutdown signal for that task.

use crate::mmlmcp::error::ApiError;
use axum::body::Bytes;
use axum::http::{header, HeaderName, Method};
use axum::Router;
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// How long [`RunningServer::shutdown`] waits for in-flight connections before aborting.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A bound, serving HTTP listener.
pub struct RunningServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl RunningServer {
    /// Bind `host:port` and serve `app` in the background.
    pub async fn bind(host: &str, port: u16, app: Router) -> std::io::Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        Ok(Self::serve(listener, app))
    }

    /// Serve `app` on an already-bound listener.
    ///
    /// Servers that need to know their own port before building routes bind first, then call
    /// this.
    pub fn serve(listener: TcpListener, app: Router) -> Self {
        let addr = listener
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 0)));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        log::info!("HTTP server listening on {}", addr);
        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            task,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// `http://localhost:<port>`
    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.addr.port())
    }

    /// Signal graceful shutdown and wait for the serve task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut self.task).await {
            Ok(Ok(Ok(()))) => log::info!("HTTP server on {} stopped", self.addr),
            Ok(Ok(Err(e))) => log::warn!("HTTP server on {} exited with error: {}", self.addr, e),
            Ok(Err(e)) => log::warn!("HTTP server task on {} failed: {}", self.addr, e),
            Err(_) => {
                log::warn!(
                    "HTTP server on {} did not drain within {:?}; aborting",
                    self.addr,
                    SHUTDOWN_GRACE
                );
                self.task.abort();
            }
        }
    }
}

/// Permissive CORS used by every local server.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static("mcp-session-id"),
            HeaderName::from_static("last-event-id"),
        ])
        .expose_headers([HeaderName::from_static("mcp-session-id")])
}

/// Request tracing outside, CORS inside. Shared by the object, world and MCP routers.
pub fn with_standard_layers<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer()),
    )
}

/// Decode a JSON request body, treating an empty body as `{}`.
///
/// Handlers take raw bytes instead of `axum::Json` so malformed input is reported with the
/// shared error envelope.
pub fn parse_json_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    let raw: &[u8] = if body.iter().all(|b| b.is_ascii_whitespace()) {
        b"{}"
    } else {
        body
    };
    serde_json::from_slice(raw).map_err(|e| ApiError::Validation(format!("Invalid JSON body: {}", e)))
}
