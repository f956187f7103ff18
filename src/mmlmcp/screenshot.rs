//! Screenshots of MML objects.
//!
//! [`ScreenshotService`] owns a small viewer page server and a [`ScreenshotBackend`] that drives
//! a browser. `initialize` starts both; `take_screenshot` points the backend at
//! `/screenshot/<id>`, which loads the MML web client against `/mml?id=<id>`; `cleanup` releases
//! both. Captures are serialized and the backend is always reset afterwards, so one failed
//! capture never leaks into the next.
//!
//! ```text
//! GET /                  hint page
//! GET /screenshot/{id}   page loading /client/index.js for /mml?id={id}
//! GET /mml?id={id}       raw MML source of the object
//! GET /client/*          MML web client bundle
//! ```

use crate::mmlmcp::clients::MmlObjectApi;
use crate::mmlmcp::http_server::RunningServer;
use async_trait::async_trait;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;
use tower_http::services::ServeDir;

#[derive(Error, Debug)]
pub enum ScreenshotError {
    #[error("ScreenshotService not initialized. Call initialize() first.")]
    NotInitialized,

    #[error("Screenshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Browser error: {0}")]
    Backend(String),

    #[error("Timed out after {0:?} waiting for the browser")]
    Timeout(Duration),
}

pub type ScreenshotResult<T> = Result<T, ScreenshotError>;

/// Browser automation used by [`ScreenshotService`].
#[async_trait]
pub trait ScreenshotBackend: Send + Sync {
    /// Start the browser. Called once per `initialize`.
    async fn launch(&mut self) -> ScreenshotResult<()>;

    /// Load `url`, wait for the scene to settle and return one PNG frame.
    async fn capture(&mut self, url: &str) -> ScreenshotResult<Vec<u8>>;

    /// Return the rendering surface to a blank page.
    async fn reset(&mut self) -> ScreenshotResult<()>;

    async fn close(&mut self) -> ScreenshotResult<()>;
}

#[derive(Clone)]
struct ViewerState {
    objects: Arc<dyn MmlObjectApi>,
    port: u16,
}

/// Router for the viewer page server. `client_dir` holds the MML web client bundle.
pub fn viewer_router(objects: Arc<dyn MmlObjectApi>, port: u16, client_dir: PathBuf) -> Router {
    Router::new()
        .route("/", get(|| async { Html("<!DOCTYPE html><html>add an ID URL param</html>") }))
        .route("/screenshot/{id}", get(screenshot_page))
        .route("/mml", get(mml_source))
        .nest_service("/client", ServeDir::new(client_dir))
        .layer(crate::mmlmcp::http_server::cors_layer())
        .with_state(ViewerState { objects, port })
}

async fn screenshot_page(
    State(state): State<ViewerState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Html<String> {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| format!("localhost:{}", state.port));
    let mml_url = format!(
        "http://localhost:{}/mml?id={}",
        state.port,
        urlencoding::encode(&id)
    );
    Html(format!(
        r#"<html><script src="http://{}/client/index.js?defineGlobals=true&url={}"></script></html>"#,
        host, mml_url
    ))
}

async fn mml_source(
    State(state): State<ViewerState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let id = params.get("id").cloned().unwrap_or_default();
    match state.objects.get_object(&id).await {
        Ok(Some(object)) => object.source.text().to_string().into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, format!("MML Object not found: {}", id)).into_response(),
        Err(e) => {
            log::warn!("Failed to fetch MML object {}: {}", id, e);
            (StatusCode::NOT_FOUND, format!("MML Object not found: {}", id)).into_response()
        }
    }
}

struct Running {
    server: RunningServer,
}

struct ServiceState {
    backend: Box<dyn ScreenshotBackend>,
    running: Option<Running>,
}

pub struct ScreenshotService {
    objects: Arc<dyn MmlObjectApi>,
    port: u16,
    client_dir: PathBuf,
    state: Mutex<ServiceState>,
}

impl ScreenshotService {
    /// `port` 0 picks an ephemeral port for the viewer page server.
    pub fn new(
        objects: Arc<dyn MmlObjectApi>,
        backend: Box<dyn ScreenshotBackend>,
        port: u16,
        client_dir: PathBuf,
    ) -> Self {
        Self {
            objects,
            port,
            client_dir,
            state: Mutex::new(ServiceState {
                backend,
                running: None,
            }),
        }
    }

    /// Start the viewer server and launch the browser. Calling it again is a no-op.
    pub async fn initialize(&self) -> ScreenshotResult<()> {
        let mut state = self.state.lock().await;
        if state.running.is_some() {
            return Ok(());
        }

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", self.port)).await?;
        let port = listener.local_addr()?.port();
        let app = viewer_router(self.objects.clone(), port, self.client_dir.clone());
        let server = RunningServer::serve(listener, app);
        log::info!("Screenshot viewer at {}", server.url());

        if let Err(e) = state.backend.launch().await {
            log::error!("Failed to launch screenshot browser: {}", e);
            server.shutdown().await;
            return Err(e);
        }
        state.running = Some(Running { server });
        Ok(())
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.running.is_some()
    }

    /// Base URL of the viewer page server while initialized.
    pub async fn url(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .running
            .as_ref()
            .map(|r| r.server.url())
    }

    /// Capture one PNG of an object. The browser is reset afterwards whether or not the
    /// capture succeeded.
    pub async fn take_screenshot(&self, object_id: &str) -> ScreenshotResult<Vec<u8>> {
        let mut state = self.state.lock().await;
        let url = match &state.running {
            Some(running) => format!(
                "{}/screenshot/{}",
                running.server.url(),
                urlencoding::encode(object_id)
            ),
            None => return Err(ScreenshotError::NotInitialized),
        };

        log::info!("Capturing screenshot of {}", object_id);
        let captured = state.backend.capture(&url).await;
        if let Err(e) = state.backend.reset().await {
            log::warn!("Failed to reset browser after capturing {}: {}", object_id, e);
        }
        match &captured {
            Ok(png) => log::debug!("Captured {} bytes for {}", png.len(), object_id),
            Err(e) => log::error!("Screenshot of {} failed: {}", object_id, e),
        }
        captured
    }

    /// Close the browser and stop the viewer server. Safe to call when not initialized.
    pub async fn cleanup(&self) {
        let mut state = self.state.lock().await;
        let Some(running) = state.running.take() else {
            return;
        };
        log::info!("Cleaning up screenshot service");
        if let Err(e) = state.backend.close().await {
            log::warn!("Failed to close screenshot browser: {}", e);
        }
        running.server.shutdown().await;
    }
}

/// Shells out to a headless Chromium for every capture.
///
/// Each capture is a fresh browser process, so `reset` has nothing to clear; scene settling is
/// bounded by Chromium's virtual time budget.
pub struct HeadlessChromeBackend {
    browser: String,
    window_size: (u32, u32),
    settle: Duration,
    timeout: Duration,
    launched: bool,
}

impl HeadlessChromeBackend {
    pub fn new(browser: impl Into<String>) -> Self {
        Self {
            browser: browser.into(),
            window_size: (1024, 768),
            settle: Duration::from_secs(3),
            timeout: Duration::from_secs(45),
            launched: false,
        }
    }

    pub fn with_window_size(mut self, width: u32, height: u32) -> Self {
        self.window_size = (width, height);
        self
    }

    /// How long the page may run before the frame is taken.
    pub fn with_settle_time(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            "--headless".to_string(),
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-web-security".to_string(),
            "--use-gl=swiftshader".to_string(),
            "--enable-webgl".to_string(),
            "--hide-scrollbars".to_string(),
            "--no-first-run".to_string(),
            "--no-default-browser-check".to_string(),
            format!("--window-size={},{}", self.window_size.0, self.window_size.1),
        ]
    }
}

#[async_trait]
impl ScreenshotBackend for HeadlessChromeBackend {
    async fn launch(&mut self) -> ScreenshotResult<()> {
        let output = Command::new(&self.browser)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ScreenshotError::Backend(format!("cannot run {}: {}", self.browser, e)))?;
        if !output.status.success() {
            return Err(ScreenshotError::Backend(format!(
                "{} --version exited with {}",
                self.browser, output.status
            )));
        }
        log::info!(
            "Using {}",
            String::from_utf8_lossy(&output.stdout).trim()
        );
        self.launched = true;
        Ok(())
    }

    async fn capture(&mut self, url: &str) -> ScreenshotResult<Vec<u8>> {
        if !self.launched {
            return Err(ScreenshotError::NotInitialized);
        }
        let target = std::env::temp_dir().join(format!("mml-screenshot-{}.png", uuid::Uuid::new_v4()));

        let mut command = Command::new(&self.browser);
        command
            .args(self.base_args())
            .arg(format!("--virtual-time-budget={}", self.settle.as_millis()))
            .arg(format!("--screenshot={}", target.display()))
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| ScreenshotError::Timeout(self.timeout))??;
        if !output.status.success() {
            let _ = tokio::fs::remove_file(&target).await;
            return Err(ScreenshotError::Backend(format!(
                "browser exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let png = tokio::fs::read(&target).await;
        let _ = tokio::fs::remove_file(&target).await;
        Ok(png?)
    }

    async fn reset(&mut self) -> ScreenshotResult<()> {
        Ok(())
    }

    async fn close(&mut self) -> ScreenshotResult<()> {
        self.launched = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chrome_args_include_window_size() {
        let backend = HeadlessChromeBackend::new("chromium").with_window_size(800, 600);
        let args = backend.base_args();
        assert!(args.contains(&"--headless".to_string()));
        assert!(args.contains(&"--window-size=800,600".to_string()));
    }

    #[tokio::test]
    async fn test_capture_before_launch_fails_fast() {
        let mut backend = HeadlessChromeBackend::new("chromium");
        let err = backend.capture("http://localhost:1/").await.unwrap_err();
        assert!(matches!(err, ScreenshotError::NotInitialized));
    }

    #[tokio::test]
    async fn test_launch_reports_missing_browser() {
        let mut backend = HeadlessChromeBackend::new("definitely-not-a-browser-binary");
        assert!(matches!(
            backend.launch().await,
            Err(ScreenshotError::Backend(_))
        ));
    }
}
