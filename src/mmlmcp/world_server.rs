//! The web world server: HTTP CRUD over [`WorldStorage`], viewer URL resolution and the game
//! client bundle.
//!
//! ```text
//! POST   /v1/worlds/{project}/web-world-instances        create
//! GET    /v1/worlds/{project}/web-world-instances        list (+ canWrite, tier)
//! GET    /v1/worlds/{project}/web-world-instances/{id}   get (+ canWrite, tier)
//! POST   /v1/worlds/{project}/web-world-instances/{id}   partial update
//! DELETE /v1/worlds/{project}/web-world-instances/{id}   delete
//! GET    /mml-websocket-url?id={worldId}                  text/plain WebSocket URL
//! GET    /game, /game/*                                   game client (index.html fallback)
//! GET    /health
//! ```
//!
//! `/mml-websocket-url` is resolved against the server's default project on every call, so a
//! world whose document is swapped is picked up by the next viewer that connects.

use crate::mmlmcp::error::{ApiError, ApiResult, StorageResult};
use crate::mmlmcp::http_server::{parse_json_body, with_standard_layers, RunningServer};
use crate::mmlmcp::object_server::list_query_from_params;
use crate::mmlmcp::object_storage::ListQuery;
use crate::mmlmcp::world_storage::{
    MmlDocumentsConfiguration, WebWorldInstance, WorldList, WorldRequest, WorldStorage,
};
use axum::body::Bytes;
use axum::extract::{OriginalUri, Path, Query, State};
use axum::handler::HandlerWithoutStateExt;
use axum::http::{header, Method, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;

/// Plan information attached to world reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldTier {
    pub name: String,
    pub max_worlds: u32,
    pub features: Vec<String>,
}

impl Default for WorldTier {
    fn default() -> Self {
        Self {
            name: "web-worlds-free-tier".to_string(),
            max_worlds: 100,
            features: vec![
                "Unlimited MML".to_string(),
                "Local Testing".to_string(),
                "Fast Iteration".to_string(),
            ],
        }
    }
}

/// `GET .../{id}` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldResponse {
    #[serde(flatten)]
    pub world: WebWorldInstance,
    pub can_write: bool,
    pub tier: WorldTier,
}

/// `GET ...` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldListResponse {
    #[serde(flatten)]
    pub list: WorldList,
    pub can_write: bool,
    pub tier: WorldTier,
}

/// The WebSocket URL a viewer should open for this document set, if the primary document has
/// one.
pub fn extract_websocket_url(config: &MmlDocumentsConfiguration) -> Option<&str> {
    let (key, document) = config.primary()?;
    let url = document.live_websocket_url();
    if url.is_none() {
        log::warn!("MML document {} does not reference a WebSocket URL", key);
    }
    url
}

pub struct WorldService {
    storage: WorldStorage,
    project_id: String,
    game_base: String,
    tier: WorldTier,
}

impl WorldService {
    /// `project_id` is the namespace `/mml-websocket-url` resolves against; `game_base` is the
    /// `http://host:port` prefix of the game client.
    pub fn new(storage: WorldStorage, project_id: impl Into<String>, game_base: impl Into<String>) -> Self {
        Self {
            storage,
            project_id: project_id.into(),
            game_base: game_base.into(),
            tier: WorldTier::default(),
        }
    }

    pub fn storage(&self) -> &WorldStorage {
        &self.storage
    }

    pub fn tier(&self) -> &WorldTier {
        &self.tier
    }

    /// `<game base>/game?id=<world id>`
    pub fn game_url(&self, world_id: &str) -> String {
        format!("{}/game?id={}", self.game_base, world_id)
    }

    /// Validate and create. The primary document must resolve to a WebSocket URL.
    pub async fn create(&self, project_id: &str, request: &WorldRequest) -> ApiResult<WebWorldInstance> {
        let has_name = request.name.as_deref().map_or(false, |n| !n.is_empty());
        let documents = match &request.mml_documents_configuration {
            Some(documents) if has_name => documents,
            _ => {
                return Err(ApiError::Validation(
                    "Name and MML Documents are required".to_string(),
                ))
            }
        };
        if extract_websocket_url(documents).is_none() {
            return Err(ApiError::Validation(
                "MML document URL is not a WebSocket URL".to_string(),
            ));
        }

        let id = request
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let world = self.storage.create_world(project_id, &id, request).await?;
        log::info!("Web world available at {}", self.game_url(&id));
        Ok(world)
    }

    pub async fn get(&self, project_id: &str, id: &str) -> StorageResult<Option<WebWorldInstance>> {
        self.storage.get_world(project_id, id).await
    }

    pub async fn update(
        &self,
        project_id: &str,
        id: &str,
        request: &WorldRequest,
    ) -> StorageResult<Option<WebWorldInstance>> {
        self.storage.update_world(project_id, id, request).await
    }

    pub async fn delete(&self, project_id: &str, id: &str) -> StorageResult<bool> {
        self.storage.delete_world(project_id, id).await
    }

    pub async fn list(&self, project_id: &str, query: &ListQuery) -> StorageResult<WorldList> {
        self.storage.list_worlds(project_id, query).await
    }

    /// Resolve the live WebSocket URL of a world in the default project.
    pub async fn resolve_websocket_url(&self, world_id: &str) -> Result<String, UrlLookupError> {
        if world_id.is_empty() {
            return Err(UrlLookupError::MissingId);
        }
        let world = self
            .storage
            .get_world(&self.project_id, world_id)
            .await
            .map_err(|e| {
                log::error!("Failed to load world {}: {}", world_id, e);
                UrlLookupError::Storage
            })?
            .ok_or(UrlLookupError::WorldNotFound)?;
        extract_websocket_url(&world.mml_documents_configuration)
            .map(str::to_string)
            .ok_or(UrlLookupError::NotWebSocket)
    }
}

/// Why `/mml-websocket-url` could not answer. Rendered as plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlLookupError {
    MissingId,
    WorldNotFound,
    NotWebSocket,
    Storage,
}

impl IntoResponse for UrlLookupError {
    fn into_response(self) -> Response {
        let (status, text) = match self {
            UrlLookupError::MissingId => (StatusCode::BAD_REQUEST, "World ID is required"),
            UrlLookupError::WorldNotFound => (StatusCode::NOT_FOUND, "World not found"),
            UrlLookupError::NotWebSocket => {
                (StatusCode::NOT_FOUND, "MML document URL is not a WebSocket URL")
            }
            UrlLookupError::Storage => (StatusCode::INTERNAL_SERVER_ERROR, "Error loading MML file"),
        };
        (status, text).into_response()
    }
}

/// Router for a [`WorldService`]; `game_build_dir` holds the game client bundle.
pub fn router(service: Arc<WorldService>, game_build_dir: PathBuf) -> Router {
    let base = "/v1/worlds/{project_id}/web-world-instances";

    let index = game_build_dir.join("index.html");
    let spa_fallback = move || serve_index(index.clone());
    let game = ServeDir::new(&game_build_dir).fallback(spa_fallback.into_service());
    let assets = ServeDir::new(game_build_dir.join("apps/game-client/assets"))
        .fallback(asset_not_found.into_service());

    with_standard_layers(
        Router::new()
            .route("/health", get(health))
            .route("/mml-websocket-url", get(mml_websocket_url))
            .route("/", get(|| async { Redirect::temporary("/game") }))
            .route(base, get(list_worlds).post(create_world))
            .route(&format!("{}/", base), get(list_worlds).post(create_world))
            .route(
                &format!("{}/{{id}}", base),
                get(get_world).post(update_world).delete(delete_world),
            )
            .nest_service("/game/apps/game-client/assets", assets)
            .nest_service("/game", game)
            .fallback(not_found),
    )
    .with_state(service)
}

async fn serve_index(index: PathBuf) -> Response {
    match tokio::fs::read(&index).await {
        Ok(bytes) => Html(bytes).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "Game not found").into_response(),
    }
}

async fn asset_not_found(OriginalUri(uri): OriginalUri) -> (StatusCode, &'static str) {
    log::warn!("Asset not found: {}", uri.path());
    (StatusCode::NOT_FOUND, "Asset not found")
}

async fn health(State(service): State<Arc<WorldService>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "Local Web World Server",
        "tempDir": service.storage.root().display().to_string(),
    }))
}

async fn not_found(method: Method, OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::NotFound(format!("Endpoint not found: {} {}", method, uri))
}

fn world_not_found() -> ApiError {
    ApiError::NotFound("Web World Instance not found".to_string())
}

async fn mml_websocket_url(
    State(service): State<Arc<WorldService>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, UrlLookupError> {
    let id = params.get("id").map(String::as_str).unwrap_or_default();
    let url = service.resolve_websocket_url(id).await?;
    Ok(([(header::CONTENT_TYPE, "text/plain")], url).into_response())
}

async fn create_world(
    State(service): State<Arc<WorldService>>,
    Path(project_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<WebWorldInstance>> {
    let request: WorldRequest = parse_json_body(&body)?;
    Ok(Json(service.create(&project_id, &request).await?))
}

async fn get_world(
    State(service): State<Arc<WorldService>>,
    Path((project_id, id)): Path<(String, String)>,
) -> ApiResult<Json<WorldResponse>> {
    let world = service
        .get(&project_id, &id)
        .await?
        .ok_or_else(world_not_found)?;
    Ok(Json(WorldResponse {
        world,
        can_write: true,
        tier: service.tier.clone(),
    }))
}

async fn update_world(
    State(service): State<Arc<WorldService>>,
    Path((project_id, id)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Json<WebWorldInstance>> {
    let request: WorldRequest = parse_json_body(&body)?;
    service
        .update(&project_id, &id, &request)
        .await?
        .map(Json)
        .ok_or_else(world_not_found)
}

async fn delete_world(
    State(service): State<Arc<WorldService>>,
    Path((project_id, id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    if service.delete(&project_id, &id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(world_not_found())
    }
}

async fn list_worlds(
    State(service): State<Arc<WorldService>>,
    Path(project_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<WorldListResponse>> {
    let query = list_query_from_params(&params);
    let list = service.list(&project_id, &query).await?;
    Ok(Json(WorldListResponse {
        list,
        can_write: true,
        tier: service.tier.clone(),
    }))
}

/// A running world server.
pub struct WorldServerHandle {
    server: RunningServer,
    service: Arc<WorldService>,
}

impl WorldServerHandle {
    pub fn url(&self) -> String {
        self.server.url()
    }

    pub fn port(&self) -> u16 {
        self.server.port()
    }

    /// `<url>/game`
    pub fn game_url(&self) -> String {
        format!("{}/game", self.server.url())
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.service.storage.root().to_path_buf()
    }

    pub fn service(&self) -> Arc<WorldService> {
        self.service.clone()
    }

    /// Stop the listener, then remove the storage tree.
    pub async fn stop(self) {
        log::info!("Stopping web world server");
        self.server.shutdown().await;
        if let Err(e) = self.service.storage.cleanup().await {
            log::warn!("Failed to remove {}: {}", self.service.storage.root().display(), e);
        }
    }
}

/// Start a world server on `port` (0 for ephemeral).
pub async fn start_world_server(
    storage: WorldStorage,
    port: u16,
    project_id: &str,
    game_build_dir: PathBuf,
) -> std::io::Result<WorldServerHandle> {
    if !game_build_dir.join("index.html").exists() {
        log::warn!(
            "Game client bundle not found in {}; /game will answer 404",
            game_build_dir.display()
        );
    }
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    let bound = listener.local_addr()?.port();
    let service = Arc::new(WorldService::new(
        storage,
        project_id,
        format!("http://localhost:{}", bound),
    ));
    log::info!(
        "Web world server on port {} (storage {})",
        bound,
        service.storage.root().display()
    );
    let server = RunningServer::serve(listener, router(service.clone(), game_build_dir));
    Ok(WorldServerHandle { server, service })
}
