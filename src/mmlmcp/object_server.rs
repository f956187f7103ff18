//! The MML object server: HTTP CRUD over [`ObjectStorage`] plus live WebSocket delivery.
//!
//! Creating an instance mints `ws://localhost:<port>/ws/<project>/<id>`; that socket is the
//! only channel viewers receive MML through. A new subscriber gets one `mml_source` frame with
//! the current text, then an `mml_updated` frame after every successful update that carried a
//! `source`. Deleting an instance closes its sockets with code 1000.
//!
//! ```text
//! POST   /v1/mml-objects/{project}/object-instances        create
//! GET    /v1/mml-objects/{project}/object-instances        list
//! GET    /v1/mml-objects/{project}/object-instances/{id}   get
//! POST   /v1/mml-objects/{project}/object-instances/{id}   partial update
//! DELETE /v1/mml-objects/{project}/object-instances/{id}   delete
//! WS     /ws/{project}/{id}
//! GET    /health
//! ```

use crate::mmlmcp::connections::{
    ConnectionRegistry, SocketCommand, CLOSE_NORMAL, CLOSE_POLICY,
};
use crate::mmlmcp::error::{ApiError, ApiResult, StorageResult};
use crate::mmlmcp::http_server::{parse_json_body, with_standard_layers, RunningServer};
use crate::mmlmcp::object_storage::{
    ListQuery, MmlObjectInstance, MmlObjectRequest, NewMmlObject, ObjectList, ObjectStorage,
};
use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{OriginalUri, Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Envelope pushed to viewers.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MmlFrame<'a> {
    MmlSource { source: &'a str },
    MmlUpdated { source: &'a str },
}

impl MmlFrame<'_> {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Storage plus fan-out: every mutation path (HTTP or in-process client) goes through here so
/// viewers are always notified.
pub struct ObjectService {
    storage: ObjectStorage,
    connections: ConnectionRegistry,
    ws_base: String,
}

impl ObjectService {
    /// `ws_base` is the `ws://host:port` prefix used to mint instance URLs.
    pub fn new(storage: ObjectStorage, ws_base: impl Into<String>) -> Self {
        Self {
            storage,
            connections: ConnectionRegistry::new(),
            ws_base: ws_base.into(),
        }
    }

    pub fn storage(&self) -> &ObjectStorage {
        &self.storage
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn websocket_url(&self, project_id: &str, id: &str) -> String {
        format!("{}/ws/{}/{}", self.ws_base, project_id, id)
    }

    /// Validate and create; the id is the request's or a fresh UUID.
    pub async fn create(&self, project_id: &str, request: &MmlObjectRequest) -> ApiResult<MmlObjectInstance> {
        let body = NewMmlObject::from_request(request)
            .ok_or_else(|| ApiError::Validation("Name and source are required".to_string()))?;
        let id = request
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let url = self.websocket_url(project_id, &id);
        Ok(self.storage.create_instance(project_id, &id, body, &url).await?)
    }

    pub async fn get(&self, project_id: &str, id: &str) -> StorageResult<Option<MmlObjectInstance>> {
        self.storage.get_instance(project_id, id).await
    }

    /// Merge the update and, when it carried a source, push `mml_updated` to subscribers.
    pub async fn update(
        &self,
        project_id: &str,
        id: &str,
        request: &MmlObjectRequest,
    ) -> StorageResult<Option<MmlObjectInstance>> {
        let updated = self.storage.update_instance(project_id, id, request).await?;
        if let (Some(instance), Some(source)) = (&updated, &request.source) {
            let frame = MmlFrame::MmlUpdated {
                source: source.text(),
            }
            .to_json();
            let delivered = self.connections.broadcast(project_id, id, &frame);
            log::debug!(
                "Broadcast mml_updated for {}/{} to {} socket(s)",
                project_id,
                instance.id,
                delivered
            );
        }
        Ok(updated)
    }

    /// Delete and force-close the instance's sockets.
    pub async fn delete(&self, project_id: &str, id: &str) -> StorageResult<bool> {
        let deleted = self.storage.delete_instance(project_id, id).await?;
        if deleted {
            let closed = self
                .connections
                .close_instance(project_id, id, CLOSE_NORMAL, "Instance deleted");
            if closed > 0 {
                log::info!("Closed {} socket(s) for deleted instance {}/{}", closed, project_id, id);
            }
        }
        Ok(deleted)
    }

    pub async fn list(&self, project_id: &str, query: &ListQuery) -> StorageResult<ObjectList> {
        self.storage.list_instances(project_id, query).await
    }
}

/// Router for an [`ObjectService`].
pub fn router(service: Arc<ObjectService>) -> Router {
    let base = "/v1/mml-objects/{project_id}/object-instances";
    with_standard_layers(
        Router::new()
            .route("/health", get(health))
            .route(base, get(list_instances).post(create_instance))
            .route(&format!("{}/", base), get(list_instances).post(create_instance))
            .route(
                &format!("{}/{{id}}", base),
                get(get_instance).post(update_instance).delete(delete_instance),
            )
            .route("/ws", get(ws_without_target))
            .route("/ws/{*target}", get(ws_with_target))
            .fallback(not_found),
    )
    .with_state(service)
}

async fn health(State(service): State<Arc<ObjectService>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "tempDir": service.storage.root().display().to_string(),
    }))
}

async fn not_found(method: Method, OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::NotFound(format!("Endpoint not found: {} {}", method, uri))
}

fn instance_not_found() -> ApiError {
    ApiError::NotFound("MML Object Instance not found".to_string())
}

async fn create_instance(
    State(service): State<Arc<ObjectService>>,
    Path(project_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<MmlObjectInstance>> {
    let request: MmlObjectRequest = parse_json_body(&body)?;
    Ok(Json(service.create(&project_id, &request).await?))
}

async fn get_instance(
    State(service): State<Arc<ObjectService>>,
    Path((project_id, id)): Path<(String, String)>,
) -> ApiResult<Json<MmlObjectInstance>> {
    service
        .get(&project_id, &id)
        .await?
        .map(Json)
        .ok_or_else(instance_not_found)
}

async fn update_instance(
    State(service): State<Arc<ObjectService>>,
    Path((project_id, id)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Json<MmlObjectInstance>> {
    let request: MmlObjectRequest = parse_json_body(&body)?;
    service
        .update(&project_id, &id, &request)
        .await?
        .map(Json)
        .ok_or_else(instance_not_found)
}

async fn delete_instance(
    State(service): State<Arc<ObjectService>>,
    Path((project_id, id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    if service.delete(&project_id, &id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(instance_not_found())
    }
}

async fn list_instances(
    State(service): State<Arc<ObjectService>>,
    Path(project_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<ObjectList>> {
    let query = list_query_from_params(&params);
    Ok(Json(service.list(&project_id, &query).await?))
}

/// Lenient query parsing: unparseable numbers fall back to defaults.
pub(crate) fn list_query_from_params(params: &HashMap<String, String>) -> ListQuery {
    ListQuery {
        offset: params.get("offset").and_then(|v| v.parse().ok()),
        limit: params.get("limit").and_then(|v| v.parse().ok()),
        search: params.get("search").cloned(),
    }
}

async fn ws_without_target(
    State(service): State<Arc<ObjectService>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, service, Err("Invalid WebSocket path")))
}

async fn ws_with_target(
    State(service): State<Arc<ObjectService>>,
    Path(target): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let segments: Vec<String> = target
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    let target = match segments.as_slice() {
        [project_id, instance_id, ..] => Ok((project_id.clone(), instance_id.clone())),
        _ => Err("Invalid WebSocket path. Expected /ws/{projectId}/{instanceId}"),
    };
    ws.on_upgrade(move |socket| serve_socket(socket, service, target))
}

async fn close_socket(socket: &mut WebSocket, code: u16, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.to_string().into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

/// Drive one viewer socket until either side closes it.
async fn serve_socket(
    mut socket: WebSocket,
    service: Arc<ObjectService>,
    target: Result<(String, String), &'static str>,
) {
    let (project_id, instance_id) = match target {
        Ok(target) => target,
        Err(reason) => {
            log::warn!("Rejecting WebSocket: {}", reason);
            close_socket(&mut socket, CLOSE_POLICY, reason).await;
            return;
        }
    };

    // Register before reading the source so an update racing the handshake is not lost.
    let (connection, mut commands) = service.connections.register(&project_id, &instance_id);

    let source = match service.storage.get_mml_source(&project_id, &instance_id).await {
        Ok(Some(source)) => source,
        Ok(None) => {
            service
                .connections
                .unregister(&project_id, &instance_id, connection);
            close_socket(&mut socket, CLOSE_POLICY, "MML Object Instance not found").await;
            return;
        }
        Err(e) => {
            log::error!("Failed to load source for {}/{}: {}", project_id, instance_id, e);
            service
                .connections
                .unregister(&project_id, &instance_id, connection);
            close_socket(&mut socket, CLOSE_POLICY, "MML Object Instance not available").await;
            return;
        }
    };

    log::info!("Viewer connected to {}/{}", project_id, instance_id);
    let initial = MmlFrame::MmlSource { source: &source }.to_json();
    if socket.send(Message::Text(initial.into())).await.is_ok() {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SocketCommand::Frame(text)) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(SocketCommand::Close { code, reason }) => {
                        close_socket(&mut socket, code, &reason).await;
                        break;
                    }
                    None => break,
                },
                incoming = socket.recv() => match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // The channel is read-only for viewers; anything they send is ignored.
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    service
        .connections
        .unregister(&project_id, &instance_id, connection);
    log::info!("Viewer disconnected from {}/{}", project_id, instance_id);
}

/// A running object server.
pub struct ObjectServerHandle {
    server: RunningServer,
    service: Arc<ObjectService>,
}

impl ObjectServerHandle {
    pub fn url(&self) -> String {
        self.server.url()
    }

    pub fn port(&self) -> u16 {
        self.server.port()
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.service.storage.root().to_path_buf()
    }

    pub fn service(&self) -> Arc<ObjectService> {
        self.service.clone()
    }

    /// Close every socket, stop the listener, then remove the storage tree.
    pub async fn stop(self) {
        let closed = self
            .service
            .connections
            .close_all(CLOSE_NORMAL, "Server shutting down");
        log::info!("Stopping MML object server ({} socket(s) closed)", closed);
        self.server.shutdown().await;
        if let Err(e) = self.service.storage.cleanup().await {
            log::warn!("Failed to remove {}: {}", self.service.storage.root().display(), e);
        }
    }
}

/// Start an object server on `port` (0 for ephemeral) over `storage`.
pub async fn start_object_server(storage: ObjectStorage, port: u16) -> std::io::Result<ObjectServerHandle> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    let bound = listener.local_addr()?.port();
    let service = Arc::new(ObjectService::new(storage, format!("ws://localhost:{}", bound)));
    log::info!(
        "MML object server on port {} (storage {})",
        bound,
        service.storage.root().display()
    );
    let server = RunningServer::serve(listener, router(service.clone()));
    Ok(ObjectServerHandle { server, service })
}
