//! Storage clients used by the tool layer.
//!
//! [`MmlObjectApi`] and [`WebWorldApi`] are the seams the tools program against. Each has an
//! in-process implementation that calls the server's service layer directly (so WebSocket
//! broadcasts still fire) and an HTTP implementation for an external local server or the hosted
//! API. [`connect_clients`] picks between them from an [`MmlMcpConfig`].
//!
//! ```rust,no_run
//! use mmlmcp::{connect_clients, MmlMcpConfig};
//!
//! # async {
//! let clients = connect_clients(&MmlMcpConfig::default()).await.unwrap();
//! let worlds = clients.worlds.list_worlds(&Default::default()).await.unwrap();
//! println!("{} worlds", worlds.total_results);
//! clients.stop().await;
//! # };
//! ```

use crate::mmlmcp::config::{MmlMcpConfig, StorageMode};
use crate::mmlmcp::error::ApiError;
use crate::mmlmcp::object_server::{start_object_server, ObjectServerHandle, ObjectService};
use crate::mmlmcp::object_storage::{
    ListQuery, MmlObjectInstance, MmlObjectRequest, ObjectList, ObjectStorage,
};
use crate::mmlmcp::world_server::{start_world_server, WorldServerHandle, WorldService};
use crate::mmlmcp::world_storage::{WebWorldInstance, WorldList, WorldRequest, WorldStorage};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// Non-2xx answer; `message` is taken from the error envelope when there is one.
    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to start local {service} server: {reason}")]
    Startup { service: &'static str, reason: String },
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<ApiError> for ClientError {
    fn from(err: ApiError) -> Self {
        ClientError::Status {
            status: err.status().as_u16(),
            message: err.to_string(),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// A world as returned by [`WebWorldApi::create_world`], plus the derived game URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedWorld {
    #[serde(flatten)]
    pub world: WebWorldInstance,
    /// `<game base>/game?id=<id>`; empty when no game client is known.
    pub url: String,
}

#[async_trait]
pub trait MmlObjectApi: Send + Sync {
    async fn create_object(&self, request: &MmlObjectRequest) -> ClientResult<MmlObjectInstance>;

    /// `Ok(None)` when the object does not exist.
    async fn get_object(&self, id: &str) -> ClientResult<Option<MmlObjectInstance>>;

    async fn update_object(&self, id: &str, request: &MmlObjectRequest) -> ClientResult<MmlObjectInstance>;

    async fn delete_object(&self, id: &str) -> ClientResult<()>;

    async fn list_objects(&self, query: &ListQuery) -> ClientResult<ObjectList>;
}

#[async_trait]
pub trait WebWorldApi: Send + Sync {
    async fn create_world(&self, request: &WorldRequest) -> ClientResult<CreatedWorld>;

    /// `Ok(None)` when the world does not exist.
    async fn get_world(&self, id: &str) -> ClientResult<Option<WebWorldInstance>>;

    async fn update_world(&self, id: &str, request: &WorldRequest) -> ClientResult<WebWorldInstance>;

    async fn delete_world(&self, id: &str) -> ClientResult<()>;

    async fn list_worlds(&self, query: &ListQuery) -> ClientResult<WorldList>;
}

fn object_not_found() -> ClientError {
    ApiError::NotFound("MML Object Instance not found".to_string()).into()
}

fn world_not_found() -> ClientError {
    ApiError::NotFound("Web World Instance not found".to_string()).into()
}

/// Object client over an in-process [`ObjectService`].
pub struct LocalMmlObjectClient {
    service: Arc<ObjectService>,
    project_id: String,
}

impl LocalMmlObjectClient {
    pub fn new(service: Arc<ObjectService>, project_id: impl Into<String>) -> Self {
        Self {
            service,
            project_id: project_id.into(),
        }
    }
}

#[async_trait]
impl MmlObjectApi for LocalMmlObjectClient {
    async fn create_object(&self, request: &MmlObjectRequest) -> ClientResult<MmlObjectInstance> {
        Ok(self.service.create(&self.project_id, request).await?)
    }

    async fn get_object(&self, id: &str) -> ClientResult<Option<MmlObjectInstance>> {
        self.service
            .get(&self.project_id, id)
            .await
            .map_err(|e| ApiError::from(e).into())
    }

    async fn update_object(&self, id: &str, request: &MmlObjectRequest) -> ClientResult<MmlObjectInstance> {
        self.service
            .update(&self.project_id, id, request)
            .await
            .map_err(ApiError::from)?
            .ok_or_else(object_not_found)
    }

    async fn delete_object(&self, id: &str) -> ClientResult<()> {
        if self
            .service
            .delete(&self.project_id, id)
            .await
            .map_err(ApiError::from)?
        {
            Ok(())
        } else {
            Err(object_not_found())
        }
    }

    async fn list_objects(&self, query: &ListQuery) -> ClientResult<ObjectList> {
        self.service
            .list(&self.project_id, query)
            .await
            .map_err(|e| ApiError::from(e).into())
    }
}

/// World client over an in-process [`WorldService`].
pub struct LocalWebWorldClient {
    service: Arc<WorldService>,
    project_id: String,
}

impl LocalWebWorldClient {
    pub fn new(service: Arc<WorldService>, project_id: impl Into<String>) -> Self {
        Self {
            service,
            project_id: project_id.into(),
        }
    }
}

#[async_trait]
impl WebWorldApi for LocalWebWorldClient {
    async fn create_world(&self, request: &WorldRequest) -> ClientResult<CreatedWorld> {
        let world = self.service.create(&self.project_id, request).await?;
        let url = self.service.game_url(&world.id);
        Ok(CreatedWorld { world, url })
    }

    async fn get_world(&self, id: &str) -> ClientResult<Option<WebWorldInstance>> {
        self.service
            .get(&self.project_id, id)
            .await
            .map_err(|e| ApiError::from(e).into())
    }

    async fn update_world(&self, id: &str, request: &WorldRequest) -> ClientResult<WebWorldInstance> {
        self.service
            .update(&self.project_id, id, request)
            .await
            .map_err(ApiError::from)?
            .ok_or_else(world_not_found)
    }

    async fn delete_world(&self, id: &str) -> ClientResult<()> {
        if self
            .service
            .delete(&self.project_id, id)
            .await
            .map_err(ApiError::from)?
        {
            Ok(())
        } else {
            Err(world_not_found())
        }
    }

    async fn list_worlds(&self, query: &ListQuery) -> ClientResult<WorldList> {
        self.service
            .list(&self.project_id, query)
            .await
            .map_err(|e| ApiError::from(e).into())
    }
}

/// JSON-over-HTTP plumbing shared by the two HTTP clients.
#[derive(Clone)]
struct RestEndpoint {
    http: reqwest::Client,
    collection_url: String,
    api_key: Option<String>,
}

impl RestEndpoint {
    fn new(base_url: &str, collection_path: String, api_key: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            collection_url: format!("{}{}", base_url.trim_end_matches('/'), collection_path),
            api_key,
        }
    }

    fn item_url(&self, id: &str) -> String {
        format!("{}/{}", self.collection_url, urlencoding::encode(id))
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Send and turn non-2xx answers into [`ClientError::Status`].
    async fn send(&self, builder: reqwest::RequestBuilder) -> ClientResult<reqwest::Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let fallback = format!(
            "HTTP {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        );
        let message = match response.json::<serde_json::Value>().await {
            Ok(body) => body
                .pointer("/error/message")
                .or_else(|| body.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or(fallback),
            Err(_) => fallback,
        };
        Err(ClientError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn json<T: DeserializeOwned>(&self, builder: reqwest::RequestBuilder) -> ClientResult<T> {
        Ok(self.send(builder).await?.json().await?)
    }

    async fn get_optional<T: DeserializeOwned>(&self, id: &str) -> ClientResult<Option<T>> {
        let builder = self.request(reqwest::Method::GET, &self.item_url(id));
        match self.json(builder).await {
            Ok(value) => Ok(Some(value)),
            Err(ClientError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create<B: Serialize + Sync, T: DeserializeOwned>(&self, body: &B) -> ClientResult<T> {
        let url = format!("{}/", self.collection_url);
        self.json(self.request(reqwest::Method::POST, &url).json(body)).await
    }

    async fn update<B: Serialize + Sync, T: DeserializeOwned>(&self, id: &str, body: &B) -> ClientResult<T> {
        let url = self.item_url(id);
        self.json(self.request(reqwest::Method::POST, &url).json(body)).await
    }

    async fn delete(&self, id: &str) -> ClientResult<()> {
        let url = self.item_url(id);
        self.send(self.request(reqwest::Method::DELETE, &url)).await?;
        Ok(())
    }

    async fn list<T: DeserializeOwned>(&self, query: &ListQuery) -> ClientResult<T> {
        let url = format!("{}/{}", self.collection_url, query.to_query_string());
        self.json(self.request(reqwest::Method::GET, &url)).await
    }
}

/// Object client for a server reachable over HTTP.
pub struct MmlObjectClient {
    endpoint: RestEndpoint,
}

impl MmlObjectClient {
    pub fn new(base_url: &str, project_id: &str, api_key: Option<String>) -> Self {
        let path = format!("/v1/mml-objects/{}/object-instances", project_id);
        Self {
            endpoint: RestEndpoint::new(base_url, path, api_key),
        }
    }
}

#[async_trait]
impl MmlObjectApi for MmlObjectClient {
    async fn create_object(&self, request: &MmlObjectRequest) -> ClientResult<MmlObjectInstance> {
        self.endpoint.create(request).await
    }

    async fn get_object(&self, id: &str) -> ClientResult<Option<MmlObjectInstance>> {
        self.endpoint.get_optional(id).await
    }

    async fn update_object(&self, id: &str, request: &MmlObjectRequest) -> ClientResult<MmlObjectInstance> {
        self.endpoint.update(id, request).await
    }

    async fn delete_object(&self, id: &str) -> ClientResult<()> {
        self.endpoint.delete(id).await
    }

    async fn list_objects(&self, query: &ListQuery) -> ClientResult<ObjectList> {
        self.endpoint.list(query).await
    }
}

/// World client for a server reachable over HTTP.
pub struct WebWorldClient {
    endpoint: RestEndpoint,
    game_base: Option<String>,
}

impl WebWorldClient {
    /// `game_base` is where the game client is served; `None` leaves created world URLs empty.
    pub fn new(base_url: &str, project_id: &str, api_key: Option<String>, game_base: Option<String>) -> Self {
        let path = format!("/v1/worlds/{}/web-world-instances", project_id);
        Self {
            endpoint: RestEndpoint::new(base_url, path, api_key),
            game_base,
        }
    }
}

#[async_trait]
impl WebWorldApi for WebWorldClient {
    async fn create_world(&self, request: &WorldRequest) -> ClientResult<CreatedWorld> {
        let world: WebWorldInstance = self.endpoint.create(request).await?;
        let url = self
            .game_base
            .as_deref()
            .map(|base| format!("{}/game?id={}", base.trim_end_matches('/'), world.id))
            .unwrap_or_default();
        Ok(CreatedWorld { world, url })
    }

    async fn get_world(&self, id: &str) -> ClientResult<Option<WebWorldInstance>> {
        self.endpoint.get_optional(id).await
    }

    async fn update_world(&self, id: &str, request: &WorldRequest) -> ClientResult<WebWorldInstance> {
        self.endpoint.update(id, request).await
    }

    async fn delete_world(&self, id: &str) -> ClientResult<()> {
        self.endpoint.delete(id).await
    }

    async fn list_worlds(&self, query: &ListQuery) -> ClientResult<WorldList> {
        self.endpoint.list(query).await
    }
}

/// The two storage clients plus any servers started for them.
pub struct StorageClients {
    pub objects: Arc<dyn MmlObjectApi>,
    pub worlds: Arc<dyn WebWorldApi>,
    object_server: Option<ObjectServerHandle>,
    world_server: Option<WorldServerHandle>,
}

impl StorageClients {
    pub fn new(objects: Arc<dyn MmlObjectApi>, worlds: Arc<dyn WebWorldApi>) -> Self {
        Self {
            objects,
            worlds,
            object_server: None,
            world_server: None,
        }
    }

    pub fn object_server(&self) -> Option<&ObjectServerHandle> {
        self.object_server.as_ref()
    }

    pub fn world_server(&self) -> Option<&WorldServerHandle> {
        self.world_server.as_ref()
    }

    /// Stop the in-process servers, if any were started.
    pub async fn stop(self) {
        if let Some(server) = self.world_server {
            server.stop().await;
        }
        if let Some(server) = self.object_server {
            server.stop().await;
        }
    }
}

/// Build the clients for `config`.
///
/// Remote mode talks to the hosted API with the bearer key. Local mode uses the configured
/// server URLs when set and otherwise starts the servers in-process on the configured ports.
pub async fn connect_clients(config: &MmlMcpConfig) -> ClientResult<StorageClients> {
    if config.mode == StorageMode::Remote {
        log::info!("Using hosted APIs at {}", config.remote_api_url);
        let objects = MmlObjectClient::new(&config.remote_api_url, &config.project_id, config.api_key.clone());
        let worlds = WebWorldClient::new(
            &config.remote_api_url,
            &config.project_id,
            config.api_key.clone(),
            None,
        );
        return Ok(StorageClients::new(Arc::new(objects), Arc::new(worlds)));
    }

    let mut object_server = None;
    let objects: Arc<dyn MmlObjectApi> = match &config.mml_server_url {
        Some(url) => Arc::new(MmlObjectClient::new(url, &config.project_id, None)),
        None => {
            let storage = ObjectStorage::open_temp().await.map_err(|e| ClientError::Startup {
                service: "MML object",
                reason: e.to_string(),
            })?;
            let handle = start_object_server(storage, config.mml_server_port)
                .await
                .map_err(|e| ClientError::Startup {
                    service: "MML object",
                    reason: e.to_string(),
                })?;
            let client = LocalMmlObjectClient::new(handle.service(), config.project_id.clone());
            object_server = Some(handle);
            Arc::new(client)
        }
    };

    let mut world_server = None;
    let worlds: Arc<dyn WebWorldApi> = match &config.web_world_server_url {
        Some(url) => Arc::new(WebWorldClient::new(url, &config.project_id, None, Some(url.clone()))),
        None => {
            let storage = WorldStorage::open_temp().await.map_err(|e| ClientError::Startup {
                service: "web world",
                reason: e.to_string(),
            })?;
            let started = start_world_server(
                storage,
                config.web_world_server_port,
                &config.project_id,
                config.game_build_dir.clone(),
            )
            .await;
            let handle = match started {
                Ok(handle) => handle,
                Err(e) => {
                    if let Some(server) = object_server {
                        server.stop().await;
                    }
                    return Err(ClientError::Startup {
                        service: "web world",
                        reason: e.to_string(),
                    });
                }
            };
            let client = LocalWebWorldClient::new(handle.service(), config.project_id.clone());
            world_server = Some(handle);
            Arc::new(client)
        }
    };

    Ok(StorageClients {
        objects,
        worlds,
        object_server,
        world_server,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_keeps_status_and_message() {
        let err: ClientError = ApiError::Validation("Name and source are required".into()).into();
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.to_string(), "Name and source are required");
    }

    #[test]
    fn test_item_urls_are_encoded() {
        let endpoint = RestEndpoint::new("http://localhost:1/", "/v1/things".to_string(), None);
        assert_eq!(endpoint.item_url("a b"), "http://localhost:1/v1/things/a%20b");
    }

    #[test]
    fn test_created_world_flattens() {
        let json = serde_json::json!({
            "id": "w1",
            "name": "World",
            "chatConfiguration": {"enabled": true},
            "authConfiguration": {"allowAnonymous": true},
            "mmlDocumentsConfiguration": {"mmlDocuments": {}},
            "environmentConfiguration": {},
            "avatarConfiguration": {},
            "loadingConfiguration": {},
            "createdAt": "2024-01-01T00:00:00Z",
            "url": "http://localhost:1/game?id=w1"
        });
        let created: CreatedWorld = serde_json::from_value(json).unwrap();
        assert_eq!(created.world.id, "w1");
        assert_eq!(created.url, "http://localhost:1/game?id=w1");
    }
}
