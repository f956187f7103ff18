//! Storage for web world instances.
//!
//! A world bundles an ordered map of MML document references with configuration blocks that are
//! stored verbatim. The first document is the world's primary one. Updates replace only the
//! blocks present in the request.

use crate::mmlmcp::error::{StorageError, StorageResult};
use crate::mmlmcp::json_store::{unique_temp_root, JsonDirStore};
use crate::mmlmcp::object_storage::ListQuery;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Reference to one MML document inside a world.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MmlDocumentRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub websocket_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vector3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Vector3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Vector3>,
}

impl MmlDocumentRef {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Where a viewer should open its live connection: `websocketUrl`, else a `ws`/`wss` `url`.
    pub fn live_websocket_url(&self) -> Option<&str> {
        if let Some(ws) = self.websocket_url.as_deref().filter(|u| !u.is_empty()) {
            return Some(ws);
        }
        self.url
            .as_deref()
            .filter(|u| u.starts_with("ws://") || u.starts_with("wss://"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MmlDocumentsConfiguration {
    #[serde(default)]
    pub mml_documents: IndexMap<String, MmlDocumentRef>,
}

impl MmlDocumentsConfiguration {
    pub fn single(key: impl Into<String>, document: MmlDocumentRef) -> Self {
        let mut mml_documents = IndexMap::new();
        mml_documents.insert(key.into(), document);
        Self { mml_documents }
    }

    /// The first entry, by convention the world's primary document.
    pub fn primary(&self) -> Option<(&String, &MmlDocumentRef)> {
        self.mml_documents.first()
    }
}

/// A stored web world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebWorldInstance {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub general_configuration: Option<Value>,
    pub chat_configuration: Value,
    pub auth_configuration: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name_configuration: Option<Value>,
    pub mml_documents_configuration: MmlDocumentsConfiguration,
    pub environment_configuration: Value,
    pub avatar_configuration: Value,
    pub loading_configuration: Value,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_tweak_pane: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_orbital_camera: Option<bool>,
}

/// Create and update body. On update only present blocks are replaced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub general_configuration: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_configuration: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_configuration: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name_configuration: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mml_documents_configuration: Option<MmlDocumentsConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_configuration: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_configuration: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loading_configuration: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_tweak_pane: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_orbital_camera: Option<bool>,
}

impl WorldRequest {
    /// A create request for a world backed by one document.
    pub fn with_document(
        name: impl Into<String>,
        key: impl Into<String>,
        document: MmlDocumentRef,
    ) -> Self {
        Self {
            name: Some(name.into()),
            mml_documents_configuration: Some(MmlDocumentsConfiguration::single(key, document)),
            ..Default::default()
        }
    }
}

/// A page of worlds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldList {
    pub worlds: Vec<WebWorldInstance>,
    pub total_results: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: usize,
}

pub struct WorldStorage {
    store: JsonDirStore,
}

impl WorldStorage {
    /// Storage rooted at a fresh `web-world-server-<uuid>` directory in the system temp dir.
    pub async fn open_temp() -> StorageResult<Self> {
        Self::open(unique_temp_root("web-world-server")).await
    }

    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        Ok(Self {
            store: JsonDirStore::open(root).await?,
        })
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    /// Create a world. Fails with [`StorageError::MissingDocuments`] when the request has no
    /// MML document.
    pub async fn create_world(
        &self,
        project_id: &str,
        id: &str,
        request: &WorldRequest,
    ) -> StorageResult<WebWorldInstance> {
        let documents = request
            .mml_documents_configuration
            .clone()
            .filter(|c| !c.mml_documents.is_empty())
            .ok_or(StorageError::MissingDocuments)?;

        let world = WebWorldInstance {
            id: id.to_string(),
            name: request.name.clone().unwrap_or_default(),
            description: request.description.clone(),
            general_configuration: request.general_configuration.clone(),
            chat_configuration: request
                .chat_configuration
                .clone()
                .unwrap_or_else(|| json!({"enabled": true})),
            auth_configuration: request
                .auth_configuration
                .clone()
                .unwrap_or_else(|| json!({"allowAnonymous": true})),
            display_name_configuration: request.display_name_configuration.clone(),
            mml_documents_configuration: documents,
            environment_configuration: request
                .environment_configuration
                .clone()
                .unwrap_or_else(|| json!({})),
            avatar_configuration: request.avatar_configuration.clone().unwrap_or_else(|| json!({})),
            loading_configuration: request
                .loading_configuration
                .clone()
                .unwrap_or_else(|| json!({})),
            created_at: Utc::now(),
            updated_at: None,
            created_by: json!({}),
            enable_tweak_pane: request.enable_tweak_pane,
            allow_orbital_camera: request.allow_orbital_camera,
        };

        self.store.write(project_id, id, &world).await?;
        log::info!("Created web world {}/{}", project_id, id);
        Ok(world)
    }

    pub async fn get_world(&self, project_id: &str, id: &str) -> StorageResult<Option<WebWorldInstance>> {
        self.store.read(project_id, id).await
    }

    /// Replace each block present in `updates`; always stamps `updatedAt`.
    pub async fn update_world(
        &self,
        project_id: &str,
        id: &str,
        updates: &WorldRequest,
    ) -> StorageResult<Option<WebWorldInstance>> {
        let mut world = match self.get_world(project_id, id).await? {
            Some(world) => world,
            None => return Ok(None),
        };

        fn merge<T: Clone>(target: &mut T, update: &Option<T>) {
            if let Some(value) = update {
                *target = value.clone();
            }
        }
        fn merge_opt<T: Clone>(target: &mut Option<T>, update: &Option<T>) {
            if update.is_some() {
                *target = update.clone();
            }
        }

        merge(&mut world.name, &updates.name);
        merge_opt(&mut world.description, &updates.description);
        merge_opt(&mut world.general_configuration, &updates.general_configuration);
        merge(&mut world.chat_configuration, &updates.chat_configuration);
        merge(&mut world.auth_configuration, &updates.auth_configuration);
        merge_opt(&mut world.display_name_configuration, &updates.display_name_configuration);
        merge(&mut world.mml_documents_configuration, &updates.mml_documents_configuration);
        merge(&mut world.environment_configuration, &updates.environment_configuration);
        merge(&mut world.avatar_configuration, &updates.avatar_configuration);
        merge(&mut world.loading_configuration, &updates.loading_configuration);
        merge_opt(&mut world.enable_tweak_pane, &updates.enable_tweak_pane);
        merge_opt(&mut world.allow_orbital_camera, &updates.allow_orbital_camera);
        world.updated_at = Some(Utc::now());

        self.store.write(project_id, id, &world).await?;
        Ok(Some(world))
    }

    pub async fn delete_world(&self, project_id: &str, id: &str) -> StorageResult<bool> {
        let deleted = self.store.delete(project_id, id).await?;
        if deleted {
            log::info!("Deleted web world {}/{}", project_id, id);
        }
        Ok(deleted)
    }

    /// Newest first; `search` matches name or description, case-insensitively.
    pub async fn list_worlds(&self, project_id: &str, query: &ListQuery) -> StorageResult<WorldList> {
        let mut worlds: Vec<WebWorldInstance> = self.store.list(project_id).await?;

        if let Some(needle) = query.needle() {
            worlds.retain(|w| {
                w.name.to_lowercase().contains(&needle)
                    || w
                        .description
                        .as_deref()
                        .map_or(false, |d| d.to_lowercase().contains(&needle))
            });
        }
        worlds.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let (offset, limit) = query.normalized();
        let total_results = worlds.len();
        let worlds = worlds.into_iter().skip(offset).take(limit).collect();

        Ok(WorldList {
            worlds,
            total_results,
            offset,
            limit,
        })
    }

    pub async fn cleanup(&self) -> StorageResult<()> {
        self.store.remove_all().await
    }
}
