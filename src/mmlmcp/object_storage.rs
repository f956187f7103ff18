//! Storage for MML object instances.
//!
//! Each instance is one JSON file under a per-project directory of a temp tree that the storage
//! owns exclusively. Updates are shallow merges with last-write-wins semantics; there is no
//! version check between concurrent writers.

use crate::mmlmcp::error::StorageResult;
use crate::mmlmcp::json_store::{unique_temp_root, JsonDirStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

/// Hard cap and default for list page sizes.
pub const MAX_PAGE_SIZE: usize = 100;

/// The MML payload of an instance. `{"type":"source","source":"<mml>"}` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MmlSource {
    #[serde(rename = "source")]
    Source { source: String },
}

impl MmlSource {
    pub fn new(text: impl Into<String>) -> Self {
        MmlSource::Source {
            source: text.into(),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            MmlSource::Source { source } => source,
        }
    }
}

/// A stored MML object instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MmlObjectInstance {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// WebSocket URL minted at creation.
    pub url: String,
    pub enabled: bool,
    pub source: MmlSource,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: Value,
    /// Only set on read responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_write: Option<bool>,
}

/// Request body for create and partial update.
///
/// On create `name` and `source` are required; on update every present field overwrites.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MmlObjectRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<MmlSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
}

impl MmlObjectRequest {
    /// A create request with the two required fields.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            source: Some(MmlSource::new(source)),
            ..Default::default()
        }
    }

    /// An update that only replaces the source.
    pub fn source_update(source: impl Into<String>) -> Self {
        Self {
            source: Some(MmlSource::new(source)),
            ..Default::default()
        }
    }
}

/// Validated fields for a new instance.
#[derive(Debug, Clone)]
pub struct NewMmlObject {
    pub name: String,
    pub description: Option<String>,
    pub enabled: Option<bool>,
    pub source: MmlSource,
    pub parameters: Option<Map<String, Value>>,
}

impl NewMmlObject {
    /// `None` unless both `name` and `source` are present.
    pub fn from_request(request: &MmlObjectRequest) -> Option<Self> {
        let name = request.name.clone().filter(|n| !n.is_empty())?;
        let source = request.source.clone()?;
        Some(Self {
            name,
            description: request.description.clone(),
            enabled: request.enabled,
            source,
            parameters: request.parameters.clone(),
        })
    }
}

/// Pagination and search for listings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
    pub search: Option<String>,
}

impl ListQuery {
    /// Offset defaults to 0; limit defaults to and is capped at [`MAX_PAGE_SIZE`] (0 means default).
    pub fn normalized(&self) -> (usize, usize) {
        let offset = self.offset.unwrap_or(0);
        let limit = match self.limit {
            Some(0) | None => MAX_PAGE_SIZE,
            Some(n) => n.min(MAX_PAGE_SIZE),
        };
        (offset, limit)
    }

    /// Lower-cased search term, if any.
    pub fn needle(&self) -> Option<String> {
        self.search
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }

    /// `?offset=..&limit=..&search=..` or an empty string.
    pub fn to_query_string(&self) -> String {
        let mut params = Vec::new();
        if let Some(offset) = self.offset {
            params.push(format!("offset={}", offset));
        }
        if let Some(limit) = self.limit {
            params.push(format!("limit={}", limit));
        }
        if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
            params.push(format!("search={}", urlencoding::encode(search)));
        }
        if params.is_empty() {
            String::new()
        } else {
            format!("?{}", params.join("&"))
        }
    }
}

/// A page of instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectList {
    pub objects: Vec<MmlObjectInstance>,
    pub total_results: usize,
    pub offset: usize,
    pub limit: usize,
    #[serde(default)]
    pub can_write: bool,
}

pub struct ObjectStorage {
    store: JsonDirStore,
}

impl ObjectStorage {
    /// Storage rooted at a fresh `mml-objects-<uuid>` directory in the system temp dir.
    pub async fn open_temp() -> StorageResult<Self> {
        Self::open(unique_temp_root("mml-objects")).await
    }

    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        Ok(Self {
            store: JsonDirStore::open(root).await?,
        })
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    pub async fn create_instance(
        &self,
        project_id: &str,
        id: &str,
        body: NewMmlObject,
        websocket_url: &str,
    ) -> StorageResult<MmlObjectInstance> {
        let instance = MmlObjectInstance {
            id: id.to_string(),
            name: body.name,
            description: body.description,
            url: websocket_url.to_string(),
            enabled: body.enabled.unwrap_or(true),
            source: body.source,
            parameters: body.parameters.unwrap_or_default(),
            created_at: Utc::now(),
            updated_at: None,
            created_by: json!({"id": "system", "type": "user"}),
            can_write: None,
        };
        self.store.write(project_id, id, &instance).await?;
        log::info!("Created MML object instance {}/{}", project_id, id);
        Ok(instance)
    }

    /// The instance with `canWrite: true`, or `None`.
    pub async fn get_instance(
        &self,
        project_id: &str,
        id: &str,
    ) -> StorageResult<Option<MmlObjectInstance>> {
        let instance: Option<MmlObjectInstance> = self.store.read(project_id, id).await?;
        Ok(instance.map(|mut i| {
            i.can_write = Some(true);
            i
        }))
    }

    /// Shallow merge of the present fields; always refreshes `updatedAt`.
    pub async fn update_instance(
        &self,
        project_id: &str,
        id: &str,
        updates: &MmlObjectRequest,
    ) -> StorageResult<Option<MmlObjectInstance>> {
        let mut instance: MmlObjectInstance = match self.store.read(project_id, id).await? {
            Some(existing) => existing,
            None => return Ok(None),
        };

        if let Some(name) = &updates.name {
            instance.name = name.clone();
        }
        if let Some(description) = &updates.description {
            instance.description = Some(description.clone());
        }
        if let Some(enabled) = updates.enabled {
            instance.enabled = enabled;
        }
        if let Some(source) = &updates.source {
            instance.source = source.clone();
        }
        if let Some(parameters) = &updates.parameters {
            instance.parameters = parameters.clone();
        }
        instance.updated_at = Some(Utc::now());
        instance.can_write = None;

        self.store.write(project_id, id, &instance).await?;
        Ok(Some(instance))
    }

    pub async fn delete_instance(&self, project_id: &str, id: &str) -> StorageResult<bool> {
        let deleted = self.store.delete(project_id, id).await?;
        if deleted {
            log::info!("Deleted MML object instance {}/{}", project_id, id);
        }
        Ok(deleted)
    }

    /// Newest first; `search` matches name, description or MML source, case-insensitively.
    pub async fn list_instances(&self, project_id: &str, query: &ListQuery) -> StorageResult<ObjectList> {
        let mut objects: Vec<MmlObjectInstance> = self.store.list(project_id).await?;

        if let Some(needle) = query.needle() {
            objects.retain(|o| {
                o.name.to_lowercase().contains(&needle)
                    || o
                        .description
                        .as_deref()
                        .map_or(false, |d| d.to_lowercase().contains(&needle))
                    || o.source.text().to_lowercase().contains(&needle)
            });
        }
        objects.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let (offset, limit) = query.normalized();
        let total_results = objects.len();
        let objects = objects.into_iter().skip(offset).take(limit).collect();

        Ok(ObjectList {
            objects,
            total_results,
            offset,
            limit,
            can_write: true,
        })
    }

    /// Raw MML text of an instance.
    pub async fn get_mml_source(&self, project_id: &str, id: &str) -> StorageResult<Option<String>> {
        let instance: Option<MmlObjectInstance> = self.store.read(project_id, id).await?;
        Ok(instance.map(|i| i.source.text().to_string()))
    }

    /// Remove the whole storage tree.
    pub async fn cleanup(&self) -> StorageResult<()> {
        self.store.remove_all().await
    }
}
