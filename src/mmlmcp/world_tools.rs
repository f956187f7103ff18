//! The world-authoring tools.
//!
//! | Tool | Does |
//! |---|---|
//! | `create-world` | render elements into a scene document, store it as an object, wrap it in a world |
//! | `update-elements` | apply one add/update/delete to the world's document |
//! | `update-script` | replace or remove the document's script block |
//! | `screenshot-world` | capture the world's object as a PNG |
//! | `fetch-mml-info` | markdown reference of every element |
//!
//! A world points back at its object twice: `description` holds the object id and the single
//! MML document entry is keyed by it. Edits follow the document key, screenshots follow the
//! description. Every failure becomes an `isError` result; nothing here aborts a session.

use crate::mmlmcp::clients::{MmlObjectApi, WebWorldApi};
use crate::mmlmcp::mml::catalog::elements_reference_markdown;
use crate::mmlmcp::mml::{apply_operation, compose_scene_document, update_script, MmlElement, PatchOperation};
use crate::mmlmcp::object_storage::MmlObjectRequest;
use crate::mmlmcp::screenshot::ScreenshotService;
use crate::mmlmcp::tool_protocol::{
    ToolContent, ToolError, ToolMetadata, ToolParameter, ToolParameterType, ToolProtocol, ToolResult,
};
use crate::mmlmcp::world_storage::{MmlDocumentRef, WorldRequest};
use async_trait::async_trait;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::error::Error;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const CREATE_WORLD: &str = "create-world";
pub const UPDATE_ELEMENTS: &str = "update-elements";
pub const UPDATE_SCRIPT: &str = "update-script";
pub const SCREENSHOT_WORLD: &str = "screenshot-world";
pub const FETCH_MML_INFO: &str = "fetch-mml-info";

const ERROR_CREATING_DOCUMENT: &str = "Error creating MML document:";
const ERROR_UPDATING_WORLD: &str = "Error updating world:";
const ERROR_CAPTURING_SCREENSHOT: &str = "Error capturing screenshot:";

#[derive(Debug, Deserialize)]
struct CreateWorldArgs {
    title: String,
    elements: Vec<MmlElement>,
    #[serde(default)]
    script: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateElementsArgs {
    world_id: String,
    operation: PatchOperation,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateScriptArgs {
    world_id: String,
    #[serde(default)]
    script: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScreenshotWorldArgs {
    world_id: String,
}

fn parse_args<T: DeserializeOwned>(parameters: Value) -> Result<T, ToolError> {
    let parameters = if parameters.is_null() { json!({}) } else { parameters };
    serde_json::from_value(parameters).map_err(|e| ToolError::InvalidParameters(e.to_string()))
}

/// Serves the world tools over a pair of storage clients.
pub struct WorldToolProtocol {
    objects: Arc<dyn MmlObjectApi>,
    worlds: Arc<dyn WebWorldApi>,
    screenshots: Option<Arc<ScreenshotService>>,
    // Read-modify-write of a document is serialized so concurrent edits never drop each other.
    edits: Mutex<()>,
}

impl WorldToolProtocol {
    pub fn new(objects: Arc<dyn MmlObjectApi>, worlds: Arc<dyn WebWorldApi>) -> Self {
        Self {
            objects,
            worlds,
            screenshots: None,
            edits: Mutex::new(()),
        }
    }

    pub fn with_screenshots(mut self, screenshots: Arc<ScreenshotService>) -> Self {
        self.screenshots = Some(screenshots);
        self
    }

    /// Every tool this protocol serves, in listing order.
    pub fn tool_metadata() -> Vec<ToolMetadata> {
        let world_id = |description: &str| {
            ToolParameter::new("worldId", ToolParameterType::String)
                .with_description(description)
                .required()
        };
        let element = || {
            ToolParameter::new("element", ToolParameterType::Object)
                .with_description("MML element: {tag, attributes, children?}")
                .with_properties(vec![
                    ToolParameter::new("tag", ToolParameterType::String)
                        .with_allowed_values(crate::mmlmcp::mml::MmlTag::ALL.iter().map(|t| t.as_str()))
                        .required(),
                    ToolParameter::new("attributes", ToolParameterType::Object)
                        .with_description("Attribute name to string, number or boolean value"),
                    ToolParameter::new("children", ToolParameterType::Array).with_description(
                        "Nested elements (m-group, or m-model inside m-character)",
                    ),
                ])
        };

        vec![
            ToolMetadata::new(
                CREATE_WORLD,
                "Create a new MML document with specified elements and interactivity. You should ALWAYS list all elements before creating the document. Once a document is ready, you should ALWAYS validate it before creating the document.",
            )
            .with_parameter(
                ToolParameter::new("title", ToolParameterType::String)
                    .with_description("Title/name for the MML document")
                    .required(),
            )
            .with_parameter(
                ToolParameter::new("elements", ToolParameterType::Array)
                    .with_description("Array of MML elements to include")
                    .with_items(element())
                    .required(),
            )
            .with_parameter(
                ToolParameter::new("script", ToolParameterType::String)
                    .with_description("Optional JavaScript code for interactivity"),
            ),
            ToolMetadata::new(
                UPDATE_ELEMENTS,
                "Perform a single operation to add, update, or delete an MML element in the scene. All elements must have unique IDs for operations.",
            )
            .with_parameter(world_id("ID of the web world to update"))
            .with_parameter(
                ToolParameter::new("operation", ToolParameterType::Object)
                    .with_description("The element operation to perform")
                    .with_properties(vec![
                        ToolParameter::new("action", ToolParameterType::String)
                            .with_allowed_values(["add", "update", "delete"])
                            .required(),
                        ToolParameter::new("elementId", ToolParameterType::String)
                            .with_description("Target element ID (update and delete)"),
                        element(),
                    ])
                    .required(),
            ),
            ToolMetadata::new(
                UPDATE_SCRIPT,
                "Update or remove the JavaScript code for world interactivity.",
            )
            .with_parameter(world_id("ID of the web world to update"))
            .with_parameter(
                ToolParameter::new("script", ToolParameterType::String)
                    .with_description("New JavaScript code; omit or leave empty to remove the script"),
            ),
            ToolMetadata::new(SCREENSHOT_WORLD, "Capture a screenshot of the current world")
                .with_parameter(world_id("ID of the web world to capture a screenshot of")),
            ToolMetadata::new(
                FETCH_MML_INFO,
                "Get detailed information about all available MML elements and their attributes",
            )
            .with_annotation("readOnlyHint", json!(true)),
        ]
    }

    async fn create_world(&self, args: CreateWorldArgs) -> ToolResult {
        match self.try_create_world(args).await {
            Ok(result) => result,
            Err(message) => ToolResult::error(format!("{} {}", ERROR_CREATING_DOCUMENT, message)),
        }
    }

    async fn try_create_world(&self, args: CreateWorldArgs) -> Result<ToolResult, String> {
        for element in &args.elements {
            element.validate()?;
        }
        let content = compose_scene_document(&args.title, &args.elements, args.script.as_deref());

        let object = self
            .objects
            .create_object(&MmlObjectRequest::new(args.title.clone(), content.clone()))
            .await
            .map_err(|e| e.to_string())?;

        let mut request = WorldRequest::with_document(
            args.title,
            object.id.clone(),
            MmlDocumentRef::from_url(object.url.clone()),
        );
        request.description = Some(object.id.clone());
        let created = self
            .worlds
            .create_world(&request)
            .await
            .map_err(|e| e.to_string())?;

        log::info!("Created world {} backed by object {}", created.world.id, object.id);
        Ok(ToolResult {
            content: vec![
                ToolContent::text(format!("Web world ID is: {}", created.world.id)),
                ToolContent::text(format!("Web world URL is: {}", created.url)),
                ToolContent::text(format!("MML document content: {}", content)),
            ],
            is_error: false,
        })
    }

    /// The world's backing object id and its current MML text.
    async fn load_document(&self, world_id: &str) -> Result<(String, String), String> {
        let world = self
            .worlds
            .get_world(world_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Can't find web world with ID {}", world_id))?;

        let object_id = world
            .mml_documents_configuration
            .primary()
            .map(|(key, _)| key.clone())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| format!("Can't find MML object ID for web world with ID {}", world_id))?;

        let object = self
            .objects
            .get_object(&object_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "Can't retrieve current MML content".to_string())?;

        Ok((object_id, object.source.text().to_string()))
    }

    async fn store_document(&self, object_id: &str, document: String) -> Result<(), String> {
        self.objects
            .update_object(object_id, &MmlObjectRequest::source_update(document))
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn update_elements(&self, args: UpdateElementsArgs) -> ToolResult {
        let _edit = self.edits.lock().await;
        let result = async {
            let (object_id, document) = self.load_document(&args.world_id).await?;
            let outcome = apply_operation(&document, &args.operation).map_err(|e| e.to_string())?;
            self.store_document(&object_id, outcome.document).await?;
            let verb = match args.operation {
                PatchOperation::Add { .. } => "Added",
                PatchOperation::Update { .. } => "Updated",
                PatchOperation::Delete { .. } => "Deleted",
            };
            Ok::<_, String>(format!(
                "Element operation completed successfully. {} element with ID: {}",
                verb, outcome.element_id
            ))
        }
        .await;

        match result {
            Ok(text) => ToolResult::text(text),
            Err(message) => {
                log::warn!("update-elements on {} failed: {}", args.world_id, message);
                ToolResult::error(format!("{} {}", ERROR_UPDATING_WORLD, message))
            }
        }
    }

    async fn update_script(&self, args: UpdateScriptArgs) -> ToolResult {
        let _edit = self.edits.lock().await;
        let script = args.script.as_deref().filter(|s| !s.trim().is_empty());
        let result = async {
            let (object_id, document) = self.load_document(&args.world_id).await?;
            self.store_document(&object_id, update_script(&document, script))
                .await
        }
        .await;

        match result {
            Ok(()) if script.is_some() => ToolResult::text("Updated script successfully."),
            Ok(()) => ToolResult::text("Removed script successfully."),
            Err(message) => {
                log::warn!("update-script on {} failed: {}", args.world_id, message);
                ToolResult::error(format!("{} {}", ERROR_UPDATING_WORLD, message))
            }
        }
    }

    async fn screenshot_world(&self, args: ScreenshotWorldArgs) -> ToolResult {
        let world = match self.worlds.get_world(&args.world_id).await {
            Ok(Some(world)) => world,
            Ok(None) => {
                return ToolResult::error(format!(
                    "{} Can't find web world with ID {}",
                    ERROR_UPDATING_WORLD, args.world_id
                ))
            }
            Err(e) => return ToolResult::error(format!("{} {}", ERROR_UPDATING_WORLD, e)),
        };
        let Some(screenshots) = &self.screenshots else {
            return ToolResult::error(format!(
                "{} screenshot service is not available",
                ERROR_CAPTURING_SCREENSHOT
            ));
        };

        let object_id = world
            .description
            .clone()
            .filter(|d| !d.is_empty())
            .or_else(|| {
                world
                    .mml_documents_configuration
                    .primary()
                    .map(|(key, _)| key.clone())
            })
            .unwrap_or_default();

        let captured = match screenshots.initialize().await {
            Ok(()) => screenshots.take_screenshot(&object_id).await,
            Err(e) => Err(e),
        };
        match captured {
            Ok(png) => ToolResult::text("Screenshot captured successfully!").with_content(ToolContent::png(
                base64::engine::general_purpose::STANDARD.encode(png),
            )),
            Err(e) => ToolResult::error(format!("{} {}", ERROR_CAPTURING_SCREENSHOT, e)),
        }
    }
}

#[async_trait]
impl ToolProtocol for WorldToolProtocol {
    async fn execute(
        &self,
        tool_name: &str,
        parameters: Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        log::debug!("Executing tool {}", tool_name);
        let result = match tool_name {
            CREATE_WORLD => self.create_world(parse_args(parameters)?).await,
            UPDATE_ELEMENTS => self.update_elements(parse_args(parameters)?).await,
            UPDATE_SCRIPT => self.update_script(parse_args(parameters)?).await,
            SCREENSHOT_WORLD => self.screenshot_world(parse_args(parameters)?).await,
            FETCH_MML_INFO => ToolResult::text(elements_reference_markdown()),
            other => return Err(Box::new(ToolError::NotFound(other.to_string()))),
        };
        Ok(result)
    }

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>> {
        Ok(Self::tool_metadata())
    }

    fn protocol_name(&self) -> &str {
        "mml-world-tools"
    }
}
