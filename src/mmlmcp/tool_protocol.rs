//! Tool protocol abstraction.
//!
//! Tools are exposed through the [`ToolProtocol`] trait: a protocol advertises [`ToolMetadata`]
//! for each tool it serves and executes calls by name. Results use the MCP content shape, so a
//! failed call is still a normal result with `isError: true` and a text block the calling agent
//! can read.
//!
//! ```text
//! MCP endpoint → ToolProtocol (trait) → WorldToolProtocol → clients / patch engine
//! ```
//!
//! # Example
//!
//! ```rust
//! use mmlmcp::tool_protocol::{ToolMetadata, ToolParameter, ToolParameterType};
//!
//! let metadata = ToolMetadata::new("update-script", "Replace the scene script")
//!     .with_parameter(
//!         ToolParameter::new("worldId", ToolParameterType::String)
//!             .with_description("The web world to update")
//!             .required(),
//!     );
//! let schema = metadata.input_schema();
//! assert_eq!(schema["required"][0], "worldId");
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

/// One block of tool output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    /// Base64 encoded image bytes.
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        ToolContent::Text { text: text.into() }
    }

    pub fn png(base64_data: impl Into<String>) -> Self {
        ToolContent::Image {
            data: base64_data.into(),
            mime_type: "image/png".to_string(),
        }
    }
}

/// The result of a tool call: `{content:[...], isError}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    /// Successful result with one text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            is_error: false,
        }
    }

    /// Failed result with one text block explaining why.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(message)],
            is_error: true,
        }
    }

    pub fn with_content(mut self, content: ToolContent) -> Self {
        self.content.push(content);
        self
    }

    /// Concatenated text of every text block, one per line.
    pub fn text_output(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolContent::Text { text } => Some(text.as_str()),
                ToolContent::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// JSON type of a tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

/// A tool parameter. Nested `items` / `properties` describe arrays and objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
    /// Allowed values for string parameters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,
    /// For arrays, the schema of one item.
    pub items: Option<Box<ToolParameter>>,
    /// For objects, the nested properties.
    pub properties: Option<Vec<ToolParameter>>,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
            allowed_values: Vec::new(),
            items: None,
            properties: None,
        }
    }

    /// Add a human readable description that will surface in generated schemas.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the argument as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Restrict a string parameter to a fixed set of values.
    pub fn with_allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// For array parameters, describe one item.
    pub fn with_items(mut self, item: ToolParameter) -> Self {
        self.items = Some(Box::new(item));
        self
    }

    /// For object parameters, describe the nested properties.
    pub fn with_properties(mut self, properties: Vec<ToolParameter>) -> Self {
        self.properties = Some(properties);
        self
    }

    /// JSON Schema fragment for this parameter.
    pub fn to_json_schema(&self) -> Value {
        let mut schema = Map::new();
        schema.insert("type".into(), json!(self.param_type));
        if let Some(description) = &self.description {
            schema.insert("description".into(), json!(description));
        }
        if !self.allowed_values.is_empty() {
            schema.insert("enum".into(), json!(self.allowed_values));
        }
        if let Some(items) = &self.items {
            schema.insert("items".into(), items.to_json_schema());
        }
        if let Some(properties) = &self.properties {
            let object = object_schema(properties);
            schema.insert("properties".into(), object["properties"].clone());
            if let Some(required) = object.get("required") {
                schema.insert("required".into(), required.clone());
            }
        }
        Value::Object(schema)
    }
}

fn object_schema(parameters: &[ToolParameter]) -> Value {
    let properties: Map<String, Value> = parameters
        .iter()
        .map(|p| (p.name.clone(), p.to_json_schema()))
        .collect();
    let required: Vec<&str> = parameters
        .iter()
        .filter(|p| p.required)
        .map(|p| p.name.as_str())
        .collect();

    let mut schema = json!({ "type": "object", "properties": properties });
    if !required.is_empty() {
        schema["required"] = json!(required);
    }
    schema
}

/// Metadata about a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
    /// Extra MCP annotations (e.g. `title`, `readOnlyHint`).
    pub annotations: BTreeMap<String, Value>,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            annotations: BTreeMap::new(),
        }
    }

    /// Append a parameter definition to the tool metadata.
    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: Value) -> Self {
        self.annotations.insert(key.into(), value);
        self
    }

    /// `{type:"object", properties, required}` built from the parameters.
    pub fn input_schema(&self) -> Value {
        object_schema(&self.parameters)
    }

    /// The entry `tools/list` returns for this tool.
    pub fn to_mcp_tool(&self) -> Value {
        let mut tool = json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema(),
        });
        if !self.annotations.is_empty() {
            tool["annotations"] = json!(self.annotations);
        }
        tool
    }
}

/// Trait for implementing tool execution protocols
#[async_trait]
pub trait ToolProtocol: Send + Sync {
    /// Execute a tool with the given parameters.
    ///
    /// Application failures are reported as `Ok` results with `is_error` set; `Err` is for
    /// calls the protocol cannot dispatch at all.
    async fn execute(
        &self,
        tool_name: &str,
        parameters: Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>>;

    /// Get metadata about available tools
    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>>;

    /// Get metadata about a specific tool
    async fn get_tool_metadata(
        &self,
        tool_name: &str,
    ) -> Result<ToolMetadata, Box<dyn Error + Send + Sync>> {
        self.list_tools()
            .await?
            .into_iter()
            .find(|t| t.name == tool_name)
            .ok_or_else(|| ToolError::NotFound(tool_name.to_string()).into())
    }

    /// Protocol identifier
    fn protocol_name(&self) -> &str;

    async fn initialize(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}

/// Error types for tool operations
#[derive(Debug, Clone, PartialEq)]
pub enum ToolError {
    /// Requested tool is not served by this protocol.
    NotFound(String),
    /// Tool execution failed before it could produce a result.
    ExecutionFailed(String),
    /// The provided JSON parameters failed validation or deserialization.
    InvalidParameters(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "Unknown tool: {}", name),
            ToolError::ExecutionFailed(msg) => write!(f, "Tool execution failed: {}", msg),
            ToolError::InvalidParameters(msg) => write!(f, "Invalid parameters: {}", msg),
        }
    }
}

impl Error for ToolError {}
