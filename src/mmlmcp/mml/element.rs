//! Structured MML elements and their rendering to markup.
//!
//! An [`MmlElement`] is the pre-render description a tool caller supplies: a tag from the closed
//! set in [`MmlTag`], a flat ordered attribute map, and (for `m-group` / `m-character` only)
//! children. Rendering is a plain string build; attribute values are written verbatim without
//! escaping, so a value containing `"` produces broken markup.
//!
//! ```rust
//! use mmlmcp::mml::{MmlElement, MmlTag};
//!
//! let cube = MmlElement::new(MmlTag::Cube)
//!     .with_attribute("id", "crate")
//!     .with_attribute("color", "red")
//!     .with_attribute("y", 1);
//! assert_eq!(cube.render(), r#"<m-cube id="crate" color="red" y="1"></m-cube>"#);
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Comment written above the synthetic light added to scenes that have none.
pub const DEFAULT_LIGHTING_COMMENT: &str = "<!-- Default lighting to prevent black scenes -->";

/// Markup of the synthetic light added to scenes that have none.
pub const DEFAULT_LIGHT_MARKUP: &str =
    r#"<m-light type="directional" intensity="500" color="white" x="2" y="5" z="2"></m-light>"#;

/// The closed set of element tags the engine knows how to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MmlTag {
    #[serde(rename = "m-cube")]
    Cube,
    #[serde(rename = "m-sphere")]
    Sphere,
    #[serde(rename = "m-cylinder")]
    Cylinder,
    #[serde(rename = "m-model")]
    Model,
    #[serde(rename = "m-group")]
    Group,
    #[serde(rename = "m-light")]
    Light,
    #[serde(rename = "m-character")]
    Character,
    #[serde(rename = "m-video")]
    Video,
    #[serde(rename = "m-audio")]
    Audio,
    #[serde(rename = "m-label")]
    Label,
}

impl MmlTag {
    pub const ALL: [MmlTag; 10] = [
        MmlTag::Cube,
        MmlTag::Sphere,
        MmlTag::Cylinder,
        MmlTag::Model,
        MmlTag::Group,
        MmlTag::Light,
        MmlTag::Character,
        MmlTag::Video,
        MmlTag::Audio,
        MmlTag::Label,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MmlTag::Cube => "m-cube",
            MmlTag::Sphere => "m-sphere",
            MmlTag::Cylinder => "m-cylinder",
            MmlTag::Model => "m-model",
            MmlTag::Group => "m-group",
            MmlTag::Light => "m-light",
            MmlTag::Character => "m-character",
            MmlTag::Video => "m-video",
            MmlTag::Audio => "m-audio",
            MmlTag::Label => "m-label",
        }
    }

    /// Prefix for generated ids: the tag name without `m-`.
    pub fn id_prefix(self) -> &'static str {
        &self.as_str()[2..]
    }

    pub fn accepts_children(self) -> bool {
        matches!(self, MmlTag::Group | MmlTag::Character)
    }
}

impl fmt::Display for MmlTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scalar attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl AttributeValue {
    /// `false`, `0` and `""` are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            AttributeValue::Bool(b) => *b,
            AttributeValue::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
            AttributeValue::Text(s) => !s.is_empty(),
        }
    }

    /// Text as it appears between the quotes of `key="..."`.
    pub fn to_markup(&self) -> String {
        match self {
            AttributeValue::Bool(b) => b.to_string(),
            AttributeValue::Text(s) => s.clone(),
            AttributeValue::Number(n) => match n.as_f64() {
                // Whole floats print without a fractional part (`2.0` -> `2`).
                Some(f) if !n.is_i64() && !n.is_u64() && f.fract() == 0.0 && f.abs() < 1e15 => {
                    format!("{}", f as i64)
                }
                _ => n.to_string(),
            },
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Number(value.into())
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        AttributeValue::Number(i64::from(value).into())
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        serde_json::Number::from_f64(value)
            .map(AttributeValue::Number)
            .unwrap_or_else(|| AttributeValue::Text(value.to_string()))
    }
}

/// Ordered attribute map; insertion order is render order.
pub type Attributes = IndexMap<String, AttributeValue>;

/// A structured element prior to rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmlElement {
    pub tag: MmlTag,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MmlElement>,
}

impl MmlElement {
    pub fn new(tag: MmlTag) -> Self {
        Self {
            tag,
            attributes: Attributes::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: MmlElement) -> Self {
        self.children.push(child);
        self
    }

    /// The element's `id`, if set to a non-empty value.
    pub fn id(&self) -> Option<String> {
        self.attributes
            .get("id")
            .map(AttributeValue::to_markup)
            .filter(|id| !id.is_empty())
    }

    /// Set `id`, keeping its position if the attribute already exists.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.attributes
            .insert("id".to_string(), AttributeValue::Text(id.into()));
    }

    /// Check the structural rules a serde decode cannot express.
    ///
    /// Only `m-group` and `m-character` may carry children, and `m-character` children must be
    /// `m-model` elements.
    pub fn validate(&self) -> Result<(), String> {
        if !self.children.is_empty() && !self.tag.accepts_children() {
            return Err(format!("{} does not support children", self.tag));
        }
        if self.tag == MmlTag::Character {
            if let Some(bad) = self.children.iter().find(|c| c.tag != MmlTag::Model) {
                return Err(format!("m-character children must be m-model, found {}", bad.tag));
            }
        }
        self.children.iter().try_for_each(MmlElement::validate)
    }

    /// Render to markup.
    pub fn render(&self) -> String {
        self.render_at(0)
    }

    fn render_at(&self, depth: usize) -> String {
        let tag = self.tag.as_str();
        let attrs = self
            .attributes
            .iter()
            .map(|(key, value)| format!("{}=\"{}\"", key, value.to_markup()))
            .collect::<Vec<_>>()
            .join(" ");
        let open = if attrs.is_empty() {
            format!("<{}>", tag)
        } else {
            format!("<{} {}>", tag, attrs)
        };
        let close = format!("</{}>", tag);

        let inner_indent = format!("\n{}", "  ".repeat(depth + 2));
        let close_indent = format!("\n{}", "  ".repeat(depth + 1));

        let mut content = String::new();
        if self.tag == MmlTag::Label {
            if let Some(text) = self.attributes.get("text").filter(|t| t.is_truthy()) {
                content.push_str(&text.to_markup());
            }
        }
        if !self.children.is_empty() {
            let children = self
                .children
                .iter()
                .map(|child| child.render_at(depth + 1))
                .collect::<Vec<_>>()
                .join(&inner_indent);
            if !content.is_empty() {
                content.push_str(&inner_indent);
            }
            content.push_str(&children);
        }

        if content.is_empty() {
            format!("{}{}", open, close)
        } else {
            format!("{}{}{}{}{}", open, inner_indent, content, close_indent, close)
        }
    }
}

/// Whether any element in the tree, at any depth, is an `m-light`.
pub fn has_light(elements: &[MmlElement]) -> bool {
    elements
        .iter()
        .any(|e| e.tag == MmlTag::Light || has_light(&e.children))
}

/// Assemble a new scene document.
///
/// Elements are wrapped in the `<m-group id="scene">` root. A directional light is appended
/// inside the root when the tree has no light of its own, and a non-empty script is placed in a
/// trailing `<script>` block.
pub fn compose_scene_document(title: &str, elements: &[MmlElement], script: Option<&str>) -> String {
    let body = elements
        .iter()
        .map(MmlElement::render)
        .collect::<Vec<_>>()
        .join("\n  ");
    let lighting = if has_light(elements) {
        String::new()
    } else {
        format!("\n  {}\n  {}", DEFAULT_LIGHTING_COMMENT, DEFAULT_LIGHT_MARKUP)
    };
    let script_block = match script {
        Some(s) if !s.is_empty() => format!("<script>\n{}\n</script>", s),
        _ => String::new(),
    };

    format!(
        "<!-- {} -->\n<m-group id=\"scene\">\n  {}{}\n</m-group>\n\n{}",
        title, body, lighting, script_block
    )
}
