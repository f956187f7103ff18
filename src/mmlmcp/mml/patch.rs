//! Text-level patching of MML documents.
//!
//! The engine never builds a DOM. Each operation is a deterministic transformation of the
//! document text: it either returns the complete new text or rejects with a [`PatchError`] and
//! leaves the input untouched. Callers persist only successful results.
//!
//! Id handling is deliberately loose: [`extract_ids`] picks up every `id="..."` in the text,
//! including ones inside comments and scripts, since it only guards against collisions.

use crate::mmlmcp::mml::element::{MmlElement, MmlTag};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

lazy_static! {
    static ref ID_ATTRIBUTE: Regex = Regex::new(r#"id="([^"]+)""#).unwrap();
    static ref SCENE_OPEN_TAG: Regex = Regex::new(r#"(?i)<m-group[^>]*id="scene"[^>]*>"#).unwrap();
    static ref GROUP_TAG: Regex = Regex::new(r"(?i)<(/?)m-group\b[^>]*>").unwrap();
    static ref SCRIPT_BLOCK_GREEDY: Regex = Regex::new(r"(?s)<script>.*</script>").unwrap();
    static ref SCRIPT_BLOCK: Regex = Regex::new(r"(?s)<script>.*?</script>").unwrap();
}

/// One element-level edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum PatchOperation {
    Add {
        #[serde(default)]
        element: Option<MmlElement>,
    },
    Update {
        #[serde(default, rename = "elementId")]
        element_id: Option<String>,
        #[serde(default)]
        element: Option<MmlElement>,
    },
    Delete {
        #[serde(default, rename = "elementId")]
        element_id: Option<String>,
    },
}

impl PatchOperation {
    pub fn action(&self) -> &'static str {
        match self {
            PatchOperation::Add { .. } => "add",
            PatchOperation::Update { .. } => "update",
            PatchOperation::Delete { .. } => "delete",
        }
    }
}

/// Why an operation was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PatchError {
    #[error("element is required for {0} operation")]
    MissingElement(&'static str),

    #[error("elementId is required for {0} operation")]
    MissingElementId(&'static str),

    #[error("Element with ID '{0}' already exists")]
    DuplicateId(String),

    #[error("Element with ID '{0}' not found")]
    IdNotFound(String),

    /// The id exists in the text but no element of the expected shape carries it.
    #[error("Could not find element with ID '{id}' to {action}")]
    StructuralMismatch { action: &'static str, id: String },

    #[error("Invalid element: {0}")]
    InvalidElement(String),
}

/// What a successful [`apply_operation`] did.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchOutcome {
    pub document: String,
    /// Id of the element that was added, updated or deleted.
    pub element_id: String,
}

/// Every value of an `id="..."` attribute anywhere in the text.
pub fn extract_ids(document: &str) -> HashSet<String> {
    ID_ATTRIBUTE
        .captures_iter(document)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Lowest `"<prefix>-<n>"` (n starting at 1) not already in `existing`.
pub fn generate_unique_id(existing: &HashSet<String>, prefix: &str) -> String {
    (1u64..)
        .map(|n| format!("{}-{}", prefix, n))
        .find(|candidate| !existing.contains(candidate))
        .unwrap_or_else(|| format!("{}-{}", prefix, existing.len() + 1))
}

/// Apply one operation, returning the new document text.
pub fn apply_operation(document: &str, operation: &PatchOperation) -> Result<PatchOutcome, PatchError> {
    let existing = extract_ids(document);

    match operation {
        PatchOperation::Add { element } => {
            let mut element = element.clone().ok_or(PatchError::MissingElement("add"))?;
            element.validate().map_err(PatchError::InvalidElement)?;
            if let Some(id) = element.id().filter(|id| existing.contains(id)) {
                return Err(PatchError::DuplicateId(id));
            }
            let incoming = extract_ids(&element.render());
            if let Some(taken) = incoming.iter().filter(|id| existing.contains(*id)).min() {
                return Err(PatchError::DuplicateId(taken.clone()));
            }
            let id = match element.id() {
                Some(id) => id,
                None => {
                    let reserved: HashSet<String> = existing.union(&incoming).cloned().collect();
                    let id = generate_unique_id(&reserved, element.tag.id_prefix());
                    element.set_id(id.clone());
                    id
                }
            };
            Ok(PatchOutcome {
                document: insert_element(document, &element.render()),
                element_id: id,
            })
        }

        PatchOperation::Update {
            element_id,
            element,
        } => {
            let id = element_id
                .as_deref()
                .filter(|id| !id.is_empty())
                .ok_or(PatchError::MissingElementId("update"))?;
            let mut replacement = element.clone().ok_or(PatchError::MissingElement("update"))?;
            replacement.validate().map_err(PatchError::InvalidElement)?;
            if !existing.contains(id) {
                return Err(PatchError::IdNotFound(id.to_string()));
            }
            replacement.set_id(id);
            Ok(PatchOutcome {
                document: replace_element(document, replacement.tag, id, &replacement.render())?,
                element_id: id.to_string(),
            })
        }

        PatchOperation::Delete { element_id } => {
            let id = element_id
                .as_deref()
                .filter(|id| !id.is_empty())
                .ok_or(PatchError::MissingElementId("delete"))?;
            if !existing.contains(id) {
                return Err(PatchError::IdNotFound(id.to_string()));
            }
            Ok(PatchOutcome {
                document: remove_element(document, id)?,
                element_id: id.to_string(),
            })
        }
    }
}

/// Replace the document's script.
///
/// The first `<script>...</script>` block is removed. A script that is non-empty after trimming
/// is then appended as a fresh block; an empty or missing one leaves the document script-free.
pub fn update_script(document: &str, script: Option<&str>) -> String {
    let stripped = SCRIPT_BLOCK.replace(document, "").into_owned();
    match script {
        Some(s) if !s.trim().is_empty() => {
            format!("{}\n\n<script>\n{}\n</script>", stripped.trim(), s)
        }
        _ => stripped,
    }
}

/// Splice rendered markup as the last child of the scene root.
///
/// Without a scene root the markup goes before the script block, or at the very end.
fn insert_element(document: &str, markup: &str) -> String {
    if let Some((open_start, open_end, close_start, close_end)) = find_scene_root(document) {
        let open = &document[open_start..open_end];
        let inner = document[open_end..close_start].trim();
        let close = &document[close_start..close_end];
        return format!(
            "{}{}\n  {}\n  {}\n{}{}",
            &document[..open_start],
            open,
            inner,
            markup,
            close,
            &document[close_end..]
        );
    }

    if let Some(script) = SCRIPT_BLOCK_GREEDY.find(document) {
        return format!(
            "{}{}\n\n{}{}",
            &document[..script.start()],
            markup,
            script.as_str(),
            &document[script.end()..]
        );
    }

    format!("{}\n{}", document, markup)
}

/// Byte ranges of the scene root's open tag and its matching close tag.
///
/// Nested `m-group`s are balanced so an inner group's close tag never ends the scene early.
fn find_scene_root(document: &str) -> Option<(usize, usize, usize, usize)> {
    let open = SCENE_OPEN_TAG.find(document)?;
    if open.as_str().ends_with("/>") {
        return None;
    }

    let mut depth = 1usize;
    for tag in GROUP_TAG.captures_iter(&document[open.end()..]) {
        let whole = tag.get(0)?;
        if &tag[1] == "/" {
            depth -= 1;
            if depth == 0 {
                let start = open.end() + whole.start();
                return Some((open.start(), open.end(), start, open.end() + whole.end()));
            }
        } else if !whole.as_str().ends_with("/>") {
            depth += 1;
        }
    }
    None
}

/// Replace every `<tag ... id="id" ...>...</tag>` span with `markup`.
///
/// Only elements of the replacement's own tag match; an element of another tag sharing the id
/// is left alone and the update is rejected. The close tag is found by balancing nested tags of
/// the same name, so a container's whole subtree is replaced.
fn replace_element(document: &str, tag: MmlTag, id: &str, markup: &str) -> Result<String, PatchError> {
    let mismatch = || PatchError::StructuralMismatch {
        action: "update",
        id: id.to_string(),
    };

    let open_pattern = format!(
        r#"<{tag}[^>]*id="{id}"[^>]*>"#,
        tag = regex::escape(tag.as_str()),
        id = regex::escape(id)
    );
    let open_re = Regex::new(&open_pattern).map_err(|_| mismatch())?;

    let mut output = String::with_capacity(document.len());
    let mut cursor = 0;
    for open in open_re.find_iter(document) {
        if open.start() < cursor {
            continue;
        }
        let end = if open.as_str().ends_with("/>") {
            open.end()
        } else {
            match matching_close_end(document, open.end(), tag.as_str()) {
                Some(end) => end,
                None => continue,
            }
        };
        output.push_str(&document[cursor..open.start()]);
        output.push_str(markup);
        cursor = end;
    }

    if cursor == 0 {
        return Err(mismatch());
    }
    output.push_str(&document[cursor..]);
    Ok(output)
}

/// Remove the first element whose open tag carries `id`, with its whole subtree and the
/// whitespace on both sides.
fn remove_element(document: &str, id: &str) -> Result<String, PatchError> {
    let mismatch = || PatchError::StructuralMismatch {
        action: "delete",
        id: id.to_string(),
    };

    let open_pattern = format!(r#"<([A-Za-z][A-Za-z0-9-]*)\b[^>]*id="{}"[^>]*>"#, regex::escape(id));
    let open_re = Regex::new(&open_pattern).map_err(|_| mismatch())?;
    let open = open_re.captures(document).ok_or_else(mismatch)?;
    let open_match = open.get(0).ok_or_else(mismatch)?;
    let tag_name = open[1].to_string();

    let end = if open_match.as_str().ends_with("/>") {
        open_match.end()
    } else {
        matching_close_end(document, open_match.end(), &tag_name).ok_or_else(mismatch)?
    };

    let start = document[..open_match.start()].trim_end().len();
    let tail = &document[end..];
    let resume = end + (tail.len() - tail.trim_start().len());

    Ok(format!("{}{}", &document[..start], &document[resume..]))
}

/// End offset of the close tag balancing an open `<tag_name ...>` that ends at `from`.
fn matching_close_end(document: &str, from: usize, tag_name: &str) -> Option<usize> {
    let tag_re = Regex::new(&format!(r"(?i)<(/?){}\b[^>]*>", regex::escape(tag_name))).ok()?;

    let mut depth = 1usize;
    for tag in tag_re.captures_iter(&document[from..]) {
        let whole = tag.get(0)?;
        if &tag[1] == "/" {
            depth -= 1;
            if depth == 0 {
                return Some(from + whole.end());
            }
        } else if !whole.as_str().ends_with("/>") {
            depth += 1;
        }
    }
    None
}
