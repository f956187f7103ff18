//! The MML patch engine: structured elements, rendering, and text-level document edits.

pub mod catalog;
pub mod element;
pub mod patch;

pub use element::{
    compose_scene_document, has_light, AttributeValue, Attributes, MmlElement, MmlTag,
};
pub use patch::{
    apply_operation, extract_ids, generate_unique_id, update_script, PatchError, PatchOperation,
    PatchOutcome,
};
