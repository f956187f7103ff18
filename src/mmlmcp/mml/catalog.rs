//! Reference data for every MML element the engine renders.

use crate::mmlmcp::mml::element::MmlTag;

/// Documentation entry for one element.
pub struct ElementInfo {
    pub tag: MmlTag,
    pub description: &'static str,
    /// `(attribute, description)` pairs, most commonly used first.
    pub attributes: &'static [(&'static str, &'static str)],
}

const POSITION: [(&str, &str); 3] = [
    ("x", "Position along X-axis in meters"),
    ("y", "Position along Y-axis in meters"),
    ("z", "Position along Z-axis in meters"),
];

pub const ELEMENTS: &[ElementInfo] = &[
    ElementInfo {
        tag: MmlTag::Cube,
        description: "A box primitive with configurable size, color and collision.",
        attributes: &[
            ("color", "Color value (e.g., 'red', '#FF0000', 'rgb(255,0,0)')"),
            ("width", "Size along X-axis in meters"),
            ("height", "Size along Y-axis in meters"),
            ("depth", "Size along Z-axis in meters"),
            ("opacity", "Opacity from 0 (transparent) to 1 (opaque)"),
            ("collide", "Whether object participates in collision detection"),
            POSITION[0],
            POSITION[1],
            POSITION[2],
            ("rx, ry, rz", "Rotation around each axis in degrees"),
            ("sx, sy, sz", "Scale along each axis"),
            ("id", "Unique identifier for the element"),
            ("visible", "Whether element is visible"),
            ("onclick", "Script expression executed when clicked"),
        ],
    },
    ElementInfo {
        tag: MmlTag::Sphere,
        description: "A sphere primitive.",
        attributes: &[
            ("radius", "Radius of the sphere in meters (default 0.5)"),
            ("color", "Color value"),
            ("opacity", "Opacity from 0 to 1"),
            ("collide", "Whether object participates in collision detection"),
            POSITION[0],
            POSITION[1],
            POSITION[2],
            ("rx, ry, rz", "Rotation around each axis in degrees"),
            ("id", "Unique identifier for the element"),
            ("onclick", "Script expression executed when clicked"),
        ],
    },
    ElementInfo {
        tag: MmlTag::Cylinder,
        description: "A cylinder primitive.",
        attributes: &[
            ("radius", "Radius of the cylinder base in meters"),
            ("height", "Height of the cylinder in meters"),
            ("color", "Color value"),
            ("opacity", "Opacity from 0 to 1"),
            ("collide", "Whether object participates in collision detection"),
            POSITION[0],
            POSITION[1],
            POSITION[2],
            ("rx, ry, rz", "Rotation around each axis in degrees"),
            ("id", "Unique identifier for the element"),
        ],
    },
    ElementInfo {
        tag: MmlTag::Model,
        description: "Loads a 3D model (glTF/GLB) from a URL.",
        attributes: &[
            ("src", "URL or path to the 3D model file"),
            ("collide", "Whether object participates in collision detection"),
            POSITION[0],
            POSITION[1],
            POSITION[2],
            ("rx, ry, rz", "Rotation around each axis in degrees"),
            ("sx, sy, sz", "Scale along each axis"),
            ("id", "Unique identifier for the element"),
        ],
    },
    ElementInfo {
        tag: MmlTag::Group,
        description: "Groups child elements so they move, rotate and scale together.",
        attributes: &[
            POSITION[0],
            POSITION[1],
            POSITION[2],
            ("rx, ry, rz", "Rotation around each axis in degrees"),
            ("sx, sy, sz", "Scale along each axis"),
            ("id", "Unique identifier for the element"),
            ("visible", "Whether element is visible"),
        ],
    },
    ElementInfo {
        tag: MmlTag::Light,
        description: "A light source. Scenes without one render black.",
        attributes: &[
            ("type", "Light type: point, spotlight or directional"),
            ("intensity", "Light intensity value in candela (default 200)"),
            ("color", "Light color value"),
            POSITION[0],
            POSITION[1],
            POSITION[2],
            ("rx, ry, rz", "Rotation around each axis in degrees"),
            ("id", "Unique identifier for the element"),
        ],
    },
    ElementInfo {
        tag: MmlTag::Character,
        description: "An avatar-style character; accepts m-model children for composition.",
        attributes: &[
            ("src", "URL or path to the character model file"),
            POSITION[0],
            POSITION[1],
            POSITION[2],
            ("rx, ry, rz", "Rotation around each axis in degrees"),
            ("sx, sy, sz", "Scale along each axis"),
            ("id", "Unique identifier for the element"),
        ],
    },
    ElementInfo {
        tag: MmlTag::Video,
        description: "Plays a video on a plane in the scene.",
        attributes: &[
            ("src", "URL or path to the video file"),
            ("width", "Width of the video plane in meters"),
            ("height", "Height of the video plane in meters"),
            ("loop", "Whether video should loop"),
            ("autoplay", "Whether video should autoplay"),
            POSITION[0],
            POSITION[1],
            POSITION[2],
            ("id", "Unique identifier for the element"),
        ],
    },
    ElementInfo {
        tag: MmlTag::Audio,
        description: "Positional audio source.",
        attributes: &[
            ("src", "URL or path to the audio file"),
            ("loop", "Whether audio should loop"),
            ("autoplay", "Whether audio should autoplay"),
            ("volume", "Audio volume from 0 to 1"),
            POSITION[0],
            POSITION[1],
            POSITION[2],
            ("id", "Unique identifier for the element"),
        ],
    },
    ElementInfo {
        tag: MmlTag::Label,
        description: "A text plane; the text attribute is also written as inner content.",
        attributes: &[
            ("text", "Text content to display"),
            ("color", "Text color value"),
            ("font-size", "Font size in pixels"),
            ("width", "Width of the text plane in meters"),
            ("height", "Height of the text plane in meters"),
            POSITION[0],
            POSITION[1],
            POSITION[2],
            ("id", "Unique identifier for the element"),
        ],
    },
];

/// Look up the catalog entry for `tag`.
pub fn element_info(tag: MmlTag) -> Option<&'static ElementInfo> {
    ELEMENTS.iter().find(|info| info.tag == tag)
}

/// Markdown reference of every element, as returned by the `fetch-mml-info` tool.
pub fn elements_reference_markdown() -> String {
    let sections = ELEMENTS
        .iter()
        .map(|info| {
            let attributes = info
                .attributes
                .iter()
                .map(|(name, desc)| format!("  • **{}**: {}", name, desc))
                .collect::<Vec<_>>()
                .join("\n");
            let example = info
                .attributes
                .iter()
                .take(2)
                .map(|(name, _)| format!(" {}=\"value\"", name))
                .collect::<String>();
            format!(
                "## {tag}\n\n**Description**: {desc}\n\n**Attributes**:\n{attrs}\n\n**Example**:\n```html\n<{tag} id=\"example\"{example}></{tag}>\n```",
                tag = info.tag,
                desc = info.description,
                attrs = attributes,
                example = example
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    format!(
        "# Complete MML Elements Reference\n\n\
         This is a comprehensive list of all available MML elements and their attributes:\n\n\
         {}\n\n\
         ## Usage Notes:\n\
         - All elements support positioning with **x**, **y**, **z** attributes (in meters)\n\
         - Most elements support rotation with **rx**, **ry**, **rz** attributes (in degrees)\n\
         - Many elements support scaling with **sx**, **sy**, **sz** attributes\n\
         - Use **id** attribute to reference elements in scripts and in update/delete operations\n\
         - Colors can be specified as names ('red'), hex codes ('#FF0000'), or RGB values ('rgb(255,0,0)')\n\
         - Interactive elements support **onclick** attribute for click handlers",
        sections
    )
}
