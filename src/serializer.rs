//! Markdown serialization of pictures and their annotations.
//!
//! The external converter owns everything *around* the pictures; this
//! module owns the picture blocks themselves. A picture block is one image
//! tag line followed by zero or more annotation lines, joined by the
//! configured separator:
//!
//! ```text
//! ![Image|Left|700](images/image_000003_9f2c….png)
//! > Picture Description: A bar chart comparing quarterly revenue.
//! Picture Types: bar_chart, chart
//! ```
//!
//! The formatter is expressed as composition rather than inheritance: it
//! takes a base-rendered tag plus annotation data and returns text, fully
//! decoupled from whatever produced the base tag.

use crate::config::AnnotateConfig;
use crate::document::{DocItem, Document, PictureAnnotation, PictureElement};
use once_cell::sync::Lazy;
use regex::Regex;

// The base tag must be a single full-line image tag. Character classes
// (no `]` in alt, no `)` in location) keep lines carrying several tags or
// an unbalanced paren from matching — those pass through unmodified.
static RE_IMAGE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^!\[([^\]]*)\]\(([^)]*)\)$").unwrap());

/// Rewrite a conventional `![alt](location)` tag so the alt text becomes the
/// pipe-delimited triple `Image|<alignment>|<width>`, preserving the
/// location unchanged.
///
/// A base tag that does not match the expected single-image-per-line form is
/// returned as-is; malformed input degrades gracefully, never errors.
pub fn rewrite_image_tag(base_tag: &str, alignment: &str, width: &str) -> String {
    match RE_IMAGE_TAG.captures(base_tag) {
        Some(caps) => format!("![Image|{}|{}]({})", alignment, width, &caps[2]),
        None => base_tag.to_string(),
    }
}

/// Render one annotation to its Markdown line, or `None` when the
/// configured policy drops it (or filtering leaves nothing to print).
fn format_annotation(annotation: &PictureAnnotation, config: &AnnotateConfig) -> Option<String> {
    match annotation {
        PictureAnnotation::Description(text) => {
            if config.render_descriptions {
                Some(format!("> Picture Description: {text}"))
            } else {
                None
            }
        }
        PictureAnnotation::Classification(classes) => {
            if !config.render_classifications {
                return None;
            }
            let names: Vec<&str> = classes
                .iter()
                .map(|c| c.class_name.as_str())
                .filter(|n| !n.is_empty())
                .collect();
            if names.is_empty() {
                None
            } else {
                Some(format!("Picture Types: {}", names.join(", ")))
            }
        }
    }
}

/// Render one picture element into its Markdown block.
///
/// Pure transformation over supplied data — no I/O, no mutation. A picture
/// without a resolved reference contributes only its annotation lines; the
/// image tag is simply omitted.
pub fn format_picture(picture: &PictureElement, config: &AnnotateConfig) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(1 + picture.annotations.len());

    if let Some(ref image_ref) = picture.reference {
        let base_tag = format!("![Image]({})", image_ref.location());
        parts.push(rewrite_image_tag(&base_tag, &config.alignment, &config.width));
    }

    // Annotation order follows the order they were attached upstream.
    for annotation in &picture.annotations {
        if let Some(line) = format_annotation(annotation, config) {
            parts.push(line);
        }
    }

    parts.join(&config.separator)
}

/// Serialize a whole document: text blocks pass through verbatim, picture
/// blocks render through [`format_picture`], blocks are joined by blank
/// lines, and the result ends with exactly one newline.
pub fn serialize_document(doc: &Document, config: &AnnotateConfig) -> String {
    let blocks: Vec<String> = doc
        .items
        .iter()
        .map(|item| match item {
            DocItem::Text(text) => text.clone(),
            DocItem::Picture(picture) => format_picture(picture, config),
        })
        .filter(|block| !block.is_empty())
        .collect();

    let mut out = blocks.join("\n\n");
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    out.push('\n');
    out
}
