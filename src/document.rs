//! Data model for a converted document and its extracted pictures.
//!
//! The conversion pipeline itself (layout analysis, OCR, vision-model
//! description) lives in the external converter; this crate only consumes
//! its output. A [`Document`] is therefore deliberately simple: already
//! serialized text blocks interleaved with [`PictureElement`]s in reading
//! order. Pictures are the only items this crate transforms — everything
//! else passes through untouched.

use image::DynamicImage;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// A converted document: text blocks and pictures in reading order.
#[derive(Debug, Default)]
pub struct Document {
    pub items: Vec<DocItem>,
}

impl Document {
    /// Number of picture items.
    pub fn picture_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i, DocItem::Picture(_)))
            .count()
    }

    /// Mutable iterator over picture items, in document order.
    pub fn pictures_mut(&mut self) -> impl Iterator<Item = &mut PictureElement> {
        self.items.iter_mut().filter_map(|i| match i {
            DocItem::Picture(p) => Some(p),
            DocItem::Text(_) => None,
        })
    }
}

/// One item of a converted document.
#[derive(Debug)]
pub enum DocItem {
    /// A block of already-serialized Markdown text, owned by the external
    /// serializer. Passed through verbatim.
    Text(String),
    /// An extracted picture.
    Picture(PictureElement),
}

/// One image extracted from a source document.
///
/// Produced by the external conversion step; read once during placement and
/// serialization. The only mutation this crate performs is attaching the
/// resolved [`ImageRef`] after placement.
#[derive(Debug)]
pub struct PictureElement {
    /// Sequential position among the document's items (0-based).
    pub index: usize,
    /// Decoded picture content.
    pub image: DynamicImage,
    /// Content-derived hex hash — a stable identifier for the picture.
    /// Identical content always yields the identical hash, which makes
    /// re-runs produce identical file names.
    pub hash: String,
    /// Annotations attached by the external pipeline, in attachment order.
    pub annotations: Vec<PictureAnnotation>,
    /// Resolved location of the picture's binary content. `None` until
    /// placement has run.
    pub reference: Option<ImageRef>,
}

impl PictureElement {
    /// Create a picture element, computing its content hash.
    pub fn new(index: usize, image: DynamicImage) -> Self {
        let hash = content_hash(&image);
        Self {
            index,
            image,
            hash,
            annotations: Vec::new(),
            reference: None,
        }
    }

    /// Attach annotations (builder-style, used by converters and tests).
    pub fn with_annotations(mut self, annotations: Vec<PictureAnnotation>) -> Self {
        self.annotations = annotations;
        self
    }

    /// Deterministic file name for this picture's PNG content:
    /// `image_{index:06}_{hash}.png`.
    ///
    /// The zero-padded index keeps directory listings in document order;
    /// the hash guards against collisions and makes re-runs idempotent.
    pub fn file_name(&self) -> String {
        format!("image_{:06}_{}.png", self.index, self.hash)
    }
}

/// Hash the raw pixel buffer (plus dimensions, so equal byte streams of
/// different shapes do not collide). Truncated to 32 hex chars — plenty for
/// a per-document identifier while keeping file names readable.
fn content_hash(image: &DynamicImage) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image.width().to_le_bytes());
    hasher.update(image.height().to_le_bytes());
    hasher.update(image.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(32);
    for byte in digest.iter().take(16) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// An annotation attached to a picture by an external model.
///
/// Read-only from this crate's perspective; the order annotations were
/// attached upstream is preserved through serialization.
#[derive(Debug, Clone, PartialEq)]
pub enum PictureAnnotation {
    /// Free-text description (vision-model output).
    Description(String),
    /// Classification result: the predicted classes for the picture.
    Classification(Vec<PictureClass>),
}

/// One predicted class from a picture classifier.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PictureClass {
    pub class_name: String,
    pub confidence: f32,
}

impl PictureClass {
    pub fn new(class_name: impl Into<String>, confidence: f32) -> Self {
        Self {
            class_name: class_name.into(),
            confidence,
        }
    }
}

/// A resolved location for a picture's binary content.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageRef {
    /// Stored on the local file system; the path is relative to the
    /// eventual Markdown output location.
    Local(PathBuf),
    /// Uploaded to object storage; a browsable URL.
    Remote(String),
}

impl ImageRef {
    /// The location string used inside the Markdown image tag.
    pub fn location(&self) -> String {
        match self {
            ImageRef::Local(p) => p.to_string_lossy().into_owned(),
            ImageRef::Remote(url) => url.clone(),
        }
    }
}
