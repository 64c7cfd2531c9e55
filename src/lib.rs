//! # mdweave
//!
//! Serialize annotated documents to Markdown with smart picture placement,
//! plus a local chat-completion relay for converter tooling.
//!
//! ## Why this crate?
//!
//! Document converters are good at extracting text and figures but leave two
//! awkward gaps on the way to publishable Markdown. First, a plain
//! `![alt](path)` tag carries no layout information, and annotation data
//! (VLM descriptions, figure classifications) is dropped entirely. Second,
//! the extracted images have to live somewhere — next to the document, or on
//! a CDN-backed bucket when the Markdown is destined for the web. This crate
//! owns that last mile: it renders each picture as a layout-aware tag with
//! its annotations, and places the image bytes locally or in object storage
//! with automatic local fallback.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Annotated document
//!  │
//!  ├─ 1. Encode     picture → PNG, deterministic content-hashed file name
//!  ├─ 2. Place      local dir, or upload to object storage (falls back)
//!  ├─ 3. Serialize  ![Image|Left|700](…) + description/classification lines
//!  └─ 4. Output     assembled Markdown + per-picture outcomes + stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mdweave::{process_document, AnnotateConfig, Document};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut doc: Document = todo!("built by your converter integration");
//!     let config = AnnotateConfig::default();
//!     let output = process_document(&mut doc, &config).await?;
//!     println!("{}", output.markdown);
//!     eprintln!("pictures: {} placed, {} failed",
//!         output.stats.pictures - output.stats.failed,
//!         output.stats.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## The completion relay
//!
//! Converter tooling that expects an OpenAI-compatible endpoint can be
//! pointed at a short-lived loopback relay which forwards to whichever
//! upstream provider is configured in the environment:
//!
//! ```rust,no_run
//! use mdweave::{relay::CompletionRelay, RelayConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut relay = CompletionRelay::new(RelayConfig::builder().port(4000).build()?);
//! let addr = relay.start().await?;
//! // point the converter at http://{addr}/v1/chat/completions …
//! relay.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `mdweave` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! mdweave = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod document;
pub mod error;
pub mod output;
pub mod placement;
pub mod relay;
pub mod serializer;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    AnnotateConfig, AnnotateConfigBuilder, PlacementPolicy, RelayConfig, RelayConfigBuilder,
    StorageConfig,
};
pub use convert::{process_document, process_sync, process_to_file};
pub use document::{DocItem, Document, ImageRef, PictureAnnotation, PictureClass, PictureElement};
pub use error::{MdWeaveError, PictureError};
pub use output::{AnnotateOutput, Placement, PictureOutcome, RunStats};
pub use relay::{run_with_relay, CompletionBackend, CompletionRelay, RelayState};
pub use serializer::{format_picture, rewrite_image_tag, serialize_document};
