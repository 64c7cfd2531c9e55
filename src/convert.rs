//! Top-level serialization entry points.
//!
//! One call takes an annotated [`Document`] through both phases: placement
//! (persist every picture, resolve its reference) and serialization (emit
//! the final Markdown). The result carries the Markdown plus per-picture
//! outcomes and run statistics, so callers can inspect partial success
//! instead of losing a whole document to one bad image.

use crate::config::{AnnotateConfig, PlacementPolicy};
use crate::document::Document;
use crate::error::MdWeaveError;
use crate::output::{AnnotateOutput, Placement, RunStats};
use crate::placement::{resolve_placements, ObjectStore, OssBucket};
use crate::serializer::serialize_document;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

/// Serialize an annotated document to Markdown, resolving picture
/// placements first.
///
/// This is the primary entry point for the library.
///
/// # Arguments
/// * `doc` — The document; each picture's `reference` is filled in here
/// * `config` — Serialization configuration
///
/// # Returns
/// `Ok(AnnotateOutput)` on success, even if some pictures failed
/// (check `output.stats.failed`).
///
/// # Errors
/// Returns `Err(MdWeaveError)` only for fatal errors such as a remote
/// policy with no storage settings.
pub async fn process_document(
    doc: &mut Document,
    config: &AnnotateConfig,
) -> Result<AnnotateOutput, MdWeaveError> {
    let total_start = Instant::now();
    info!(
        "Serializing document: {} item(s), {} picture(s)",
        doc.items.len(),
        doc.picture_count()
    );

    // ── Step 1: Resolve picture placements ───────────────────────────────
    let store = match config.placement {
        PlacementPolicy::LocalOnly => None,
        PlacementPolicy::RemoteWithFallback => {
            let storage = config.storage.clone().ok_or_else(|| {
                MdWeaveError::InvalidConfig(
                    "remote placement requires storage settings (StorageConfig)".into(),
                )
            })?;
            Some(OssBucket::new(storage))
        }
    };

    let placement_start = Instant::now();
    let outcomes =
        resolve_placements(doc, config, store.as_ref().map(|s| s as &dyn ObjectStore)).await?;
    let placement_duration_ms = placement_start.elapsed().as_millis() as u64;

    // ── Step 2: Serialize to Markdown ────────────────────────────────────
    let markdown = serialize_document(doc, config);

    // ── Step 3: Compute stats ────────────────────────────────────────────
    let count = |p: Placement| outcomes.iter().filter(|o| o.placement == p).count();
    let stats = RunStats {
        pictures: outcomes.len(),
        uploaded: count(Placement::Uploaded),
        fell_back: count(Placement::FellBack),
        saved_locally: count(Placement::Local),
        failed: count(Placement::Failed),
        placement_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    if stats.failed > 0 {
        warn!("{} picture(s) ended the run without a reference", stats.failed);
    }
    info!(
        "Serialization complete: {} picture(s) ({} uploaded, {} fell back, {} local, {} failed), {}ms total",
        stats.pictures,
        stats.uploaded,
        stats.fell_back,
        stats.saved_locally,
        stats.failed,
        stats.total_duration_ms
    );

    Ok(AnnotateOutput {
        markdown,
        outcomes,
        stats,
    })
}

/// Serialize a document and write the Markdown directly to a file.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn process_to_file(
    doc: &mut Document,
    output_path: impl AsRef<Path>,
    config: &AnnotateConfig,
) -> Result<RunStats, MdWeaveError> {
    let output = process_document(doc, config).await?;
    let path = output_path.as_ref();

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| MdWeaveError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
    }

    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, &output.markdown)
        .await
        .map_err(|e| MdWeaveError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| MdWeaveError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    info!("Wrote {}", path.display());
    Ok(output.stats)
}

/// Synchronous wrapper around [`process_document`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_sync(
    doc: &mut Document,
    config: &AnnotateConfig,
) -> Result<AnnotateOutput, MdWeaveError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| MdWeaveError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(process_document(doc, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocItem, PictureAnnotation, PictureElement};
    use image::{DynamicImage, Rgba, RgbaImage};
    use tempfile::TempDir;

    fn sample_doc() -> Document {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 3, Rgba([9, 9, 9, 255])));
        let picture = PictureElement::new(1, img)
            .with_annotations(vec![PictureAnnotation::Description("A small square.".into())]);
        Document {
            items: vec![
                DocItem::Text("# Report".into()),
                DocItem::Picture(picture),
                DocItem::Text("The end.".into()),
            ],
        }
    }

    #[tokio::test]
    async fn local_run_produces_markdown_and_stats() {
        let tmp = TempDir::new().unwrap();
        let config = AnnotateConfig::builder()
            .image_dir(tmp.path().join("images"))
            .build()
            .unwrap();
        let mut doc = sample_doc();

        let output = process_document(&mut doc, &config).await.unwrap();

        assert!(output.markdown.starts_with("# Report\n\n![Image|Left|700](images/"));
        assert!(output.markdown.contains("> Picture Description: A small square."));
        assert_eq!(output.stats.pictures, 1);
        assert_eq!(output.stats.saved_locally, 1);
        assert_eq!(output.stats.failed, 0);
        assert!(output.stats.total_duration_ms >= output.stats.placement_duration_ms);
    }

    #[tokio::test]
    async fn process_to_file_writes_atomically() {
        let tmp = TempDir::new().unwrap();
        let config = AnnotateConfig::builder()
            .image_dir(tmp.path().join("images"))
            .build()
            .unwrap();
        let out_path = tmp.path().join("nested/dir/report.md");
        let mut doc = sample_doc();

        let stats = process_to_file(&mut doc, &out_path, &config).await.unwrap();

        assert_eq!(stats.pictures, 1);
        let written = std::fs::read_to_string(&out_path).unwrap();
        assert!(written.ends_with("The end.\n"));
        assert!(!out_path.with_extension("md.tmp").exists());
    }

    #[test]
    fn sync_wrapper_matches_async_result() {
        let tmp = TempDir::new().unwrap();
        let config = AnnotateConfig::builder()
            .image_dir(tmp.path().join("images"))
            .build()
            .unwrap();
        let mut doc = sample_doc();

        let output = process_sync(&mut doc, &config).unwrap();
        assert_eq!(output.stats.saved_locally, 1);
    }
}
