//! Picture placement: deciding where each picture's content lives and
//! resolving its Markdown reference.
//!
//! Exactly one [`PlacementPolicy`](crate::config::PlacementPolicy) is active
//! per run:
//!
//! * **Local-only** — encode to PNG and write under the image directory.
//! * **Remote-with-fallback** — upload to object storage; on any upload
//!   failure fall back to the local strategy so no picture is dropped.
//!
//! Failures are per-picture. One unwritable image never aborts the run; it
//! is recorded in that picture's [`PictureOutcome`] and the loop moves on.
//!
//! [`ObjectStore`] is the seam that keeps the resolver testable: the
//! production implementation is [`OssBucket`], tests substitute stubs.

mod local;
mod oss;

pub use local::LocalStore;
pub use oss::OssBucket;

use crate::config::{AnnotateConfig, PlacementPolicy};
use crate::document::{Document, ImageRef};
use crate::error::{MdWeaveError, PictureError};
use crate::output::{Placement, PictureOutcome};
use async_trait::async_trait;
use image::DynamicImage;
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why an upload did not produce a remote reference.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The request never completed (connect, TLS, timeout, body read).
    #[error("transport error: {0}")]
    Transport(String),
    /// The service answered with a non-success status.
    #[error("storage service rejected the request (HTTP {status})")]
    Rejected { status: u16 },
}

/// Remote persistence for picture files.
///
/// Implemented by [`OssBucket`]; object-safe so the resolver can take any
/// store and tests can inject failing stubs to exercise the fallback path.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `body` (a PNG) under `key`.
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), UploadError>;

    /// The custom domain bound to the store, if one is configured and
    /// enabled. Called once per run; the result is reused for every URL.
    async fn custom_domain(&self) -> Option<String>;

    /// The public URL for `key`, preferring `custom_domain` when present.
    fn object_url(&self, key: &str, custom_domain: Option<&str>) -> String;
}

/// Encode a picture as PNG bytes.
///
/// PNG over JPEG: these are extracted document figures, and lossless
/// compression keeps chart labels and fine print legible.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded picture → {} bytes PNG", buf.len());
    Ok(buf)
}

/// Resolve a reference for every picture in `doc` according to the
/// configured policy, mutating each picture's `reference` in place.
///
/// Returns one [`PictureOutcome`] per picture, in document order. The only
/// fatal error is a remote policy with no store supplied; everything that
/// can go wrong with an individual picture is captured in its outcome.
pub async fn resolve_placements(
    doc: &mut Document,
    config: &AnnotateConfig,
    store: Option<&dyn ObjectStore>,
) -> Result<Vec<PictureOutcome>, MdWeaveError> {
    let local = LocalStore::new(&config.image_dir, &config.link_prefix);

    let remote = match config.placement {
        PlacementPolicy::LocalOnly => None,
        PlacementPolicy::RemoteWithFallback => {
            let store = store.ok_or_else(|| {
                MdWeaveError::Internal("remote placement requested without an object store".into())
            })?;
            // One CNAME lookup per run, reused for every object URL.
            let domain = store.custom_domain().await;
            match &domain {
                Some(d) => info!("Linking uploads through custom domain {d}"),
                None => info!("Linking uploads through the default bucket domain"),
            }
            Some((store, domain))
        }
    };

    let key_prefix = config
        .storage
        .as_ref()
        .map(|s| s.key_prefix.as_str())
        .unwrap_or("pictures/");

    let mut outcomes = Vec::with_capacity(doc.picture_count());
    for picture in doc.pictures_mut() {
        let index = picture.index;
        let file_name = picture.file_name();

        let png = match encode_png(&picture.image) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Picture {index}: PNG encoding failed: {e}");
                outcomes.push(PictureOutcome {
                    index,
                    file_name,
                    placement: Placement::Failed,
                    error: Some(PictureError::EncodeFailed {
                        index,
                        detail: e.to_string(),
                    }),
                });
                continue;
            }
        };

        let outcome = match &remote {
            None => match local.save(&file_name, &png) {
                Ok(link) => {
                    picture.reference = Some(ImageRef::Local(link));
                    PictureOutcome {
                        index,
                        file_name,
                        placement: Placement::Local,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!("Picture {index}: local save failed: {e}");
                    PictureOutcome {
                        index,
                        file_name: file_name.clone(),
                        placement: Placement::Failed,
                        error: Some(PictureError::SaveFailed {
                            index,
                            path: local.disk_path(&file_name),
                            detail: e.to_string(),
                            upload_detail: None,
                        }),
                    }
                }
            },
            Some((store, domain)) => {
                let key = format!("{key_prefix}{file_name}");
                match store.put_object(&key, png.clone()).await {
                    Ok(()) => {
                        let url = store.object_url(&key, domain.as_deref());
                        debug!("Picture {index}: uploaded as {url}");
                        picture.reference = Some(ImageRef::Remote(url));
                        PictureOutcome {
                            index,
                            file_name,
                            placement: Placement::Uploaded,
                            error: None,
                        }
                    }
                    Err(upload_err) => {
                        warn!("Picture {index}: upload failed ({upload_err}); saving locally");
                        match local.save(&file_name, &png) {
                            Ok(link) => {
                                picture.reference = Some(ImageRef::Local(link));
                                PictureOutcome {
                                    index,
                                    file_name,
                                    placement: Placement::FellBack,
                                    error: None,
                                }
                            }
                            Err(e) => {
                                warn!("Picture {index}: fallback save failed too: {e}");
                                PictureOutcome {
                                    index,
                                    file_name: file_name.clone(),
                                    placement: Placement::Failed,
                                    error: Some(PictureError::SaveFailed {
                                        index,
                                        path: local.disk_path(&file_name),
                                        detail: e.to_string(),
                                        upload_detail: Some(upload_err.to_string()),
                                    }),
                                }
                            }
                        }
                    }
                }
            }
        };
        outcomes.push(outcome);
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::document::{DocItem, PictureElement};
    use image::{Rgba, RgbaImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct FailingStore;

    #[async_trait]
    impl ObjectStore for FailingStore {
        async fn put_object(&self, _key: &str, _body: Vec<u8>) -> Result<(), UploadError> {
            Err(UploadError::Rejected { status: 403 })
        }
        async fn custom_domain(&self) -> Option<String> {
            None
        }
        fn object_url(&self, key: &str, _custom_domain: Option<&str>) -> String {
            format!("https://unreachable.example/{key}")
        }
    }

    struct CountingStore {
        puts: AtomicUsize,
        domain: Option<String>,
    }

    #[async_trait]
    impl ObjectStore for CountingStore {
        async fn put_object(&self, _key: &str, _body: Vec<u8>) -> Result<(), UploadError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn custom_domain(&self) -> Option<String> {
            self.domain.clone()
        }
        fn object_url(&self, key: &str, custom_domain: Option<&str>) -> String {
            match custom_domain {
                Some(d) => format!("https://{d}/{key}"),
                None => format!("https://bucket.endpoint.example/{key}"),
            }
        }
    }

    fn doc_with_pictures(n: usize) -> Document {
        let items = (0..n)
            .map(|i| {
                let img =
                    DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([i as u8, 0, 0, 255])));
                DocItem::Picture(PictureElement::new(i, img))
            })
            .collect();
        Document { items }
    }

    fn remote_config(tmp: &TempDir) -> AnnotateConfig {
        AnnotateConfig::builder()
            .placement(PlacementPolicy::RemoteWithFallback)
            .storage(StorageConfig {
                endpoint: "endpoint.example".into(),
                access_key_id: "id".into(),
                access_key_secret: "secret".into(),
                bucket: "bucket".into(),
                key_prefix: "pictures/".into(),
            })
            .image_dir(tmp.path().join("images"))
            .link_prefix("images")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn local_only_saves_and_links_every_picture() {
        let tmp = TempDir::new().unwrap();
        let config = AnnotateConfig::builder()
            .image_dir(tmp.path().join("images"))
            .link_prefix("images")
            .build()
            .unwrap();
        let mut doc = doc_with_pictures(2);

        let outcomes = resolve_placements(&mut doc, &config, None).await.unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.placement == Placement::Local));
        for item in &doc.items {
            let DocItem::Picture(p) = item else { unreachable!() };
            let Some(ImageRef::Local(link)) = &p.reference else {
                panic!("expected local reference");
            };
            assert!(link.starts_with("images"));
            assert!(tmp.path().join("images").join(p.file_name()).exists());
        }
    }

    #[tokio::test]
    async fn failed_upload_falls_back_to_local_file() {
        let tmp = TempDir::new().unwrap();
        let config = remote_config(&tmp);
        let mut doc = doc_with_pictures(1);

        let outcomes = resolve_placements(&mut doc, &config, Some(&FailingStore))
            .await
            .unwrap();

        assert_eq!(outcomes[0].placement, Placement::FellBack);
        assert!(outcomes[0].error.is_none());
        let DocItem::Picture(p) = &doc.items[0] else { unreachable!() };
        let Some(ImageRef::Local(link)) = &p.reference else {
            panic!("fallback must yield a local reference");
        };
        assert!(link.starts_with("images"));
        assert!(tmp.path().join("images").join(p.file_name()).exists());
    }

    #[tokio::test]
    async fn uploads_use_custom_domain_and_key_prefix() {
        let tmp = TempDir::new().unwrap();
        let config = remote_config(&tmp);
        let store = CountingStore {
            puts: AtomicUsize::new(0),
            domain: Some("img.example.com".into()),
        };
        let mut doc = doc_with_pictures(2);

        let outcomes = resolve_placements(&mut doc, &config, Some(&store)).await.unwrap();

        assert_eq!(store.puts.load(Ordering::SeqCst), 2);
        assert!(outcomes.iter().all(|o| o.placement == Placement::Uploaded));
        let DocItem::Picture(p) = &doc.items[0] else { unreachable!() };
        let Some(ImageRef::Remote(url)) = &p.reference else {
            panic!("expected remote reference");
        };
        assert!(url.starts_with("https://img.example.com/pictures/image_000000_"));
        // Nothing should land on disk when every upload succeeds.
        assert!(!tmp.path().join("images").exists());
    }

    #[tokio::test]
    async fn one_bad_picture_does_not_stop_the_rest() {
        let tmp = TempDir::new().unwrap();
        let config = AnnotateConfig::builder()
            .image_dir(tmp.path().join("images"))
            .build()
            .unwrap();
        // A zero-dimension image cannot be PNG-encoded.
        let broken = DynamicImage::ImageRgba8(RgbaImage::new(0, 0));
        let good = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255])));
        let mut doc = Document {
            items: vec![
                DocItem::Picture(PictureElement::new(0, broken)),
                DocItem::Picture(PictureElement::new(1, good)),
            ],
        };

        let outcomes = resolve_placements(&mut doc, &config, None).await.unwrap();

        assert_eq!(outcomes[0].placement, Placement::Failed);
        assert!(matches!(
            outcomes[0].error,
            Some(PictureError::EncodeFailed { index: 0, .. })
        ));
        assert_eq!(outcomes[1].placement, Placement::Local);
        let DocItem::Picture(p) = &doc.items[1] else { unreachable!() };
        assert!(p.reference.is_some());
    }
}
