//! Configuration types for document serialization and the completion relay.
//!
//! All serialization behaviour is controlled through [`AnnotateConfig`],
//! built via its [`AnnotateConfigBuilder`]. Keeping every knob in one struct
//! makes it trivial to share configs across calls, log them, and diff two
//! runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A many-field constructor is unreadable and breaks on every new field.
//! The builder pattern lets callers set only what they care about and rely
//! on well-documented defaults for the rest.

use crate::error::MdWeaveError;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for one document-serialization run.
///
/// Built via [`AnnotateConfig::builder()`] or using
/// [`AnnotateConfig::default()`].
///
/// # Example
/// ```rust
/// use mdweave::AnnotateConfig;
///
/// let config = AnnotateConfig::builder()
///     .alignment("Left")
///     .width("700")
///     .render_classifications(false)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct AnnotateConfig {
    /// Alignment value injected into the image-tag alt text. Default: `"Left"`.
    ///
    /// Rendered as the middle segment of the pipe-delimited alt triple
    /// `Image|<alignment>|<width>`. The value is not interpreted by this
    /// crate; downstream renderers give it meaning.
    pub alignment: String,

    /// Width value injected into the image-tag alt text. Default: `"700"`.
    pub width: String,

    /// Separator between the image tag and the annotation lines of one
    /// picture block. Default: `"\n"`.
    pub separator: String,

    /// Render `> Picture Description: …` lines for description annotations.
    /// Default: true.
    pub render_descriptions: bool,

    /// Render `Picture Types: …` lines for classification annotations.
    /// Default: true.
    ///
    /// Converter integrations disagree on whether classifier output belongs
    /// in published Markdown, so it is a policy knob rather than a fixed
    /// behaviour.
    pub render_classifications: bool,

    /// Where picture contents are persisted. Default: [`PlacementPolicy::LocalOnly`].
    pub placement: PlacementPolicy,

    /// Object-storage settings; required when `placement` is
    /// [`PlacementPolicy::RemoteWithFallback`].
    pub storage: Option<StorageConfig>,

    /// Directory local picture files are written to. Default: `output/images`.
    pub image_dir: PathBuf,

    /// Prefix prepended to local file names when building the reference
    /// used inside the Markdown output. Default: `images`.
    ///
    /// Distinct from `image_dir` because the Markdown file and the images
    /// usually live in different places: files land in
    /// `output/images/<name>.png` while the document links `images/<name>.png`
    /// relative to its own location.
    pub link_prefix: PathBuf,
}

impl Default for AnnotateConfig {
    fn default() -> Self {
        Self {
            alignment: "Left".to_string(),
            width: "700".to_string(),
            separator: "\n".to_string(),
            render_descriptions: true,
            render_classifications: true,
            placement: PlacementPolicy::LocalOnly,
            storage: None,
            image_dir: PathBuf::from("output/images"),
            link_prefix: PathBuf::from("images"),
        }
    }
}

impl AnnotateConfig {
    /// Create a new builder for `AnnotateConfig`.
    pub fn builder() -> AnnotateConfigBuilder {
        AnnotateConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`AnnotateConfig`].
#[derive(Debug)]
pub struct AnnotateConfigBuilder {
    config: AnnotateConfig,
}

impl AnnotateConfigBuilder {
    pub fn alignment(mut self, v: impl Into<String>) -> Self {
        self.config.alignment = v.into();
        self
    }

    pub fn width(mut self, v: impl Into<String>) -> Self {
        self.config.width = v.into();
        self
    }

    pub fn separator(mut self, v: impl Into<String>) -> Self {
        self.config.separator = v.into();
        self
    }

    pub fn render_descriptions(mut self, v: bool) -> Self {
        self.config.render_descriptions = v;
        self
    }

    pub fn render_classifications(mut self, v: bool) -> Self {
        self.config.render_classifications = v;
        self
    }

    pub fn placement(mut self, policy: PlacementPolicy) -> Self {
        self.config.placement = policy;
        self
    }

    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.config.storage = Some(storage);
        self
    }

    pub fn image_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.image_dir = dir.into();
        self
    }

    pub fn link_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.config.link_prefix = prefix.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnnotateConfig, MdWeaveError> {
        let c = &self.config;
        if c.alignment.contains('|') || c.width.contains('|') {
            return Err(MdWeaveError::InvalidConfig(
                "alignment/width must not contain '|' (it delimits the alt triple)".into(),
            ));
        }
        if c.placement == PlacementPolicy::RemoteWithFallback && c.storage.is_none() {
            return Err(MdWeaveError::InvalidConfig(
                "remote placement requires storage settings (StorageConfig)".into(),
            ));
        }
        Ok(self.config)
    }
}

/// The rule deciding where a picture's content is stored.
///
/// Exactly one policy is active per run; it is chosen before serialization
/// begins and applies to every picture in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlacementPolicy {
    /// Encode as PNG and write to the local image directory. (default)
    #[default]
    LocalOnly,
    /// Upload the PNG to object storage; fall back to the local strategy on
    /// any upload or transport failure so no picture is dropped.
    RemoteWithFallback,
}

/// Object-storage connection settings.
///
/// All four identifying values are required; [`StorageConfig::from_env`]
/// reads them from the conventional `OSS_*` variables and reports the first
/// missing one by name.
#[derive(Clone)]
pub struct StorageConfig {
    /// Storage endpoint, e.g. `oss-cn-hangzhou.aliyuncs.com`.
    pub endpoint: String,
    /// Access key identifier.
    pub access_key_id: String,
    /// Access key secret. Never logged.
    pub access_key_secret: String,
    /// Bucket name.
    pub bucket: String,
    /// Object-key prefix under which pictures are uploaded. Default: `pictures/`.
    pub key_prefix: String,
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl StorageConfig {
    /// Read storage settings from `OSS_ENDPOINT`, `OSS_ACCESS_KEY_ID`,
    /// `OSS_ACCESS_KEY_SECRET`, and `OSS_BUCKET_NAME`.
    pub fn from_env() -> Result<Self, MdWeaveError> {
        let get = |name: &str| -> Result<String, MdWeaveError> {
            match std::env::var(name) {
                Ok(v) if !v.is_empty() => Ok(v),
                _ => Err(MdWeaveError::StorageNotConfigured {
                    missing: name.to_string(),
                }),
            }
        };
        Ok(Self {
            endpoint: get("OSS_ENDPOINT")?,
            access_key_id: get("OSS_ACCESS_KEY_ID")?,
            access_key_secret: get("OSS_ACCESS_KEY_SECRET")?,
            bucket: get("OSS_BUCKET_NAME")?,
            key_prefix: "pictures/".to_string(),
        })
    }

    /// Override the object-key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }
}

/// Configuration for the local completion relay.
///
/// Built via [`RelayConfig::builder()`]. The relay serves exactly one route
/// (`POST /v1/chat/completions`) on the loopback interface for the duration
/// of one conversion job.
#[derive(Clone)]
pub struct RelayConfig {
    /// Local port to bind. Default: 4000. Use 0 to let the OS choose
    /// (the bound address is returned from `start`).
    pub port: u16,

    /// Upstream model identifier used when a request omits `model`.
    pub model: Option<String>,

    /// Upstream provider name (e.g. "gemini", "openai"). If None along with
    /// `provider`, the provider is auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed upstream provider. Takes precedence over
    /// `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature applied when the request omits `temperature`.
    /// Default: 0.1.
    pub default_temperature: f32,

    /// Token limit applied when the request omits `max_tokens`.
    /// Default: 65536.
    pub default_max_tokens: usize,

    /// Bound on how long `stop()` waits for the serving task to exit.
    /// Default: 5 seconds.
    pub join_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 4000,
            model: None,
            provider_name: None,
            provider: None,
            default_temperature: 0.1,
            default_max_tokens: 65536,
            join_timeout_secs: 5,
        }
    }
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("port", &self.port)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("join_timeout_secs", &self.join_timeout_secs)
            .finish()
    }
}

impl RelayConfig {
    /// Create a new builder for `RelayConfig`.
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`RelayConfig`].
#[derive(Debug)]
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn default_temperature(mut self, t: f32) -> Self {
        self.config.default_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn default_max_tokens(mut self, n: usize) -> Self {
        self.config.default_max_tokens = n;
        self
    }

    pub fn join_timeout_secs(mut self, secs: u64) -> Self {
        self.config.join_timeout_secs = secs.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RelayConfig, MdWeaveError> {
        if self.config.default_max_tokens == 0 {
            return Err(MdWeaveError::InvalidConfig(
                "default_max_tokens must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = AnnotateConfig::default();
        assert_eq!(c.alignment, "Left");
        assert_eq!(c.width, "700");
        assert_eq!(c.separator, "\n");
        assert!(c.render_descriptions);
        assert!(c.render_classifications);
        assert_eq!(c.placement, PlacementPolicy::LocalOnly);
    }

    #[test]
    fn builder_rejects_pipe_in_alignment() {
        let err = AnnotateConfig::builder()
            .alignment("Left|Center")
            .build()
            .unwrap_err();
        assert!(matches!(err, MdWeaveError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_remote_without_storage() {
        let err = AnnotateConfig::builder()
            .placement(PlacementPolicy::RemoteWithFallback)
            .build()
            .unwrap_err();
        assert!(matches!(err, MdWeaveError::InvalidConfig(_)));
    }

    #[test]
    fn remote_with_storage_builds() {
        let storage = StorageConfig {
            endpoint: "oss-cn-hangzhou.aliyuncs.com".into(),
            access_key_id: "id".into(),
            access_key_secret: "secret".into(),
            bucket: "b".into(),
            key_prefix: "pictures/".into(),
        };
        let c = AnnotateConfig::builder()
            .placement(PlacementPolicy::RemoteWithFallback)
            .storage(storage)
            .build()
            .expect("valid config");
        assert!(c.storage.is_some());
    }

    #[test]
    fn storage_debug_redacts_secret() {
        let storage = StorageConfig {
            endpoint: "e".into(),
            access_key_id: "id".into(),
            access_key_secret: "hunter2".into(),
            bucket: "b".into(),
            key_prefix: "p/".into(),
        };
        let dbg = format!("{storage:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn relay_builder_clamps_temperature() {
        let c = RelayConfig::builder()
            .default_temperature(9.0)
            .build()
            .unwrap();
        assert_eq!(c.default_temperature, 2.0);
    }
}
