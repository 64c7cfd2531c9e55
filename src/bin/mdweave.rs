//! CLI binary for mdweave.
//!
//! A thin shim over the library crate that reads a document manifest,
//! maps CLI flags to `AnnotateConfig`, and prints results. Can also run
//! the standalone completion relay (`--relay`).

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use mdweave::{
    process_document, AnnotateConfig, CompletionRelay, DocItem, Document, Placement,
    PlacementPolicy, PictureAnnotation, PictureClass, PictureElement, RelayConfig, StorageConfig,
};
use serde::Deserialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const AFTER_HELP: &str = r##"EXAMPLES:
  # Serialize a manifest to stdout
  mdweave document.json

  # Serialize to a file, images written next to it
  mdweave document.json -o out/report.md --image-dir out/images

  # Upload pictures to object storage (credentials from OSS_* env vars)
  mdweave document.json --upload -o report.md

  # Custom layout values in the image tags
  mdweave document.json --alignment Center --width 500

  # Structured JSON output (markdown + per-picture outcomes + stats)
  mdweave document.json --json

  # Run the local completion relay until Ctrl-C
  mdweave --relay --port 4000 --provider openai --model gpt-4.1-nano

MANIFEST FORMAT:
  A JSON object with an "items" array. Each item is either a text block or
  a picture (path resolved relative to the manifest file):

  {
    "items": [
      {"text": "# Quarterly Report"},
      {"image": "figures/revenue.png",
       "description": "A bar chart comparing quarterly revenue.",
       "classes": [{"class_name": "bar_chart", "confidence": 0.92}]},
      {"text": "Revenue grew 12% quarter over quarter."}
    ]
  }

ENVIRONMENT VARIABLES:
  OSS_ENDPOINT            Object-storage endpoint (e.g. oss-cn-hangzhou.aliyuncs.com)
  OSS_ACCESS_KEY_ID       Object-storage access key id
  OSS_ACCESS_KEY_SECRET   Object-storage access key secret
  OSS_BUCKET_NAME         Object-storage bucket
  OPENAI_API_KEY          OpenAI API key (relay upstream)
  ANTHROPIC_API_KEY       Anthropic API key (relay upstream)
  GEMINI_API_KEY          Google Gemini API key (relay upstream)
  EDGEQUAKE_LLM_PROVIDER  Override relay provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override relay model ID
"##;

/// Serialize annotated documents to Markdown with smart picture placement.
#[derive(Parser, Debug)]
#[command(
    name = "mdweave",
    version,
    about = "Serialize annotated documents to Markdown with smart picture placement",
    long_about = "Reads a document manifest (text blocks plus annotated pictures), places each \
picture locally or in object storage, and emits Markdown with layout-aware image tags and \
annotation lines. Can also serve a local OpenAI-compatible completion relay for converter \
tooling (--relay).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Document manifest (JSON). Not used with --relay.
    #[arg(required_unless_present = "relay")]
    manifest: Option<PathBuf>,

    /// Write Markdown to this file instead of stdout.
    #[arg(short, long, env = "MDWEAVE_OUTPUT")]
    output: Option<PathBuf>,

    /// Alignment segment of the image-tag alt triple.
    #[arg(long, env = "MDWEAVE_ALIGNMENT", default_value = "Left")]
    alignment: String,

    /// Width segment of the image-tag alt triple.
    #[arg(long, env = "MDWEAVE_WIDTH", default_value = "700")]
    width: String,

    /// Separator between the image tag and annotation lines.
    #[arg(long, env = "MDWEAVE_SEPARATOR", default_value = "\n")]
    separator: String,

    /// Drop "> Picture Description:" lines from the output.
    #[arg(long, env = "MDWEAVE_NO_DESCRIPTIONS")]
    no_descriptions: bool,

    /// Drop "Picture Types:" lines from the output.
    #[arg(long, env = "MDWEAVE_NO_CLASSIFICATIONS")]
    no_classifications: bool,

    /// Upload pictures to object storage (falls back to local on failure).
    /// Reads OSS_* environment variables.
    #[arg(long, env = "MDWEAVE_UPLOAD")]
    upload: bool,

    /// Directory local picture files are written to.
    #[arg(long, env = "MDWEAVE_IMAGE_DIR", default_value = "output/images")]
    image_dir: PathBuf,

    /// Path prefix used for local image references inside the Markdown.
    #[arg(long, env = "MDWEAVE_LINK_PREFIX", default_value = "images")]
    link_prefix: PathBuf,

    /// Object-key prefix for uploaded pictures.
    #[arg(long, env = "MDWEAVE_KEY_PREFIX", default_value = "pictures/")]
    key_prefix: String,

    /// Output structured JSON (AnnotateOutput) instead of Markdown.
    #[arg(long, env = "MDWEAVE_JSON")]
    json: bool,

    /// Run the local completion relay until Ctrl-C instead of serializing.
    #[arg(long)]
    relay: bool,

    /// Relay port (0 lets the OS choose).
    #[arg(long, env = "MDWEAVE_RELAY_PORT", default_value_t = 4000)]
    port: u16,

    /// Upstream model ID for the relay.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Upstream provider for the relay: openai, anthropic, gemini, ollama.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Default sampling temperature for relayed requests (0.0–2.0).
    #[arg(long, env = "MDWEAVE_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Default token limit for relayed requests.
    #[arg(long, env = "MDWEAVE_MAX_TOKENS", default_value_t = 65536)]
    max_tokens: usize,

    /// Disable progress output.
    #[arg(long, env = "MDWEAVE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MDWEAVE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MDWEAVE_QUIET")]
    quiet: bool,
}

// ── Manifest types ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Manifest {
    items: Vec<ManifestItem>,
}

/// One manifest entry: a text block, or a picture with optional annotations.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ManifestItem {
    Text {
        text: String,
    },
    Picture {
        image: PathBuf,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        classes: Vec<PictureClass>,
    },
}

/// Load the manifest and decode every referenced image into a [`Document`].
///
/// Image paths are resolved relative to the manifest's directory, so a
/// manifest can be moved together with its figures.
fn load_document(manifest_path: &Path, bar: Option<&ProgressBar>) -> Result<Document> {
    let raw = std::fs::read_to_string(manifest_path)
        .with_context(|| format!("Failed to read manifest {}", manifest_path.display()))?;
    let manifest: Manifest = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid manifest {}", manifest_path.display()))?;
    let base = manifest_path.parent().unwrap_or_else(|| Path::new("."));

    let mut items = Vec::with_capacity(manifest.items.len());
    let mut picture_index = 0usize;
    for entry in manifest.items {
        match entry {
            ManifestItem::Text { text } => items.push(DocItem::Text(text)),
            ManifestItem::Picture {
                image,
                description,
                classes,
            } => {
                let path = base.join(&image);
                if let Some(bar) = bar {
                    bar.set_message(format!("loading {}", image.display()));
                }
                let decoded = image::open(&path)
                    .with_context(|| format!("Failed to load image {}", path.display()))?;

                let mut annotations = Vec::new();
                if !classes.is_empty() {
                    annotations.push(PictureAnnotation::Classification(classes));
                }
                if let Some(text) = description {
                    annotations.push(PictureAnnotation::Description(text));
                }

                items.push(DocItem::Picture(
                    PictureElement::new(picture_index, decoded).with_annotations(annotations),
                ));
                picture_index += 1;
                if let Some(bar) = bar {
                    bar.inc(1);
                }
            }
        }
    }

    Ok(Document { items })
}

/// Map CLI args to `AnnotateConfig`.
fn build_config(cli: &Cli) -> Result<AnnotateConfig> {
    let mut builder = AnnotateConfig::builder()
        .alignment(&cli.alignment)
        .width(&cli.width)
        .separator(&cli.separator)
        .render_descriptions(!cli.no_descriptions)
        .render_classifications(!cli.no_classifications)
        .image_dir(&cli.image_dir)
        .link_prefix(&cli.link_prefix);

    if cli.upload {
        let storage = StorageConfig::from_env()
            .context("Object-storage credentials required for --upload")?
            .with_key_prefix(&cli.key_prefix);
        builder = builder
            .placement(PlacementPolicy::RemoteWithFallback)
            .storage(storage);
    }

    builder.build().context("Invalid configuration")
}

/// Serve the relay until Ctrl-C.
async fn run_relay(cli: &Cli) -> Result<()> {
    let mut builder = RelayConfig::builder()
        .port(cli.port)
        .default_temperature(cli.temperature)
        .default_max_tokens(cli.max_tokens);
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    let config = builder.build().context("Invalid relay configuration")?;

    let mut relay = CompletionRelay::new(config);
    let addr = relay.start().await.context("Failed to start relay")?;

    if !cli.quiet {
        eprintln!(
            "{} relay serving on {}",
            green("✔"),
            bold(&format!("http://{addr}/v1/chat/completions"))
        );
        eprintln!("{}", dim("press Ctrl-C to stop"));
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    relay.stop().await.context("Failed to stop relay")?;
    if !cli.quiet {
        eprintln!("{} relay stopped", green("✔"));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else if cli.relay {
        "info"
    } else {
        // Progress output covers the interactive case; keep library logs down.
        "warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    if cli.relay {
        return run_relay(&cli).await;
    }

    let manifest_path = cli
        .manifest
        .clone()
        .context("A manifest path is required unless --relay is given")?;
    let config = build_config(&cli)?;

    // ── Load manifest ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let bar = if show_progress {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix("Loading");
        bar.enable_steady_tick(Duration::from_millis(80));
        Some(bar)
    } else {
        None
    };

    let mut doc = load_document(&manifest_path, bar.as_ref())?;

    if let Some(ref bar) = bar {
        bar.set_prefix("Placing");
        bar.set_message(format!("{} picture(s)", doc.picture_count()));
    }

    // ── Run serialization ────────────────────────────────────────────────
    let output = process_document(&mut doc, &config)
        .await
        .context("Serialization failed")?;

    if let Some(bar) = bar {
        bar.finish_and_clear();
        for outcome in &output.outcomes {
            match outcome.placement {
                Placement::Local => eprintln!(
                    "  {} {}  {}",
                    green("✓"),
                    outcome.file_name,
                    dim("local")
                ),
                Placement::Uploaded => eprintln!(
                    "  {} {}  {}",
                    green("✓"),
                    outcome.file_name,
                    dim("uploaded")
                ),
                Placement::FellBack => eprintln!(
                    "  {} {}  {}",
                    cyan("⚠"),
                    outcome.file_name,
                    dim("upload failed, saved locally")
                ),
                Placement::Failed => eprintln!(
                    "  {} {}  {}",
                    red("✗"),
                    outcome.file_name,
                    red(&outcome
                        .error
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "failed".to_string()))
                ),
            }
        }
    }

    // ── Emit output ──────────────────────────────────────────────────────
    if let Some(ref output_path) = cli.output {
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(output_path, &output.markdown)
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
    } else if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(output.markdown.as_bytes())
            .context("Failed to write to stdout")?;
    }

    // ── Summary ──────────────────────────────────────────────────────────
    if !cli.quiet && !cli.json {
        let stats = &output.stats;
        let placed = stats.pictures - stats.failed;
        eprintln!(
            "{}  {}/{} pictures placed  {}ms{}",
            if stats.failed == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            placed,
            stats.pictures,
            stats.total_duration_ms,
            cli.output
                .as_ref()
                .map(|p| format!("  →  {}", bold(&p.display().to_string())))
                .unwrap_or_default(),
        );
        if stats.fell_back > 0 {
            eprintln!(
                "   {}",
                dim(&format!("{} upload(s) fell back to local disk", stats.fell_back))
            );
        }
    }

    if output.stats.failed > 0 {
        anyhow::bail!("{} picture(s) failed", output.stats.failed);
    }
    Ok(())
}
