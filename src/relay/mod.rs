//! The local chat-completion relay.
//!
//! Converter tooling in this pipeline expects an OpenAI-compatible endpoint
//! it can hit over HTTP. The relay provides exactly that, on loopback, for
//! the duration of one job: it accepts `POST /v1/chat/completions`, forwards
//! the conversation to the configured upstream provider, and re-wraps the
//! reply in the compatible envelope. Every other route is 404.
//!
//! ## Lifecycle
//!
//! `stopped → starting → serving → stopping → stopped`. [`CompletionRelay::start`]
//! returns only after the listener is bound, so the returned address is
//! immediately connectable — callers never need a "wait a bit and hope"
//! sleep. [`CompletionRelay::stop`] shuts the listener down gracefully and
//! bounds how long it waits for the serving task to exit.
//!
//! Use [`run_with_relay`] to pair a job with a relay: the relay is stopped
//! whether the job succeeds or fails.

pub mod protocol;

use crate::config::RelayConfig;
use crate::error::MdWeaveError;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use axum::Router;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use protocol::{ChatCompletionRequest, ChatCompletionResponse, ChatTurn, ErrorBody, Usage};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// Where the relay is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Stopped,
    Starting,
    Serving,
    Stopping,
}

impl RelayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayState::Stopped => "stopped",
            RelayState::Starting => "starting",
            RelayState::Serving => "serving",
            RelayState::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for RelayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An upstream completion failure, relayed to the client as HTTP 500.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CompletionError(pub String);

/// What the relay needs from an upstream: one conversation in, one reply
/// out. The production implementation is [`ProviderBackend`]; tests supply
/// stubs so the HTTP surface can be exercised without network credentials.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatTurn],
        temperature: f32,
        max_tokens: usize,
    ) -> Result<(String, Usage), CompletionError>;
}

/// [`CompletionBackend`] over an `edgequake-llm` provider.
pub struct ProviderBackend {
    provider: Arc<dyn LLMProvider>,
}

impl ProviderBackend {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl CompletionBackend for ProviderBackend {
    async fn complete(
        &self,
        messages: &[ChatTurn],
        temperature: f32,
        max_tokens: usize,
    ) -> Result<(String, Usage), CompletionError> {
        let messages: Vec<ChatMessage> = messages
            .iter()
            .map(|turn| match turn.role.as_str() {
                "system" => ChatMessage::system(turn.content.as_str()),
                "assistant" => ChatMessage::assistant(turn.content.as_str()),
                _ => ChatMessage::user(turn.content.as_str()),
            })
            .collect();

        let options = CompletionOptions {
            temperature: Some(temperature),
            max_tokens: Some(max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| CompletionError(format!("{e}")))?;

        let prompt_tokens = response.prompt_tokens as usize;
        let completion_tokens = response.completion_tokens as usize;
        let usage = Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        };
        Ok((response.content, usage))
    }
}

/// Resolve the upstream provider, from most-specific to least-specific.
///
/// Mirrors the conversion pipeline's chain: a pre-built provider wins, then
/// an explicitly named one, then the `EDGEQUAKE_LLM_PROVIDER` +
/// `EDGEQUAKE_MODEL` pair, then full auto-detection from whichever API keys
/// are present.
fn resolve_backend(config: &RelayConfig) -> Result<Arc<dyn CompletionBackend>, MdWeaveError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::new(ProviderBackend::new(Arc::clone(provider))));
    }

    let create = |name: &str, model: &str| -> Result<Arc<dyn CompletionBackend>, MdWeaveError> {
        let provider = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
            MdWeaveError::ProviderNotConfigured {
                provider: name.to_string(),
                hint: format!("{e}"),
            }
        })?;
        Ok(Arc::new(ProviderBackend::new(provider)))
    };

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
        return create(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create(&prov, &model);
        }
    }

    let (provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| MdWeaveError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;
    Ok(Arc::new(ProviderBackend::new(provider)))
}

/// Handler state shared across requests.
#[derive(Clone)]
struct RelayShared {
    backend: Arc<dyn CompletionBackend>,
    model: String,
    default_temperature: f32,
    default_max_tokens: usize,
}

/// A local chat-completion relay bound to one port for one job.
pub struct CompletionRelay {
    config: RelayConfig,
    state: RelayState,
    serving: Option<ServingHandle>,
    backend_override: Option<Arc<dyn CompletionBackend>>,
}

struct ServingHandle {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl CompletionRelay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            state: RelayState::Stopped,
            serving: None,
            backend_override: None,
        }
    }

    /// Build a relay over an explicit backend instead of resolving one from
    /// the configuration. Used by embedders that already hold a backend, and
    /// by tests.
    pub fn with_backend(config: RelayConfig, backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            config,
            state: RelayState::Stopped,
            serving: None,
            backend_override: Some(backend),
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// The bound address while serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.serving.as_ref().map(|s| s.addr)
    }

    /// Start serving and return the bound address.
    ///
    /// The listener is bound before this returns, so a request sent to the
    /// returned address immediately after is accepted (it may queue behind
    /// the accept loop, never connection-refused). Fails if the relay is not
    /// stopped, the upstream provider cannot be resolved, or the port cannot
    /// be bound; on failure the relay returns to `stopped`.
    pub async fn start(&mut self) -> Result<SocketAddr, MdWeaveError> {
        if self.state != RelayState::Stopped {
            return Err(MdWeaveError::RelayStateInvalid {
                state: self.state.as_str(),
                expected: "stopped",
            });
        }
        self.state = RelayState::Starting;

        // Resolve the upstream before binding: a misconfigured provider
        // should fail fast, not after the port is taken.
        let backend = match &self.backend_override {
            Some(backend) => Arc::clone(backend),
            None => match resolve_backend(&self.config) {
                Ok(backend) => backend,
                Err(e) => {
                    self.state = RelayState::Stopped;
                    return Err(e);
                }
            },
        };

        let bind_addr = format!("127.0.0.1:{}", self.config.port);
        let listener = match TcpListener::bind(&bind_addr).await {
            Ok(l) => l,
            Err(e) => {
                self.state = RelayState::Stopped;
                return Err(MdWeaveError::RelayBindFailed {
                    addr: bind_addr,
                    source: e,
                });
            }
        };
        let addr = listener.local_addr().map_err(|e| MdWeaveError::RelayBindFailed {
            addr: bind_addr,
            source: e,
        })?;

        let shared = RelayShared {
            backend,
            model: self
                .config
                .model
                .clone()
                .unwrap_or_else(|| "local-relay".to_string()),
            default_temperature: self.config.default_temperature,
            default_max_tokens: self.config.default_max_tokens,
        };

        // The method-router fallback covers wrong methods on the registered
        // path; the router fallback covers unknown paths. Both are 404.
        let app = Router::new()
            .route(
                "/v1/chat/completions",
                post(handle_completion).fallback(handle_unknown_route),
            )
            .fallback(handle_unknown_route)
            .with_state(shared);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                warn!("Relay serve loop ended with error: {e}");
            }
        });

        self.serving = Some(ServingHandle {
            addr,
            shutdown: shutdown_tx,
            task,
        });
        self.state = RelayState::Serving;
        info!("Relay serving on http://{addr}/v1/chat/completions");
        Ok(addr)
    }

    /// Stop serving, waiting up to `join_timeout_secs` for in-flight
    /// requests to drain before aborting the serving task.
    pub async fn stop(&mut self) -> Result<(), MdWeaveError> {
        if self.state != RelayState::Serving {
            return Err(MdWeaveError::RelayStateInvalid {
                state: self.state.as_str(),
                expected: "serving",
            });
        }
        self.state = RelayState::Stopping;

        let Some(handle) = self.serving.take() else {
            // Serving state without a handle cannot happen through the
            // public API.
            self.state = RelayState::Stopped;
            return Ok(());
        };

        // A dropped receiver also triggers shutdown; ignore the send result.
        let _ = handle.shutdown.send(());
        let mut task = handle.task;
        match timeout(Duration::from_secs(self.config.join_timeout_secs), &mut task).await {
            Ok(Ok(())) => debug!("Relay task exited cleanly"),
            Ok(Err(e)) => warn!("Relay task panicked: {e}"),
            Err(_) => {
                warn!(
                    "Relay did not exit within {}s; aborting",
                    self.config.join_timeout_secs
                );
                task.abort();
            }
        }

        self.state = RelayState::Stopped;
        info!("Relay stopped");
        Ok(())
    }
}

/// Run `job` with a serving relay, stopping the relay afterwards whether
/// the job succeeded or not. The job receives the bound address.
pub async fn run_with_relay<F, Fut, T>(
    relay: &mut CompletionRelay,
    job: F,
) -> Result<T, MdWeaveError>
where
    F: FnOnce(SocketAddr) -> Fut,
    Fut: Future<Output = Result<T, MdWeaveError>>,
{
    let addr = relay.start().await?;
    let result = job(addr).await;
    let stopped = relay.stop().await;
    let value = result?;
    stopped?;
    Ok(value)
}

async fn handle_completion(State(shared): State<RelayShared>, body: Bytes) -> Response {
    // The body is parsed by hand so a malformed body (bad JSON, bad UTF-8)
    // surfaces as the relay's own 500 error contract instead of an
    // extractor-shaped 4xx.
    let request: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return error_response(format!("invalid request body: {e}")),
    };

    let temperature = request.temperature.unwrap_or(shared.default_temperature);
    let max_tokens = request.max_tokens.unwrap_or(shared.default_max_tokens);
    debug!(
        "Relaying {} message(s) (temperature {temperature}, max_tokens {max_tokens})",
        request.messages.len()
    );

    match shared
        .backend
        .complete(&request.messages, temperature, max_tokens)
        .await
    {
        Ok((content, usage)) => {
            let model = request.model.unwrap_or_else(|| shared.model.clone());
            Json(ChatCompletionResponse::assistant(model, content, usage)).into_response()
        }
        Err(e) => {
            warn!("Upstream completion failed: {e}");
            error_response(e.to_string())
        }
    }
}

async fn handle_unknown_route() -> StatusCode {
    StatusCode::NOT_FOUND
}

fn error_response(message: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody { error: message }),
    )
        .into_response()
}
