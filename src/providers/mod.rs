//! Provider adapters for upstream LLM and image-generation services
//!
//! Each provider is a tagged variant dispatched through a single `match` at
//! the [`ProviderClient`] boundary; protocol quirks stay local to each
//! adapter module. Adapters are stateless and safe to share across tasks.

pub mod baidu;
pub mod gemini;
pub mod glm;
pub mod midjourney;
pub mod openai;
pub mod spark;
pub mod stable_diffusion;

use std::str::FromStr;
use std::sync::Arc;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::AiConfig;
use crate::error::{PolychatError, Result};
use crate::messages::ChatMessage;
use crate::streaming::{self, ChatStream};

/// Upstream provider discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Glm,
    Baidu,
    Gemini,
    Spark,
    #[serde(rename = "mj")]
    MidJourney,
    #[serde(rename = "sd")]
    StableDiffusion,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Glm => "glm",
            ProviderKind::Baidu => "baidu",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Spark => "spark",
            ProviderKind::MidJourney => "mj",
            ProviderKind::StableDiffusion => "sd",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = PolychatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" | "gpt" => Ok(ProviderKind::OpenAi),
            "glm" | "zhipu" => Ok(ProviderKind::Glm),
            "baidu" | "ernie" => Ok(ProviderKind::Baidu),
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            "spark" | "xunfei" => Ok(ProviderKind::Spark),
            "mj" | "midjourney" => Ok(ProviderKind::MidJourney),
            "sd" | "stable-diffusion" => Ok(ProviderKind::StableDiffusion),
            other => Err(PolychatError::Parameter(format!(
                "unknown provider: {other}"
            ))),
        }
    }
}

/// Sampling and sizing options for a chat request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatOptions {
    /// Model override; the provider's configured default applies when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Token usage in the shape shared by the OpenAI-family providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// The normalized shape every provider response is translated into
///
/// During streaming this acts as a mutable accumulator; once the stream
/// ends it is an immutable snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalChatResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub model: String,
    pub object: String,
}

impl CanonicalChatResponse {
    #[must_use]
    pub fn new(model: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            model: model.into(),
            object: object.into(),
        }
    }

    /// Append a streamed content delta
    pub fn append(&mut self, delta: &str) {
        self.content.push_str(delta);
    }

    /// Copy usage fields from a provider-reported usage block
    pub fn set_usage(&mut self, usage: TokenUsage) {
        self.prompt_tokens = usage.prompt_tokens;
        self.completion_tokens = usage.completion_tokens;
        self.total_tokens = usage.total_tokens;
    }
}

/// Request for an image-generation job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagineRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    pub count: u32,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Default for ImagineRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: None,
            count: 1,
            width: 512,
            height: 512,
            model: None,
        }
    }
}

/// State of an asynchronous image-generation task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagineTask {
    pub task_id: String,
    /// 0..=100
    pub progress: u8,
    pub image_url: Option<String>,
    pub fail_reason: Option<String>,
}

impl ImagineTask {
    /// Task finished successfully with an image
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.progress >= 100 && self.fail_reason.is_none()
    }

    /// Task reported an explicit failure
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.fail_reason.is_some()
    }
}

/// Result of submitting an imagine job
#[derive(Debug)]
pub enum ImagineOutcome {
    /// Job accepted; progress is observed through [`ProviderClient::poll_task`]
    Submitted { task_id: String },

    /// Provider rendered synchronously; decoded image payloads
    Images(Vec<Vec<u8>>),
}

/// Multi-provider client dispatching canonical requests to adapters
///
/// Holds one shared HTTP connection pool; constructed once at startup from
/// an [`AiConfig`] and injected wherever it is needed.
#[derive(Clone)]
pub struct ProviderClient {
    http: Client,
    config: Arc<AiConfig>,
}

impl ProviderClient {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns a transport error if the HTTP client cannot be built.
    pub fn new(config: AiConfig) -> Result<Self> {
        let http = Client::builder().build()?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    #[must_use]
    pub fn config(&self) -> &AiConfig {
        &self.config
    }

    /// Resolve an optional provider to the configured default
    #[must_use]
    pub fn resolve(&self, kind: Option<ProviderKind>) -> ProviderKind {
        kind.unwrap_or(self.config.default_provider)
    }

    /// Non-streaming chat completion
    ///
    /// # Errors
    ///
    /// Parameter errors are raised before any network call; transport,
    /// protocol and provider errors per the upstream response.
    pub async fn chat(
        &self,
        kind: ProviderKind,
        messages: &[ChatMessage],
        opts: &ChatOptions,
    ) -> Result<CanonicalChatResponse> {
        validate_chat(kind, messages, opts)?;
        tracing::debug!(provider = %kind, messages = messages.len(), "chat request");

        match kind {
            ProviderKind::OpenAi => {
                let cfg = self.config.openai.as_ref().ok_or_else(not_configured(kind))?;
                openai::chat(&self.http, cfg, messages, opts).await
            }
            ProviderKind::Glm => {
                let cfg = self.config.glm.as_ref().ok_or_else(not_configured(kind))?;
                glm::chat(&self.http, cfg, messages, opts).await
            }
            ProviderKind::Baidu => {
                let cfg = self.config.baidu.as_ref().ok_or_else(not_configured(kind))?;
                baidu::chat(&self.http, cfg, messages, opts).await
            }
            ProviderKind::Gemini => {
                let cfg = self.config.gemini.as_ref().ok_or_else(not_configured(kind))?;
                gemini::chat(&self.http, cfg, messages, opts).await
            }
            ProviderKind::Spark => {
                // Spark is WebSocket-only; a sync result is the collected stream
                let stream = self.chat_stream(kind, messages, opts).await?;
                let cfg = self.config.spark.as_ref().ok_or_else(not_configured(kind))?;
                let (content, usage) = streaming::collect(stream).await?;
                let mut response = CanonicalChatResponse::new(&cfg.domain, "chat.completion");
                response.append(&content);
                if let Some(usage) = usage {
                    response.set_usage(usage);
                }
                Ok(response)
            }
            ProviderKind::MidJourney | ProviderKind::StableDiffusion => {
                Err(unsupported(kind, "chat"))
            }
        }
    }

    /// Streaming chat completion, returned as a canonical normalized stream
    ///
    /// # Errors
    ///
    /// Parameter and connection-time errors are returned here; mid-stream
    /// errors surface as `Err` items in the stream.
    pub async fn chat_stream(
        &self,
        kind: ProviderKind,
        messages: &[ChatMessage],
        opts: &ChatOptions,
    ) -> Result<ChatStream> {
        validate_chat(kind, messages, opts)?;
        tracing::debug!(provider = %kind, messages = messages.len(), "chat stream request");

        match kind {
            ProviderKind::OpenAi => {
                let cfg = self.config.openai.as_ref().ok_or_else(not_configured(kind))?;
                let bytes = openai::open_stream(&self.http, cfg, messages, opts).await?;
                Ok(streaming::openai_stream::normalize(bytes))
            }
            ProviderKind::Glm => {
                let cfg = self.config.glm.as_ref().ok_or_else(not_configured(kind))?;
                let bytes = glm::open_stream(&self.http, cfg, messages, opts).await?;
                Ok(streaming::openai_stream::normalize(bytes))
            }
            ProviderKind::Baidu => {
                let cfg = self.config.baidu.as_ref().ok_or_else(not_configured(kind))?;
                let bytes = baidu::open_stream(&self.http, cfg, messages, opts).await?;
                Ok(streaming::baidu_stream::normalize(bytes))
            }
            ProviderKind::Gemini => {
                let cfg = self.config.gemini.as_ref().ok_or_else(not_configured(kind))?;
                let bytes = gemini::open_stream(&self.http, cfg, messages, opts).await?;
                Ok(streaming::gemini_stream::normalize(bytes))
            }
            ProviderKind::Spark => {
                let cfg = self.config.spark.as_ref().ok_or_else(not_configured(kind))?;
                let frames = spark::open_stream(cfg, messages, opts).await?;
                Ok(streaming::spark_stream::normalize(frames))
            }
            ProviderKind::MidJourney | ProviderKind::StableDiffusion => {
                Err(unsupported(kind, "chat"))
            }
        }
    }

    /// Embed a batch of texts, one vector per input text
    ///
    /// # Errors
    ///
    /// Rejects empty input before any network call.
    pub async fn embed(&self, kind: ProviderKind, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Err(PolychatError::Parameter("texts must not be empty".into()));
        }
        tracing::debug!(provider = %kind, texts = texts.len(), "embedding request");

        match kind {
            ProviderKind::OpenAi => {
                let cfg = self.config.openai.as_ref().ok_or_else(not_configured(kind))?;
                openai::embed(&self.http, cfg, texts).await
            }
            ProviderKind::Glm => {
                let cfg = self.config.glm.as_ref().ok_or_else(not_configured(kind))?;
                glm::embed(&self.http, cfg, texts).await
            }
            ProviderKind::Baidu => {
                let cfg = self.config.baidu.as_ref().ok_or_else(not_configured(kind))?;
                baidu::embed(&self.http, cfg, texts).await
            }
            _ => Err(unsupported(kind, "embeddings")),
        }
    }

    /// Submit an image-generation job
    ///
    /// # Errors
    ///
    /// Rejects an empty prompt before any network call.
    pub async fn imagine(&self, kind: ProviderKind, req: &ImagineRequest) -> Result<ImagineOutcome> {
        if req.prompt.trim().is_empty() {
            return Err(PolychatError::Parameter("prompt must not be empty".into()));
        }

        match kind {
            ProviderKind::MidJourney => {
                let cfg = self
                    .config
                    .midjourney
                    .as_ref()
                    .ok_or_else(not_configured(kind))?;
                let task_id = midjourney::submit_imagine(&self.http, cfg, req).await?;
                Ok(ImagineOutcome::Submitted { task_id })
            }
            ProviderKind::StableDiffusion => {
                let cfg = self
                    .config
                    .stable_diffusion
                    .as_ref()
                    .ok_or_else(not_configured(kind))?;
                let images = stable_diffusion::txt2img(&self.http, cfg, req).await?;
                Ok(ImagineOutcome::Images(images))
            }
            _ => Err(unsupported(kind, "imagine")),
        }
    }

    /// Fetch the current state of a previously submitted image task
    ///
    /// # Errors
    ///
    /// Only polling providers support this; others return `Unsupported`.
    pub async fn poll_task(&self, kind: ProviderKind, task_id: &str) -> Result<ImagineTask> {
        match kind {
            ProviderKind::MidJourney => {
                let cfg = self
                    .config
                    .midjourney
                    .as_ref()
                    .ok_or_else(not_configured(kind))?;
                midjourney::fetch_task(&self.http, cfg, task_id).await
            }
            _ => Err(unsupported(kind, "task polling")),
        }
    }
}

fn not_configured(kind: ProviderKind) -> impl FnOnce() -> PolychatError {
    move || PolychatError::NotConfigured(kind.as_str().to_string())
}

fn unsupported(kind: ProviderKind, capability: &str) -> PolychatError {
    PolychatError::Unsupported {
        provider: kind.as_str().to_string(),
        capability: capability.to_string(),
    }
}

/// Validate provider-specific numeric ranges before any network call
fn validate_chat(kind: ProviderKind, messages: &[ChatMessage], opts: &ChatOptions) -> Result<()> {
    if messages.is_empty() {
        return Err(PolychatError::Parameter(
            "messages must not be empty".into(),
        ));
    }

    if let Some(t) = opts.temperature {
        let ok = match kind {
            // GLM requires the open interval (0, 1)
            ProviderKind::Glm => t > 0.0 && t < 1.0,
            // Baidu and Spark require (0, 1]
            ProviderKind::Baidu | ProviderKind::Spark => t > 0.0 && t <= 1.0,
            _ => (0.0..=2.0).contains(&t),
        };
        if !ok {
            return Err(PolychatError::Parameter(format!(
                "temperature {t} out of range for provider {kind}"
            )));
        }
    }

    if let Some(p) = opts.top_p {
        let ok = match kind {
            ProviderKind::Glm => p > 0.0 && p < 1.0,
            ProviderKind::Baidu => (0.0..=1.0).contains(&p),
            _ => p > 0.0 && p <= 1.0,
        };
        if !ok {
            return Err(PolychatError::Parameter(format!(
                "top_p {p} out of range for provider {kind}"
            )));
        }
    }

    Ok(())
}
