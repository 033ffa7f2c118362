//! OpenAI-compatible chat and embedding adapter
//!
//! Serves the official API and any OpenAI-compatible endpoint. The request
//! builders are shared with the GLM adapter, whose v4 platform speaks the
//! same dialect with different credentials and parameter ranges.

use bytes::Bytes;
use futures::Stream;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::OpenAiConfig;
use crate::error::{PolychatError, Result};
use crate::messages::ChatMessage;

use super::{CanonicalChatResponse, ChatOptions, TokenUsage};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<TokenUsage>,
    model: Option<String>,
    object: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    code: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

pub(crate) async fn chat(
    http: &Client,
    cfg: &OpenAiConfig,
    messages: &[ChatMessage],
    opts: &ChatOptions,
) -> Result<CanonicalChatResponse> {
    chat_compat(
        http,
        &cfg.base_url,
        &cfg.api_key,
        "openai",
        opts.model.as_deref().unwrap_or(&cfg.model),
        messages,
        opts,
    )
    .await
}

pub(crate) async fn open_stream(
    http: &Client,
    cfg: &OpenAiConfig,
    messages: &[ChatMessage],
    opts: &ChatOptions,
) -> Result<impl Stream<Item = reqwest::Result<Bytes>>> {
    open_stream_compat(
        http,
        &cfg.base_url,
        &cfg.api_key,
        "openai",
        opts.model.as_deref().unwrap_or(&cfg.model),
        messages,
        opts,
    )
    .await
}

pub(crate) async fn embed(
    http: &Client,
    cfg: &OpenAiConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    embed_compat(
        http,
        &cfg.base_url,
        &cfg.api_key,
        "openai",
        &cfg.embedding_model,
        texts,
    )
    .await
}

/// Non-streaming completion against any OpenAI-dialect endpoint
pub(crate) async fn chat_compat(
    http: &Client,
    base_url: &str,
    api_key: &str,
    provider: &str,
    model: &str,
    messages: &[ChatMessage],
    opts: &ChatOptions,
) -> Result<CanonicalChatResponse> {
    let request = ChatRequest {
        model,
        messages,
        temperature: opts.temperature,
        top_p: opts.top_p,
        max_tokens: opts.max_tokens,
        stream: false,
    };

    let response = http
        .post(format!("{base_url}/chat/completions"))
        .bearer_auth(api_key)
        .json(&request)
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(map_error_body(provider, status, &body));
    }

    let parsed: ChatResponse = serde_json::from_str(&body)
        .map_err(|e| PolychatError::Protocol(format!("{provider} chat response: {e}")))?;

    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| PolychatError::Protocol(format!("{provider} response has no choices")))?;

    let mut canonical = CanonicalChatResponse::new(
        parsed.model.unwrap_or_else(|| model.to_string()),
        parsed.object.unwrap_or_else(|| "chat.completion".to_string()),
    );
    canonical.append(&content);
    if let Some(usage) = parsed.usage {
        canonical.set_usage(usage);
    }
    Ok(canonical)
}

/// Open a streaming completion and return the raw SSE byte stream
pub(crate) async fn open_stream_compat(
    http: &Client,
    base_url: &str,
    api_key: &str,
    provider: &str,
    model: &str,
    messages: &[ChatMessage],
    opts: &ChatOptions,
) -> Result<impl Stream<Item = reqwest::Result<Bytes>>> {
    let request = ChatRequest {
        model,
        messages,
        temperature: opts.temperature,
        top_p: opts.top_p,
        max_tokens: opts.max_tokens,
        stream: true,
    };

    let response = http
        .post(format!("{base_url}/chat/completions"))
        .bearer_auth(api_key)
        .json(&request)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await?;
        return Err(map_error_body(provider, status, &body));
    }

    Ok(response.bytes_stream())
}

pub(crate) async fn embed_compat(
    http: &Client,
    base_url: &str,
    api_key: &str,
    provider: &str,
    model: &str,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let request = EmbeddingRequest {
        model,
        input: texts,
    };

    let response = http
        .post(format!("{base_url}/embeddings"))
        .bearer_auth(api_key)
        .json(&request)
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(map_error_body(provider, status, &body));
    }

    let parsed: EmbeddingResponse = serde_json::from_str(&body)
        .map_err(|e| PolychatError::Protocol(format!("{provider} embedding response: {e}")))?;

    // The API does not guarantee input order
    let mut data = parsed.data;
    data.sort_by_key(|d| d.index);

    if data.len() != texts.len() {
        return Err(PolychatError::Protocol(format!(
            "{provider} returned {} embeddings for {} inputs",
            data.len(),
            texts.len()
        )));
    }

    Ok(data.into_iter().map(|d| d.embedding).collect())
}

/// Map a non-2xx body to a provider error, falling back to the raw text
pub(crate) fn map_error_body(
    provider: &str,
    status: reqwest::StatusCode,
    body: &str,
) -> PolychatError {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        return PolychatError::Provider {
            provider: provider.to_string(),
            code: parsed.error.code.map(|c| c.to_string().trim_matches('"').to_string()),
            message: parsed.error.message,
        };
    }
    PolychatError::Provider {
        provider: provider.to_string(),
        code: Some(status.as_u16().to_string()),
        message: body.to_string(),
    }
}
