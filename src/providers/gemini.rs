//! Google Gemini adapter
//!
//! Gemini keys requests with a `key` query parameter and frames
//! conversations as `contents` with `user`/`model` roles; system turns go
//! into `systemInstruction`.

use bytes::Bytes;
use futures::Stream;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::GeminiConfig;
use crate::error::{PolychatError, Result};
use crate::messages::{ChatMessage, Role};

use super::{CanonicalChatResponse, ChatOptions, TokenUsage};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

fn build_request(messages: &[ChatMessage], opts: &ChatOptions) -> GeminiRequest {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => system_parts.push(Part {
                text: Some(msg.content.clone()),
            }),
            Role::User | Role::Assistant => contents.push(Content {
                role: Some(
                    if msg.role == Role::User { "user" } else { "model" }.to_string(),
                ),
                parts: vec![Part {
                    text: Some(msg.content.clone()),
                }],
            }),
        }
    }

    let generation_config =
        if opts.temperature.is_some() || opts.top_p.is_some() || opts.max_tokens.is_some() {
            Some(GenerationConfig {
                temperature: opts.temperature,
                top_p: opts.top_p,
                max_output_tokens: opts.max_tokens,
            })
        } else {
            None
        };

    GeminiRequest {
        contents,
        system_instruction: if system_parts.is_empty() {
            None
        } else {
            Some(Content {
                role: None,
                parts: system_parts,
            })
        },
        generation_config,
    }
}

pub(crate) async fn chat(
    http: &Client,
    cfg: &GeminiConfig,
    messages: &[ChatMessage],
    opts: &ChatOptions,
) -> Result<CanonicalChatResponse> {
    let model = opts.model.as_deref().unwrap_or(&cfg.model);
    let url = format!(
        "{}/models/{model}:generateContent?key={}",
        cfg.base_url, cfg.api_key
    );

    let response = http
        .post(url)
        .json(&build_request(messages, opts))
        .send()
        .await?;
    let body = response.text().await?;

    let parsed: GeminiResponse = serde_json::from_str(&body)
        .map_err(|e| PolychatError::Protocol(format!("gemini response: {e}")))?;

    if let Some(error) = parsed.error {
        return Err(PolychatError::Provider {
            provider: "gemini".to_string(),
            code: Some(error.code.to_string()),
            message: error.message,
        });
    }

    let content = parsed
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<String>()
        })
        .ok_or_else(|| PolychatError::Protocol("gemini response has no candidates".into()))?;

    let mut canonical = CanonicalChatResponse::new(model, "chat.completion");
    canonical.append(&content);
    if let Some(u) = parsed.usage_metadata {
        canonical.set_usage(TokenUsage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        });
    }
    Ok(canonical)
}

pub(crate) async fn open_stream(
    http: &Client,
    cfg: &GeminiConfig,
    messages: &[ChatMessage],
    opts: &ChatOptions,
) -> Result<impl Stream<Item = reqwest::Result<Bytes>>> {
    let model = opts.model.as_deref().unwrap_or(&cfg.model);
    let url = format!(
        "{}/models/{model}:streamGenerateContent?alt=sse&key={}",
        cfg.base_url, cfg.api_key
    );

    let response = http
        .post(url)
        .json(&build_request(messages, opts))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await?;
        let (code, message) = match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(v) => (
                v["error"]["code"].as_i64().map(|c| c.to_string()),
                v["error"]["message"].as_str().unwrap_or(&body).to_string(),
            ),
            Err(_) => (Some(status.as_u16().to_string()), body),
        };
        return Err(PolychatError::Provider {
            provider: "gemini".to_string(),
            code,
            message,
        });
    }

    Ok(response.bytes_stream())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cfg(base: &str) -> GeminiConfig {
        GeminiConfig {
            api_key: "gk".to_string(),
            base_url: base.to_string(),
            model: "gemini-1.5-flash".to_string(),
        }
    }

    #[test]
    fn test_roles_map_to_user_and_model() {
        let req = build_request(
            &[
                ChatMessage::system("be brief"),
                ChatMessage::user("q"),
                ChatMessage::assistant("a"),
            ],
            &ChatOptions::default(),
        );
        assert_eq!(req.contents.len(), 2);
        assert_eq!(req.contents[0].role.as_deref(), Some("user"));
        assert_eq!(req.contents[1].role.as_deref(), Some("model"));
        assert!(req.system_instruction.is_some());
    }

    #[tokio::test]
    async fn test_chat_maps_parts_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-1.5-flash:generateContent"))
            .and(query_param("key", "gk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": "Forty"}, {"text": "-two"}]}}],
                "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 2, "totalTokenCount": 9}
            })))
            .mount(&server)
            .await;

        let http = Client::new();
        let result = chat(
            &http,
            &cfg(&server.uri()),
            &[ChatMessage::user("the answer?")],
            &ChatOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.content, "Forty-two");
        assert_eq!(result.prompt_tokens, 7);
        assert_eq!(result.completion_tokens, 2);
    }

    #[tokio::test]
    async fn test_error_object_maps_to_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-1.5-flash:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": {"code": 429, "message": "Resource has been exhausted", "status": "RESOURCE_EXHAUSTED"}
            })))
            .mount(&server)
            .await;

        let http = Client::new();
        let err = chat(
            &http,
            &cfg(&server.uri()),
            &[ChatMessage::user("hi")],
            &ChatOptions::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PolychatError::Provider { .. }));
    }
}
