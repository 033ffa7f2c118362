//! Baidu ERNIE workshop adapter
//!
//! ERNIE authenticates with an `access_token` query parameter and does not
//! take system messages in the message list; they go into a separate
//! `system` field. Errors arrive inside a 200 body as `error_code` /
//! `error_msg`.

use bytes::Bytes;
use futures::Stream;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::BaiduConfig;
use crate::error::{PolychatError, Result};
use crate::messages::{ChatMessage, Role};

use super::{CanonicalChatResponse, ChatOptions, TokenUsage};

const CHAT_PATH: &str = "/rpc/2.0/ai_custom/v1/wenxinworkshop/chat";
const EMBEDDING_PATH: &str = "/rpc/2.0/ai_custom/v1/wenxinworkshop/embeddings/embedding-v1";

#[derive(Debug, Serialize)]
struct ErnieRequest {
    messages: Vec<ErnieMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ErnieMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ErnieResponse {
    #[serde(default)]
    result: String,
    usage: Option<TokenUsage>,
    error_code: Option<i64>,
    error_msg: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErnieEmbeddingRequest<'a> {
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ErnieEmbeddingResponse {
    #[serde(default)]
    data: Vec<ErnieEmbeddingData>,
    error_code: Option<i64>,
    error_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErnieEmbeddingData {
    embedding: Vec<f32>,
}

/// Split system turns out of the message list per ERNIE's request shape
fn convert_messages(messages: &[ChatMessage]) -> (Vec<ErnieMessage>, Option<String>) {
    let mut system_parts = Vec::new();
    let mut converted = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => system_parts.push(msg.content.clone()),
            Role::User => converted.push(ErnieMessage {
                role: "user",
                content: msg.content.clone(),
            }),
            Role::Assistant => converted.push(ErnieMessage {
                role: "assistant",
                content: msg.content.clone(),
            }),
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n"))
    };
    (converted, system)
}

fn build_request(messages: &[ChatMessage], opts: &ChatOptions, stream: bool) -> ErnieRequest {
    let (messages, system) = convert_messages(messages);
    ErnieRequest {
        messages,
        system,
        temperature: opts.temperature,
        top_p: opts.top_p,
        max_output_tokens: opts.max_tokens,
        stream,
    }
}

fn chat_url(cfg: &BaiduConfig, model: &str) -> String {
    format!(
        "{}{CHAT_PATH}/{model}?access_token={}",
        cfg.base_url, cfg.access_token
    )
}

pub(crate) async fn chat(
    http: &Client,
    cfg: &BaiduConfig,
    messages: &[ChatMessage],
    opts: &ChatOptions,
) -> Result<CanonicalChatResponse> {
    let model = opts.model.as_deref().unwrap_or(&cfg.model);
    let request = build_request(messages, opts, false);

    let response = http
        .post(chat_url(cfg, model))
        .json(&request)
        .send()
        .await?;
    let body = response.text().await?;

    let parsed: ErnieResponse = serde_json::from_str(&body)
        .map_err(|e| PolychatError::Protocol(format!("baidu chat response: {e}")))?;

    if let Some(code) = parsed.error_code {
        return Err(PolychatError::Provider {
            provider: "baidu".to_string(),
            code: Some(code.to_string()),
            message: parsed.error_msg.unwrap_or_default(),
        });
    }

    let mut canonical = CanonicalChatResponse::new(model, "chat.completion");
    canonical.append(&parsed.result);
    if let Some(usage) = parsed.usage {
        canonical.set_usage(usage);
    }
    Ok(canonical)
}

pub(crate) async fn open_stream(
    http: &Client,
    cfg: &BaiduConfig,
    messages: &[ChatMessage],
    opts: &ChatOptions,
) -> Result<impl Stream<Item = reqwest::Result<Bytes>>> {
    let model = opts.model.as_deref().unwrap_or(&cfg.model);
    let request = build_request(messages, opts, true);

    let response = http
        .post(chat_url(cfg, model))
        .json(&request)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await?;
        return Err(PolychatError::Provider {
            provider: "baidu".to_string(),
            code: Some(status.as_u16().to_string()),
            message: body,
        });
    }

    Ok(response.bytes_stream())
}

pub(crate) async fn embed(
    http: &Client,
    cfg: &BaiduConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let url = format!(
        "{}{EMBEDDING_PATH}?access_token={}",
        cfg.base_url, cfg.access_token
    );

    let response = http
        .post(url)
        .json(&ErnieEmbeddingRequest { input: texts })
        .send()
        .await?;
    let body = response.text().await?;

    let parsed: ErnieEmbeddingResponse = serde_json::from_str(&body)
        .map_err(|e| PolychatError::Protocol(format!("baidu embedding response: {e}")))?;

    if let Some(code) = parsed.error_code {
        return Err(PolychatError::Provider {
            provider: "baidu".to_string(),
            code: Some(code.to_string()),
            message: parsed.error_msg.unwrap_or_default(),
        });
    }

    Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cfg(base: &str) -> BaiduConfig {
        BaiduConfig {
            access_token: "tok123".to_string(),
            base_url: base.to_string(),
            model: "completions_pro".to_string(),
        }
    }

    #[test]
    fn test_system_turns_move_to_system_field() {
        let messages = vec![
            ChatMessage::system("you are terse"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
            ChatMessage::user("bye"),
        ];
        let (converted, system) = convert_messages(&messages);
        assert_eq!(system.as_deref(), Some("you are terse"));
        assert_eq!(converted.len(), 3);
        assert_eq!(converted[0].role, "user");
    }

    #[tokio::test]
    async fn test_chat_maps_result_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{CHAT_PATH}/completions_pro")))
            .and(query_param("access_token", "tok123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "as-1",
                "result": "晚风轻拂",
                "usage": {"prompt_tokens": 4, "completion_tokens": 5, "total_tokens": 9}
            })))
            .mount(&server)
            .await;

        let http = Client::new();
        let result = chat(
            &http,
            &cfg(&server.uri()),
            &[ChatMessage::user("写一句诗")],
            &ChatOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.content, "晚风轻拂");
        assert_eq!(result.total_tokens, 9);
    }

    #[tokio::test]
    async fn test_in_body_error_code_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{CHAT_PATH}/completions_pro")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error_code": 110,
                "error_msg": "Access token invalid or no longer valid"
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

        match err {
            PolychatError::Provider { provider, code, .. } => {
                assert_eq!(provider, "baidu");
                assert_eq!(code.as_deref(), Some("110"));
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_embed_maps_vectors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(EMBEDDING_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"object": "embedding", "embedding": [0.1, 0.2], "index": 0}
                ]
            })))
            .mount(&server)
            .await;

        let http = Client::new();
        let vectors = embed(&http, &cfg(&server.uri()), &["text".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![0.1, 0.2]]);
    }
}
