//! GLM (Zhipu) adapter
//!
//! The v4 open platform speaks the OpenAI dialect, so the request plumbing
//! is shared with the OpenAI adapter. What differs: credentials, the default
//! models, and the exclusive (0, 1) parameter ranges enforced upstream at
//! the dispatch boundary.

use bytes::Bytes;
use futures::Stream;
use reqwest::Client;

use crate::config::GlmConfig;
use crate::error::Result;
use crate::messages::ChatMessage;

use super::openai::{chat_compat, embed_compat, open_stream_compat};
use super::{CanonicalChatResponse, ChatOptions};

pub(crate) async fn chat(
    http: &Client,
    cfg: &GlmConfig,
    messages: &[ChatMessage],
    opts: &ChatOptions,
) -> Result<CanonicalChatResponse> {
    chat_compat(
        http,
        &cfg.base_url,
        &cfg.api_key,
        "glm",
        opts.model.as_deref().unwrap_or(&cfg.model),
        messages,
        opts,
    )
    .await
}

pub(crate) async fn open_stream(
    http: &Client,
    cfg: &GlmConfig,
    messages: &[ChatMessage],
    opts: &ChatOptions,
) -> Result<impl Stream<Item = reqwest::Result<Bytes>>> {
    open_stream_compat(
        http,
        &cfg.base_url,
        &cfg.api_key,
        "glm",
        opts.model.as_deref().unwrap_or(&cfg.model),
        messages,
        opts,
    )
    .await
}

pub(crate) async fn embed(
    http: &Client,
    cfg: &GlmConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    embed_compat(
        http,
        &cfg.base_url,
        &cfg.api_key,
        "glm",
        &cfg.embedding_model,
        texts,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PolychatError;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cfg(base: &str) -> GlmConfig {
        GlmConfig {
            api_key: "glm-key".to_string(),
            base_url: base.to_string(),
            model: "glm-4".to_string(),
            embedding_model: "embedding-2".to_string(),
        }
    }

    #[tokio::test]
    async fn test_chat_sends_bearer_and_maps_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer glm-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "glm-4",
                "object": "chat.completion",
                "choices": [{"message": {"role": "assistant", "content": "你好"}}],
                "usage": {"prompt_tokens": 2, "completion_tokens": 1, "total_tokens": 3}
            })))
            .mount(&server)
            .await;

        let http = Client::new();
        let result = chat(
            &http,
            &cfg(&server.uri()),
            &[ChatMessage::user("hi")],
            &ChatOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.content, "你好");
        assert_eq!(result.model, "glm-4");
        assert_eq!(result.total_tokens, 3);
    }

    #[tokio::test]
    async fn test_glm_error_body_maps_to_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"code": "1210", "message": "模型参数错误"}
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
                assert_eq!(provider, "glm");
                assert_eq!(code.as_deref(), Some("1210"));
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }
}
