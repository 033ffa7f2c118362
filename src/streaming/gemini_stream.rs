//! Normalizer for Google Gemini streaming responses
//!
//! `streamGenerateContent?alt=sse` emits SSE data lines, each one a full
//! `GenerateContentResponse` carrying a content part and, on later frames,
//! `usageMetadata`. There is no explicit done marker; EOF is terminal.

use async_stream::try_stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;

use crate::providers::TokenUsage;
use crate::streaming::{ChatStream, SseParser, StreamEvent};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiFrame {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

impl From<GeminiUsage> for TokenUsage {
    fn from(u: GeminiUsage) -> Self {
        TokenUsage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        }
    }
}

fn frame_text(frame: &GeminiFrame) -> String {
    frame
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
        .unwrap_or_default()
}

/// Wrap a raw Gemini SSE byte stream into canonical events
pub fn normalize<S>(byte_stream: S) -> ChatStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    Box::pin(try_stream! {
        let mut parser = SseParser::new();
        let mut usage: Option<TokenUsage> = None;
        let mut byte_stream = Box::pin(byte_stream);

        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk?;

            for event in parser.parse_bytes(&chunk) {
                let Ok(frame) = serde_json::from_str::<GeminiFrame>(&event.data) else {
                    continue;
                };
                let content = frame_text(&frame);
                if let Some(u) = frame.usage_metadata {
                    usage = Some(u.into());
                }
                if !content.is_empty() {
                    yield StreamEvent::Delta { content };
                }
            }
        }

        yield StreamEvent::Done { usage };
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn test_multibyte_text_survives_mid_character_splits() {
        // Text and usage arrive in the same frame
        let body = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"月落乌啼\"}]}}],\"usageMetadata\":{\"promptTokenCount\":2,\"candidatesTokenCount\":4,\"totalTokenCount\":6}}\n\n".as_bytes();
        let expected = vec![
            StreamEvent::Delta {
                content: "月落乌啼".to_string(),
            },
            StreamEvent::Done {
                usage: Some(TokenUsage {
                    prompt_tokens: 2,
                    completion_tokens: 4,
                    total_tokens: 6,
                }),
            },
        ];

        for split in 1..body.len() {
            let chunks = vec![
                Ok(Bytes::copy_from_slice(&body[..split])),
                Ok(Bytes::copy_from_slice(&body[split..])),
            ];
            let mut s = normalize(stream::iter(chunks));
            let mut events = Vec::new();
            while let Some(e) = s.next().await {
                events.push(e.unwrap());
            }
            assert_eq!(events, expected, "split at {split}");
        }
    }

    #[tokio::test]
    async fn test_parts_concatenated_and_usage_mapped() {
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"The \"},{\"text\":\"answer\"}]}}]}\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\" is 42.\"}]}}],\"usageMetadata\":{\"promptTokenCount\":10,\"candidatesTokenCount\":6,\"totalTokenCount\":16}}\n\n",
        );
        let chunks = vec![Ok(Bytes::copy_from_slice(body.as_bytes()))];
        let mut s = normalize(stream::iter(chunks));

        let mut events = Vec::new();
        while let Some(e) = s.next().await {
            events.push(e.unwrap());
        }

        assert_eq!(
            events,
            vec![
                StreamEvent::Delta {
                    content: "The answer".to_string()
                },
                StreamEvent::Delta {
                    content: " is 42.".to_string()
                },
                StreamEvent::Done {
                    usage: Some(TokenUsage {
                        prompt_tokens: 10,
                        completion_tokens: 6,
                        total_tokens: 16,
                    })
                },
            ]
        );
    }
}
