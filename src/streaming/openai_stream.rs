//! Normalizer for OpenAI-style SSE chat streams
//!
//! Also used for GLM, whose v4 endpoint speaks the same delta framing.

use async_stream::try_stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;

use crate::providers::TokenUsage;
use crate::streaming::{ChatStream, SseParser, StreamEvent};

#[derive(Debug, Deserialize)]
struct DeltaFrame {
    #[serde(default)]
    choices: Vec<DeltaChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct DeltaChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

fn extract_delta(frame: &DeltaFrame) -> Option<String> {
    frame
        .choices
        .first()
        .and_then(|c| c.delta.content.clone())
        .filter(|c| !c.is_empty())
}

/// Wrap a raw SSE byte stream into canonical events
///
/// Malformed or non-JSON payloads are skipped rather than treated as fatal,
/// since upstreams interleave heartbeats with real deltas. Exactly one
/// `Done` is emitted, on the `[DONE]` marker or transport EOF.
pub fn normalize<S>(byte_stream: S) -> ChatStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    Box::pin(try_stream! {
        let mut parser = SseParser::new();
        let mut usage: Option<TokenUsage> = None;
        let mut done_marker = false;
        let mut byte_stream = Box::pin(byte_stream);

        'transport: while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk?;

            for event in parser.parse_bytes(&chunk) {
                if event.is_done_marker() {
                    done_marker = true;
                    break 'transport;
                }
                let Ok(frame) = serde_json::from_str::<DeltaFrame>(&event.data) else {
                    continue;
                };
                if frame.usage.is_some() {
                    usage = frame.usage;
                }
                if let Some(content) = extract_delta(&frame) {
                    yield StreamEvent::Delta { content };
                }
            }
        }

        if !done_marker {
            if let Some(event) = parser.flush() {
                if !event.is_done_marker() {
                    if let Ok(frame) = serde_json::from_str::<DeltaFrame>(&event.data) {
                        if frame.usage.is_some() {
                            usage = frame.usage;
                        }
                        if let Some(content) = extract_delta(&frame) {
                            yield StreamEvent::Delta { content };
                        }
                    }
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

    fn byte_chunks(parts: Vec<&str>) -> impl Stream<Item = reqwest::Result<Bytes>> {
        stream::iter(
            parts
                .into_iter()
                .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    async fn events_of(parts: Vec<&str>) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        let mut s = normalize(byte_chunks(parts));
        while let Some(e) = s.next().await {
            out.push(e.unwrap());
        }
        out
    }

    const BODY: &str = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Hello\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" world\"}}],\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":2,\"total_tokens\":7}}\n\n",
        "data: [DONE]\n\n",
    );

    #[tokio::test]
    async fn test_delta_accumulation_with_usage() {
        let events = events_of(vec![BODY]).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta {
                    content: "Hello".to_string()
                },
                StreamEvent::Delta {
                    content: " world".to_string()
                },
                StreamEvent::Done {
                    usage: Some(TokenUsage {
                        prompt_tokens: 5,
                        completion_tokens: 2,
                        total_tokens: 7,
                    })
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_arbitrary_chunk_boundaries() {
        let expected = events_of(vec![BODY]).await;

        for split in 1..BODY.len() {
            let events = events_of(vec![&BODY[..split], &BODY[split..]]).await;
            assert_eq!(events, expected, "split at {split}");
        }
    }

    #[tokio::test]
    async fn test_multibyte_content_survives_mid_character_splits() {
        let body =
            "data: {\"choices\":[{\"delta\":{\"content\":\"春江潮水\"}}]}\n\ndata: [DONE]\n\n"
                .as_bytes();
        let expected = vec![
            StreamEvent::Delta {
                content: "春江潮水".to_string(),
            },
            StreamEvent::Done { usage: None },
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
    async fn test_eof_without_done_marker_still_terminates() {
        let events = events_of(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n",
        ])
        .await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], StreamEvent::Done { usage: None });
    }

    #[tokio::test]
    async fn test_malformed_payloads_skipped() {
        let events = events_of(vec![
            "data: not json at all\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\ndata: [DONE]\n\n",
        ])
        .await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta {
                    content: "ok".to_string()
                },
                StreamEvent::Done { usage: None },
            ]
        );
    }

    #[tokio::test]
    async fn test_exactly_one_done() {
        let events = events_of(vec!["data: [DONE]\n\ndata: [DONE]\n\n"]).await;
        assert_eq!(events, vec![StreamEvent::Done { usage: None }]);
    }
}
