//! Normalizer for Baidu ERNIE workshop SSE streams
//!
//! Baidu sends whole-JSON data lines: `{"result": "...", "is_end": bool,
//! "usage": {...}}`. Errors can arrive mid-stream as `{"error_code": ...,
//! "error_msg": "..."}` inside an otherwise valid event.

use async_stream::try_stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;

use crate::error::PolychatError;
use crate::providers::TokenUsage;
use crate::streaming::{ChatStream, SseParser, StreamEvent};

#[derive(Debug, Deserialize)]
struct ErnieFrame {
    #[serde(default)]
    result: String,
    #[serde(default)]
    is_end: bool,
    usage: Option<TokenUsage>,
    error_code: Option<i64>,
    error_msg: Option<String>,
}

/// Wrap a raw ERNIE SSE byte stream into canonical events
pub fn normalize<S>(byte_stream: S) -> ChatStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    Box::pin(try_stream! {
        let mut parser = SseParser::new();
        let mut usage: Option<TokenUsage> = None;
        let mut byte_stream = Box::pin(byte_stream);

        'transport: while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk?;

            for event in parser.parse_bytes(&chunk) {
                let Ok(frame) = serde_json::from_str::<ErnieFrame>(&event.data) else {
                    continue;
                };
                if let Some(code) = frame.error_code {
                    Err(PolychatError::Provider {
                        provider: "baidu".to_string(),
                        code: Some(code.to_string()),
                        message: frame.error_msg.unwrap_or_default(),
                    })?;
                }
                if frame.usage.is_some() {
                    usage = frame.usage;
                }
                if !frame.result.is_empty() {
                    yield StreamEvent::Delta { content: frame.result };
                }
                if frame.is_end {
                    break 'transport;
                }
            }
        }

        yield StreamEvent::Done { usage };
    })
}
