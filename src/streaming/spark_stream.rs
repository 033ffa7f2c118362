//! Normalizer for iFlyTek Spark WebSocket frames
//!
//! Each WebSocket text message is a complete JSON frame. A non-zero
//! `header.code` aborts the stream with the provider's message;
//! `header.status == 2` marks the last frame.

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::tungstenite::Message;

use crate::error::PolychatError;
use crate::providers::TokenUsage;
use crate::streaming::{ChatStream, StreamEvent};

const STATUS_LAST_FRAME: i32 = 2;

#[derive(Debug, Deserialize)]
pub(crate) struct SparkFrame {
    pub header: SparkHeader,
    pub payload: Option<SparkPayload>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SparkHeader {
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: i32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SparkPayload {
    pub choices: Option<SparkChoices>,
    pub usage: Option<SparkUsage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SparkChoices {
    #[serde(default)]
    pub text: Vec<SparkText>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SparkText {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SparkUsage {
    pub text: Option<SparkUsageText>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SparkUsageText {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl From<SparkUsageText> for TokenUsage {
    fn from(u: SparkUsageText) -> Self {
        TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

/// Wrap a Spark WebSocket message stream into canonical events
pub fn normalize<S, E>(frames: S) -> ChatStream
where
    S: Stream<Item = std::result::Result<Message, E>> + Send + 'static,
    E: Into<PolychatError> + Send + 'static,
{
    Box::pin(try_stream! {
        let mut usage: Option<TokenUsage> = None;
        let mut frames = Box::pin(frames);

        while let Some(msg) = frames.next().await {
            let msg = msg.map_err(Into::into)?;
            let text = match msg {
                Message::Text(t) => t.to_string(),
                Message::Close(_) => break,
                // Ping/pong handled by the transport
                _ => continue,
            };

            let frame: SparkFrame = serde_json::from_str(&text)
                .map_err(|e| PolychatError::Protocol(format!("bad spark frame: {e}")))?;

            if frame.header.code != 0 {
                Err(PolychatError::Provider {
                    provider: "spark".to_string(),
                    code: Some(frame.header.code.to_string()),
                    message: frame.header.message,
                })?;
            }

            let last = frame.header.status == STATUS_LAST_FRAME;

            if let Some(payload) = frame.payload {
                if let Some(choices) = payload.choices {
                    for t in choices.text {
                        if !t.content.is_empty() {
                            yield StreamEvent::Delta { content: t.content };
                        }
                    }
                }
                if let Some(u) = payload.usage.and_then(|u| u.text) {
                    usage = Some(u.into());
                }
            }

            if last {
                break;
            }
        }

        yield StreamEvent::Done { usage };
    })
}
