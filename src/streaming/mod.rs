//! Canonical stream normalization
//!
//! Upstream providers frame their deltas differently (SSE text blocks,
//! WebSocket JSON frames, streamed JSON). Each provider gets its own small
//! normalizer that wraps the raw transport stream and emits canonical
//! [`StreamEvent`]s, rather than one generic parser trying to cover every
//! dialect.

pub mod baidu_stream;
pub mod gemini_stream;
pub mod openai_stream;
pub mod spark_stream;
pub mod sse;

pub use sse::{SseEvent, SseParser};

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::providers::TokenUsage;

/// A normalized event from any provider's stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental content delta
    Delta { content: String },

    /// Terminal event, emitted exactly once per stream
    Done { usage: Option<TokenUsage> },
}

/// Canonical chat stream type
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Collect a normalized stream into accumulated content and final usage
///
/// Mirrors what the session writer does, for callers that want a blocking
/// result from a streaming provider.
pub async fn collect(mut stream: ChatStream) -> Result<(String, Option<TokenUsage>)> {
    use futures::StreamExt;

    let mut content = String::new();
    let mut usage = None;

    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::Delta { content: delta } => content.push_str(&delta),
            StreamEvent::Done { usage: u } => {
                usage = u;
                break;
            }
        }
    }

    Ok((content, usage))
}
