//! Polychat: multi-provider streaming chat and embedding orchestration
//!
//! This library normalizes heterogeneous upstream LLM protocols (OpenAI-style
//! SSE, GLM, Baidu ERNIE, Google Gemini, iFlyTek Spark WebSocket frames,
//! MidJourney polling) into one internal streaming abstraction, multiplexes
//! per-user chat sessions through a cache-backed stream buffer so polling
//! clients can catch up to an in-flight generation, and manages
//! retrieval-augmented prompting over embedded document pages.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::too_many_lines)]

pub mod cache;
pub mod config;
pub mod error;
pub mod imagine;
pub mod messages;
pub mod orchestrator;
pub mod providers;
pub mod retrieval;
pub mod session;
pub mod store;
pub mod streaming;
pub mod telemetry;
pub mod tokens;

// Re-exports for convenience
pub use error::{PolychatError, Result};
