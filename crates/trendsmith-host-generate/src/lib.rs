//! Trendsmith text generation capability
//!
//! The pipeline treats text generation as opaque: a prompt and
//! [`GenerationConstraints`] go in, text or a [`GenerationError`]
//! (`timeout`, `quota`, `malformed`, ...) comes out. [`OpenAiClient`] talks to
//! any OpenAI-compatible chat completions endpoint.

mod error;
mod generator;
mod openai;

pub use error::GenerationError;
pub use generator::{GenerationConstraints, TextGenerator};
pub use openai::{OpenAiClient, parse_chat_response};
