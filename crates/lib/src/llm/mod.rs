//! LLM abstraction and Ollama client.
//!
//! Supports probing, listing models, and streaming chat against a local Ollama instance.

mod ollama;

pub use ollama::{
    accumulate_reply, LineBuffer, LineOutcome, OllamaClient, OllamaError, OllamaModel,
    ReplyAccumulator,
};
