//! Deck core library: Ollama client, chat and command workers, transcript history, and
//! host metrics, shared by the CLI and desktop applications.

pub mod cancel;
pub mod chat;
pub mod config;
pub mod controller;
pub mod exec;
pub mod history;
pub mod llm;
pub mod metrics;
pub mod session;
