//! KrishiRAG: conversational crop advisory over a retrieval-augmented
//! knowledge base.
//!
//! The crate wires an embedding gateway, an in-memory vector index, a
//! per-user conversation store, an answer synthesizer and an optional
//! image diagnosis adapter behind a single request coordinator, exposed
//! through a REST API and a small CLI.

pub mod api;
pub mod config;
pub mod conversation;
pub mod embeddings;
pub mod errors;
pub mod knowledge;
pub mod llm;
pub mod logging;
pub mod models;
pub mod rag;
pub mod vision;

pub use config::AppConfig;
pub use errors::*;
