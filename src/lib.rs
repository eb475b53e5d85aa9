//! Inbox Reasoner: LLM email classification with self-evaluation.

pub mod config;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod server;
pub mod templates;
