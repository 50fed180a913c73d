//! reviewd: AI-assisted merge request review service.
//!
//! This library receives merge request webhooks, queues durable review jobs,
//! runs them through an LLM, and posts the result back to the source-control
//! host as a structured comment.

pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod output;
pub mod parser;
pub mod queue;
pub mod scm;
pub mod store;
pub mod webhook;
pub mod worker;

// Re-export commonly used error types
pub use error::{LlmError, ScmError};
