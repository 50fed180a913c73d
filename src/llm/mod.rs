//! LLM provider clients, pooling, and prompts.
//!
//! One chat-completion trait covers every supported provider; the registry
//! maps stored provider-type tags to client constructors and the pool shares
//! one client per configured provider across workers.

pub mod client;
pub mod pool;
pub mod prompt;
pub mod registry;

pub use client::{ChatRequest, ChatResponse, LlmProvider, Message, OpenAiCompatClient, TokenUsage};
pub use pool::ClientPool;
pub use prompt::{
    render, resolve_template, validate_template, PromptData, PromptSource, DEFAULT_REVIEW_PROMPT,
    REVIEW_SYSTEM_PROMPT,
};
pub use registry::{create_client, register_provider, ClientFactory};
