//! Hosted LLM client surface for the Quill workspace.
//!
//! Exposes the provider-agnostic chat types plus the Perplexity-backed
//! `LlmClient` implementation used to draft replies.

mod perplexity;
mod retry;
mod types;

pub use perplexity::{PerplexityClient, PerplexityConfig, DEFAULT_PERPLEXITY_API_BASE};
pub use types::{
    ChatRequest, ChatResponse, ChatUsage, LlmClient, Message, MessageRole, QuillAiError,
};
