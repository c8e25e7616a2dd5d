//! HTTP gateway for the Quill Slack bot.
//!
//! Verifies inbound request signatures, dispatches Slack events, drafts
//! replies through the configured LLM client, and hosts the OAuth install
//! routes.

pub mod memory;
pub mod responder;
pub mod server;
pub mod signature;

pub use memory::{ConversationMemory, CONVERSATION_WINDOW_SIZE};
pub use responder::{DraftResponder, DEFAULT_DRAFT_MODEL, DRAFT_TEMPERATURE, FALLBACK_REPLY};
pub use server::{build_router, seed_single_workspace, serve, GatewayState};
pub use signature::{
    timestamp_is_stale, verify_slack_signature, MAX_TIMESTAMP_SKEW_SECONDS,
};
