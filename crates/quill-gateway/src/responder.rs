use std::sync::Arc;

use anyhow::{Context, Result};
use quill_ai::{ChatRequest, LlmClient, Message};

use crate::memory::ConversationMemory;

pub const DEFAULT_DRAFT_MODEL: &str = "llama-3.1-sonar-small-128k-online";
pub const DRAFT_TEMPERATURE: f32 = 1.0;

/// Posted verbatim when drafting or posting the real reply fails.
pub const FALLBACK_REPLY: &str = "Out of Credits";

const DRAFT_SYSTEM_TEMPLATE: &str = "\
You are a helpful assistant named Quill that engages in conversation and answers the user's queries.
Here's the conversation history:
{conversation_history}
Based on the above conversation history, respond to the following user input:
{user_input}
Provide clear and concise responses.
Be polite, do not mention citation numbers, and take the conversation history into account.";

/// Turns mention text into a drafted reply, maintaining the per-team
/// conversation window.
pub struct DraftResponder {
    llm: Arc<dyn LlmClient>,
    memory: Arc<ConversationMemory>,
    model: String,
}

impl DraftResponder {
    pub fn new(llm: Arc<dyn LlmClient>, memory: Arc<ConversationMemory>, model: String) -> Self {
        Self { llm, memory, model }
    }

    /// Drafts a reply for the given team. The exchange is appended to the
    /// team's window only after the model call succeeds.
    pub async fn draft(&self, team_id: &str, user_input: &str) -> Result<String> {
        let history = self.memory.history(team_id)?;
        let system = DRAFT_SYSTEM_TEMPLATE
            .replace("{conversation_history}", &history)
            .replace("{user_input}", user_input);

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![Message::system(system), Message::user(user_input)],
            max_tokens: None,
            temperature: Some(DRAFT_TEMPERATURE),
        };

        let response = self
            .llm
            .complete(request)
            .await
            .context("draft completion failed")?;
        let text = response.message.content;
        self.memory.record(team_id, user_input, &text)?;
        Ok(text)
    }
}
