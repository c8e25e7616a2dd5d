use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};

/// Number of (input, response) pairs retained per team.
pub const CONVERSATION_WINDOW_SIZE: usize = 5;

/// Per-team trailing window of prior exchanges, used as LLM prompt context.
/// Lives in memory only; restarts forget all history.
#[derive(Default)]
pub struct ConversationMemory {
    windows: Mutex<HashMap<String, VecDeque<(String, String)>>>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Renders the team's prior exchanges oldest-first, one
    /// `Human:`/`AI:` line pair per exchange.
    pub fn history(&self, team_id: &str) -> Result<String> {
        let windows = self.lock()?;
        let Some(window) = windows.get(team_id) else {
            return Ok(String::new());
        };
        Ok(window
            .iter()
            .map(|(input, response)| format!("Human: {input}\nAI: {response}"))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    /// Appends an exchange, evicting the oldest entry beyond the window size.
    pub fn record(&self, team_id: &str, input: &str, response: &str) -> Result<()> {
        let mut windows = self.lock()?;
        let window = windows.entry(team_id.to_string()).or_default();
        window.push_back((input.to_string(), response.to_string()));
        while window.len() > CONVERSATION_WINDOW_SIZE {
            window.pop_front();
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, VecDeque<(String, String)>>>> {
        self.windows
            .lock()
            .map_err(|_| anyhow!("conversation memory mutex is poisoned"))
    }
}
