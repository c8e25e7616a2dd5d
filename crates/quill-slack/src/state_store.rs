use std::path::PathBuf;

use anyhow::{Context, Result};
use quill_core::{current_unix_timestamp, is_expired_unix, write_text_atomic};
use uuid::Uuid;

pub const DEFAULT_STATE_EXPIRATION_SECONDS: u64 = 600;

/// File-backed store for pending OAuth state nonces. Each nonce is one file
/// whose content is the issue time in Unix seconds.
pub struct FileStateStore {
    base_dir: PathBuf,
    expiration_seconds: u64,
}

impl FileStateStore {
    pub fn new(base_dir: impl Into<PathBuf>, expiration_seconds: u64) -> Self {
        Self {
            base_dir: base_dir.into(),
            expiration_seconds,
        }
    }

    /// Issues a fresh state nonce and persists its issue time.
    pub fn issue(&self) -> Result<String> {
        let state = Uuid::new_v4().to_string();
        let path = self.base_dir.join(&state);
        write_text_atomic(&path, &current_unix_timestamp().to_string())
            .with_context(|| format!("failed to persist oauth state {state}"))?;
        Ok(state)
    }

    /// Consumes a state nonce. Returns true only when the nonce was issued
    /// here and has not expired. The backing file is removed on first use,
    /// so a second consume of the same nonce always returns false.
    pub fn consume(&self, state: &str) -> Result<bool> {
        if state.is_empty() || !state.chars().all(is_safe_state_char) {
            return Ok(false);
        }

        let path = self.base_dir.join(state);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(error) => {
                return Err(error).with_context(|| format!("failed to read oauth state {state}"))
            }
        };
        std::fs::remove_file(&path)
            .with_context(|| format!("failed to remove oauth state {state}"))?;

        let Ok(issued) = raw.trim().parse::<u64>() else {
            return Ok(false);
        };
        let expires = issued.saturating_add(self.expiration_seconds);
        Ok(!is_expired_unix(Some(expires), current_unix_timestamp()))
    }
}

// State nonces are UUIDs; anything else never names a file we issued.
fn is_safe_state_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '-'
}
