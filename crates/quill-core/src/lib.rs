//! Foundational low-level utilities shared across Quill crates.
//!
//! Provides atomic file-write helpers and time utilities used by state
//! persistence and token expiry calculations.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use time_utils::{current_unix_timestamp, expires_within, is_expired_unix};
