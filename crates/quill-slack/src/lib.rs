//! Slack platform integration for the Quill workspace.
//!
//! Covers the Web API client, the multi-workspace installation store, and
//! the OAuth v2 install flow with refresh-token rotation.

mod api_client;
mod helpers;
mod installation_store;
mod oauth;
mod state_store;

pub use api_client::{
    BotIdentity, OauthAccess, PostedMessage, QuillSlackError, SlackApiClient,
    DEFAULT_SLACK_API_BASE,
};
pub use installation_store::{storage_key, Installation, InstallationStore};
pub use oauth::{
    OauthSettings, SlackOauthService, DEFAULT_OAUTH_SCOPES, SLACK_AUTHORIZE_URL,
    TOKEN_ROTATION_WINDOW_SECONDS,
};
pub use state_store::{FileStateStore, DEFAULT_STATE_EXPIRATION_SECONDS};
