use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use quill_core::{current_unix_timestamp, expires_within};

use crate::{
    api_client::{OauthAccess, SlackApiClient},
    installation_store::{Installation, InstallationStore},
    state_store::FileStateStore,
};

pub const SLACK_AUTHORIZE_URL: &str = "https://slack.com/oauth/v2/authorize";
pub const DEFAULT_OAUTH_SCOPES: &str = "app_mentions:read,chat:write,commands,team:read";

/// Tokens are rotated once they are due to expire within this window.
pub const TOKEN_ROTATION_WINDOW_SECONDS: u64 = 7_200;

#[derive(Debug, Clone)]
/// Public struct `OauthSettings` used across Quill components.
pub struct OauthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub scopes: String,
    pub redirect_uri: Option<String>,
}

/// Drives the OAuth v2 install flow and refresh-token rotation.
pub struct SlackOauthService {
    api: SlackApiClient,
    settings: OauthSettings,
    installations: Arc<InstallationStore>,
    states: FileStateStore,
}

impl SlackOauthService {
    pub fn new(
        api: SlackApiClient,
        settings: OauthSettings,
        installations: Arc<InstallationStore>,
        states: FileStateStore,
    ) -> Self {
        Self {
            api,
            settings,
            installations,
            states,
        }
    }

    /// Issues a state nonce and returns the authorize URL to redirect to.
    pub fn begin_install(&self) -> Result<String> {
        let state = self.states.issue()?;
        Ok(self.authorize_url(&state))
    }

    pub fn consume_state(&self, state: &str) -> Result<bool> {
        self.states.consume(state)
    }

    fn authorize_url(&self, state: &str) -> String {
        let mut url = format!(
            "{}?client_id={}&scope={}&state={}",
            SLACK_AUTHORIZE_URL,
            urlencoding::encode(&self.settings.client_id),
            urlencoding::encode(&self.settings.scopes),
            urlencoding::encode(state),
        );
        if let Some(redirect_uri) = self.settings.redirect_uri.as_deref() {
            url.push_str("&redirect_uri=");
            url.push_str(&urlencoding::encode(redirect_uri));
        }
        url
    }

    /// Exchanges an authorization code, resolves the bot identity on the new
    /// token, and saves the resulting installation.
    pub async fn complete_install(&self, code: &str) -> Result<Installation> {
        let grant = self
            .api
            .oauth_access(
                &self.settings.client_id,
                &self.settings.client_secret,
                code,
                self.settings.redirect_uri.as_deref(),
            )
            .await
            .context("oauth code exchange failed")?;

        let installation = installation_from_grant(&self.api, grant).await?;
        self.installations.save(installation.clone())?;
        Ok(installation)
    }

    /// Refreshes the bot token when it expires inside the rotation window.
    /// Returns the updated installation, or `None` when no rotation was due.
    pub async fn rotate_if_due(
        &self,
        installation: &Installation,
        now_unix: u64,
    ) -> Result<Option<Installation>> {
        if !expires_within(
            installation.token_expires_at,
            now_unix,
            TOKEN_ROTATION_WINDOW_SECONDS,
        ) {
            return Ok(None);
        }

        let refresh_token = installation
            .bot_refresh_token
            .as_deref()
            .ok_or_else(|| anyhow!("installation has a token expiry but no refresh token"))?;
        let grant = self
            .api
            .refresh_access(
                &self.settings.client_id,
                &self.settings.client_secret,
                refresh_token,
            )
            .await
            .context("token rotation failed")?;

        let mut rotated = installation.clone();
        rotated.bot_token = grant.access_token;
        if grant.refresh_token.is_some() {
            rotated.bot_refresh_token = grant.refresh_token;
        }
        rotated.token_expires_at = grant
            .expires_in
            .map(|expires_in| now_unix.saturating_add(expires_in));
        self.installations.save(rotated.clone())?;
        Ok(Some(rotated))
    }
}

async fn installation_from_grant(
    api: &SlackApiClient,
    grant: OauthAccess,
) -> Result<Installation> {
    let now = current_unix_timestamp();
    let identity = api
        .auth_test(&grant.access_token)
        .await
        .context("auth.test on freshly granted token failed")?;

    Ok(Installation {
        enterprise_id: grant.enterprise_id.or(identity.enterprise_id),
        team_id: grant.team_id.or(identity.team_id),
        bot_token: grant.access_token,
        bot_refresh_token: grant.refresh_token,
        bot_id: identity.bot_id,
        bot_user_id: grant
            .bot_user_id
            .unwrap_or_else(|| identity.user_id.clone()),
        user_id: grant.authed_user_id,
        token_expires_at: grant
            .expires_in
            .map(|expires_in| now.saturating_add(expires_in)),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use httpmock::prelude::*;
    use quill_core::current_unix_timestamp;
    use serde_json::json;
    use tempfile::tempdir;

    use super::{OauthSettings, SlackOauthService, TOKEN_ROTATION_WINDOW_SECONDS};
    use crate::{
        api_client::SlackApiClient,
        installation_store::{Installation, InstallationStore},
        state_store::FileStateStore,
    };

    fn test_settings() -> OauthSettings {
        OauthSettings {
            client_id: "cid".to_string(),
            client_secret: "secret".to_string(),
            scopes: "app_mentions:read,chat:write".to_string(),
            redirect_uri: Some("https://example.com/slack/oauth_redirect".to_string()),
        }
    }

    fn test_service(
        base_url: &str,
        states_dir: &std::path::Path,
    ) -> (SlackOauthService, Arc<InstallationStore>) {
        let api = SlackApiClient::new(base_url.to_string(), 2_000, 2, 1).expect("client");
        let installations = Arc::new(InstallationStore::new());
        let states = FileStateStore::new(states_dir, 600);
        (
            SlackOauthService::new(api, test_settings(), installations.clone(), states),
            installations,
        )
    }

    fn installed(team_id: &str, expires_at: Option<u64>) -> Installation {
        Installation {
            enterprise_id: None,
            team_id: Some(team_id.to_string()),
            bot_token: "xoxb-current".to_string(),
            bot_refresh_token: Some("xoxe-current".to_string()),
            bot_id: Some("B1".to_string()),
            bot_user_id: "UBOT".to_string(),
            user_id: None,
            token_expires_at: expires_at,
        }
    }

    #[test]
    fn functional_begin_install_issues_consumable_state() {
        let temp = tempdir().expect("tempdir");
        let (service, _) = test_service("http://unused.local/api", temp.path());

        let url = service.begin_install().expect("begin install");
        assert!(url.starts_with("https://slack.com/oauth/v2/authorize?client_id=cid"));
        assert!(url.contains("scope=app_mentions%3Aread%2Cchat%3Awrite"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fexample.com%2Fslack%2Foauth_redirect"));

        let state = url
            .split("state=")
            .nth(1)
            .and_then(|rest| rest.split('&').next())
            .expect("state param");
        assert!(service.consume_state(state).expect("consume"));
        assert!(!service.consume_state(state).expect("second consume"));
    }

    #[tokio::test]
    async fn integration_complete_install_saves_workspace_credentials() {
        let server = MockServer::start();
        let exchange = server.mock(|when, then| {
            when.method(POST)
                .path("/oauth.v2.access")
                .body_includes("code=auth-code");
            then.status(200).json_body(json!({
                "ok": true,
                "access_token": "xoxb-new",
                "refresh_token": "xoxe-new",
                "expires_in": 43_200,
                "bot_user_id": "UBOT",
                "team": {"id": "T1", "name": "acme"},
                "authed_user": {"id": "U9"}
            }));
        });
        let auth = server.mock(|when, then| {
            when.method(POST)
                .path("/auth.test")
                .header("authorization", "Bearer xoxb-new");
            then.status(200).json_body(json!({
                "ok": true,
                "user_id": "UBOT",
                "bot_id": "B42",
                "team_id": "T1"
            }));
        });

        let temp = tempdir().expect("tempdir");
        let (service, installations) = test_service(&server.base_url(), temp.path());

        let installation = service.complete_install("auth-code").await.expect("install");
        assert_eq!(installation.team_id.as_deref(), Some("T1"));
        assert_eq!(installation.bot_token, "xoxb-new");
        assert_eq!(installation.bot_id.as_deref(), Some("B42"));
        assert_eq!(installation.user_id.as_deref(), Some("U9"));
        let expires_at = installation.token_expires_at.expect("expiry");
        assert!(expires_at >= current_unix_timestamp() + 43_000);

        let stored = installations.find(Some("T1"), None).expect("find");
        assert_eq!(stored, Some(installation));
        exchange.assert();
        auth.assert();
    }

    #[tokio::test]
    async fn functional_rotate_if_due_skips_fresh_tokens() {
        let temp = tempdir().expect("tempdir");
        let (service, _) = test_service("http://unused.local/api", temp.path());

        let now = current_unix_timestamp();
        let fresh = installed("T1", Some(now + TOKEN_ROTATION_WINDOW_SECONDS + 600));
        let rotated = service.rotate_if_due(&fresh, now).await.expect("rotate");
        assert!(rotated.is_none());

        let permanent = installed("T1", None);
        let rotated = service.rotate_if_due(&permanent, now).await.expect("rotate");
        assert!(rotated.is_none());
    }

    #[tokio::test]
    async fn integration_rotate_if_due_refreshes_expiring_token() {
        let server = MockServer::start();
        let refresh = server.mock(|when, then| {
            when.method(POST)
                .path("/oauth.v2.access")
                .body_includes("grant_type=refresh_token")
                .body_includes("refresh_token=xoxe-current");
            then.status(200).json_body(json!({
                "ok": true,
                "access_token": "xoxb-rotated",
                "refresh_token": "xoxe-rotated",
                "expires_in": 43_200
            }));
        });

        let temp = tempdir().expect("tempdir");
        let (service, installations) = test_service(&server.base_url(), temp.path());

        let now = current_unix_timestamp();
        let expiring = installed("T1", Some(now + 600));
        let rotated = service
            .rotate_if_due(&expiring, now)
            .await
            .expect("rotate")
            .expect("rotation occurred");

        assert_eq!(rotated.bot_token, "xoxb-rotated");
        assert_eq!(rotated.bot_refresh_token.as_deref(), Some("xoxe-rotated"));
        assert_eq!(rotated.token_expires_at, Some(now + 43_200));

        let stored = installations.find(Some("T1"), None).expect("find");
        assert_eq!(stored, Some(rotated));
        refresh.assert();
    }

    #[tokio::test]
    async fn regression_rotate_if_due_requires_refresh_token() {
        let temp = tempdir().expect("tempdir");
        let (service, _) = test_service("http://unused.local/api", temp.path());

        let now = current_unix_timestamp();
        let mut broken = installed("T1", Some(now + 600));
        broken.bot_refresh_token = None;
        let error = service
            .rotate_if_due(&broken, now)
            .await
            .expect_err("must fail without refresh token");
        assert!(error.to_string().contains("no refresh token"));
    }
}
