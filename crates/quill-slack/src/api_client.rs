use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::helpers::{
    is_retryable_slack_status, is_retryable_transport_error, parse_retry_after, retry_delay,
    truncate_for_error,
};

pub const DEFAULT_SLACK_API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Error)]
/// Enumerates supported `QuillSlackError` values.
pub enum QuillSlackError {
    #[error("failed to create slack api client")]
    Client(#[source] reqwest::Error),
    #[error("slack api {operation} request failed")]
    Transport {
        operation: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("slack api {operation} failed with status {status}: {body}")]
    HttpStatus {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("slack {operation} failed: {error}")]
    Platform { operation: String, error: String },
    #[error("failed to decode slack {operation} response: {message}")]
    InvalidResponse { operation: String, message: String },
}

impl QuillSlackError {
    /// True when Slack itself rejected the call (`ok: false`), as opposed
    /// to a transport or gateway failure.
    pub fn is_platform_error(&self) -> bool {
        matches!(self, Self::Platform { .. })
    }
}

#[derive(Debug, Clone)]
/// Bot identity reported by `auth.test`.
pub struct BotIdentity {
    pub user_id: String,
    pub bot_id: Option<String>,
    pub team_id: Option<String>,
    pub enterprise_id: Option<String>,
}

#[derive(Debug, Clone)]
/// Public struct `PostedMessage` used across Quill components.
pub struct PostedMessage {
    pub channel: String,
    pub ts: String,
}

#[derive(Debug, Clone)]
/// Token grant returned by `oauth.v2.access`, for both code exchange and
/// refresh-token rotation.
pub struct OauthAccess {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub bot_user_id: Option<String>,
    pub team_id: Option<String>,
    pub enterprise_id: Option<String>,
    pub authed_user_id: Option<String>,
}

#[derive(Clone)]
/// Public struct `SlackApiClient` used across Quill components.
pub struct SlackApiClient {
    http: reqwest::Client,
    api_base: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl SlackApiClient {
    pub fn new(
        api_base: String,
        request_timeout_ms: u64,
        retry_max_attempts: usize,
        retry_base_delay_ms: u64,
    ) -> Result<Self, QuillSlackError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("Quill-slack-bot"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .map_err(QuillSlackError::Client)?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            retry_max_attempts: retry_max_attempts.max(1),
            retry_base_delay_ms: retry_base_delay_ms.max(1),
        })
    }

    pub async fn auth_test(&self, bot_token: &str) -> Result<BotIdentity, QuillSlackError> {
        let response: SlackAuthTestResponse = self
            .request_json("auth.test", || {
                self.http
                    .post(format!("{}/auth.test", self.api_base))
                    .bearer_auth(bot_token)
            })
            .await?;

        if !response.ok {
            return Err(platform_error("auth.test", response.error));
        }

        let user_id = response
            .user_id
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| QuillSlackError::InvalidResponse {
                operation: "auth.test".to_string(),
                message: "response missing user_id".to_string(),
            })?;

        Ok(BotIdentity {
            user_id,
            bot_id: response.bot_id,
            team_id: response.team_id,
            enterprise_id: response.enterprise_id,
        })
    }

    pub async fn post_message(
        &self,
        bot_token: &str,
        channel: &str,
        text: &str,
    ) -> Result<PostedMessage, QuillSlackError> {
        let payload = json!({
            "channel": channel,
            "text": text,
            "unfurl_links": false,
            "unfurl_media": false,
        });

        let response: SlackChatMessageResponse = self
            .request_json("chat.postMessage", || {
                self.http
                    .post(format!("{}/chat.postMessage", self.api_base))
                    .bearer_auth(bot_token)
                    .json(&payload)
            })
            .await?;

        if !response.ok {
            return Err(platform_error("chat.postMessage", response.error));
        }

        Ok(PostedMessage {
            channel: response.channel.unwrap_or_else(|| channel.to_string()),
            ts: response.ts.ok_or_else(|| QuillSlackError::InvalidResponse {
                operation: "chat.postMessage".to_string(),
                message: "response missing ts".to_string(),
            })?,
        })
    }

    pub async fn oauth_access(
        &self,
        client_id: &str,
        client_secret: &str,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<OauthAccess, QuillSlackError> {
        let mut form = vec![
            ("client_id".to_string(), client_id.to_string()),
            ("client_secret".to_string(), client_secret.to_string()),
            ("code".to_string(), code.to_string()),
        ];
        if let Some(redirect_uri) = redirect_uri {
            form.push(("redirect_uri".to_string(), redirect_uri.to_string()));
        }

        let response: SlackOauthAccessResponse = self
            .request_json("oauth.v2.access", || {
                self.http
                    .post(format!("{}/oauth.v2.access", self.api_base))
                    .form(&form)
            })
            .await?;

        convert_oauth_access(response)
    }

    pub async fn refresh_access(
        &self,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<OauthAccess, QuillSlackError> {
        let form = vec![
            ("client_id".to_string(), client_id.to_string()),
            ("client_secret".to_string(), client_secret.to_string()),
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.to_string()),
        ];

        let response: SlackOauthAccessResponse = self
            .request_json("oauth.v2.access", || {
                self.http
                    .post(format!("{}/oauth.v2.access", self.api_base))
                    .form(&form)
            })
            .await?;

        convert_oauth_access(response)
    }

    async fn request_json<T, F>(&self, operation: &str, mut builder: F) -> Result<T, QuillSlackError>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = builder()
                .header(
                    "x-quill-retry-attempt",
                    attempt.saturating_sub(1).to_string(),
                )
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<T>().await.map_err(|error| {
                            QuillSlackError::InvalidResponse {
                                operation: operation.to_string(),
                                message: error.to_string(),
                            }
                        });
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.retry_max_attempts
                        && is_retryable_slack_status(status.as_u16())
                    {
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }

                    return Err(QuillSlackError::HttpStatus {
                        operation: operation.to_string(),
                        status: status.as_u16(),
                        body: truncate_for_error(&body, 800),
                    });
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(QuillSlackError::Transport {
                        operation: operation.to_string(),
                        source: error,
                    });
                }
            }
        }
    }
}

fn platform_error(operation: &str, error: Option<String>) -> QuillSlackError {
    QuillSlackError::Platform {
        operation: operation.to_string(),
        error: error.unwrap_or_else(|| "unknown error".to_string()),
    }
}

fn convert_oauth_access(response: SlackOauthAccessResponse) -> Result<OauthAccess, QuillSlackError> {
    if !response.ok {
        return Err(platform_error("oauth.v2.access", response.error));
    }

    let access_token = response
        .access_token
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| QuillSlackError::InvalidResponse {
            operation: "oauth.v2.access".to_string(),
            message: "response missing access_token".to_string(),
        })?;

    Ok(OauthAccess {
        access_token,
        refresh_token: response.refresh_token,
        expires_in: response.expires_in,
        bot_user_id: response.bot_user_id,
        team_id: response.team.and_then(|team| team.id),
        enterprise_id: response.enterprise.and_then(|enterprise| enterprise.id),
        authed_user_id: response.authed_user.and_then(|user| user.id),
    })
}

#[derive(Debug, Deserialize)]
struct SlackAuthTestResponse {
    ok: bool,
    error: Option<String>,
    user_id: Option<String>,
    bot_id: Option<String>,
    team_id: Option<String>,
    enterprise_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackChatMessageResponse {
    ok: bool,
    error: Option<String>,
    channel: Option<String>,
    ts: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackOauthAccessResponse {
    ok: bool,
    error: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    bot_user_id: Option<String>,
    team: Option<SlackTeamRef>,
    enterprise: Option<SlackTeamRef>,
    authed_user: Option<SlackAuthedUserRef>,
}

#[derive(Debug, Deserialize)]
struct SlackTeamRef {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackAuthedUserRef {
    id: Option<String>,
}
