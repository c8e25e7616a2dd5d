use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use quill_core::current_unix_timestamp;
use quill_slack::{Installation, InstallationStore, SlackApiClient, SlackOauthService};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::responder::{DraftResponder, FALLBACK_REPLY};
use crate::signature::{timestamp_is_stale, verify_slack_signature};

const INSTALL_SUCCESS_PAGE: &str = "<html><body>\
<h2>Installation complete</h2>\
<p>Quill was added to your workspace. Mention the bot in a channel to start a conversation.</p>\
</body></html>";

/// Shared handler state for the gateway routes.
pub struct GatewayState {
    pub signing_secret: String,
    pub api: SlackApiClient,
    pub installations: Arc<InstallationStore>,
    pub oauth: Option<SlackOauthService>,
    pub responder: DraftResponder,
}

pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/slack/events", post(handle_slack_events))
        .route("/slack/install", get(handle_slack_install))
        .route("/slack/oauth_redirect", get(handle_oauth_redirect))
        .route("/healthz", get(handle_health))
        .with_state(state)
}

/// Binds the listener and serves the gateway until ctrl-c.
pub async fn serve(bind: &str, state: Arc<GatewayState>) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve gateway bound address")?;
    info!(addr = %local_addr, "gateway listening");

    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("gateway server exited unexpectedly")
}

/// Registers the single-workspace installation for a statically configured
/// bot token, resolving its identity through `auth.test`.
pub async fn seed_single_workspace(
    api: &SlackApiClient,
    installations: &InstallationStore,
    bot_token: &str,
) -> Result<Installation> {
    let identity = api
        .auth_test(bot_token)
        .await
        .context("auth.test for the configured bot token failed")?;
    let installation = Installation {
        enterprise_id: identity.enterprise_id,
        team_id: identity.team_id,
        bot_token: bot_token.to_string(),
        bot_refresh_token: None,
        bot_id: identity.bot_id,
        bot_user_id: identity.user_id,
        user_id: None,
        token_expires_at: None,
    };
    installations.save(installation.clone())?;
    Ok(installation)
}

async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status":"ok"})))
}

async fn handle_slack_events(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, Json<Value>) {
    if let Err(rejection) = verify_event_signature(&state, &headers, &body) {
        return rejection;
    }

    let payload = match serde_json::from_str::<Value>(&body) {
        Ok(payload) => payload,
        Err(error) => {
            warn!("discarding malformed event payload: {error}");
            return ack();
        }
    };

    match payload["type"].as_str() {
        Some("url_verification") => {
            let challenge = payload["challenge"].as_str().unwrap_or("");
            (StatusCode::OK, Json(json!({"challenge": challenge})))
        }
        Some("event_callback") => dispatch_event(&state, &payload).await,
        _ => ack(),
    }
}

async fn dispatch_event(state: &GatewayState, payload: &Value) -> (StatusCode, Json<Value>) {
    match payload["event"]["type"].as_str() {
        Some("app_mention") => handle_app_mention(state, payload).await,
        Some("app_uninstalled") => handle_app_uninstalled(state, payload),
        _ => ack(),
    }
}

async fn handle_app_mention(state: &GatewayState, payload: &Value) -> (StatusCode, Json<Value>) {
    let team_id = payload_team_id(payload);
    let enterprise_id = payload_enterprise_id(payload);
    let installation = match authorize(state, team_id, enterprise_id).await {
        Ok(installation) => installation,
        Err(rejection) => return rejection,
    };

    let event = &payload["event"];
    let Some(channel) = event["channel"].as_str() else {
        warn!("ignoring app_mention without a channel");
        return ack();
    };
    let text = event["text"].as_str().unwrap_or("");
    let input = strip_bot_mention(text, &installation.bot_user_id);
    let scope = team_id.or(enterprise_id).unwrap_or_default().to_string();

    let reply = match state.responder.draft(&scope, &input).await {
        Ok(reply) => reply,
        Err(error) => {
            warn!("drafting a reply for team {scope} failed: {error:#}");
            post_fallback(state, &installation.bot_token, channel).await;
            return ack();
        }
    };
    if let Err(error) = state
        .api
        .post_message(&installation.bot_token, channel, &reply)
        .await
    {
        warn!("posting drafted reply failed: {error}");
        post_fallback(state, &installation.bot_token, channel).await;
    }
    ack()
}

fn handle_app_uninstalled(state: &GatewayState, payload: &Value) -> (StatusCode, Json<Value>) {
    let team_id = payload_team_id(payload);
    let enterprise_id = payload_enterprise_id(payload);
    match state.installations.delete(team_id, enterprise_id) {
        Ok(()) => {
            info!(
                "removed installation after app_uninstalled: scope={}",
                team_id.or(enterprise_id).unwrap_or("<unknown>")
            );
        }
        Err(error) => warn!("failed to remove uninstalled workspace: {error:#}"),
    }
    ack()
}

/// Resolves the installation for an inbound event: rotation first when it is
/// due, then an `auth.test` probe on the stored token. A token the platform
/// rejects drops the installation so the workspace reinstalls cleanly.
async fn authorize(
    state: &GatewayState,
    team_id: Option<&str>,
    enterprise_id: Option<&str>,
) -> Result<Installation, (StatusCode, Json<Value>)> {
    let found = match state.installations.find(team_id, enterprise_id) {
        Ok(found) => found,
        Err(error) => {
            warn!("installation lookup failed: {error:#}");
            return Err(authorization_system_error());
        }
    };
    let Some(mut installation) = found else {
        return Err(not_installed());
    };

    if let Some(oauth) = state.oauth.as_ref() {
        match oauth
            .rotate_if_due(&installation, current_unix_timestamp())
            .await
        {
            Ok(Some(rotated)) => installation = rotated,
            Ok(None) => {}
            Err(error) => {
                warn!("token rotation failed, continuing with the current token: {error:#}");
            }
        }
    }

    match state.api.auth_test(&installation.bot_token).await {
        Ok(_) => Ok(installation),
        Err(error) if error.is_platform_error() => {
            warn!("bot token rejected, dropping installation: {error}");
            if let Err(delete_error) = state.installations.delete(team_id, enterprise_id) {
                warn!("failed to drop rejected installation: {delete_error:#}");
            }
            Err(not_installed())
        }
        Err(error) => {
            warn!("auth.test probe failed: {error}");
            Err(authorization_system_error())
        }
    }
}

async fn handle_slack_install(State(state): State<Arc<GatewayState>>) -> Response {
    let Some(oauth) = state.oauth.as_ref() else {
        return oauth_disabled().into_response();
    };
    match oauth.begin_install() {
        Ok(url) => Redirect::temporary(&url).into_response(),
        Err(error) => {
            warn!("failed to start the install flow: {error:#}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "oauth_error",
                "failed to start the installation flow",
            )
            .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct OauthRedirectParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

async fn handle_oauth_redirect(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<OauthRedirectParams>,
) -> Response {
    let Some(oauth) = state.oauth.as_ref() else {
        return oauth_disabled().into_response();
    };

    if let Some(error) = params.error.as_deref() {
        warn!("install declined at the authorize step: {error}");
        return error_response(
            StatusCode::BAD_REQUEST,
            "install_declined",
            "the installation was declined",
        )
        .into_response();
    }
    let code = params.code.as_deref().map(str::trim).unwrap_or("");
    if code.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "missing_code",
            "authorization code is missing",
        )
        .into_response();
    }
    let nonce = params.state.as_deref().map(str::trim).unwrap_or("");
    match oauth.consume_state(nonce) {
        Ok(true) => {}
        Ok(false) => {
            warn!("rejecting oauth redirect with an unknown or expired state");
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_state",
                "state parameter is unknown or expired",
            )
            .into_response();
        }
        Err(error) => {
            warn!("state lookup failed: {error:#}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "oauth_error",
                "OAuth flow failed",
            )
            .into_response();
        }
    }

    match oauth.complete_install(code).await {
        Ok(installation) => {
            info!(
                "workspace installed: scope={}",
                installation
                    .team_id
                    .as_deref()
                    .or(installation.enterprise_id.as_deref())
                    .unwrap_or("<unknown>")
            );
            Html(INSTALL_SUCCESS_PAGE).into_response()
        }
        Err(error) => {
            warn!("oauth code exchange failed: {error:#}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "oauth_error",
                "OAuth flow failed",
            )
            .into_response()
        }
    }
}

fn verify_event_signature(
    state: &GatewayState,
    headers: &HeaderMap,
    body: &str,
) -> Result<(), (StatusCode, Json<Value>)> {
    let timestamp = headers
        .get("x-slack-request-timestamp")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or("");
    if timestamp_is_stale(timestamp, current_unix_timestamp()) {
        warn!("rejecting event with a stale or missing request timestamp");
        return Err(error_response(
            StatusCode::UNAUTHORIZED,
            "invalid_signature",
            "request timestamp outside the accepted window",
        ));
    }

    let signature = headers
        .get("x-slack-signature")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or("");
    if let Err(error) = verify_slack_signature(&state.signing_secret, timestamp, body, signature) {
        warn!("rejecting event with an invalid signature: {error}");
        return Err(error_response(
            StatusCode::UNAUTHORIZED,
            "invalid_signature",
            "request signature verification failed",
        ));
    }
    Ok(())
}

async fn post_fallback(state: &GatewayState, bot_token: &str, channel: &str) {
    if let Err(error) = state
        .api
        .post_message(bot_token, channel, FALLBACK_REPLY)
        .await
    {
        warn!("posting fallback reply failed: {error}");
    }
}

fn strip_bot_mention(text: &str, bot_user_id: &str) -> String {
    if bot_user_id.is_empty() {
        return text.trim().to_string();
    }
    text.replace(&format!("<@{bot_user_id}>"), "")
        .trim()
        .to_string()
}

fn payload_team_id(payload: &Value) -> Option<&str> {
    payload["team_id"]
        .as_str()
        .or_else(|| payload["event"]["team"].as_str())
}

fn payload_enterprise_id(payload: &Value) -> Option<&str> {
    payload["enterprise_id"].as_str()
}

fn ack() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({})))
}

fn error_response(status: StatusCode, code: &str, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({"error":{"code":code,"message":message}})))
}

fn not_installed() -> (StatusCode, Json<Value>) {
    error_response(
        StatusCode::UNAUTHORIZED,
        "not_installed",
        "App not properly installed - reinstall required",
    )
}

fn authorization_system_error() -> (StatusCode, Json<Value>) {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "authorization_error",
        "Authorization system error",
    )
}

fn oauth_disabled() -> (StatusCode, Json<Value>) {
    error_response(
        StatusCode::NOT_FOUND,
        "oauth_disabled",
        "installation flow is not configured",
    )
}
