use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use quill_ai::{LlmClient, PerplexityClient, PerplexityConfig};
use quill_gateway::{
    seed_single_workspace, serve, ConversationMemory, DraftResponder, GatewayState,
};
use quill_slack::{
    FileStateStore, InstallationStore, OauthSettings, SlackApiClient, SlackOauthService,
    DEFAULT_STATE_EXPIRATION_SECONDS,
};
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "quill",
    about = "Slack bot that drafts replies to mentions with a hosted LLM",
    version
)]
struct Cli {
    #[arg(
        long,
        env = "QUILL_BIND",
        default_value = "0.0.0.0:3000",
        help = "Address the gateway listens on"
    )]
    bind: String,

    #[arg(
        long,
        env = "SLACK_SIGNING_SECRET",
        hide_env_values = true,
        help = "Signing secret used to verify inbound Slack requests"
    )]
    signing_secret: String,

    #[arg(
        long,
        env = "SLACK_CLIENT_ID",
        help = "OAuth client id (required unless --bot-token is set)"
    )]
    client_id: Option<String>,

    #[arg(
        long,
        env = "SLACK_CLIENT_SECRET",
        hide_env_values = true,
        help = "OAuth client secret (required unless --bot-token is set)"
    )]
    client_secret: Option<String>,

    #[arg(
        long,
        env = "SLACK_BOT_TOKEN",
        hide_env_values = true,
        help = "Single-workspace bot token; disables the OAuth install routes"
    )]
    bot_token: Option<String>,

    #[arg(
        long,
        env = "SLACK_REDIRECT_URI",
        help = "Public redirect URI registered with the Slack app"
    )]
    redirect_uri: Option<String>,

    #[arg(
        long,
        env = "QUILL_OAUTH_SCOPES",
        default_value = "app_mentions:read,chat:write,commands,team:read",
        help = "Comma-separated bot scopes requested at install time"
    )]
    oauth_scopes: String,

    #[arg(
        long,
        env = "QUILL_STATE_DIR",
        default_value = "./states",
        help = "Directory holding pending OAuth state nonces"
    )]
    state_dir: PathBuf,

    #[arg(
        long,
        env = "QUILL_SLACK_API_BASE",
        default_value = "https://slack.com/api",
        help = "Slack Web API base URL"
    )]
    slack_api_base: String,

    #[arg(
        long,
        env = "PPLX_API_KEY",
        hide_env_values = true,
        help = "API key for the Perplexity completion API"
    )]
    pplx_api_key: String,

    #[arg(
        long,
        env = "QUILL_LLM_API_BASE",
        default_value = "https://api.perplexity.ai",
        help = "Base URL for the completion API"
    )]
    llm_api_base: String,

    #[arg(
        long,
        env = "QUILL_MODEL",
        default_value = "llama-3.1-sonar-small-128k-online",
        help = "Model used to draft replies"
    )]
    model: String,

    #[arg(
        long,
        env = "QUILL_REQUEST_TIMEOUT_MS",
        default_value_t = 30_000,
        help = "HTTP request timeout for outbound API calls in milliseconds"
    )]
    request_timeout_ms: u64,

    #[arg(
        long,
        env = "QUILL_RETRY_MAX_ATTEMPTS",
        default_value_t = 3,
        help = "Maximum attempts for retryable outbound API failures"
    )]
    retry_max_attempts: usize,

    #[arg(
        long,
        env = "QUILL_RETRY_BASE_DELAY_MS",
        default_value_t = 200,
        help = "Base backoff delay between retries in milliseconds"
    )]
    retry_base_delay_ms: u64,
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    let api = SlackApiClient::new(
        cli.slack_api_base.clone(),
        cli.request_timeout_ms,
        cli.retry_max_attempts,
        cli.retry_base_delay_ms,
    )
    .context("failed to build the Slack API client")?;

    let llm: Arc<dyn LlmClient> = Arc::new(
        PerplexityClient::new(PerplexityConfig {
            api_base: cli.llm_api_base.clone(),
            api_key: cli.pplx_api_key.clone(),
            request_timeout_ms: cli.request_timeout_ms,
            max_retries: cli.retry_max_attempts,
        })
        .context("failed to build the completion client")?,
    );

    let installations = Arc::new(InstallationStore::new());
    let responder = DraftResponder::new(
        llm,
        Arc::new(ConversationMemory::new()),
        cli.model.clone(),
    );

    let bot_token = cli
        .bot_token
        .as_deref()
        .map(str::trim)
        .filter(|token| !token.is_empty());

    let oauth = if bot_token.is_some() {
        None
    } else {
        let client_id = require(cli.client_id.as_deref(), "--client-id")?;
        let client_secret = require(cli.client_secret.as_deref(), "--client-secret")?;
        Some(SlackOauthService::new(
            api.clone(),
            OauthSettings {
                client_id,
                client_secret,
                scopes: cli.oauth_scopes.clone(),
                redirect_uri: cli.redirect_uri.clone(),
            },
            installations.clone(),
            FileStateStore::new(&cli.state_dir, DEFAULT_STATE_EXPIRATION_SECONDS),
        ))
    };

    let state = Arc::new(GatewayState {
        signing_secret: cli.signing_secret.clone(),
        api: api.clone(),
        installations: installations.clone(),
        oauth,
        responder,
    });

    if let Some(token) = bot_token {
        let installation = seed_single_workspace(&api, &installations, token)
            .await
            .context("failed to register the configured workspace")?;
        info!(
            team = installation.team_id.as_deref().unwrap_or("<unknown>"),
            "single-workspace mode: OAuth install routes disabled"
        );
    }

    serve(&cli.bind, state).await
}

fn require(value: Option<&str>, name: &str) -> Result<String> {
    value
        .map(str::trim)
        .filter(|trimmed| !trimmed.is_empty())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("{name} is required when no bot token is configured"))
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{require, Cli};

    fn base_args() -> Vec<&'static str> {
        vec![
            "quill",
            "--signing-secret",
            "s3cret",
            "--pplx-api-key",
            "pplx-key",
        ]
    }

    #[test]
    fn unit_cli_defaults_cover_hosted_endpoints() {
        let cli = Cli::parse_from(base_args());
        assert_eq!(cli.bind, "0.0.0.0:3000");
        assert_eq!(cli.state_dir, std::path::PathBuf::from("./states"));
        assert_eq!(cli.slack_api_base, "https://slack.com/api");
        assert_eq!(cli.llm_api_base, "https://api.perplexity.ai");
        assert_eq!(cli.model, "llama-3.1-sonar-small-128k-online");
        assert_eq!(cli.request_timeout_ms, 30_000);
    }

    #[test]
    fn unit_cli_accepts_single_workspace_token() {
        let mut args = base_args();
        args.extend(["--bot-token", "xoxb-static"]);
        let cli = Cli::parse_from(args);
        assert_eq!(cli.bot_token.as_deref(), Some("xoxb-static"));
    }

    #[test]
    fn unit_require_rejects_blank_values() {
        assert_eq!(require(Some("value"), "--client-id").expect("value"), "value");
        assert!(require(Some("   "), "--client-id").is_err());
        assert!(require(None, "--client-id").is_err());
    }
}
