use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::{
    retry::{
        is_retryable_http_error, new_request_id, parse_retry_after_ms, provider_retry_delay_ms,
        should_retry_status,
    },
    ChatRequest, ChatResponse, ChatUsage, LlmClient, Message, QuillAiError,
};

pub const DEFAULT_PERPLEXITY_API_BASE: &str = "https://api.perplexity.ai";

#[derive(Debug, Clone)]
/// Public struct `PerplexityConfig` used across Quill components.
pub struct PerplexityConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
}

impl Default for PerplexityConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_PERPLEXITY_API_BASE.to_string(),
            api_key: String::new(),
            request_timeout_ms: 30_000,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone)]
/// Public struct `PerplexityClient` used across Quill components.
pub struct PerplexityClient {
    client: reqwest::Client,
    config: PerplexityConfig,
}

impl PerplexityClient {
    pub fn new(config: PerplexityConfig) -> Result<Self, QuillAiError> {
        if config.api_key.trim().is_empty() {
            return Err(QuillAiError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer)
                .map_err(|e| QuillAiError::InvalidResponse(format!("invalid API key header: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self { client, config })
    }

    fn chat_completions_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            return base.to_string();
        }

        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl LlmClient for PerplexityClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, QuillAiError> {
        let body = build_chat_request_body(&request)?;
        let url = self.chat_completions_url();
        let max_retries = self.config.max_retries;

        for attempt in 0..=max_retries {
            let request_id = new_request_id();
            let response = self
                .client
                .post(&url)
                .header("x-quill-request-id", request_id)
                .header("x-quill-retry-attempt", attempt.to_string())
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let raw = response.text().await?;
                        return parse_chat_response(&raw);
                    }

                    let retry_after_ms = parse_retry_after_ms(response.headers());
                    let raw = response.text().await?;
                    if attempt < max_retries && should_retry_status(status.as_u16()) {
                        let backoff_ms = provider_retry_delay_ms(attempt, retry_after_ms);
                        sleep(std::time::Duration::from_millis(backoff_ms)).await;
                        continue;
                    }

                    return Err(QuillAiError::HttpStatus {
                        status: status.as_u16(),
                        body: raw,
                    });
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_http_error(&error) {
                        let backoff_ms = provider_retry_delay_ms(attempt, None);
                        sleep(std::time::Duration::from_millis(backoff_ms)).await;
                        continue;
                    }
                    return Err(QuillAiError::Http(error));
                }
            }
        }

        Err(QuillAiError::InvalidResponse(
            "request retry loop terminated unexpectedly".to_string(),
        ))
    }
}

fn build_chat_request_body(request: &ChatRequest) -> Result<Value, QuillAiError> {
    let mut body = json!({
        "model": request.model,
        "messages": serde_json::to_value(&request.messages)?,
    });

    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }

    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }

    Ok(body)
}

fn parse_chat_response(raw: &str) -> Result<ChatResponse, QuillAiError> {
    let parsed: PerplexityChatResponse = serde_json::from_str(raw)?;
    let choice = parsed.choices.into_iter().next().ok_or_else(|| {
        QuillAiError::InvalidResponse("response contained no choices".to_string())
    })?;

    let usage = parsed
        .usage
        .map(|usage| ChatUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        message: Message::assistant(choice.message.content.unwrap_or_default()),
        finish_reason: choice.finish_reason,
        usage,
    })
}

#[derive(Debug, Deserialize)]
struct PerplexityChatResponse {
    choices: Vec<PerplexityChoice>,
    usage: Option<PerplexityUsage>,
}

#[derive(Debug, Deserialize)]
struct PerplexityChoice {
    message: PerplexityChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PerplexityChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PerplexityUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::{
        build_chat_request_body, parse_chat_response, PerplexityClient, PerplexityConfig,
    };
    use crate::{ChatRequest, LlmClient, Message, QuillAiError};

    fn test_request() -> ChatRequest {
        ChatRequest {
            model: "llama-3.1-sonar-small-128k-online".to_string(),
            messages: vec![Message::system("You are helpful"), Message::user("hello")],
            max_tokens: None,
            temperature: Some(1.0),
        }
    }

    #[test]
    fn unit_build_chat_request_body_includes_optional_fields() {
        let mut request = test_request();
        request.max_tokens = Some(256);

        let body = build_chat_request_body(&request).expect("request body must serialize");
        assert_eq!(body["model"], "llama-3.1-sonar-small-128k-online");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["temperature"], 1.0);
    }

    #[test]
    fn unit_build_chat_request_body_omits_absent_fields() {
        let mut request = test_request();
        request.temperature = None;

        let body = build_chat_request_body(&request).expect("request body must serialize");
        assert!(body.get("max_tokens").is_none());
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn unit_new_rejects_blank_api_key() {
        let config = PerplexityConfig {
            api_key: "   ".to_string(),
            ..PerplexityConfig::default()
        };
        assert!(matches!(
            PerplexityClient::new(config),
            Err(QuillAiError::MissingApiKey)
        ));
    }

    #[test]
    fn regression_parse_chat_response_rejects_missing_choices() {
        let error = parse_chat_response(r#"{"choices":[]}"#).expect_err("must fail");
        assert!(error.to_string().contains("no choices"));
    }

    #[test]
    fn unit_parse_chat_response_reads_content_and_usage() {
        let raw = json!({
            "choices": [{
                "message": {"role": "assistant", "content": "drafted reply"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16}
        })
        .to_string();

        let response = parse_chat_response(&raw).expect("parse");
        assert_eq!(response.message.content, "drafted reply");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage.total_tokens, 16);
    }

    #[tokio::test]
    async fn functional_complete_sends_bearer_auth_and_parses_response() {
        let server = MockServer::start();
        let chat = server.mock(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("authorization", "Bearer pplx-test")
                .json_body_includes(r#"{"model":"llama-3.1-sonar-small-128k-online"}"#);
            then.status(200).json_body(json!({
                "choices": [{
                    "message": {"role": "assistant", "content": "hello back"},
                    "finish_reason": "stop"
                }]
            }));
        });

        let client = PerplexityClient::new(PerplexityConfig {
            api_base: server.base_url(),
            api_key: "pplx-test".to_string(),
            request_timeout_ms: 2_000,
            max_retries: 1,
        })
        .expect("client");

        let response = client.complete(test_request()).await.expect("complete");
        assert_eq!(response.message.content, "hello back");
        chat.assert();
    }

    #[tokio::test]
    async fn integration_complete_retries_rate_limits() {
        let server = MockServer::start();
        let first = server.mock(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("x-quill-retry-attempt", "0");
            then.status(429).header("retry-after", "0").body("rate limit");
        });
        let second = server.mock(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("x-quill-retry-attempt", "1");
            then.status(200).json_body(json!({
                "choices": [{
                    "message": {"role": "assistant", "content": "eventually"},
                    "finish_reason": "stop"
                }]
            }));
        });

        let client = PerplexityClient::new(PerplexityConfig {
            api_base: server.base_url(),
            api_key: "pplx-test".to_string(),
            request_timeout_ms: 2_000,
            max_retries: 2,
        })
        .expect("client");

        let response = client
            .complete(test_request())
            .await
            .expect("complete eventually succeeds");
        assert_eq!(response.message.content, "eventually");
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
    }

    #[tokio::test]
    async fn regression_complete_surfaces_non_retryable_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(400).body("bad request");
        });

        let client = PerplexityClient::new(PerplexityConfig {
            api_base: server.base_url(),
            api_key: "pplx-test".to_string(),
            request_timeout_ms: 2_000,
            max_retries: 2,
        })
        .expect("client");

        let error = client.complete(test_request()).await.expect_err("must fail");
        assert!(matches!(
            error,
            QuillAiError::HttpStatus { status: 400, .. }
        ));
    }
}
