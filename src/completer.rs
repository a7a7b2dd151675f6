//! Text-completion collaborators.
//!
//! The pipeline only sees the [`TextCompleter`] trait. [`OpenAiCompleter`]
//! talks to any OpenAI-compatible `/chat/completions` endpoint.

use crate::{
    config::{ApiKey, ModelConfig},
    error::{Error, Result},
};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Generates text for a rendered prompt.
///
/// Errors are [`Error::Completion`]; implementations may leave the stem
/// empty, the pipeline fills it in.
pub trait TextCompleter: Send + Sync {
    /// Returns the generated text for `prompt`.
    ///
    /// # Errors
    ///
    /// Returns an error on network, provider or timeout failure.
    fn complete(&self, prompt: &str, model: &ModelConfig) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Single-line description of a provider error body.
///
/// Uses `error.message` from an OpenAI-style JSON body when present,
/// otherwise the raw body with its whitespace collapsed.
fn provider_message(body: &str) -> String {
    let text = serde_json::from_str::<ErrorResponse>(body)
        .map_or_else(|_| body.to_string(), |parsed| parsed.error.message);
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Completer backed by an OpenAI-compatible chat completions API.
#[derive(Debug, Clone)]
pub struct OpenAiCompleter {
    client: Client,
    api_key: ApiKey,
}

impl OpenAiCompleter {
    /// Creates a completer using `api_key` for bearer authentication.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(api_key: ApiKey) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, api_key })
    }

    fn url(model: &ModelConfig) -> String {
        format!("{}/chat/completions", model.endpoint.trim_end_matches('/'))
    }

    fn transport_error(e: &reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::completion_timeout("", format!("request timed out: {e}"))
        } else {
            Error::completion("", format!("request failed: {e}"))
        }
    }
}

impl TextCompleter for OpenAiCompleter {
    fn complete(&self, prompt: &str, model: &ModelConfig) -> Result<String> {
        let request = ChatRequest {
            model: &model.model,
            temperature: model.temperature,
            max_tokens: model.max_tokens,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let url = Self::url(model);
        debug!("POST {} (model={}, {} prompt bytes)", url, model.model, prompt.len());

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose())
            .timeout(model.timeout)
            .json(&request)
            .send()
            .map_err(|e| Self::transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(Error::completion(
                "",
                format!("provider returned {status}: {}", provider_message(&body)),
            ));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| Self::transport_error(&e))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::completion("", "response contained no completion text"))?;

        trace!("Completion returned {} bytes", text.len());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::time::Duration;

    fn model_for(server: &MockServer) -> ModelConfig {
        ModelConfig {
            endpoint: server.url("/v1"),
            ..ModelConfig::default()
        }
    }

    #[test]
    fn test_request_serialization() {
        let request = ChatRequest {
            model: "gpt-3.5-turbo",
            temperature: 0.5,
            max_tokens: None,
            messages: [ChatMessage {
                role: "user",
                content: "hi",
            }],
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-3.5-turbo");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hi");
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn test_complete_success() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer sk-test")
                .json_body_partial(r#"{"model":"gpt-3.5-turbo","messages":[{"role":"user","content":"Explain: contract A {}"}]}"#);
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"choices":[{"message":{"role":"assistant","content":"A is empty."}}]}"#);
        });

        let completer = OpenAiCompleter::new(ApiKey::new("sk-test")).unwrap();
        let text = completer
            .complete("Explain: contract A {}", &model_for(&server))
            .unwrap();

        mock.assert();
        assert_eq!(text, "A is empty.");
    }

    #[test]
    fn test_complete_provider_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(429).body("rate limited");
        });

        let completer = OpenAiCompleter::new(ApiKey::new("sk-test")).unwrap();
        let err = completer.complete("x", &model_for(&server)).unwrap_err();

        assert!(matches!(err, Error::Completion { .. }));
        assert!(!err.is_timeout());
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn test_provider_error_json_is_one_line() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(401)
                .header("content-type", "application/json")
                .body("{\n  \"error\": {\n    \"message\": \"Incorrect API key provided\"\n  }\n}");
        });

        let completer = OpenAiCompleter::new(ApiKey::new("sk-bad")).unwrap();
        let err = completer
            .complete("x", &model_for(&server))
            .unwrap_err()
            .with_stem("Token");

        let message = err.to_string();
        assert_eq!(message.lines().count(), 1);
        assert!(message.contains("401"));
        assert!(message.contains("Incorrect API key provided"));
    }

    #[test]
    fn test_provider_message_collapses_plain_text() {
        assert_eq!(provider_message("bad\n  gateway\n"), "bad gateway");
        assert_eq!(
            provider_message(r#"{"error":{"message":"quota\nexceeded"}}"#),
            "quota exceeded"
        );
    }

    #[test]
    fn test_complete_empty_choices() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"choices":[]}"#);
        });

        let completer = OpenAiCompleter::new(ApiKey::new("sk-test")).unwrap();
        let err = completer.complete("x", &model_for(&server)).unwrap_err();
        assert!(err.to_string().contains("no completion text"));
    }

    #[test]
    fn test_complete_timeout() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200)
                .delay(Duration::from_millis(1500))
                .body(r#"{"choices":[{"message":{"content":"late"}}]}"#);
        });

        let model = ModelConfig {
            timeout: Duration::from_millis(100),
            ..model_for(&server)
        };

        let completer = OpenAiCompleter::new(ApiKey::new("sk-test")).unwrap();
        let err = completer.complete("x", &model).unwrap_err();
        assert!(err.is_timeout());
    }
}
