use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, error};

use crate::config::{OracleConfig, Provider};
use crate::error::OracleError;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// The decision-making model consulted once per cycle.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Sends one prompt and returns the raw reply text. Implementations ask
    /// for a JSON reply but callers must not trust the shape.
    async fn generate(&self, prompt: &str) -> Result<String, OracleError>;
}

/// Builds the oracle selected by `config`.
pub fn from_config(config: &OracleConfig) -> Result<Arc<dyn Oracle>, OracleError> {
    let client = Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(OracleError::from)?;
    let oracle: Arc<dyn Oracle> = match config.provider {
        Provider::Gemini => Arc::new(GeminiOracle {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.clone().unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
        }),
        Provider::Openai => Arc::new(OpenAiOracle {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.clone().unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
        }),
    };
    Ok(oracle)
}

/// Google `generateContent` with a JSON response mime type.
pub struct GeminiOracle {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiOracle {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            self.api_key
        )
    }
}

#[async_trait]
impl Oracle for GeminiOracle {
    async fn generate(&self, prompt: &str) -> Result<String, OracleError> {
        let response = self
            .client
            .post(self.endpoint())
            .json(&json!({
                "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
                "generationConfig": { "responseMimeType": "application/json" },
            }))
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }

        let text = body["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| OracleError::EmptyResponse(body.to_string()))?;
        debug!(model = %self.model, reply = text, "gemini replied");
        Ok(text.to_string())
    }
}

/// OpenAI-compatible chat completions in JSON mode.
pub struct OpenAiOracle {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiOracle {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Oracle for OpenAiOracle {
    async fn generate(&self, prompt: &str) -> Result<String, OracleError> {
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.model,
                "messages": [{ "role": "user", "content": prompt }],
                "temperature": 0.2,
                "response_format": { "type": "json_object" },
            }))
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| OracleError::EmptyResponse(body.to_string()))?;
        debug!(model = %self.model, reply = content, "chat completion replied");
        Ok(content.to_string())
    }
}

fn api_error(status: u16, body: &Value) -> OracleError {
    let message = body["error"]["message"]
        .as_str()
        .unwrap_or("Unknown API error")
        .to_string();
    error!(status, %message, "oracle API error");
    OracleError::Api { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

    #[tokio::test]
    async fn gemini_returns_candidate_text() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .and(matchers::query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [{ "text": "{\"tool\":\"finish\",\"args\":{}}" }] } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let oracle = GeminiOracle::new("test-key", "gemini-2.0-flash", server.uri());
        let reply = oracle.generate("objective").await.unwrap();
        assert_eq!(reply, r#"{"tool":"finish","args":{}}"#);
    }

    #[tokio::test]
    async fn gemini_sends_json_mime_type() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::body_partial_json(json!({
                "generationConfig": { "responseMimeType": "application/json" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [{ "text": "{}" }] } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let oracle = GeminiOracle::new("k", "m", server.uri());
        assert_eq!(oracle.generate("p").await.unwrap(), "{}");
    }

    #[tokio::test]
    async fn openai_returns_message_content() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/v1/chat/completions"))
            .and(matchers::header("Authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "{\"tool\":\"click\"}" } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let oracle = OpenAiOracle::new("sk-test", "gpt-4o-mini", server.uri());
        assert_eq!(oracle.generate("p").await.unwrap(), r#"{"tool":"click"}"#);
    }

    #[tokio::test]
    async fn api_errors_carry_status_and_message() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": { "message": "Invalid API key" }
            })))
            .mount(&server)
            .await;

        let oracle = OpenAiOracle::new("bad", "gpt-4o-mini", server.uri());
        match oracle.generate("p").await {
            Err(OracleError::Api { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid API key");
            }
            other => panic!("expected API error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_content_is_reported() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
            .mount(&server)
            .await;

        let oracle = GeminiOracle::new("k", "m", server.uri());
        assert!(matches!(
            oracle.generate("p").await,
            Err(OracleError::EmptyResponse(_))
        ));
    }

    #[test]
    fn config_builds_selected_provider() {
        let config = OracleConfig {
            provider: Provider::Openai,
            api_key: "k".into(),
            model: "m".into(),
            base_url: Some("http://localhost:1".into()),
            timeout: std::time::Duration::from_secs(1),
        };
        assert!(from_config(&config).is_ok());
    }
}
