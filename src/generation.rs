//! Generation adapters for the core [`Generator`] capability.
//!
//! - **[`OpenAIGenerator`]** calls `POST /v1/chat/completions` with a
//!   system and a user message.
//! - **[`OllamaGenerator`]** calls Ollama's `POST /api/generate` with
//!   `stream: false`.
//! - **[`GeminiGenerator`]** calls Gemini's `models/{model}:generateContent`
//!   with the system prompt as `systemInstruction`.
//! - **[`DisabledGenerator`]** fails permanently; `ragline search` works
//!   without any generation backend.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use ragline_core::error::{Capability, CapabilityError};
use ragline_core::generation::{GenerationRequest, Generator};

use crate::config::GenerationConfig;
use crate::http;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_GEMINI_MODEL: &str = "gemini-1.0-pro";

type GenerateResult = std::result::Result<String, CapabilityError>;

fn invalid_response(message: impl Into<String>) -> CapabilityError {
    CapabilityError::permanent(Capability::Generation, message)
}

/// Generator that always fails; used when `generation.provider = "disabled"`.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _request: &GenerationRequest) -> GenerateResult {
        Err(CapabilityError::permanent(
            Capability::Generation,
            "generation is disabled; set [generation] provider in the config",
        ))
    }
}

/// Chat-completions generator. Requires `OPENAI_API_KEY`.
pub struct OpenAIGenerator {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_CHAT_URL.to_string()),
            api_key,
            model,
        })
    }

    fn body(&self, request: &GenerationRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "temperature": request.options.temperature,
            "max_tokens": request.options.max_output_tokens,
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> GenerateResult {
        let req = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.body(request));
        let json = http::send_json(req, Capability::Generation, "OpenAI").await?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> GenerateResult {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| invalid_response("Invalid OpenAI response: missing choices[0].message.content"))
}

/// Generator backed by a local Ollama instance.
pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        let base = config.url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL);

        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url: format!("{}/api/generate", base.trim_end_matches('/')),
            model,
        })
    }

    fn body(&self, request: &GenerationRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "system": request.system,
            "prompt": request.user,
            "stream": false,
            "options": {
                "temperature": request.options.temperature,
                "num_predict": request.options.max_output_tokens,
            },
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> GenerateResult {
        let req = self.client.post(&self.url).json(&self.body(request));
        let json = http::send_json(req, Capability::Generation, "Ollama").await?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| invalid_response("Invalid Ollama response: missing response field"))
    }
}

/// Generator backed by the Gemini API.
///
/// The key is read from `GEMINI_API_KEY`, falling back to `GOOGLE_API_KEY`.
/// `generation.model` defaults to `gemini-1.0-pro`; `generation.url`
/// replaces the API base (`.../v1beta`).
pub struct GeminiGenerator {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = gemini_api_key(|name| std::env::var(name).ok()).ok_or_else(|| {
            anyhow::anyhow!("GEMINI_API_KEY (or GOOGLE_API_KEY) environment variable not set")
        })?;
        Self::with_key(config, api_key)
    }

    fn with_key(config: &GenerationConfig, api_key: String) -> Result<Self> {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string());
        let base = config.url.as_deref().unwrap_or(GEMINI_BASE_URL);

        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url: format!("{}/models/{}:generateContent", base.trim_end_matches('/'), model),
            api_key,
            model,
        })
    }

    fn body(&self, request: &GenerationRequest) -> serde_json::Value {
        serde_json::json!({
            "systemInstruction": {
                "parts": [{ "text": request.system }],
            },
            "contents": [{
                "role": "user",
                "parts": [{ "text": request.user }],
            }],
            "generationConfig": {
                "temperature": request.options.temperature,
                "maxOutputTokens": request.options.max_output_tokens,
            },
        })
    }
}

fn gemini_api_key(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    ["GEMINI_API_KEY", "GOOGLE_API_KEY"]
        .into_iter()
        .filter_map(|name| lookup(name))
        .find(|key| !key.is_empty())
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> GenerateResult {
        let req = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.body(request));
        let json = http::send_json(req, Capability::Generation, "Gemini").await?;
        parse_gemini_response(&json)
    }
}

/// Concatenate the text parts of the first candidate.
fn parse_gemini_response(json: &serde_json::Value) -> GenerateResult {
    let parts = json
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| {
            invalid_response("Invalid Gemini response: missing candidates[0].content.parts")
        })?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() {
        return Err(invalid_response("Invalid Gemini response: candidate has no text"));
    }
    Ok(text)
}

/// Create the configured [`Generator`].
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        "gemini" => Ok(Arc::new(GeminiGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragline_core::generation::GenerationOptions;

    fn request() -> GenerationRequest {
        GenerationRequest::ungrounded("What is Rust?", GenerationOptions::default())
    }

    #[test]
    fn test_parse_chat_response() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "A language." } }]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "A language.");
    }

    #[test]
    fn test_parse_chat_response_missing_content_is_permanent() {
        let err = parse_chat_response(&serde_json::json!({ "choices": [] })).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_ollama_body() {
        let config = GenerationConfig {
            provider: "ollama".to_string(),
            model: Some("llama3".to_string()),
            ..GenerationConfig::default()
        };
        let generator = OllamaGenerator::new(&config).unwrap();
        let body = generator.body(&request());
        assert_eq!(body["stream"], false);
        assert_eq!(body["prompt"], "Question: What is Rust?");
        assert_eq!(body["options"]["num_predict"], 2000);
        assert_eq!(generator.url, "http://localhost:11434/api/generate");
    }

    #[test]
    fn test_gemini_body() {
        let config = GenerationConfig {
            provider: "gemini".to_string(),
            ..GenerationConfig::default()
        };
        let generator = GeminiGenerator::with_key(&config, "k".to_string()).unwrap();
        assert_eq!(generator.model_name(), "gemini-1.0-pro");
        assert_eq!(
            generator.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.0-pro:generateContent"
        );

        let req = request();
        let body = generator.body(&req);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], req.system.as_str());
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Question: What is Rust?");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 2000);
        let temperature = body["generationConfig"]["temperature"].as_f64().unwrap();
        assert!((temperature - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_gemini_model_and_url_from_config() {
        let config = GenerationConfig {
            provider: "gemini".to_string(),
            model: Some("gemini-1.5-flash".to_string()),
            url: Some("http://proxy.local/v1/".to_string()),
            ..GenerationConfig::default()
        };
        let generator = GeminiGenerator::with_key(&config, "k".to_string()).unwrap();
        assert_eq!(
            generator.url,
            "http://proxy.local/v1/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn test_gemini_key_lookup_order() {
        let both = |name: &str| match name {
            "GEMINI_API_KEY" => Some("gemini".to_string()),
            "GOOGLE_API_KEY" => Some("google".to_string()),
            _ => None,
        };
        assert_eq!(gemini_api_key(both).as_deref(), Some("gemini"));

        let google_only = |name: &str| (name == "GOOGLE_API_KEY").then(|| "google".to_string());
        assert_eq!(gemini_api_key(google_only).as_deref(), Some("google"));

        assert!(gemini_api_key(|_| None).is_none());
    }

    #[test]
    fn test_parse_gemini_response() {
        let json = serde_json::json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "Rust is " }, { "text": "fast [1]." }] }
            }]
        });
        assert_eq!(parse_gemini_response(&json).unwrap(), "Rust is fast [1].");
    }

    #[test]
    fn test_parse_gemini_response_without_text_is_permanent() {
        let blocked = serde_json::json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        assert!(!parse_gemini_response(&blocked).unwrap_err().is_transient());

        let empty = serde_json::json!({ "candidates": [{ "content": { "parts": [] } }] });
        assert!(parse_gemini_response(&empty).is_err());
    }

    #[tokio::test]
    async fn test_disabled_generator_fails_permanently() {
        let err = DisabledGenerator.generate(&request()).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(DisabledGenerator.model_name(), "disabled");
    }

    #[test]
    fn test_create_generator_default_is_disabled() {
        let generator = create_generator(&GenerationConfig::default()).unwrap();
        assert_eq!(generator.model_name(), "disabled");
    }
}
