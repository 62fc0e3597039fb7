//! AI collaborator abstraction
//!
//! Three request/response contracts, each of which may fail or time out
//! without affecting ingestion correctness:
//! - `summarize(text) -> summary` for notices
//! - `analyze(document_text) -> analysis` for documents
//! - `translate(keyword, target_langs) -> {lang: text}` for the keyword cache

use crate::config::AiConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String>;
}

#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    async fn analyze(&self, document_text: &str) -> Result<String>;
}

#[async_trait]
pub trait Translator: Send + Sync {
    /// Translations of `keyword` keyed by target language. Languages the
    /// collaborator could not translate are simply absent.
    async fn translate(&self, keyword: &str, target_langs: &[String]) -> Result<HashMap<String, String>>;
}

/// The collaborators a service needs, built from one provider.
#[derive(Clone)]
pub struct AiClients {
    pub summarizer: Arc<dyn Summarizer>,
    pub analyzer: Arc<dyn DocumentAnalyzer>,
    pub translator: Arc<dyn Translator>,
}

impl AiClients {
    pub fn from_provider<P>(provider: Arc<P>) -> Self
    where
        P: Summarizer + DocumentAnalyzer + Translator + 'static,
    {
        Self {
            summarizer: provider.clone(),
            analyzer: provider.clone(),
            translator: provider,
        }
    }
}

/// OpenAI-compatible chat completions client
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_input_chars: usize,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    content: Option<String>,
}

const SUMMARY_PROMPT: &str = "Summarize this public procurement notice in at most five sentences. \
Name the buyer, what is being procured, the estimated value and the deadline when present.";

const ANALYSIS_PROMPT: &str = "You analyse tender documents. List the scope, selection and award \
criteria, key deadlines, required certifications and notable risks. Be concise.";

const TRANSLATION_PROMPT: &str = "Translate the procurement search keyword given by the user. \
Answer with a JSON object whose keys are the requested ISO 639-1 language codes and whose values \
are the translations. No other keys.";

impl OpenAiClient {
    pub fn new(config: &AiConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
            message: "ai.api_key is required for the openai provider".to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            max_input_chars: config.max_input_chars,
        })
    }

    fn truncate<'a>(&self, text: &'a str) -> &'a str {
        match text.char_indices().nth(self.max_input_chars) {
            Some((idx, _)) => &text[..idx],
            None => text,
        }
    }

    async fn complete(&self, service: &str, system: &str, user: &str, json: bool) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            temperature: 0.0,
            response_format: json.then_some(ResponseFormat { kind: "json_object" }),
        };

        let response = self.client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::external(service, format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::external(service, format!("API error {}: {}", status, body)));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::external(service, format!("Failed to parse response: {}", e)))?;

        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AppError::external(service, "Empty response"))
    }
}

#[async_trait]
impl Summarizer for OpenAiClient {
    async fn summarize(&self, text: &str) -> Result<String> {
        self.complete("summarize", SUMMARY_PROMPT, self.truncate(text), false).await
    }
}

#[async_trait]
impl DocumentAnalyzer for OpenAiClient {
    async fn analyze(&self, document_text: &str) -> Result<String> {
        self.complete("analyze", ANALYSIS_PROMPT, self.truncate(document_text), false).await
    }
}

#[async_trait]
impl Translator for OpenAiClient {
    async fn translate(&self, keyword: &str, target_langs: &[String]) -> Result<HashMap<String, String>> {
        let user = format!("keyword: {}\nlanguages: {}", keyword, target_langs.join(","));
        let raw = self.complete("translate", TRANSLATION_PROMPT, &user, true).await?;

        let parsed: HashMap<String, String> = serde_json::from_str(&raw)
            .map_err(|e| AppError::external("translate", format!("Malformed translation JSON: {}", e)))?;

        Ok(parsed
            .into_iter()
            .filter(|(lang, text)| target_langs.contains(lang) && !text.trim().is_empty())
            .collect())
    }
}

/// Deterministic collaborator for tests and dry runs
#[derive(Default)]
pub struct MockAi {
    translations: Mutex<HashMap<String, HashMap<String, String>>>,
    failures_left: AtomicU32,
    delay: Mutex<Option<Duration>>,
    translate_calls: AtomicU32,
    analyze_calls: AtomicU32,
}

impl MockAi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed what `translate` answers for `keyword`.
    pub fn with_translation(self, keyword: &str, lang: &str, text: &str) -> Self {
        self.translations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(keyword.to_lowercase())
            .or_default()
            .insert(lang.to_string(), text.to_string());
        self
    }

    /// The next `n` calls of any kind fail with a retryable error.
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Every call sleeps this long first.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(|e| e.into_inner()) = Some(delay);
    }

    pub fn translate_calls(&self) -> u32 {
        self.translate_calls.load(Ordering::SeqCst)
    }

    pub fn analyze_calls(&self) -> u32 {
        self.analyze_calls.load(Ordering::SeqCst)
    }

    async fn gate(&self, service: &str) -> Result<()> {
        let delay = *self.delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AppError::external(service, "mock failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl Summarizer for MockAi {
    async fn summarize(&self, text: &str) -> Result<String> {
        self.gate("summarize").await?;
        let first_line = text.lines().next().unwrap_or_default();
        Ok(format!("Summary: {}", first_line))
    }
}

#[async_trait]
impl DocumentAnalyzer for MockAi {
    async fn analyze(&self, document_text: &str) -> Result<String> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        self.gate("analyze").await?;
        Ok(format!("Analysis of {} words", document_text.split_whitespace().count()))
    }
}

#[async_trait]
impl Translator for MockAi {
    async fn translate(&self, keyword: &str, target_langs: &[String]) -> Result<HashMap<String, String>> {
        self.translate_calls.fetch_add(1, Ordering::SeqCst);
        self.gate("translate").await?;
        let known = self
            .translations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&keyword.to_lowercase())
            .cloned()
            .unwrap_or_default();
        Ok(known
            .into_iter()
            .filter(|(lang, _)| target_langs.contains(lang))
            .collect())
    }
}

/// Create the AI collaborators based on configuration
pub fn create_ai_clients(config: &AiConfig) -> Result<AiClients> {
    match config.provider.as_str() {
        "openai" => Ok(AiClients::from_provider(Arc::new(OpenAiClient::new(config)?))),
        "mock" => Ok(AiClients::from_provider(Arc::new(MockAi::new()))),
        other => {
            tracing::warn!(provider = other, "Unknown AI provider, using mock");
            Ok(AiClients::from_provider(Arc::new(MockAi::new())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_translation_filters_languages() {
        let ai = MockAi::new()
            .with_translation("road works", "fr", "travaux routiers")
            .with_translation("road works", "de", "Straßenbau");
        let out = ai
            .translate("Road Works", &["fr".to_string(), "nl".to_string()])
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out["fr"], "travaux routiers");
        assert_eq!(ai.translate_calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_failures_are_counted_down() {
        let ai = MockAi::new();
        ai.fail_next(1);
        assert!(ai.summarize("x").await.is_err());
        assert!(ai.summarize("x").await.is_ok());
    }

    #[test]
    fn test_openai_requires_key() {
        let config = AiConfig::default();
        assert!(matches!(
            OpenAiClient::new(&config),
            Err(AppError::Configuration { .. })
        ));
    }

    #[test]
    fn test_create_mock_clients() {
        let config = AiConfig {
            provider: "mock".to_string(),
            ..AiConfig::default()
        };
        assert!(create_ai_clients(&config).is_ok());
    }
}
