//! LLM-backed capabilities over an OpenAI-compatible chat endpoint.
//!
//! [`LlmClient`] speaks `/chat/completions` and classifies failures into
//! stage error kinds. [`PromptTransform`] implements the three transform
//! stages on top of it and [`LlmSynthesizer`] writes the final report body.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use newsdesk_extract::{ExtractOptions, extract_text};
use newsdesk_fetch::classify_transport;
use newsdesk_shared::{LlmConfig, NewsdeskError, Result, SourceMeta, StageError};

use crate::aggregate::SynthesisInput;
use crate::capability::{CapabilityBindings, Fetcher, Synthesizer, Transform};
use crate::prompts;

/// Client-side ceiling for one completion request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Most of an error body worth keeping in a message.
const ERROR_BODY_SNIPPET: usize = 200;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// LlmClient
// ---------------------------------------------------------------------------

/// Minimal OpenAI-compatible chat client.
#[derive(Debug, Clone)]
pub struct LlmClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl LlmClient {
    pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("Newsdesk/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NewsdeskError::Llm(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
        })
    }

    /// Build a client with the API key read from the configured env var.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Self::new(config, newsdesk_shared::api_key(config)?)
    }

    /// Send one system + user exchange and return the reply text.
    #[instrument(skip(self, system, prompt), fields(prompt_chars = prompt.len()))]
    pub async fn complete(
        &self,
        model: &str,
        system: &str,
        prompt: &str,
    ) -> std::result::Result<String, StageError> {
        let request = ChatRequest {
            model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.3,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_transport("chat completion", &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport("chat completion", &e))?;

        if !status.is_success() {
            let snippet: String = body.chars().take(ERROR_BODY_SNIPPET).collect();
            debug!(status = status.as_u16(), body = %snippet, "completion rejected");
            return Err(StageError::from_status(
                status.as_u16(),
                format!("chat completion ({model})"),
            ));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| StageError::malformed(format!("unexpected completion payload: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| StageError::malformed("completion has no content"))?;

        debug!(reply_chars = content.len(), "completion received");
        Ok(content)
    }
}

/// Pull a JSON object out of a model reply.
///
/// Accepts a bare object, one wrapped in a Markdown code fence, or one
/// embedded in surrounding prose (first `{` to last `}`).
pub fn extract_json_object(reply: &str) -> std::result::Result<Map<String, Value>, StageError> {
    let trimmed = strip_code_fence(reply.trim());

    let candidate = match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => Some(value),
        Err(_) => match (trimmed.find('{'), trimmed.rfind('}')) {
            (Some(start), Some(end)) if start < end => {
                serde_json::from_str::<Value>(&trimmed[start..=end]).ok()
            }
            _ => None,
        },
    };

    match candidate {
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(StageError::malformed(format!(
            "expected a JSON object, got {}",
            json_type(&other)
        ))),
        None => Err(StageError::malformed("reply is not valid JSON")),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (e.g. `json`) on the opening line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// PromptTransform
// ---------------------------------------------------------------------------

/// Which transform stage a [`PromptTransform`] implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStage {
    Perceive,
    Model,
    Translate,
}

/// A transform stage that prompts the LLM and parses its JSON reply.
#[derive(Debug, Clone)]
pub struct PromptTransform {
    client: Arc<LlmClient>,
    stage: PromptStage,
    default_model: String,
    target_language: String,
    extract: ExtractOptions,
}

impl PromptTransform {
    pub fn new(client: Arc<LlmClient>, stage: PromptStage, default_model: impl Into<String>) -> Self {
        Self {
            client,
            stage,
            default_model: default_model.into(),
            target_language: "zh".into(),
            extract: ExtractOptions::default(),
        }
    }

    pub fn with_target_language(mut self, language: impl Into<String>) -> Self {
        self.target_language = language.into();
        self
    }

    fn model_for<'a>(&'a self, source: &'a SourceMeta) -> &'a str {
        source.model.as_deref().unwrap_or(&self.default_model)
    }

    async fn perceive(&self, source: &SourceMeta, input: &Value) -> std::result::Result<Value, StageError> {
        let html = input
            .as_str()
            .ok_or_else(|| StageError::malformed("perceive expects the fetched page as text"))?;
        let page = extract_text(html, &self.extract);
        if page.text.is_empty() {
            return Err(StageError::malformed(format!("{}: page has no readable text", source.url)));
        }

        let prompt = prompts::perceive(source, &page.text);
        let reply = self
            .client
            .complete(self.model_for(source), prompts::JSON_SYSTEM, &prompt)
            .await?;

        let mut out = extract_json_object(&reply)?;
        out.insert("website_name".into(), Value::String(source.name.clone()));
        out.insert("url".into(), Value::String(source.url.to_string()));
        if let Some(title) = page.title {
            out.insert("page_title".into(), Value::String(title));
        }
        out.insert(
            "extraction_time".into(),
            Value::String(chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()),
        );
        Ok(Value::Object(out))
    }

    async fn model(&self, source: &SourceMeta, input: &Value) -> std::result::Result<Value, StageError> {
        let prompt = prompts::model(source, input);
        let reply = self
            .client
            .complete(self.model_for(source), prompts::JSON_SYSTEM, &prompt)
            .await?;

        let mut out = extract_json_object(&reply)?;
        out.insert("website_name".into(), Value::String(source.name.clone()));
        // Translation needs the extracted items as well as the model.
        out.insert("perception".into(), input.clone());
        Ok(Value::Object(out))
    }

    async fn translate(&self, source: &SourceMeta, input: &Value) -> std::result::Result<Value, StageError> {
        if same_language(&source.language, &self.target_language) {
            debug!(language = %source.language, "source already in target language");
            return Ok(passthrough(source, input));
        }

        let prompt = prompts::translate(source, &self.target_language, input);
        let reply = self
            .client
            .complete(self.model_for(source), prompts::JSON_SYSTEM, &prompt)
            .await?;

        let mut out = extract_json_object(&reply)?;
        out.insert("website_name".into(), Value::String(source.name.clone()));
        out.insert("url".into(), Value::String(source.url.to_string()));
        out.insert("source_language".into(), Value::String(source.language.clone()));
        Ok(Value::Object(out))
    }
}

#[async_trait]
impl Transform for PromptTransform {
    async fn apply(&self, source: &SourceMeta, input: &Value) -> std::result::Result<Value, StageError> {
        match self.stage {
            PromptStage::Perceive => self.perceive(source, input).await,
            PromptStage::Model => self.model(source, input).await,
            PromptStage::Translate => self.translate(source, input).await,
        }
    }
}

/// Compare primary language subtags, so `zh-CN` matches `zh`. `auto` never matches.
fn same_language(source: &str, target: &str) -> bool {
    let primary = |tag: &str| {
        tag.split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase()
    };
    let source = primary(source);
    source != "auto" && !source.is_empty() && source == primary(target)
}

/// Reshape a content model into translate output without calling the LLM.
fn passthrough(source: &SourceMeta, model: &Value) -> Value {
    let field = |value: &Value, key: &str| value.get(key).cloned().unwrap_or(Value::Null);
    let news = model
        .get("perception")
        .map(|perception| field(perception, "extracted_news"))
        .unwrap_or(Value::Null);

    let mut out = Map::new();
    out.insert("website_name".into(), Value::String(source.name.clone()));
    out.insert("url".into(), Value::String(source.url.to_string()));
    out.insert("summary".into(), field(model, "content_summary"));
    out.insert("news".into(), news);
    out.insert("insights".into(), field(model, "key_insights"));
    out.insert("source_language".into(), Value::String(source.language.clone()));
    Value::Object(out)
}

/// Bindings with the given fetcher and prompt transforms for all three
/// transform stages. Kind-specific prompting happens inside the prompts.
pub fn llm_bindings(
    fetch: Arc<dyn Fetcher>,
    client: Arc<LlmClient>,
    config: &LlmConfig,
    target_language: &str,
) -> CapabilityBindings {
    let transform = |stage| -> Arc<dyn Transform> {
        Arc::new(
            PromptTransform::new(client.clone(), stage, config.default_model.clone())
                .with_target_language(target_language),
        )
    };
    CapabilityBindings {
        fetch,
        perceive: transform(PromptStage::Perceive),
        model: transform(PromptStage::Model),
        translate: transform(PromptStage::Translate),
    }
}

// ---------------------------------------------------------------------------
// LlmSynthesizer
// ---------------------------------------------------------------------------

/// Writes the report body from the aggregated input.
#[derive(Debug, Clone)]
pub struct LlmSynthesizer {
    client: Arc<LlmClient>,
    model: String,
    target_language: String,
}

impl LlmSynthesizer {
    pub fn new(
        client: Arc<LlmClient>,
        model: impl Into<String>,
        target_language: impl Into<String>,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            target_language: target_language.into(),
        }
    }
}

#[async_trait]
impl Synthesizer for LlmSynthesizer {
    async fn synthesize(&self, input: &SynthesisInput) -> std::result::Result<String, StageError> {
        let prompt = prompts::synthesis(input, &self.target_language);
        let reply = self
            .client
            .complete(&self.model, prompts::REPORT_SYSTEM, &prompt)
            .await?;
        Ok(reply.trim().to_string())
    }
}
