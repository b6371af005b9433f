use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

use crate::core::config::Config;
use crate::core::error::BackendError;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    pub provider: String, // "gemini"
    pub gemini: Option<GeminiConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_text_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_vision_model() -> String {
    "gemini-2.5-pro".to_string()
}
fn default_image_model() -> String {
    "gemini-2.5-flash-image".to_string()
}

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

impl LlmConfig {
    /// Fills an empty Gemini key from `GEMINI_API_KEY` or `API_KEY`.
    pub fn resolve_api_key(&mut self) {
        if let Some(gemini) = self.gemini.as_mut() {
            if gemini.api_key.is_empty() {
                gemini.api_key = std::env::var("GEMINI_API_KEY")
                    .or_else(|_| std::env::var("API_KEY"))
                    .unwrap_or_default();
            }
        }
    }

    pub fn models(&self) -> ModelSet {
        match &self.gemini {
            Some(cfg) => ModelSet {
                fast: cfg.text_model.clone(),
                capable: cfg.vision_model.clone(),
                image: cfg.image_model.clone(),
            },
            None => ModelSet::default(),
        }
    }
}

/// Capability tier a request needs; mapped to a concrete model by [`ModelSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Fast,
    Capable,
    Image,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSet {
    pub fast: String,
    pub capable: String,
    pub image: String,
}

impl Default for ModelSet {
    fn default() -> Self {
        Self {
            fast: default_text_model(),
            capable: default_vision_model(),
            image: default_image_model(),
        }
    }
}

impl ModelSet {
    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.fast,
            ModelTier::Capable => &self.capable,
            ModelTier::Image => &self.image,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PromptPart {
    Text(String),
    /// Base64 payload without the data-URI header.
    Inline { mime_type: String, data: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextRequest {
    pub model: String,
    pub system: Option<String>,
    pub parts: Vec<PromptPart>,
    pub schema: Option<serde_json::Value>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait GenerativeBackend: Send + Sync + Debug {
    async fn generate_text(&self, request: &TextRequest) -> Result<String, BackendError>;
    async fn generate_image(&self, model: &str, prompt: &str)
        -> Result<GeneratedImage, BackendError>;
}

pub fn create_backend(config: &Config) -> anyhow::Result<Arc<dyn GenerativeBackend>> {
    match config.llm.provider.as_str() {
        "gemini" => {
            let cfg = config
                .llm
                .gemini
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Gemini config missing"))?;
            if cfg.api_key.is_empty() {
                anyhow::bail!(
                    "Gemini API key is not configured. Set llm.gemini.api_key or the GEMINI_API_KEY environment variable."
                );
            }
            Ok(Arc::new(GeminiClient::new(&cfg.api_key, cfg.base_url.as_deref())))
        }
        _ => Err(anyhow::anyhow!("Unknown LLM provider: {}", config.llm.provider)),
    }
}

// --- Gemini ---

#[derive(Debug)]
pub struct GeminiClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: &str, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: base_url.unwrap_or(GEMINI_BASE_URL).trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, model: &str) -> Result<url::Url, BackendError> {
        let raw = format!("{}/models/{}:generateContent", self.base_url, model);
        let mut url = url::Url::parse(&raw)
            .map_err(|e| BackendError::MalformedEnvelope(format!("invalid endpoint {}: {}", raw, e)))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }

    async fn call(&self, model: &str, body: &GeminiRequest) -> Result<GeminiResponse, BackendError> {
        let url = self.endpoint(model)?;
        debug!("Gemini request to model {}", model);

        let resp = self.client.post(url).json(body).send().await?;

        let status = resp.status();
        let response_text = resp.text().await?;
        if !status.is_success() {
            return Err(BackendError::Api {
                status: status.as_u16(),
                message: response_text,
            });
        }

        serde_json::from_str(&response_text).map_err(|e| {
            BackendError::MalformedEnvelope(format!("{}. Body: {}", e, response_text))
        })
    }
}

#[derive(Serialize, Debug)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Serialize, Debug)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Debug)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Debug)]
#[serde(untagged)]
enum GeminiPart {
    Text { text: String },
    Inline { inline_data: GeminiBlob },
}

#[derive(Serialize, Debug)]
struct GeminiBlob {
    mime_type: String,
    data: String,
}

#[derive(Serialize, Debug, Default)]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
}

impl From<&PromptPart> for GeminiPart {
    fn from(part: &PromptPart) -> Self {
        match part {
            PromptPart::Text(text) => GeminiPart::Text { text: text.clone() },
            PromptPart::Inline { mime_type, data } => GeminiPart::Inline {
                inline_data: GeminiBlob {
                    mime_type: mime_type.clone(),
                    data: data.clone(),
                },
            },
        }
    }
}

impl GeminiRequest {
    fn from_text_request(request: &TextRequest) -> Self {
        let structured = request.schema.is_some();
        Self {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: request.parts.iter().map(GeminiPart::from).collect(),
            }],
            system_instruction: request.system.as_ref().map(|s| GeminiSystemInstruction {
                parts: vec![GeminiPart::Text { text: s.clone() }],
            }),
            generation_config: Some(GeminiGenerationConfig {
                temperature: request.temperature,
                response_mime_type: structured.then(|| "application/json".to_string()),
                response_schema: request.schema.clone(),
                response_modalities: None,
            }),
        }
    }

    fn image(prompt: &str) -> Self {
        Self {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart::Text { text: prompt.to_string() }],
            }],
            system_instruction: None,
            generation_config: Some(GeminiGenerationConfig {
                response_modalities: Some(vec!["IMAGE".to_string()]),
                ..Default::default()
            }),
        }
    }
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<GeminiPromptFeedback>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiPromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    text: Option<String>,
    #[serde(rename = "inlineData")]
    inline_data: Option<GeminiBlobResponse>,
}

#[derive(Deserialize)]
struct GeminiBlobResponse {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    #[serde(default)]
    code: u16,
    message: String,
}

const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
    "IMAGE_SAFETY",
];

impl GeminiResponse {
    /// Parts of the first candidate, or the reason there are none.
    fn into_parts(self) -> Result<Vec<GeminiPartResponse>, BackendError> {
        if let Some(err) = self.error {
            return Err(BackendError::Api {
                status: err.code,
                message: err.message,
            });
        }

        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(BackendError::Blocked { reason });
        }

        let first = self
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or(BackendError::Empty)?;

        let parts = first.content.map(|c| c.parts).unwrap_or_default();
        if parts.is_empty() {
            return Err(match first.finish_reason {
                Some(reason) if BLOCKING_FINISH_REASONS.contains(&reason.as_str()) => {
                    BackendError::Blocked { reason }
                }
                _ => BackendError::Empty,
            });
        }
        Ok(parts)
    }

    fn into_text(self) -> Result<String, BackendError> {
        let text: String = self
            .into_parts()?
            .into_iter()
            .filter_map(|p| p.text)
            .collect();
        if text.is_empty() {
            return Err(BackendError::Empty);
        }
        Ok(text)
    }

    fn into_image(self) -> Result<GeneratedImage, BackendError> {
        let blob = self
            .into_parts()?
            .into_iter()
            .find_map(|p| p.inline_data)
            .ok_or(BackendError::Empty)?;
        let data = STANDARD
            .decode(blob.data.as_bytes())
            .map_err(|e| BackendError::MalformedEnvelope(format!("image data is not base64: {}", e)))?;
        Ok(GeneratedImage {
            mime_type: blob.mime_type,
            data,
        })
    }
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn generate_text(&self, request: &TextRequest) -> Result<String, BackendError> {
        let body = GeminiRequest::from_text_request(request);
        self.call(&request.model, &body).await?.into_text()
    }

    async fn generate_image(
        &self,
        model: &str,
        prompt: &str,
    ) -> Result<GeneratedImage, BackendError> {
        let body = GeminiRequest::image(prompt);
        self.call(model, &body).await?.into_image()
    }
}
