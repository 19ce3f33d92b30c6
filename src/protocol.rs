use clap::ValueEnum;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ValidationError;

// -- Providers ---------------------------------------------------------------

/// Backend provider flavour. The backend accepts exactly these two.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "OpenAI")]
    #[value(name = "openai")]
    OpenAi,
    #[serde(rename = "Gemini")]
    #[value(name = "gemini")]
    Gemini,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "OpenAI"),
            ProviderKind::Gemini => write!(f, "Gemini"),
        }
    }
}

/// One entry of `GET /api/providers`. The stored key comes back masked.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Provider {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    pub original_models: String,
}

impl Provider {
    /// Model names from the comma-separated `original_models` field.
    pub fn models(&self) -> Vec<&str> {
        self.original_models
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .collect()
    }

    /// Selectable `provider::model` identifiers for this provider.
    pub fn model_ids(&self) -> Vec<ModelId> {
        self.models()
            .into_iter()
            .map(|m| ModelId::new(&self.name, m))
            .collect()
    }
}

/// Body of `POST /api/providers`.
#[derive(Debug, Clone, Serialize)]
pub struct NewProvider {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    pub api_key: String,
    pub api_base: String,
    pub models: String,
}

/// Body of `PUT /api/providers/{name}`. A missing `api_key` keeps the stored one.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderUpdate {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub api_base: String,
    pub models: String,
}

// -- Model identifiers -------------------------------------------------------

/// A `provider::model` pair as the backend expects in `selected_models`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelId {
    pub provider: String,
    pub model: String,
}

impl ModelId {
    pub fn new(provider: &str, model: &str) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s.split_once("::") {
            Some((p, m)) if !p.trim().is_empty() && !m.trim().is_empty() => {
                Ok(Self::new(p.trim(), m.trim()))
            }
            _ => Err(ValidationError::InvalidModelId(s.to_string())),
        }
    }

    /// Guess whether the model accepts images. Substring match on the model name.
    pub fn looks_like_vision(&self) -> bool {
        const HINTS: &[&str] = &["vision", "-vl", "vl-", "4o", "gemini", "ocr"];
        let name = self.model.to_lowercase();
        HINTS.iter().any(|h| name.contains(h))
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.provider, self.model)
    }
}

// -- Prompt templates --------------------------------------------------------

/// Critique/revision prompt pair stored by the backend, in both UI languages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDraft {
    pub name_zh: String,
    pub critique_prompt_zh: String,
    pub revision_prompt_zh: String,
    pub name_en: String,
    pub critique_prompt_en: String,
    pub revision_prompt_en: String,
    #[serde(default)]
    pub is_active: i64,
}

/// One entry of `GET /api/prompts`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PromptTemplate {
    pub id: i64,
    #[serde(flatten)]
    pub draft: PromptDraft,
}

impl PromptTemplate {
    pub fn is_active(&self) -> bool {
        self.draft.is_active != 0
    }

    /// Display name in the given UI language, falling back to Chinese.
    pub fn name(&self, lang: &str) -> &str {
        if lang == "en" && !self.draft.name_en.is_empty() {
            &self.draft.name_en
        } else {
            &self.draft.name_zh
        }
    }
}

// -- Chat processing ---------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Body of `POST /api/process`.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessRequest {
    pub question: String,
    pub selected_models: Vec<String>,
    pub history: Vec<ChatMessage>,
    pub ocr_text: Option<String>,
}

/// One decoded `data: ` frame of the `/api/process` stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Status {
        data: String,
    },
    FinalResult {
        data: FinalResult,
    },
    Error {
        data: String,
    },
    InitialAnswerComplete {
        model_name: String,
        #[serde(default)]
        answer: String,
    },
    CritiqueComplete {
        critic_name: String,
        target_model: String,
        #[serde(default)]
        critique_data: Option<Critique>,
    },
    RevisionComplete {
        model_name: String,
        #[serde(default)]
        revised_answer: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FinalResult {
    pub best_answer: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub process_details: Vec<ReviewDetail>,
}

/// One model's full trip through the review rounds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReviewDetail {
    pub model_name: String,
    #[serde(default)]
    pub initial_answer: String,
    #[serde(default)]
    pub revised_answer: String,
    #[serde(default)]
    pub total_score: f64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub critiques_received: Vec<Critique>,
}

/// A single critic's verdict. Dimension scores are clamped to 0..=3 on read.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Critique {
    #[serde(default)]
    pub critic_name: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default, deserialize_with = "dimension")]
    pub accuracy: u8,
    #[serde(default, deserialize_with = "dimension")]
    pub completeness: u8,
    #[serde(default, deserialize_with = "dimension")]
    pub clarity: u8,
    #[serde(default, deserialize_with = "dimension")]
    pub usefulness: u8,
    #[serde(default)]
    pub comment: Option<String>,
}

pub const MAX_DIMENSION_SCORE: u8 = 3;
pub const MAX_TOTAL_SCORE: f64 = 12.0;

fn null_as_empty<'de, D, T>(de: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(de)?.unwrap_or_default())
}

fn dimension<'de, D>(de: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<f64>::deserialize(de)?.unwrap_or(0.0);
    Ok(raw.clamp(0.0, MAX_DIMENSION_SCORE as f64) as u8)
}

// -- OCR and search ----------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct OcrResponse {
    pub ocr_text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest {
    pub query: String,
    pub language: String,
    pub page: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    pub success: bool,
    #[serde(default)]
    pub results: Vec<SearchHit>,
    #[serde(default)]
    pub number_of_results: f64,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub engine: Option<String>,
}

/// FastAPI error envelope. `detail` is a string for handled errors and an
/// array of objects for request validation failures.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub detail: serde_json::Value,
}

impl ApiErrorBody {
    pub fn message(&self) -> String {
        match &self.detail {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|i| {
                    i.get("msg")
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| i.to_string())
                })
                .collect::<Vec<_>>()
                .join("; "),
            other => other.to_string(),
        }
    }
}
