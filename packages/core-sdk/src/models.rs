use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/**
 * \brief The two hosted completion providers the app talks to.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    HuggingFace,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Gemini, ProviderKind::HuggingFace];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::HuggingFace => "huggingface",
        }
    }

    /** \brief Fixed name the provider's API key is persisted under. */
    pub fn storage_key(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini_api_key",
            ProviderKind::HuggingFace => "huggingface_api_key",
        }
    }

    /** \brief Fixed name the provider's selected model is persisted under. */
    pub fn model_key(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini_model",
            ProviderKind::HuggingFace => "huggingface_model",
        }
    }

    pub fn default_api_base(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com/v1",
            ProviderKind::HuggingFace => "https://api-inference.huggingface.co/models",
        }
    }

    /** \brief Hard-coded model id used when nothing is selected and discovery is unavailable. */
    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini-1.5-pro",
            ProviderKind::HuggingFace => "gpt2",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            "huggingface" | "hf" => Ok(ProviderKind::HuggingFace),
            other => Err(format!(
                "unknown provider '{}' (expected gemini or huggingface)",
                other
            )),
        }
    }
}

/**
 * \brief A provider endpoint plus the credential used to call it.
 */
#[derive(Debug, Clone)]
pub struct Provider {
    pub kind: ProviderKind,
    pub api_base: String,
    pub api_key: String,
}

impl Provider {
    pub fn new(kind: ProviderKind, api_key: impl Into<String>) -> Self {
        Self {
            kind,
            api_base: kind.default_api_base().to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

/**
 * \brief A selectable model id plus display metadata.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOption {
    pub id: String,
    pub display_name: String,
    pub description: String,
}

impl ModelOption {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            description: description.into(),
        }
    }
}

/**
 * \brief A single text-generation request against a provider.
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: String,
    pub max_output_tokens: u32,
    /** \brief Sampling temperature in [0, 1]. */
    pub temperature: f64,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub stop_sequences: Vec<String>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            max_output_tokens: 1024,
            temperature: 0.7,
            top_p: None,
            top_k: None,
            stop_sequences: Vec::new(),
        }
    }
}

/** \brief Role of a transcript entry. */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/**
 * \brief One immutable transcript entry; insertion order is display order.
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl ChatMessage {
    pub fn now(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/**
 * \brief Outcome of checking a candidate API key. Transient UI state,
 *        recomputed on every edit.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Unknown,
    Checking,
    Valid,
    Invalid,
}
