//! Core data model shared across the pipeline

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Metadata attached to every ingested knowledge snippet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnippetMetadata {
    pub crop: Option<String>,
    pub region: Option<String>,
    pub language: String,
    pub source: String,
    pub ingested_at: DateTime<Utc>,
}

/// A unit of curated knowledge (crop guide, pest advisory, Q&A pair).
///
/// Immutable once ingested; re-ingestion replaces the whole index rather
/// than mutating snippets in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSnippet {
    pub id: Uuid,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: SnippetMetadata,
}

/// Metadata filters applied during retrieval
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalFilters {
    pub crop: Option<String>,
    pub region: Option<String>,
    pub language: Option<String>,
}

impl RetrievalFilters {
    /// Whether a snippet's metadata matches every filter that is set
    #[must_use]
    pub fn matches(&self, metadata: &SnippetMetadata) -> bool {
        let crop_ok = self
            .crop
            .as_ref()
            .map_or(true, |c| metadata.crop.as_deref() == Some(c.as_str()));
        let region_ok = self
            .region
            .as_ref()
            .map_or(true, |r| metadata.region.as_deref() == Some(r.as_str()));
        let language_ok = self
            .language
            .as_ref()
            .map_or(true, |l| metadata.language.eq_ignore_ascii_case(l));
        crop_ok && region_ok && language_ok
    }
}

/// Role of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One persisted exchange half in a user's conversation.
///
/// Append-only; `seq` increases strictly per user with no gaps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub user_id: String,
    pub role: TurnRole,
    pub text: String,
    pub image_ref: Option<String>,
    pub diagnosis: Option<DiagnosisResult>,
    pub created_at: DateTime<Utc>,
    pub seq: u64,
}

/// Turn content before the store assigns identity and sequence number
#[derive(Debug, Clone)]
pub struct TurnDraft {
    pub role: TurnRole,
    pub text: String,
    pub image_ref: Option<String>,
    pub diagnosis: Option<DiagnosisResult>,
}

impl TurnDraft {
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
            image_ref: None,
            diagnosis: None,
        }
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
            image_ref: None,
            diagnosis: None,
        }
    }
}

/// A single structured finding from image diagnosis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisFinding {
    pub label: String,
    pub confidence: f32,
    pub suggested_action: Option<String>,
}

/// Structured output of the image diagnosis adapter.
///
/// Ephemeral except when attached to the conversation turn that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisResult {
    pub findings: Vec<DiagnosisFinding>,
    pub summary: Option<String>,
}

/// Inbound chat request
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub question: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Base64-encoded crop/pest photo
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub filters: RetrievalFilters,
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// Citation reference attached to a grounded answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub snippet_id: Uuid,
    pub source: String,
    pub score: f32,
}

/// Outbound chat response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub diagnosis: Option<DiagnosisResult>,
    /// Set whenever the answer was produced without full grounding or after
    /// a downstream fallback
    pub degraded: bool,
    pub trust_score: f32,
    pub tips: Vec<String>,
    pub cached: bool,
}
