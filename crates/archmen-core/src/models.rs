//! Core data models shared by the pipeline, the stores, and the HTTP layer.
//!
//! Knowledge content always belongs to exactly one [`ContentOwner`]: either
//! an assessment or an archetype. The enum makes the two kinds of ownership
//! mutually exclusive by construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which kind of entity owns a piece of knowledge content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    Assessment,
    Archetype,
}

impl OwnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerKind::Assessment => "assessment",
            OwnerKind::Archetype => "archetype",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "assessment" => Some(OwnerKind::Assessment),
            "archetype" => Some(OwnerKind::Archetype),
            _ => None,
        }
    }
}

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The parent entity a chunk or settings row belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ContentOwner {
    Assessment(String),
    Archetype(String),
}

impl ContentOwner {
    pub fn new(kind: OwnerKind, id: impl Into<String>) -> Self {
        match kind {
            OwnerKind::Assessment => ContentOwner::Assessment(id.into()),
            OwnerKind::Archetype => ContentOwner::Archetype(id.into()),
        }
    }

    pub fn kind(&self) -> OwnerKind {
        match self {
            ContentOwner::Assessment(_) => OwnerKind::Assessment,
            ContentOwner::Archetype(_) => OwnerKind::Archetype,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ContentOwner::Assessment(id) | ContentOwner::Archetype(id) => id,
        }
    }
}

impl fmt::Display for ContentOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// An assessment or archetype record that can own knowledge content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeParent {
    pub id: String,
    pub kind: OwnerKind,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeParent {
    pub fn owner(&self) -> ContentOwner {
        ContentOwner::new(self.kind, self.id.clone())
    }
}

/// Processing metadata recorded on every chunk of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub processed_at: DateTime<Utc>,
    pub embedding_model: String,
    /// Length of the source document, in characters.
    pub original_length: usize,
    pub total_chunks: usize,
}

/// A stored chunk of knowledge content with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentChunk {
    pub id: String,
    pub owner: ContentOwner,
    pub chunk_index: i64,
    pub content: String,
    /// Length of `content`, in characters.
    pub chunk_size: usize,
    /// Characters shared with the preceding chunk (0 for the first).
    pub overlap_size: usize,
    pub source_url: Option<String>,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
}

/// Per-parent chunking and retrieval configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embedding_model: String,
    /// Number of retrieved chunks injected into a chat.
    pub context_window: usize,
    pub semantic_search: bool,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            embedding_model: "text-embedding-3-small".to_string(),
            context_window: 5,
            semantic_search: true,
        }
    }
}

/// A chunk returned from similarity search.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub similarity: f64,
}

/// Payment-processor subscription mirrored locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub subscription_id: String,
    pub customer_id: String,
    pub user_id: Option<String>,
    pub status: String,
    pub price_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        matches!(self.status.as_str(), "active" | "trialing")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_accessors() {
        let owner = ContentOwner::new(OwnerKind::Archetype, "a1");
        assert_eq!(owner.kind(), OwnerKind::Archetype);
        assert_eq!(owner.id(), "a1");
        assert_eq!(owner.to_string(), "archetype:a1");
    }

    #[test]
    fn test_owner_kind_parse() {
        assert_eq!(OwnerKind::parse("assessment"), Some(OwnerKind::Assessment));
        assert_eq!(OwnerKind::parse("course"), None);
    }

    #[test]
    fn test_subscription_active_states() {
        let mut sub = Subscription {
            subscription_id: "sub_1".into(),
            customer_id: "cus_1".into(),
            user_id: None,
            status: "trialing".into(),
            price_id: None,
            current_period_end: None,
            updated_at: Utc::now(),
        };
        assert!(sub.is_active());
        sub.status = "canceled".into();
        assert!(!sub.is_active());
    }
}
