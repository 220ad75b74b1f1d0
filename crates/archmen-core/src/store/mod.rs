//! Storage abstraction for ArchMen.
//!
//! Three traits cover the persistent state of the service:
//!
//! | Trait | Holds |
//! |-------|-------|
//! | [`KnowledgeStore`] | parents, content chunks, embedding settings, similarity search |
//! | [`SessionStore`] | assessment sessions |
//! | [`SubscriptionStore`] | billing customers and subscriptions |
//!
//! Implementations must be `Send + Sync`; the HTTP layer shares them across
//! requests behind `Arc<dyn …>`. The in-memory backend in [`memory`] is
//! used by tests; the SQLite backend lives in the app crate.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    ContentChunk, ContentOwner, EmbeddingSettings, KnowledgeParent, OwnerKind, ScoredChunk,
    Subscription,
};
use crate::session::AssessmentSession;

/// Knowledge content storage.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`replace_content`](KnowledgeStore::replace_content) | Delete every chunk of a parent, insert a new set |
/// | [`upsert_settings`](KnowledgeStore::upsert_settings) | Write the single settings row of a parent |
/// | [`store_processed`](KnowledgeStore::store_processed) | Both of the above, atomically |
/// | [`delete_chunk`](KnowledgeStore::delete_chunk) | Remove one chunk by id |
/// | [`list_chunks`](KnowledgeStore::list_chunks) | All chunks of a parent, index ascending |
/// | [`similarity_search`](KnowledgeStore::similarity_search) | Scoped cosine search |
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn create_parent(
        &self,
        kind: OwnerKind,
        title: &str,
        description: Option<&str>,
    ) -> Result<KnowledgeParent>;

    async fn get_parent(&self, owner: &ContentOwner) -> Result<Option<KnowledgeParent>>;

    async fn list_parents(&self, kind: OwnerKind) -> Result<Vec<KnowledgeParent>>;

    /// Replace all chunks owned by `owner` with `chunks`.
    async fn replace_content(&self, owner: &ContentOwner, chunks: &[ContentChunk]) -> Result<()>;

    async fn upsert_settings(&self, owner: &ContentOwner, settings: &EmbeddingSettings)
        -> Result<()>;

    /// Replace the chunks of `owner` and write its settings as one unit:
    /// either both land or neither does.
    async fn store_processed(
        &self,
        owner: &ContentOwner,
        chunks: &[ContentChunk],
        settings: &EmbeddingSettings,
    ) -> Result<()>;

    async fn get_settings(&self, owner: &ContentOwner) -> Result<Option<EmbeddingSettings>>;

    /// Remove one chunk. Returns `false` if no chunk had that id.
    async fn delete_chunk(&self, chunk_id: &str) -> Result<bool>;

    async fn list_chunks(&self, owner: &ContentOwner) -> Result<Vec<ContentChunk>>;

    /// Chunks of `owner` whose cosine similarity to `query_vec` exceeds
    /// `threshold`, best first, at most `limit`.
    async fn similarity_search(
        &self,
        query_vec: &[f32],
        owner: &ContentOwner,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &AssessmentSession) -> Result<()>;

    async fn get_session(&self, id: &str) -> Result<Option<AssessmentSession>>;

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<AssessmentSession>>;

    /// Overwrite the mutable fields of a session that is still in progress.
    ///
    /// Returns `false` when no in-progress session with that id is stored,
    /// e.g. a concurrent request already completed, abandoned or deleted it.
    async fn save_session(&self, session: &AssessmentSession) -> Result<bool>;

    async fn delete_session(&self, id: &str) -> Result<bool>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn link_customer(&self, customer_id: &str, user_id: &str) -> Result<()>;

    async fn user_for_customer(&self, customer_id: &str) -> Result<Option<String>>;

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<()>;

    /// Most recently updated subscription of a user.
    async fn subscription_for_user(&self, user_id: &str) -> Result<Option<Subscription>>;
}
