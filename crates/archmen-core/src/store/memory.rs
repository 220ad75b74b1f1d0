//! In-memory implementation of every store trait, for tests.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Similarity search
//! is brute-force cosine similarity over the owner's chunks.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::embedding::rank_by_similarity;
use crate::models::{
    ContentChunk, ContentOwner, EmbeddingSettings, KnowledgeParent, OwnerKind, ScoredChunk,
    Subscription,
};
use crate::session::{AssessmentSession, SessionStatus};

use super::{KnowledgeStore, SessionStore, SubscriptionStore};

/// In-memory store for tests and local experiments.
#[derive(Default)]
pub struct InMemoryStore {
    parents: RwLock<Vec<KnowledgeParent>>,
    chunks: RwLock<Vec<ContentChunk>>,
    settings: RwLock<HashMap<ContentOwner, EmbeddingSettings>>,
    sessions: RwLock<HashMap<String, AssessmentSession>>,
    customers: RwLock<HashMap<String, String>>,
    subscriptions: RwLock<HashMap<String, Subscription>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    async fn create_parent(
        &self,
        kind: OwnerKind,
        title: &str,
        description: Option<&str>,
    ) -> Result<KnowledgeParent> {
        let parent = KnowledgeParent {
            id: Uuid::new_v4().to_string(),
            kind,
            title: title.to_string(),
            description: description.map(str::to_string),
            created_at: Utc::now(),
        };
        write(&self.parents)?.push(parent.clone());
        Ok(parent)
    }

    async fn get_parent(&self, owner: &ContentOwner) -> Result<Option<KnowledgeParent>> {
        Ok(read(&self.parents)?
            .iter()
            .find(|p| p.kind == owner.kind() && p.id == owner.id())
            .cloned())
    }

    async fn list_parents(&self, kind: OwnerKind) -> Result<Vec<KnowledgeParent>> {
        Ok(read(&self.parents)?
            .iter()
            .filter(|p| p.kind == kind)
            .cloned()
            .collect())
    }

    async fn replace_content(&self, owner: &ContentOwner, chunks: &[ContentChunk]) -> Result<()> {
        let mut stored = write(&self.chunks)?;
        stored.retain(|c| &c.owner != owner);
        stored.extend(chunks.iter().cloned());
        Ok(())
    }

    async fn upsert_settings(
        &self,
        owner: &ContentOwner,
        settings: &EmbeddingSettings,
    ) -> Result<()> {
        write(&self.settings)?.insert(owner.clone(), settings.clone());
        Ok(())
    }

    async fn store_processed(
        &self,
        owner: &ContentOwner,
        chunks: &[ContentChunk],
        settings: &EmbeddingSettings,
    ) -> Result<()> {
        let mut stored = write(&self.chunks)?;
        let mut all_settings = write(&self.settings)?;
        stored.retain(|c| &c.owner != owner);
        stored.extend(chunks.iter().cloned());
        all_settings.insert(owner.clone(), settings.clone());
        Ok(())
    }

    async fn get_settings(&self, owner: &ContentOwner) -> Result<Option<EmbeddingSettings>> {
        Ok(read(&self.settings)?.get(owner).cloned())
    }

    async fn delete_chunk(&self, chunk_id: &str) -> Result<bool> {
        let mut stored = write(&self.chunks)?;
        let before = stored.len();
        stored.retain(|c| c.id != chunk_id);
        Ok(stored.len() != before)
    }

    async fn list_chunks(&self, owner: &ContentOwner) -> Result<Vec<ContentChunk>> {
        let mut chunks: Vec<ContentChunk> = read(&self.chunks)?
            .iter()
            .filter(|c| &c.owner == owner)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn similarity_search(
        &self,
        query_vec: &[f32],
        owner: &ContentOwner,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let stored = read(&self.chunks)?;
        let candidates = stored
            .iter()
            .filter(|c| &c.owner == owner)
            .map(|c| (c, c.embedding.as_slice()));

        Ok(rank_by_similarity(query_vec, candidates, threshold, limit)
            .into_iter()
            .map(|(c, similarity)| ScoredChunk {
                chunk_id: c.id.clone(),
                chunk_index: c.chunk_index,
                content: c.content.clone(),
                similarity,
            })
            .collect())
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn insert_session(&self, session: &AssessmentSession) -> Result<()> {
        write(&self.sessions)?.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<AssessmentSession>> {
        Ok(read(&self.sessions)?.get(id).cloned())
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<AssessmentSession>> {
        let mut sessions: Vec<AssessmentSession> = read(&self.sessions)?
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(sessions)
    }

    async fn save_session(&self, session: &AssessmentSession) -> Result<bool> {
        let mut sessions = write(&self.sessions)?;
        match sessions.get_mut(&session.id) {
            Some(existing) if existing.status == SessionStatus::InProgress => {
                *existing = session.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_session(&self, id: &str) -> Result<bool> {
        Ok(write(&self.sessions)?.remove(id).is_some())
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn link_customer(&self, customer_id: &str, user_id: &str) -> Result<()> {
        write(&self.customers)?.insert(customer_id.to_string(), user_id.to_string());
        for sub in write(&self.subscriptions)?.values_mut() {
            if sub.customer_id == customer_id && sub.user_id.is_none() {
                sub.user_id = Some(user_id.to_string());
            }
        }
        Ok(())
    }

    async fn user_for_customer(&self, customer_id: &str) -> Result<Option<String>> {
        Ok(read(&self.customers)?.get(customer_id).cloned())
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<()> {
        let mut subs = write(&self.subscriptions)?;
        let mut updated = subscription.clone();
        if updated.user_id.is_none() {
            updated.user_id = subs
                .get(&subscription.subscription_id)
                .and_then(|s| s.user_id.clone());
        }
        subs.insert(subscription.subscription_id.clone(), updated);
        Ok(())
    }

    async fn subscription_for_user(&self, user_id: &str) -> Result<Option<Subscription>> {
        Ok(read(&self.subscriptions)?
            .values()
            .filter(|s| s.user_id.as_deref() == Some(user_id))
            .max_by_key(|s| s.updated_at)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn chunk(owner: &ContentOwner, index: i64, text: &str, embedding: Vec<f32>) -> ContentChunk {
        ContentChunk {
            id: Uuid::new_v4().to_string(),
            owner: owner.clone(),
            chunk_index: index,
            content: text.to_string(),
            chunk_size: text.chars().count(),
            overlap_size: 0,
            source_url: None,
            metadata: ChunkMetadata {
                processed_at: Utc::now(),
                embedding_model: "test".into(),
                original_length: 0,
                total_chunks: 0,
            },
            embedding,
        }
    }

    #[tokio::test]
    async fn test_replace_leaves_only_second_set() {
        let store = InMemoryStore::new();
        let owner = ContentOwner::Assessment("a1".into());
        let other = ContentOwner::Archetype("a1".into());

        store
            .replace_content(&owner, &[chunk(&owner, 0, "old", vec![1.0])])
            .await
            .unwrap();
        store
            .replace_content(&other, &[chunk(&other, 0, "archetype", vec![1.0])])
            .await
            .unwrap();
        store
            .replace_content(
                &owner,
                &[
                    chunk(&owner, 1, "new b", vec![1.0]),
                    chunk(&owner, 0, "new a", vec![1.0]),
                ],
            )
            .await
            .unwrap();

        let texts: Vec<String> = store
            .list_chunks(&owner)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.content)
            .collect();
        assert_eq!(texts, vec!["new a", "new b"]);
        assert_eq!(store.list_chunks(&other).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_similarity_is_scoped_to_owner() {
        let store = InMemoryStore::new();
        let mine = ContentOwner::Assessment("mine".into());
        let theirs = ContentOwner::Assessment("theirs".into());
        store
            .replace_content(&mine, &[chunk(&mine, 0, "mine", vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .replace_content(&theirs, &[chunk(&theirs, 0, "theirs", vec![1.0, 0.0])])
            .await
            .unwrap();

        let hits = store
            .similarity_search(&[1.0, 0.0], &mine, 0.5, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "mine");

        let none = store
            .similarity_search(&[0.0, 1.0], &mine, 0.9, 10)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_delete_chunk_by_id() {
        let store = InMemoryStore::new();
        let owner = ContentOwner::Archetype("x".into());
        let c = chunk(&owner, 0, "text", vec![1.0]);
        store.replace_content(&owner, &[c.clone()]).await.unwrap();
        assert!(store.delete_chunk(&c.id).await.unwrap());
        assert!(!store.delete_chunk(&c.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_subscription_lookup_by_user() {
        let store = InMemoryStore::new();
        let sub = Subscription {
            subscription_id: "sub_1".into(),
            customer_id: "cus_1".into(),
            user_id: Some("u1".into()),
            status: "active".into(),
            price_id: Some("price_1".into()),
            current_period_end: None,
            updated_at: Utc::now(),
        };
        store.upsert_subscription(&sub).await.unwrap();
        let found = store.subscription_for_user("u1").await.unwrap().unwrap();
        assert_eq!(found.subscription_id, "sub_1");
        assert!(store.subscription_for_user("u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_snapshot_cannot_leave_terminal_state() {
        let store = InMemoryStore::new();
        let session = AssessmentSession::start("u1", "a1");
        store.insert_session(&session).await.unwrap();

        let mut first = store.get_session(&session.id).await.unwrap().unwrap();
        let mut second = store.get_session(&session.id).await.unwrap().unwrap();
        first.complete(Vec::new()).unwrap();
        assert!(store.save_session(&first).await.unwrap());

        second.abandon().unwrap();
        assert!(!store.save_session(&second).await.unwrap());
        let stored = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_store_processed_sets_chunks_and_settings() {
        let store = InMemoryStore::new();
        let owner = ContentOwner::Assessment("a1".into());
        let settings = EmbeddingSettings {
            chunk_size: 10,
            ..Default::default()
        };
        store
            .store_processed(&owner, &[chunk(&owner, 0, "text", vec![1.0])], &settings)
            .await
            .unwrap();
        assert_eq!(store.list_chunks(&owner).await.unwrap().len(), 1);
        assert_eq!(store.get_settings(&owner).await.unwrap(), Some(settings));
    }
}
