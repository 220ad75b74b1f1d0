//! SQLite-backed implementation of the store traits.
//!
//! Vectors are stored as JSON arrays in `content_chunks.embedding_json`.
//! Similarity search loads the owner's vectors and ranks them with
//! [`rank_by_similarity`]; the scope filter runs in SQL.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use archmen_core::embedding::rank_by_similarity;
use archmen_core::models::{
    ChunkMetadata, ContentChunk, ContentOwner, EmbeddingSettings, KnowledgeParent, OwnerKind,
    ScoredChunk, Subscription,
};
use archmen_core::session::{AssessmentSession, SessionStatus};
use archmen_core::store::{KnowledgeStore, SessionStore, SubscriptionStore};

/// SQLite implementation of [`KnowledgeStore`], [`SessionStore`] and
/// [`SubscriptionStore`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn from_ts(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

fn parent_from_row(row: &SqliteRow) -> Result<KnowledgeParent> {
    let kind: String = row.get("kind");
    Ok(KnowledgeParent {
        id: row.get("id"),
        kind: OwnerKind::parse(&kind).with_context(|| format!("unknown parent kind '{}'", kind))?,
        title: row.get("title"),
        description: row.get("description"),
        created_at: from_ts(row.get("created_at")),
    })
}

fn chunk_from_row(owner: &ContentOwner, row: &SqliteRow) -> Result<ContentChunk> {
    let metadata_json: String = row.get("metadata_json");
    let embedding_json: String = row.get("embedding_json");
    let chunk_size: i64 = row.get("chunk_size");
    let overlap_size: i64 = row.get("overlap_size");

    Ok(ContentChunk {
        id: row.get("id"),
        owner: owner.clone(),
        chunk_index: row.get("chunk_index"),
        content: row.get("content"),
        chunk_size: chunk_size as usize,
        overlap_size: overlap_size as usize,
        source_url: row.get("source_url"),
        metadata: serde_json::from_str::<ChunkMetadata>(&metadata_json)
            .context("corrupt chunk metadata")?,
        embedding: serde_json::from_str(&embedding_json).context("corrupt chunk embedding")?,
    })
}

fn session_from_row(row: &SqliteRow) -> Result<AssessmentSession> {
    let status: String = row.get("status");
    let archetypes_json: String = row.get("discovered_archetypes_json");
    let progress: i64 = row.get("progress_percentage");
    let question: i64 = row.get("current_question_index");
    let completed_at: Option<i64> = row.get("completed_at");

    Ok(AssessmentSession {
        id: row.get("id"),
        user_id: row.get("user_id"),
        assessment_id: row.get("assessment_id"),
        status: SessionStatus::parse(&status)
            .with_context(|| format!("unknown session status '{}'", status))?,
        progress_percentage: progress as u32,
        current_question_index: question as u32,
        discovered_archetypes: serde_json::from_str(&archetypes_json)
            .context("corrupt discovered archetypes")?,
        started_at: from_ts(row.get("started_at")),
        updated_at: from_ts(row.get("updated_at")),
        completed_at: completed_at.map(from_ts),
    })
}

fn subscription_from_row(row: &SqliteRow) -> Subscription {
    let period_end: Option<i64> = row.get("current_period_end");
    Subscription {
        subscription_id: row.get("subscription_id"),
        customer_id: row.get("customer_id"),
        user_id: row.get("user_id"),
        status: row.get("status"),
        price_id: row.get("price_id"),
        current_period_end: period_end.map(from_ts),
        updated_at: from_ts(row.get("updated_at")),
    }
}

async fn write_chunks(
    conn: &mut SqliteConnection,
    owner: &ContentOwner,
    chunks: &[ContentChunk],
) -> Result<()> {
    sqlx::query("DELETE FROM content_chunks WHERE owner_kind = ? AND owner_id = ?")
        .bind(owner.kind().as_str())
        .bind(owner.id())
        .execute(&mut *conn)
        .await?;

    for chunk in chunks {
        let metadata_json = serde_json::to_string(&chunk.metadata)?;
        let embedding_json = serde_json::to_string(&chunk.embedding)?;
        sqlx::query(
            r#"
            INSERT INTO content_chunks (id, owner_kind, owner_id, chunk_index, content,
                                        chunk_size, overlap_size, source_url,
                                        metadata_json, embedding_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(owner.kind().as_str())
        .bind(owner.id())
        .bind(chunk.chunk_index)
        .bind(&chunk.content)
        .bind(chunk.chunk_size as i64)
        .bind(chunk.overlap_size as i64)
        .bind(&chunk.source_url)
        .bind(&metadata_json)
        .bind(&embedding_json)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn write_settings(
    conn: &mut SqliteConnection,
    owner: &ContentOwner,
    settings: &EmbeddingSettings,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO embedding_settings (owner_kind, owner_id, chunk_size, chunk_overlap,
                                        embedding_model, context_window, semantic_search,
                                        updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(owner_kind, owner_id) DO UPDATE SET
            chunk_size = excluded.chunk_size,
            chunk_overlap = excluded.chunk_overlap,
            embedding_model = excluded.embedding_model,
            context_window = excluded.context_window,
            semantic_search = excluded.semantic_search,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(owner.kind().as_str())
    .bind(owner.id())
    .bind(settings.chunk_size as i64)
    .bind(settings.chunk_overlap as i64)
    .bind(&settings.embedding_model)
    .bind(settings.context_window as i64)
    .bind(settings.semantic_search)
    .bind(Utc::now().timestamp())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl KnowledgeStore for SqliteStore {
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
            created_at: DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap_or_default(),
        };

        sqlx::query(
            "INSERT INTO knowledge_parents (id, kind, title, description, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&parent.id)
        .bind(kind.as_str())
        .bind(&parent.title)
        .bind(&parent.description)
        .bind(parent.created_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(parent)
    }

    async fn get_parent(&self, owner: &ContentOwner) -> Result<Option<KnowledgeParent>> {
        let row = sqlx::query(
            "SELECT id, kind, title, description, created_at FROM knowledge_parents WHERE id = ? AND kind = ?",
        )
        .bind(owner.id())
        .bind(owner.kind().as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(parent_from_row).transpose()
    }

    async fn list_parents(&self, kind: OwnerKind) -> Result<Vec<KnowledgeParent>> {
        let rows = sqlx::query(
            "SELECT id, kind, title, description, created_at FROM knowledge_parents WHERE kind = ? ORDER BY created_at ASC, title ASC",
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parent_from_row).collect()
    }

    async fn replace_content(&self, owner: &ContentOwner, chunks: &[ContentChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        write_chunks(&mut tx, owner, chunks).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_settings(
        &self,
        owner: &ContentOwner,
        settings: &EmbeddingSettings,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        write_settings(&mut conn, owner, settings).await
    }

    async fn store_processed(
        &self,
        owner: &ContentOwner,
        chunks: &[ContentChunk],
        settings: &EmbeddingSettings,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        write_chunks(&mut tx, owner, chunks).await?;
        write_settings(&mut tx, owner, settings).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_settings(&self, owner: &ContentOwner) -> Result<Option<EmbeddingSettings>> {
        let row = sqlx::query(
            r#"
            SELECT chunk_size, chunk_overlap, embedding_model, context_window, semantic_search
            FROM embedding_settings
            WHERE owner_kind = ? AND owner_id = ?
            "#,
        )
        .bind(owner.kind().as_str())
        .bind(owner.id())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            let chunk_size: i64 = r.get("chunk_size");
            let chunk_overlap: i64 = r.get("chunk_overlap");
            let context_window: i64 = r.get("context_window");
            EmbeddingSettings {
                chunk_size: chunk_size as usize,
                chunk_overlap: chunk_overlap as usize,
                embedding_model: r.get("embedding_model"),
                context_window: context_window as usize,
                semantic_search: r.get("semantic_search"),
            }
        }))
    }

    async fn delete_chunk(&self, chunk_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM content_chunks WHERE id = ?")
            .bind(chunk_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_chunks(&self, owner: &ContentOwner) -> Result<Vec<ContentChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, chunk_index, content, chunk_size, overlap_size, source_url,
                   metadata_json, embedding_json
            FROM content_chunks
            WHERE owner_kind = ? AND owner_id = ?
            ORDER BY chunk_index ASC
            "#,
        )
        .bind(owner.kind().as_str())
        .bind(owner.id())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| chunk_from_row(owner, row)).collect()
    }

    async fn similarity_search(
        &self,
        query_vec: &[f32],
        owner: &ContentOwner,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, chunk_index, content, embedding_json
            FROM content_chunks
            WHERE owner_kind = ? AND owner_id = ?
            "#,
        )
        .bind(owner.kind().as_str())
        .bind(owner.id())
        .fetch_all(&self.pool)
        .await?;

        let mut decoded: Vec<(ScoredChunk, Vec<f32>)> = Vec::with_capacity(rows.len());
        for row in &rows {
            let embedding_json: String = row.get("embedding_json");
            let vector: Vec<f32> =
                serde_json::from_str(&embedding_json).context("corrupt chunk embedding")?;
            decoded.push((
                ScoredChunk {
                    chunk_id: row.get("id"),
                    chunk_index: row.get("chunk_index"),
                    content: row.get("content"),
                    similarity: 0.0,
                },
                vector,
            ));
        }

        let ranked = rank_by_similarity(
            query_vec,
            decoded.iter().map(|(chunk, v)| (chunk, v.as_slice())),
            threshold,
            limit,
        );

        Ok(ranked
            .into_iter()
            .map(|(chunk, similarity)| ScoredChunk {
                similarity,
                ..chunk.clone()
            })
            .collect())
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn insert_session(&self, session: &AssessmentSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO assessment_sessions (id, user_id, assessment_id, status,
                                             progress_percentage, current_question_index,
                                             discovered_archetypes_json, started_at,
                                             updated_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.assessment_id)
        .bind(session.status.as_str())
        .bind(session.progress_percentage as i64)
        .bind(session.current_question_index as i64)
        .bind(serde_json::to_string(&session.discovered_archetypes)?)
        .bind(session.started_at.timestamp())
        .bind(session.updated_at.timestamp())
        .bind(session.completed_at.map(|t| t.timestamp()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<AssessmentSession>> {
        let row = sqlx::query("SELECT * FROM assessment_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<AssessmentSession>> {
        let rows = sqlx::query(
            "SELECT * FROM assessment_sessions WHERE user_id = ? ORDER BY started_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(session_from_row).collect()
    }

    async fn save_session(&self, session: &AssessmentSession) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE assessment_sessions SET
                status = ?,
                progress_percentage = ?,
                current_question_index = ?,
                discovered_archetypes_json = ?,
                updated_at = ?,
                completed_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(session.status.as_str())
        .bind(session.progress_percentage as i64)
        .bind(session.current_question_index as i64)
        .bind(serde_json::to_string(&session.discovered_archetypes)?)
        .bind(session.updated_at.timestamp())
        .bind(session.completed_at.map(|t| t.timestamp()))
        .bind(&session.id)
        .bind(SessionStatus::InProgress.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_session(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM assessment_sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SubscriptionStore for SqliteStore {
    async fn link_customer(&self, customer_id: &str, user_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO billing_customers (customer_id, user_id) VALUES (?, ?)
            ON CONFLICT(customer_id) DO UPDATE SET user_id = excluded.user_id
            "#,
        )
        .bind(customer_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        // Subscriptions that arrived before the checkout event get their owner now.
        sqlx::query(
            "UPDATE subscriptions SET user_id = ? WHERE customer_id = ? AND user_id IS NULL",
        )
        .bind(user_id)
        .bind(customer_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn user_for_customer(&self, customer_id: &str) -> Result<Option<String>> {
        let user: Option<String> =
            sqlx::query_scalar("SELECT user_id FROM billing_customers WHERE customer_id = ?")
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(user)
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (subscription_id, customer_id, user_id, status,
                                       price_id, current_period_end, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(subscription_id) DO UPDATE SET
                customer_id = excluded.customer_id,
                user_id = COALESCE(excluded.user_id, subscriptions.user_id),
                status = excluded.status,
                price_id = excluded.price_id,
                current_period_end = excluded.current_period_end,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&subscription.subscription_id)
        .bind(&subscription.customer_id)
        .bind(&subscription.user_id)
        .bind(&subscription.status)
        .bind(&subscription.price_id)
        .bind(subscription.current_period_end.map(|t| t.timestamp()))
        .bind(subscription.updated_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn subscription_for_user(&self, user_id: &str) -> Result<Option<Subscription>> {
        let row = sqlx::query(
            "SELECT * FROM subscriptions WHERE user_id = ? ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(subscription_from_row))
    }
}
