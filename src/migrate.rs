//! Schema migrations.
//!
//! Every statement is `CREATE … IF NOT EXISTS`, so running migrations on an
//! initialised database is a no-op.

use anyhow::Result;
use sqlx::SqlitePool;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS knowledge_parents (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL CHECK (kind IN ('assessment', 'archetype')),
        title TEXT NOT NULL,
        description TEXT,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS content_chunks (
        id TEXT PRIMARY KEY,
        owner_kind TEXT NOT NULL,
        owner_id TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        content TEXT NOT NULL,
        chunk_size INTEGER NOT NULL,
        overlap_size INTEGER NOT NULL,
        source_url TEXT,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        embedding_json TEXT NOT NULL,
        UNIQUE(owner_kind, owner_id, chunk_index),
        FOREIGN KEY (owner_id) REFERENCES knowledge_parents(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS embedding_settings (
        owner_kind TEXT NOT NULL,
        owner_id TEXT NOT NULL,
        chunk_size INTEGER NOT NULL,
        chunk_overlap INTEGER NOT NULL,
        embedding_model TEXT NOT NULL,
        context_window INTEGER NOT NULL,
        semantic_search INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (owner_kind, owner_id),
        FOREIGN KEY (owner_id) REFERENCES knowledge_parents(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS assessment_sessions (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        assessment_id TEXT NOT NULL,
        status TEXT NOT NULL,
        progress_percentage INTEGER NOT NULL,
        current_question_index INTEGER NOT NULL,
        discovered_archetypes_json TEXT NOT NULL DEFAULT '[]',
        started_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        completed_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS billing_customers (
        customer_id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS subscriptions (
        subscription_id TEXT PRIMARY KEY,
        customer_id TEXT NOT NULL,
        user_id TEXT,
        status TEXT NOT NULL,
        price_id TEXT,
        current_period_end INTEGER,
        updated_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_chunks_owner ON content_chunks(owner_kind, owner_id)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_user ON assessment_sessions(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON subscriptions(user_id)",
];

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
