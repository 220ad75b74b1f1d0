//! Content processing pipeline.
//!
//! One run turns a text document into the stored knowledge of one
//! assessment or archetype:
//!
//! 1. Check the parent exists.
//! 2. Resolve settings (request overrides on top of stored or default settings).
//! 3. Chunk the text ([`archmen_core::chunk::chunk_text`]).
//! 4. Embed every chunk in batches ([`embed_batched`]).
//! 5. Replace the parent's chunks and upsert its settings in one write.
//!
//! Nothing is written until every embedding has succeeded, so a failed run
//! leaves the previous content in place.

use anyhow::Result;
use chrono::Utc;
use futures::future::try_join_all;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use archmen_core::chunk::{self, ChunkingError};
use archmen_core::embedding::{embed_checked, truncate_input, EmbeddingProvider};
use archmen_core::models::{ChunkMetadata, ContentChunk, ContentOwner, EmbeddingSettings};
use archmen_core::store::KnowledgeStore;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0} not found")]
    NotFound(ContentOwner),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Chunking(#[from] ChunkingError),
    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),
    #[error(transparent)]
    Store(anyhow::Error),
}

/// Partial settings supplied with a processing request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub embedding_model: Option<String>,
    pub context_window: Option<usize>,
    pub semantic_search: Option<bool>,
}

impl SettingsPatch {
    pub fn apply(self, base: EmbeddingSettings) -> EmbeddingSettings {
        EmbeddingSettings {
            chunk_size: self.chunk_size.unwrap_or(base.chunk_size),
            chunk_overlap: self.chunk_overlap.unwrap_or(base.chunk_overlap),
            embedding_model: self.embedding_model.unwrap_or(base.embedding_model),
            context_window: self.context_window.unwrap_or(base.context_window),
            semantic_search: self.semantic_search.unwrap_or(base.semantic_search),
        }
    }
}

/// Collaborators for a processing run.
pub struct ProcessContext<'a> {
    pub config: &'a Config,
    pub store: &'a dyn KnowledgeStore,
    pub embedder: &'a dyn EmbeddingProvider,
}

/// A document submitted for processing.
#[derive(Debug, Clone)]
pub struct ProcessInput {
    pub owner: ContentOwner,
    pub text: String,
    pub source_url: Option<String>,
    pub settings: SettingsPatch,
}

#[derive(Debug)]
pub struct ProcessOutcome {
    pub chunks: Vec<ContentChunk>,
    pub settings: EmbeddingSettings,
}

/// Embed `texts` in order, `batch_size` at a time.
///
/// Requests inside a batch run concurrently; `delay` is slept between
/// batches. Every vector is checked against the provider's dimensionality.
/// The first failure aborts the whole call.
pub async fn embed_batched(
    embedder: &dyn EmbeddingProvider,
    model: &str,
    texts: &[String],
    batch_size: usize,
    delay: Duration,
    max_input_chars: usize,
) -> Result<Vec<Vec<f32>>> {
    let batch_size = batch_size.max(1);
    let mut vectors = Vec::with_capacity(texts.len());

    for (i, batch) in texts.chunks(batch_size).enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let calls = batch
            .iter()
            .map(|text| embed_checked(embedder, model, truncate_input(text, max_input_chars)));
        vectors.extend(try_join_all(calls).await?);
        tracing::debug!(batch = i, done = vectors.len(), total = texts.len(), "embedded batch");
    }

    Ok(vectors)
}

/// Run the full pipeline for one document.
pub async fn process_content(
    ctx: &ProcessContext<'_>,
    input: ProcessInput,
) -> Result<ProcessOutcome, PipelineError> {
    let ProcessInput {
        owner,
        text,
        source_url,
        settings,
    } = input;

    if ctx
        .store
        .get_parent(&owner)
        .await
        .map_err(PipelineError::Store)?
        .is_none()
    {
        return Err(PipelineError::NotFound(owner));
    }

    if text.trim().is_empty() {
        return Err(PipelineError::Validation("content must not be empty".into()));
    }

    let base = ctx
        .store
        .get_settings(&owner)
        .await
        .map_err(PipelineError::Store)?
        .unwrap_or_else(|| ctx.config.default_settings());
    let settings = settings.apply(base);
    chunk::validate(settings.chunk_size, settings.chunk_overlap)?;
    if settings.embedding_model.trim().is_empty() {
        return Err(PipelineError::Validation(
            "embeddingModel must not be empty".into(),
        ));
    }

    let pieces = chunk::chunk_text(&text, settings.chunk_size, settings.chunk_overlap)?;
    let texts: Vec<String> = pieces.iter().map(|p| p.text.clone()).collect();

    tracing::info!(
        %owner,
        chunks = pieces.len(),
        chunk_size = settings.chunk_size,
        chunk_overlap = settings.chunk_overlap,
        model = %settings.embedding_model,
        "processing content"
    );

    let vectors = embed_batched(
        ctx.embedder,
        &settings.embedding_model,
        &texts,
        ctx.config.embedding.batch_size,
        Duration::from_millis(ctx.config.embedding.batch_delay_ms),
        ctx.config.embedding.max_input_chars,
    )
    .await
    .map_err(PipelineError::Embedding)?;

    let metadata = ChunkMetadata {
        processed_at: Utc::now(),
        embedding_model: settings.embedding_model.clone(),
        original_length: text.chars().count(),
        total_chunks: pieces.len(),
    };

    let chunks: Vec<ContentChunk> = pieces
        .into_iter()
        .zip(vectors)
        .map(|(piece, embedding)| ContentChunk {
            id: Uuid::new_v4().to_string(),
            owner: owner.clone(),
            chunk_index: piece.index,
            chunk_size: piece.size(),
            overlap_size: piece.overlap,
            content: piece.text,
            source_url: source_url.clone(),
            metadata: metadata.clone(),
            embedding,
        })
        .collect();

    ctx.store
        .store_processed(&owner, &chunks, &settings)
        .await
        .map_err(PipelineError::Store)?;

    tracing::info!(%owner, chunks = chunks.len(), "content stored");

    Ok(ProcessOutcome { chunks, settings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use archmen_core::models::OwnerKind;
    use archmen_core::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingEmbedder {
        calls: AtomicUsize,
        inputs: Mutex<Vec<String>>,
        fail_on: Option<usize>,
    }

    impl RecordingEmbedder {
        fn new(fail_on: Option<usize>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                inputs: Mutex::new(Vec::new()),
                fail_on,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for RecordingEmbedder {
        fn model_name(&self) -> &str {
            "fake"
        }
        fn dims(&self) -> Option<usize> {
            Some(2)
        }
        async fn embed(&self, _model: &str, text: &str) -> Result<Vec<f32>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.inputs.lock().unwrap().push(text.to_string());
            if self.fail_on == Some(n) {
                anyhow::bail!("provider unavailable");
            }
            Ok(vec![1.0, text.chars().count() as f32])
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.embedding.batch_delay_ms = 0;
        config
    }

    fn input(owner: &ContentOwner, text: &str, patch: SettingsPatch) -> ProcessInput {
        ProcessInput {
            owner: owner.clone(),
            text: text.to_string(),
            source_url: None,
            settings: patch,
        }
    }

    #[tokio::test]
    async fn test_hello_world_single_chunk() {
        let store = InMemoryStore::new();
        let parent = store
            .create_parent(OwnerKind::Assessment, "Big Five", None)
            .await
            .unwrap();
        let owner = parent.owner();
        let embedder = RecordingEmbedder::new(None);
        let config = test_config();
        let ctx = ProcessContext {
            config: &config,
            store: &store,
            embedder: &embedder,
        };

        let out = process_content(&ctx, input(&owner, "hello world", SettingsPatch::default()))
            .await
            .unwrap();
        assert_eq!(out.chunks.len(), 1);
        assert_eq!(out.chunks[0].chunk_index, 0);
        assert_eq!(out.chunks[0].chunk_size, 11);
        assert_eq!(out.chunks[0].metadata.total_chunks, 1);
        assert_eq!(out.settings.chunk_size, 1000);

        let stored = store.get_settings(&owner).await.unwrap().unwrap();
        assert_eq!(stored.chunk_overlap, 200);
    }

    #[tokio::test]
    async fn test_batches_preserve_order() {
        let store = InMemoryStore::new();
        let owner = store
            .create_parent(OwnerKind::Archetype, "Sage", None)
            .await
            .unwrap()
            .owner();
        let embedder = RecordingEmbedder::new(None);
        let config = test_config();
        let ctx = ProcessContext {
            config: &config,
            store: &store,
            embedder: &embedder,
        };
        let patch = SettingsPatch {
            chunk_size: Some(2),
            chunk_overlap: Some(0),
            ..Default::default()
        };

        let out = process_content(&ctx, input(&owner, "aabbccddeeffgghhiijjkkll", patch))
            .await
            .unwrap();
        assert_eq!(out.chunks.len(), 12);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 12);
        let indices: Vec<i64> = out.chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, (0..12).collect::<Vec<_>>());
        assert_eq!(out.chunks[3].content, "dd");
    }

    #[tokio::test]
    async fn test_failed_embedding_keeps_previous_content() {
        let store = InMemoryStore::new();
        let owner = store
            .create_parent(OwnerKind::Assessment, "Enneagram", None)
            .await
            .unwrap()
            .owner();
        let config = test_config();
        let ok = RecordingEmbedder::new(None);
        let ctx = ProcessContext {
            config: &config,
            store: &store,
            embedder: &ok,
        };
        process_content(&ctx, input(&owner, "first version", SettingsPatch::default()))
            .await
            .unwrap();

        let failing = RecordingEmbedder::new(Some(0));
        let ctx = ProcessContext {
            config: &config,
            store: &store,
            embedder: &failing,
        };
        let err = process_content(&ctx, input(&owner, "second version", SettingsPatch::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Embedding(_)));

        let chunks = store.list_chunks(&owner).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "first version");
    }

    #[tokio::test]
    async fn test_missing_parent() {
        let store = InMemoryStore::new();
        let config = test_config();
        let embedder = RecordingEmbedder::new(None);
        let ctx = ProcessContext {
            config: &config,
            store: &store,
            embedder: &embedder,
        };
        let owner = ContentOwner::Assessment("nope".into());
        let err = process_content(&ctx, input(&owner, "text", SettingsPatch::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_overlap_not_smaller_than_size() {
        let store = InMemoryStore::new();
        let owner = store
            .create_parent(OwnerKind::Assessment, "A", None)
            .await
            .unwrap()
            .owner();
        let config = test_config();
        let embedder = RecordingEmbedder::new(None);
        let ctx = ProcessContext {
            config: &config,
            store: &store,
            embedder: &embedder,
        };
        let patch = SettingsPatch {
            chunk_size: Some(100),
            chunk_overlap: Some(100),
            ..Default::default()
        };
        let err = process_content(&ctx, input(&owner, "text", patch))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Chunking(_)));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_inputs_truncated() {
        let embedder = RecordingEmbedder::new(None);
        let long = "x".repeat(50);
        embed_batched(&embedder, "m", &[long], 5, Duration::ZERO, 10)
            .await
            .unwrap();
        assert_eq!(embedder.inputs.lock().unwrap()[0].len(), 10);
    }

    /// Sleeps on every call and tracks how many calls overlap.
    struct SlowEmbedder {
        latency: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for SlowEmbedder {
        fn model_name(&self) -> &str {
            "slow"
        }
        fn dims(&self) -> Option<usize> {
            None
        }
        async fn embed(&self, _model: &str, _text: &str) -> Result<Vec<f32>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![1.0])
        }
    }

    #[tokio::test]
    async fn test_batches_run_concurrently_with_delay_between() {
        let embedder = SlowEmbedder {
            latency: Duration::from_millis(50),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        };
        let texts: Vec<String> = (0..10).map(|i| format!("chunk {}", i)).collect();

        let started = std::time::Instant::now();
        let vectors = embed_batched(
            &embedder,
            "m",
            &texts,
            5,
            Duration::from_millis(100),
            8000,
        )
        .await
        .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(vectors.len(), 10);
        assert_eq!(embedder.max_in_flight.load(Ordering::SeqCst), 5);
        // Two concurrent batches of 50ms around one 100ms pause. Sequential
        // calls alone would take 500ms.
        assert!(elapsed >= Duration::from_millis(200), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(500), "{:?}", elapsed);
    }

    /// Claims two dimensions but returns three.
    struct WrongDimsEmbedder;

    #[async_trait]
    impl EmbeddingProvider for WrongDimsEmbedder {
        fn model_name(&self) -> &str {
            "wrong"
        }
        fn dims(&self) -> Option<usize> {
            Some(2)
        }
        async fn embed(&self, _model: &str, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejects_run() {
        let store = InMemoryStore::new();
        let owner = store
            .create_parent(OwnerKind::Archetype, "Hero", None)
            .await
            .unwrap()
            .owner();
        let config = test_config();
        let ctx = ProcessContext {
            config: &config,
            store: &store,
            embedder: &WrongDimsEmbedder,
        };

        let err = process_content(&ctx, input(&owner, "courage", SettingsPatch::default()))
            .await
            .unwrap_err();
        match err {
            PipelineError::Embedding(e) => {
                assert!(e.to_string().contains("expected 2"), "{}", e)
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(store.list_chunks(&owner).await.unwrap().is_empty());
        assert!(store.get_settings(&owner).await.unwrap().is_none());
    }
}
