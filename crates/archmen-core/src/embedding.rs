//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, plus pure helpers for input truncation and similarity.
//!
//! Concrete providers (OpenAI-compatible HTTP) live in the `archmen`
//! app crate and are injected into handlers; nothing here holds global state.

use anyhow::{bail, Result};
use async_trait::async_trait;

/// Longest input, in characters, sent to an embedding endpoint.
pub const MAX_EMBEDDING_INPUT_CHARS: usize = 8000;

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the default model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the expected vector dimensionality, if known.
    fn dims(&self) -> Option<usize>;

    /// Request one embedding vector for `text` using `model`.
    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>>;
}

/// Request one embedding and check it against the provider's configured
/// dimensionality, when it has one.
pub async fn embed_checked(
    provider: &dyn EmbeddingProvider,
    model: &str,
    text: &str,
) -> Result<Vec<f32>> {
    let vector = provider.embed(model, text).await?;
    if let Some(expected) = provider.dims() {
        if vector.len() != expected {
            bail!(
                "Embedding has {} dimensions, expected {}",
                vector.len(),
                expected
            );
        }
    }
    Ok(vector)
}

/// Cut `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_input(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Rank `(id, vector)` candidates against `query`, keeping scores strictly
/// above `threshold`, best first, at most `limit` entries.
pub fn rank_by_similarity<'a, T>(
    query: &[f32],
    candidates: impl IntoIterator<Item = (T, &'a [f32])>,
    threshold: f64,
    limit: usize,
) -> Vec<(T, f64)> {
    let mut scored: Vec<(T, f64)> = candidates
        .into_iter()
        .map(|(item, v)| (item, cosine_similarity(query, v) as f64))
        .filter(|(_, score)| *score > threshold)
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_truncate_input() {
        assert_eq!(truncate_input("abcdef", 3), "abc");
        assert_eq!(truncate_input("abc", 10), "abc");
        assert_eq!(truncate_input("ééé", 2), "éé");
    }

    #[test]
    fn test_rank_threshold_and_order() {
        let query = [1.0f32, 0.0];
        let near = [0.9f32, 0.1];
        let exact = [1.0f32, 0.0];
        let far = [0.0f32, 1.0];
        let ranked = rank_by_similarity(
            &query,
            vec![("near", &near[..]), ("exact", &exact[..]), ("far", &far[..])],
            0.5,
            10,
        );
        let ids: Vec<&str> = ranked.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec!["exact", "near"]);
    }

    #[test]
    fn test_rank_limit() {
        let query = [1.0f32];
        let v = [1.0f32];
        let candidates = vec![(1, &v[..]), (2, &v[..]), (3, &v[..])];
        let ranked = rank_by_similarity(&query, candidates, 0.0, 2);
        assert_eq!(ranked.len(), 2);
    }

    struct FixedProvider {
        dims: Option<usize>,
        len: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedProvider {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> Option<usize> {
            self.dims
        }
        async fn embed(&self, _model: &str, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.5; self.len])
        }
    }

    #[tokio::test]
    async fn test_embed_checked_dimensions() {
        let matching = FixedProvider { dims: Some(3), len: 3 };
        assert_eq!(embed_checked(&matching, "m", "x").await.unwrap().len(), 3);

        let unchecked = FixedProvider { dims: None, len: 7 };
        assert_eq!(embed_checked(&unchecked, "m", "x").await.unwrap().len(), 7);

        let mismatched = FixedProvider { dims: Some(1536), len: 3 };
        let err = embed_checked(&mismatched, "m", "x").await.unwrap_err();
        assert!(err.to_string().contains("3 dimensions, expected 1536"));
    }
}
