//! Sliding-window text chunker.
//!
//! Splits raw text into fixed-size character windows that overlap their
//! predecessor by a configurable amount. There is no sentence or paragraph
//! awareness: windows may cut through words.
//!
//! # Algorithm
//!
//! 1. Reject `chunk_size == 0` and `overlap >= chunk_size`.
//! 2. `start_0 = 0`, `end_i = min(start_i + chunk_size, len)`.
//! 3. `start_{i+1} = end_i - overlap`.
//! 4. Stop once the next start would not move forward past the current one
//!    at the end of the text.
//!
//! Offsets and sizes count `char`s, so multi-byte text never splits inside
//! a code point.
//!
//! # Example
//!
//! ```rust
//! use archmen_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("ABCDEFGHIJ", 4, 1).unwrap();
//! let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
//! assert_eq!(texts, ["ABCD", "DEFG", "GHIJ", "J"]);
//! ```

use thiserror::Error;

/// Invalid chunking configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkingError {
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({chunk_size})")]
    OverlapTooLarge { chunk_size: usize, overlap: usize },
    #[error("chunker made no forward progress at offset {start}")]
    NoProgress { start: usize },
}

/// One window produced by [`chunk_text`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: i64,
    /// Start offset in characters (inclusive).
    pub start: usize,
    /// End offset in characters (exclusive).
    pub end: usize,
    pub text: String,
    /// Characters shared with the previous chunk.
    pub overlap: usize,
}

impl TextChunk {
    pub fn size(&self) -> usize {
        self.end - self.start
    }

    /// The part of this chunk not already covered by its predecessor.
    pub fn fresh_text(&self) -> &str {
        match self.text.char_indices().nth(self.overlap) {
            Some((byte, _)) => &self.text[byte..],
            None => "",
        }
    }
}

/// Check a chunk size / overlap pair without chunking anything.
pub fn validate(chunk_size: usize, overlap: usize) -> Result<(), ChunkingError> {
    if chunk_size == 0 {
        return Err(ChunkingError::ZeroChunkSize);
    }
    if overlap >= chunk_size {
        return Err(ChunkingError::OverlapTooLarge {
            chunk_size,
            overlap,
        });
    }
    Ok(())
}

/// Split `text` into overlapping windows of `chunk_size` characters.
///
/// Returns an empty vector for empty input. Indices are contiguous from 0.
pub fn chunk_text(
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<TextChunk>, ChunkingError> {
    validate(chunk_size, overlap)?;

    // Byte offset of every char boundary, plus the end of the string.
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let len = bounds.len();
    bounds.push(text.len());

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index: i64 = 0;

    while start < len {
        let end = (start + chunk_size).min(len);
        chunks.push(TextChunk {
            index,
            start,
            end,
            text: text[bounds[start]..bounds[end]].to_string(),
            overlap: if index == 0 { 0 } else { overlap },
        });
        index += 1;

        let next = end.saturating_sub(overlap);
        if next <= start {
            if end == len {
                break;
            }
            return Err(ChunkingError::NoProgress { start });
        }
        start = next;
    }

    Ok(chunks)
}

/// Rebuild the source text from chunks by dropping each overlap prefix.
pub fn reconstruct(chunks: &[TextChunk]) -> String {
    chunks.iter().map(TextChunk::fresh_text).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_windows() {
        let chunks = chunk_text("ABCDEFGHIJ", 4, 1).unwrap();
        let spans: Vec<(usize, usize, &str)> = chunks
            .iter()
            .map(|c| (c.start, c.end, c.text.as_str()))
            .collect();
        assert_eq!(
            spans,
            vec![(0, 4, "ABCD"), (3, 7, "DEFG"), (6, 10, "GHIJ"), (9, 10, "J")]
        );
        let indices: Vec<i64> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("hello world", 1000, 200).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].size(), 11);
        assert_eq!(chunks[0].overlap, 0);
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("", 10, 2).unwrap().is_empty());
    }

    #[test]
    fn test_overlap_not_smaller_than_size_rejected() {
        assert_eq!(
            chunk_text("abcdef", 4, 4),
            Err(ChunkingError::OverlapTooLarge {
                chunk_size: 4,
                overlap: 4
            })
        );
        assert!(chunk_text("abcdef", 4, 9).is_err());
        assert_eq!(chunk_text("abc", 0, 0), Err(ChunkingError::ZeroChunkSize));
    }

    #[test]
    fn test_overlap_recorded() {
        let chunks = chunk_text("abcdefghijklmnop", 6, 2).unwrap();
        assert_eq!(chunks[0].overlap, 0);
        for c in &chunks[1..] {
            assert_eq!(c.overlap, 2);
        }
    }

    #[test]
    fn test_zero_overlap_partitions() {
        let chunks = chunk_text("abcdefghij", 3, 0).unwrap();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, ["abc", "def", "ghi", "j"]);
    }

    #[test]
    fn test_reconstruction_across_parameters() {
        let text = "The Sage seeks truth; the Hero proves worth through courage. \
                    The Caregiver protects, the Explorer wanders, the Rebel breaks rules.";
        for size in 1..20 {
            for overlap in 0..size {
                let chunks = chunk_text(text, size, overlap).unwrap();
                assert_eq!(
                    reconstruct(&chunks),
                    text,
                    "size={} overlap={}",
                    size,
                    overlap
                );
                for (i, c) in chunks.iter().enumerate() {
                    assert_eq!(c.index, i as i64);
                }
            }
        }
    }

    #[test]
    fn test_multibyte_text_counts_chars() {
        let text = "äöüßéèñ€漢字";
        let chunks = chunk_text(text, 4, 1).unwrap();
        assert_eq!(chunks[0].text, "äöüß");
        assert_eq!(chunks[0].size(), 4);
        assert_eq!(reconstruct(&chunks), text);
    }
}
