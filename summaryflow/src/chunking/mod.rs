//! Splitting long documents into overlapping chunks.
//!
//! Lengths are counted in characters, not bytes. Chunk ends prefer a blank
//! line, then a sentence end, then any whitespace, searching back no further
//! than half a chunk.

use serde::{Deserialize, Serialize};

use crate::errors::SummaryflowError;

/// Chunking settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Whether long inputs are chunked at all.
    pub enabled: bool,
    /// Maximum characters per chunk.
    pub max_chunk_chars: usize,
    /// Characters repeated at the start of the next chunk.
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_chunk_chars: 12_000,
            overlap_chars: 400,
        }
    }
}

impl ChunkingConfig {
    /// Sets the chunk size and overlap.
    #[must_use]
    pub fn with_sizes(mut self, max_chunk_chars: usize, overlap_chars: usize) -> Self {
        self.max_chunk_chars = max_chunk_chars;
        self.overlap_chars = overlap_chars;
        self
    }

    /// Checks that chunks make progress.
    ///
    /// # Errors
    ///
    /// Returns `SummaryflowError::Config` if the chunk size is zero or the
    /// overlap is not smaller than it.
    pub fn validate(&self) -> Result<(), SummaryflowError> {
        if self.max_chunk_chars == 0 {
            return Err(SummaryflowError::Config(
                "chunking.max_chunk_chars must be positive".into(),
            ));
        }
        if self.overlap_chars >= self.max_chunk_chars {
            return Err(SummaryflowError::Config(format!(
                "chunking.overlap_chars ({}) must be smaller than max_chunk_chars ({})",
                self.overlap_chars, self.max_chunk_chars
            )));
        }
        Ok(())
    }
}

/// One piece of a larger document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    /// Position in the chunk sequence.
    pub index: usize,
    /// Start offset in characters.
    pub start: usize,
    /// End offset in characters, exclusive.
    pub end: usize,
    /// The chunk text.
    pub text: String,
}

/// Splits text according to a [`ChunkingConfig`].
#[derive(Debug, Clone, Default)]
pub struct TextChunker {
    config: ChunkingConfig,
}

impl TextChunker {
    /// Creates a chunker.
    #[must_use]
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// Returns true if `text` would be split into more than one chunk.
    #[must_use]
    pub fn needs_chunking(&self, text: &str) -> bool {
        self.config.enabled && text.chars().count() > self.config.max_chunk_chars
    }

    /// Splits `text` into chunks. Empty text yields no chunks.
    #[must_use]
    pub fn split(&self, text: &str) -> Vec<TextChunk> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let max = self.config.max_chunk_chars.max(1);
        let overlap = self.config.overlap_chars.min(max - 1);

        let mut chunks = Vec::new();
        let mut start = 0;

        while start < total {
            let hard_end = (start + max).min(total);
            let end = if hard_end == total {
                total
            } else {
                find_break(&chars, start, hard_end)
            };

            chunks.push(TextChunk {
                index: chunks.len(),
                start,
                end,
                text: chars[start..end].iter().collect(),
            });

            if end >= total {
                break;
            }
            let next = end.saturating_sub(overlap);
            start = if next > start { next } else { end };
        }

        chunks
    }
}

fn find_break(chars: &[char], start: usize, hard_end: usize) -> usize {
    let floor = start + (hard_end - start) / 2;

    let window = || (floor.max(start + 1)..hard_end).rev();

    if let Some(i) = window().find(|&i| chars[i] == '\n' && chars[i - 1] == '\n') {
        return i + 1;
    }
    if let Some(i) = window()
        .find(|&i| matches!(chars[i - 1], '.' | '!' | '?') && chars[i].is_whitespace())
    {
        return i + 1;
    }
    if let Some(i) = window().find(|&i| chars[i].is_whitespace()) {
        return i + 1;
    }
    hard_end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(max: usize, overlap: usize) -> TextChunker {
        TextChunker::new(ChunkingConfig::default().with_sizes(max, overlap))
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunker(100, 10).split("short text");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "short text");
        assert!(!chunker(100, 10).needs_chunking("short text"));
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(chunker(100, 10).split("").is_empty());
    }

    #[test]
    fn test_prefers_paragraph_break() {
        let text = format!("{}\n\n{}", "a".repeat(60), "b".repeat(60));
        let chunks = chunker(100, 0).split(&text);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, format!("{}\n\n", "a".repeat(60)));
        assert_eq!(chunks[1].text, "b".repeat(60));
    }

    #[test]
    fn test_prefers_sentence_break() {
        let text = format!("{}. {}", "a".repeat(70), "b".repeat(70));
        let chunks = chunker(100, 0).split(&text);

        assert_eq!(chunks[0].text, format!("{}. ", "a".repeat(70)));
    }

    #[test]
    fn test_chunks_cover_text_with_overlap() {
        let text: String = (0..500).map(|i| format!("word{i} ")).collect();
        let chunks = chunker(200, 30).split(&text);
        let total = text.chars().count();

        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks.last().unwrap().end, total);
        for pair in chunks.windows(2) {
            assert!(pair[1].start < pair[0].end);
            assert!(pair[1].start > pair[0].start);
        }
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 200));
    }

    #[test]
    fn test_multibyte_safe() {
        let text = "é".repeat(250);
        let chunks = chunker(100, 10).split(&text);
        assert!(chunks.iter().all(|c| c.text.chars().all(|ch| ch == 'é')));
        assert_eq!(chunks.last().unwrap().end, 250);
    }

    #[test]
    fn test_validate_rejects_large_overlap() {
        assert!(ChunkingConfig::default().with_sizes(100, 100).validate().is_err());
        assert!(ChunkingConfig::default().with_sizes(0, 0).validate().is_err());
        assert!(ChunkingConfig::default().validate().is_ok());
    }
}
