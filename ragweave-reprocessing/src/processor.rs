//! Document processing capability seam
//!
//! File parsing, OCR and chunking heuristics live behind this trait; the
//! pipeline only sees `(chunks, metadata)`. A plain-text splitter ships
//! as the default implementation.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One parsed chunk of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedChunk {
    /// Chunk text
    pub content: String,
    /// Position within the document
    pub chunk_index: u32,
    /// Character offset where the chunk starts
    pub start_char: usize,
    /// Character offset where the chunk ends (exclusive)
    pub end_char: usize,
    /// Parser-specific metadata
    pub metadata: serde_json::Value,
}

/// Document parsing capability.
#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    /// Parse raw bytes into chunks plus document-level metadata.
    ///
    /// # Errors
    ///
    /// Returns an error for unreadable or unsupported content; the
    /// pipeline isolates the failure to the one document.
    async fn process(
        &self,
        bytes: &[u8],
        filename: &str,
        document_id: Uuid,
    ) -> Result<(Vec<ParsedChunk>, serde_json::Value)>;
}

/// Sliding-window plain-text splitter.
#[derive(Debug, Clone)]
pub struct PlainTextProcessor {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for PlainTextProcessor {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl PlainTextProcessor {
    /// Create a splitter with explicit window parameters.
    ///
    /// # Panics
    ///
    /// Panics when `chunk_overlap >= chunk_size`.
    #[must_use]
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        assert!(chunk_overlap < chunk_size, "overlap must be under the chunk size");
        Self {
            chunk_size,
            chunk_overlap,
        }
    }
}

#[async_trait]
impl DocumentProcessor for PlainTextProcessor {
    async fn process(
        &self,
        bytes: &[u8],
        filename: &str,
        _document_id: Uuid,
    ) -> Result<(Vec<ParsedChunk>, serde_json::Value)> {
        let Ok(text) = std::str::from_utf8(bytes) else {
            bail!("{filename} is not valid UTF-8 text");
        };
        let text = text.trim();
        if text.is_empty() {
            bail!("{filename} contains no text");
        }

        let chars: Vec<char> = text.chars().collect();
        let stride = self.chunk_size - self.chunk_overlap;
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            let content: String = chars[start..end].iter().collect();
            chunks.push(ParsedChunk {
                content,
                chunk_index: chunks.len() as u32,
                start_char: start,
                end_char: end,
                metadata: serde_json::json!({ "splitter": "plain_text" }),
            });
            if end == chars.len() {
                break;
            }
            start += stride;
        }

        let metadata = serde_json::json!({
            "filename": filename,
            "char_count": chars.len(),
            "chunk_count": chunks.len(),
        });
        Ok((chunks, metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_short_text_is_one_chunk() {
        let processor = PlainTextProcessor::default();
        let (chunks, metadata) = processor
            .process(b"hello world", "a.txt", Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "hello world");
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(metadata["chunk_count"], 1);
    }

    #[tokio::test]
    async fn test_long_text_overlapping_windows() {
        let processor = PlainTextProcessor::new(10, 4);
        let text = "abcdefghijklmnopqrstuvwxyz";
        let (chunks, _) = processor
            .process(text.as_bytes(), "alpha.txt", Uuid::new_v4())
            .await
            .unwrap();

        assert!(chunks.len() > 1);
        // Indices are contiguous from zero
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as u32);
        }
        // Consecutive windows overlap by the configured amount
        assert_eq!(chunks[0].end_char - chunks[1].start_char, 4);
    }

    #[tokio::test]
    async fn test_empty_and_binary_rejected() {
        let processor = PlainTextProcessor::default();
        assert!(processor.process(b"   ", "e.txt", Uuid::new_v4()).await.is_err());
        assert!(processor
            .process(&[0xff, 0xfe, 0x00], "b.bin", Uuid::new_v4())
            .await
            .is_err());
    }
}
