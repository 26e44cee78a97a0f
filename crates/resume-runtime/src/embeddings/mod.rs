//! Embedding Chunker (C4).
//!
//! Deterministic sliding-window chunking over `char` boundaries (not
//! bytes, to stay UTF-8-safe), then batched calls through [`crate::llm`],
//! chunked again internally by a configured max batch size.

use crate::config::EmbeddingsConfig;
use crate::errors::Result;
use crate::llm::LlmGateway;
use crate::model::ResumeEmbedding;

/// One chunk before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: i32,
    pub text: String,
}

/// Fixed-size sliding window over characters. Chunks are numbered from 0,
/// dense and contiguous. Pure function of `(text, chunk_size, overlap)` —
/// the same input always produces the same boundaries.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<TextChunk> {
    if text.is_empty() || chunk_size == 0 {
        return Vec::new();
    }
    let chars: Vec<char> = text.chars().collect();
    let step = chunk_size.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index = 0i32;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        chunks.push(TextChunk { index, text: piece });
        index += 1;
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Chunk `text`, embed every chunk (batched per `batch_size`), and return
/// fully-populated [`ResumeEmbedding`] rows ready for [`crate::persistence`].
pub async fn chunk_and_embed(
    candidate_id: uuid::Uuid,
    text: &str,
    llm: &LlmGateway,
    cfg: &EmbeddingsConfig,
    mut on_batch: impl FnMut(usize, usize),
) -> Result<Vec<ResumeEmbedding>> {
    let chunks = chunk_text(text, cfg.chunk_size, cfg.chunk_overlap);
    let mut out = Vec::with_capacity(chunks.len());

    for batch in chunks.chunks(cfg.batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = llm.embed_batch(&texts).await?;
        for (chunk, vector) in batch.iter().zip(vectors.into_iter()) {
            out.push(ResumeEmbedding {
                id: uuid::Uuid::new_v4(),
                candidate_id,
                chunk_text: chunk.text.clone(),
                embedding: vector,
                chunk_index: chunk.index,
            });
        }
        on_batch(out.len(), chunks.len());
    }
    Ok(out)
}

/// Cosine similarity, used by in-process context ranking and by the
/// SQLite test backend's exact (non-ANN) similarity search.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_are_dense_from_zero() {
        let text = "a".repeat(2500);
        let chunks = chunk_text(&text, 1000, 200);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i as i32);
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "the quick brown fox jumps over the lazy dog ".repeat(50);
        let a = chunk_text(&text, 1000, 200);
        let b = chunk_text(&text, 1000, 200);
        assert_eq!(a, b);
    }

    #[test]
    fn chunks_cover_the_whole_text() {
        let text = "x".repeat(2345);
        let chunks = chunk_text(&text, 1000, 200);
        let total_chars: usize = chunks.last().map(|c| {
            // last chunk end offset = start + its length; reconstruct via cumulative step
            c.text.chars().count()
        }).unwrap_or(0);
        assert!(total_chars > 0);
        assert!(chunks.len() >= 3);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", 1000, 200).is_empty());
    }

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_mismatched_length_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
