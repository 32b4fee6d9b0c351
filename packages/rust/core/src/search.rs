//! Semantic search over stored lesson texts.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;

use coursebuilder_services::{Embedder, SearchHit, SearchOptions, SemanticSearch};
use coursebuilder_shared::Result;
use coursebuilder_storage::Storage;

/// Cosine-similarity search against embeddings in `content_segments`.
///
/// Lessons stored without an embedding are invisible to this search.
pub struct StoredEmbeddingSearch {
    storage: Arc<Storage>,
    embedder: Arc<dyn Embedder>,
}

impl StoredEmbeddingSearch {
    pub fn new(storage: Arc<Storage>, embedder: Arc<dyn Embedder>) -> Self {
        Self { storage, embedder }
    }
}

#[async_trait]
impl SemanticSearch for StoredEmbeddingSearch {
    async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchHit>> {
        let query_vec = self.embedder.embed(query).await?;
        let stored = self
            .storage
            .list_content_segments(options.document_id.as_deref())
            .await?;

        let mut hits: Vec<SearchHit> = stored
            .into_iter()
            .filter_map(|segment| {
                let similarity = cosine_similarity(&query_vec, segment.embedding.as_deref()?);
                if similarity < options.threshold {
                    return None;
                }
                let source = segment
                    .metadata
                    .get("lesson_title")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| segment.lesson_id.clone());
                Some(SearchHit {
                    content: segment.content,
                    similarity,
                    source,
                    metadata: segment.metadata,
                })
            })
            .collect();

        sort_by_similarity(&mut hits);
        hits.truncate(options.limit);
        Ok(hits)
    }
}

/// Most similar first.
pub fn sort_by_similarity(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
    });
}

/// Cosine similarity clamped to `[0, 1]`. Mismatched or zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
}
