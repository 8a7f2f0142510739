//! Similarity retrieval over a [`VectorStore`].
//!
//! The retriever is read-only. It re-applies the scope filter and the
//! deterministic ordering on top of whatever the store returns, so every
//! store implementation yields identical results for identical contents.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use caseforge_core::{Error, Result, RetrievalScope, ScoredChunk, Vector, VectorStore};

use crate::distance::retrieval_order;

/// Top-k nearest chunk lookup.
#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn VectorStore>,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// At most `k` chunks inside `scope` with the smallest cosine distance to
    /// `query`, ties broken by ascending ordinal.
    pub async fn retrieve(
        &self,
        query: &Vector,
        k: usize,
        scope: RetrievalScope,
    ) -> Result<Vec<ScoredChunk>> {
        let dimension = query.as_slice().len();
        if dimension != self.store.dimension() {
            return Err(Error::InvalidInput(format!(
                "query dimension {} does not match store dimension {}",
                dimension,
                self.store.dimension()
            )));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let mut hits: Vec<ScoredChunk> = self
            .store
            .nearest(query, k, scope)
            .await?
            .into_iter()
            .filter(|hit| scope.contains(hit.chunk.document_id))
            .collect();
        hits.sort_by(retrieval_order);
        hits.truncate(k);

        debug!(
            subsystem = "search",
            component = "retriever",
            op = "retrieve",
            top_k = k,
            result_count = hits.len(),
            scoped = scope.document_id().is_some(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Retrieved chunks"
        );
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryVectorStore;
    use async_trait::async_trait;
    use caseforge_core::Chunk;
    use uuid::Uuid;

    fn chunk(doc: Uuid, ordinal: i32, v: Vec<f32>) -> Chunk {
        Chunk::new(doc, ordinal, format!("text {}", ordinal), 0, 1).with_embedding(Vector::from(v))
    }

    /// A store that ignores scope and order, to prove the retriever enforces both.
    struct CarelessStore {
        hits: Vec<ScoredChunk>,
    }

    #[async_trait]
    impl VectorStore for CarelessStore {
        async fn insert(&self, _chunks: &[Chunk]) -> Result<usize> {
            Ok(0)
        }
        async fn nearest(
            &self,
            _query: &Vector,
            _k: usize,
            _scope: RetrievalScope,
        ) -> Result<Vec<ScoredChunk>> {
            Ok(self.hits.clone())
        }
        async fn chunks_for_document(&self, _document_id: Uuid) -> Result<Vec<Chunk>> {
            Ok(Vec::new())
        }
        async fn retain_for_document(&self, _document_id: Uuid, _keep: &[Uuid]) -> Result<usize> {
            Ok(0)
        }
        fn dimension(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn test_k_zero_returns_empty() {
        let retriever = Retriever::new(Arc::new(InMemoryVectorStore::new(2)));
        let hits = retriever
            .retrieve(&Vector::from(vec![1.0, 0.0]), 0, RetrievalScope::All)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let retriever = Retriever::new(Arc::new(InMemoryVectorStore::new(2)));
        let err = retriever
            .retrieve(&Vector::from(vec![1.0, 0.0, 0.0]), 3, RetrievalScope::All)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_enforces_scope_order_and_limit_over_careless_store() {
        let doc = Uuid::new_v4();
        let other = Uuid::new_v4();
        let hits = vec![
            ScoredChunk { chunk: chunk(doc, 4, vec![1.0, 0.0]), distance: 0.5 },
            ScoredChunk { chunk: chunk(other, 0, vec![1.0, 0.0]), distance: 0.0 },
            ScoredChunk { chunk: chunk(doc, 2, vec![1.0, 0.0]), distance: 0.5 },
            ScoredChunk { chunk: chunk(doc, 9, vec![1.0, 0.0]), distance: 0.1 },
        ];
        let retriever = Retriever::new(Arc::new(CarelessStore { hits }));
        let result = retriever
            .retrieve(&Vector::from(vec![1.0, 0.0]), 2, RetrievalScope::Document(doc))
            .await
            .unwrap();
        let ordinals: Vec<_> = result.iter().map(|h| h.chunk.ordinal).collect();
        assert_eq!(ordinals, vec![9, 2]);
        assert!(result.iter().all(|h| h.chunk.document_id == doc));
    }

    #[tokio::test]
    async fn test_equal_distance_ties_break_by_ordinal() {
        let store = Arc::new(InMemoryVectorStore::new(2));
        let doc = Uuid::new_v4();
        store
            .insert(&[
                chunk(doc, 3, vec![0.0, 1.0]),
                chunk(doc, 1, vec![0.0, 2.0]),
                chunk(doc, 2, vec![0.0, 3.0]),
            ])
            .await
            .unwrap();
        let retriever = Retriever::new(store);
        let result = retriever
            .retrieve(&Vector::from(vec![0.0, 1.0]), 3, RetrievalScope::Document(doc))
            .await
            .unwrap();
        let ordinals: Vec<_> = result.iter().map(|h| h.chunk.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
    }
}
