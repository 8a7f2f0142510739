//! Brute-force in-memory vector store.
//!
//! Used when no database is configured and in tests. A chunk id that is
//! already stored is never overwritten.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;
use uuid::Uuid;

use caseforge_core::{Chunk, Error, Result, RetrievalScope, ScoredChunk, Vector, VectorStore};

use crate::distance::{cosine_distance, retrieval_order};

#[derive(Default)]
struct Inner {
    chunks: Vec<Chunk>,
    ids: HashSet<Uuid>,
}

/// In-memory implementation of VectorStore.
pub struct InMemoryVectorStore {
    dimension: usize,
    inner: RwLock<Inner>,
}

impl InMemoryVectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Number of stored chunks.
    pub async fn len(&self) -> usize {
        self.inner.read().await.chunks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_dimension(&self, vector: &Vector) -> Result<()> {
        let len = vector.as_slice().len();
        if len != self.dimension {
            return Err(Error::InvalidInput(format!(
                "vector dimension {} does not match store dimension {}",
                len, self.dimension
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn insert(&self, chunks: &[Chunk]) -> Result<usize> {
        for chunk in chunks {
            let embedding = chunk.embedding.as_ref().ok_or_else(|| {
                Error::InvalidInput(format!("chunk {} has no embedding", chunk.id))
            })?;
            self.check_dimension(embedding)?;
        }

        let mut inner = self.inner.write().await;
        let mut inserted = 0;
        for chunk in chunks {
            if inner.ids.insert(chunk.id) {
                inner.chunks.push(chunk.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn nearest(
        &self,
        query: &Vector,
        k: usize,
        scope: RetrievalScope,
    ) -> Result<Vec<ScoredChunk>> {
        self.check_dimension(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<ScoredChunk> = {
            let inner = self.inner.read().await;
            inner
                .chunks
                .iter()
                .filter(|c| scope.contains(c.document_id))
                .filter_map(|c| {
                    let embedding = c.embedding.as_ref()?;
                    Some(ScoredChunk {
                        distance: cosine_distance(query.as_slice(), embedding.as_slice()),
                        chunk: c.clone(),
                    })
                })
                .collect()
        };

        hits.sort_by(retrieval_order);
        hits.truncate(k);
        trace!(
            subsystem = "search",
            component = "memory_store",
            op = "nearest",
            result_count = hits.len(),
            "Nearest chunks computed"
        );
        Ok(hits)
    }

    async fn chunks_for_document(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        let mut chunks: Vec<Chunk> = self
            .inner
            .read()
            .await
            .chunks
            .iter()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.ordinal);
        Ok(chunks)
    }

    async fn retain_for_document(&self, document_id: Uuid, keep: &[Uuid]) -> Result<usize> {
        let keep: HashSet<Uuid> = keep.iter().copied().collect();
        let mut inner = self.inner.write().await;
        let before = inner.chunks.len();
        let Inner { chunks, ids } = &mut *inner;
        chunks.retain(|c| {
            let stale = c.document_id == document_id && !keep.contains(&c.id);
            if stale {
                ids.remove(&c.id);
            }
            !stale
        });
        Ok(before - inner.chunks.len())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(doc: Uuid, ordinal: i32, v: Vec<f32>) -> Chunk {
        Chunk::new(doc, ordinal, format!("text {}", ordinal), 0, 1).with_embedding(Vector::from(v))
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let store = InMemoryVectorStore::new(2);
        let doc = Uuid::new_v4();
        let c = chunk(doc, 0, vec![1.0, 0.0]);
        assert_eq!(store.insert(&[c.clone()]).await.unwrap(), 1);
        assert_eq!(store.insert(&[c]).await.unwrap(), 0);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_reinsert_does_not_mutate() {
        let store = InMemoryVectorStore::new(2);
        let doc = Uuid::new_v4();
        let original = chunk(doc, 0, vec![1.0, 0.0]);
        let mut altered = original.clone();
        altered.embedding = Some(Vector::from(vec![0.0, 1.0]));
        store.insert(&[original.clone()]).await.unwrap();
        store.insert(&[altered]).await.unwrap();
        let stored = store.chunks_for_document(doc).await.unwrap();
        assert_eq!(stored[0].embedding, original.embedding);
    }

    #[tokio::test]
    async fn test_rejects_unembedded_and_wrong_dimension() {
        let store = InMemoryVectorStore::new(2);
        let doc = Uuid::new_v4();
        let bare = Chunk::new(doc, 0, "x", 0, 1);
        assert!(matches!(store.insert(&[bare]).await, Err(Error::InvalidInput(_))));
        let wide = chunk(doc, 0, vec![1.0, 0.0, 0.0]);
        assert!(store.insert(&[wide]).await.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_nearest_orders_by_distance() {
        let store = InMemoryVectorStore::new(2);
        let doc = Uuid::new_v4();
        store
            .insert(&[
                chunk(doc, 0, vec![0.0, 1.0]),
                chunk(doc, 1, vec![1.0, 0.0]),
                chunk(doc, 2, vec![0.7, 0.7]),
            ])
            .await
            .unwrap();
        let hits = store
            .nearest(&Vector::from(vec![1.0, 0.0]), 3, RetrievalScope::All)
            .await
            .unwrap();
        let ordinals: Vec<_> = hits.iter().map(|h| h.chunk.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 0]);
    }

    #[tokio::test]
    async fn test_retain_drops_only_stale_chunks_of_the_document() {
        let store = InMemoryVectorStore::new(2);
        let doc = Uuid::new_v4();
        let other = Uuid::new_v4();
        let kept = chunk(doc, 0, vec![1.0, 0.0]);
        let stale = chunk(doc, 1, vec![0.0, 1.0]);
        let foreign = chunk(other, 0, vec![1.0, 0.0]);
        store
            .insert(&[kept.clone(), stale.clone(), foreign.clone()])
            .await
            .unwrap();

        assert_eq!(store.retain_for_document(doc, &[kept.id]).await.unwrap(), 1);
        let ids: Vec<Uuid> = store
            .chunks_for_document(doc)
            .await
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![kept.id]);
        assert_eq!(store.chunks_for_document(other).await.unwrap().len(), 1);

        // a removed id can be stored again
        assert_eq!(store.insert(&[stale]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_chunks_for_document_sorted_by_ordinal() {
        let store = InMemoryVectorStore::new(2);
        let doc = Uuid::new_v4();
        store
            .insert(&[chunk(doc, 2, vec![1.0, 0.0]), chunk(doc, 0, vec![1.0, 0.0])])
            .await
            .unwrap();
        let ordinals: Vec<_> = store
            .chunks_for_document(doc)
            .await
            .unwrap()
            .iter()
            .map(|c| c.ordinal)
            .collect();
        assert_eq!(ordinals, vec![0, 2]);
    }
}
