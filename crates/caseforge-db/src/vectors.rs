//! pgvector-backed chunk store.

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use caseforge_core::{
    Chunk, Error, Result, RetrievalScope, ScoredChunk, VectorStore,
};

/// PostgreSQL implementation of VectorStore over `document_chunk`.
#[derive(Clone)]
pub struct PgVectorStore {
    pool: Pool<Postgres>,
    dimension: usize,
}

impl PgVectorStore {
    /// `dimension` must match the `vector(N)` column of the schema.
    pub fn new(pool: Pool<Postgres>, dimension: usize) -> Self {
        Self { pool, dimension }
    }

    fn parse_chunk(row: &sqlx::postgres::PgRow) -> Chunk {
        Chunk {
            id: row.get("id"),
            document_id: row.get("document_id"),
            ordinal: row.get("ordinal"),
            text: row.get("text"),
            start_char: row.get("start_char"),
            end_char: row.get("end_char"),
            embedding: row.get::<Option<Vector>, _>("embedding"),
        }
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
impl VectorStore for PgVectorStore {
    async fn insert(&self, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut inserted = 0usize;

        for chunk in chunks {
            let embedding = chunk.embedding.as_ref().ok_or_else(|| {
                Error::InvalidInput(format!("chunk {} has no embedding", chunk.id))
            })?;
            self.check_dimension(embedding)?;

            let result = sqlx::query(
                "INSERT INTO document_chunk (id, document_id, ordinal, text, start_char, end_char, embedding)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT DO NOTHING",
            )
            .bind(chunk.id)
            .bind(chunk.document_id)
            .bind(chunk.ordinal)
            .bind(&chunk.text)
            .bind(chunk.start_char)
            .bind(chunk.end_char)
            .bind(embedding)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "vector_store",
            op = "insert",
            chunk_count = chunks.len(),
            inserted,
            "Stored chunks"
        );
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

        let rows = sqlx::query(
            "SELECT id, document_id, ordinal, text, start_char, end_char, embedding,
                    (embedding <=> $1::vector)::float8 AS distance
             FROM document_chunk
             WHERE ($2::uuid IS NULL OR document_id = $2)
             ORDER BY distance, ordinal, document_id, id
             LIMIT $3",
        )
        .bind(query)
        .bind(scope.document_id())
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .iter()
            .map(|row| ScoredChunk {
                chunk: Self::parse_chunk(row),
                distance: row.get::<f64, _>("distance") as f32,
            })
            .collect())
    }

    async fn chunks_for_document(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT id, document_id, ordinal, text, start_char, end_char, embedding
             FROM document_chunk
             WHERE document_id = $1
             ORDER BY ordinal",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_chunk).collect())
    }

    async fn retain_for_document(&self, document_id: Uuid, keep: &[Uuid]) -> Result<usize> {
        let result = sqlx::query(
            "DELETE FROM document_chunk WHERE document_id = $1 AND NOT (id = ANY($2))",
        )
        .bind(document_id)
        .bind(keep)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let removed = result.rows_affected() as usize;
        if removed > 0 {
            debug!(
                subsystem = "db",
                component = "vector_store",
                op = "retain",
                %document_id,
                removed,
                "Removed stale chunks"
            );
        }
        Ok(removed)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
