//! Document repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use caseforge_core::{Document, DocumentRepository, DocumentStatus, Error, Result};

/// PostgreSQL implementation of DocumentRepository.
#[derive(Clone)]
pub struct PgDocumentRepository {
    pool: Pool<Postgres>,
}

impl PgDocumentRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: sqlx::postgres::PgRow) -> Document {
        let status: String = row.get("status");
        Document {
            id: row.get("id"),
            name: row.get("name"),
            content: row.get("content"),
            byte_size: row.get("byte_size"),
            status: status.parse().unwrap_or_default(),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    async fn insert(&self, document: &Document) -> Result<()> {
        sqlx::query(
            "INSERT INTO document (id, name, content, byte_size, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5::document_status, $6, $7)
             ON CONFLICT (id) DO UPDATE
             SET name = EXCLUDED.name, content = EXCLUDED.content,
                 byte_size = EXCLUDED.byte_size, status = EXCLUDED.status,
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(document.id)
        .bind(&document.name)
        .bind(&document.content)
        .bind(document.byte_size)
        .bind(document.status.as_str())
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, name, content, byte_size, status::text AS status, created_at, updated_at
             FROM document WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.map(Self::parse_row))
    }

    async fn update_status(&self, id: Uuid, status: DocumentStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE document SET status = $1::document_status, updated_at = $2 WHERE id = $3",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::DocumentNotFound(id));
        }
        Ok(())
    }
}
