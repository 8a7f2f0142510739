//! Test case repository implementation.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use caseforge_core::{Error, Result, TestCase, TestCaseRepository};

/// PostgreSQL implementation of TestCaseRepository.
#[derive(Clone)]
pub struct PgTestCaseRepository {
    pool: Pool<Postgres>,
}

impl PgTestCaseRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: sqlx::postgres::PgRow) -> Result<TestCase> {
        let parse = |column: &str| -> String { row.get(column) };
        let steps: Json<Vec<String>> = row.get("steps");
        Ok(TestCase {
            id: row.get("id"),
            document_id: row.get("document_id"),
            title: row.get("title"),
            description: row.get("description"),
            steps: steps.0,
            expected_result: row.get("expected_result"),
            tags: row.get("tags"),
            category: parse("category").parse().map_err(Error::Internal)?,
            priority: parse("priority").parse().map_err(Error::Internal)?,
            severity: parse("severity").parse().map_err(Error::Internal)?,
            persona: row.get("persona"),
            source: parse("source").parse().map_err(Error::Internal)?,
            confidence_score: row.get("confidence_score"),
            context_used: row.get("context_used"),
            execution_status: parse("execution_status").parse().map_err(Error::Internal)?,
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl TestCaseRepository for PgTestCaseRepository {
    async fn replace_for_document(&self, document_id: Uuid, cases: &[TestCase]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query("DELETE FROM test_case WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        for case in cases {
            sqlx::query(
                "INSERT INTO test_case (id, document_id, title, description, steps,
                     expected_result, tags, category, priority, severity, persona, source,
                     confidence_score, context_used, execution_status, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
            )
            .bind(case.id)
            .bind(document_id)
            .bind(&case.title)
            .bind(&case.description)
            .bind(Json(&case.steps))
            .bind(&case.expected_result)
            .bind(&case.tags)
            .bind(case.category.as_str())
            .bind(case.priority.as_str())
            .bind(case.severity.as_str())
            .bind(&case.persona)
            .bind(case.source.as_str())
            .bind(case.confidence_score)
            .bind(&case.context_used)
            .bind(case.execution_status.as_str())
            .bind(case.created_at)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<TestCase>> {
        let rows = sqlx::query(
            "SELECT id, document_id, title, description, steps, expected_result, tags,
                    category, priority, severity, persona, source, confidence_score,
                    context_used, execution_status, created_at
             FROM test_case
             WHERE document_id = $1
             ORDER BY CASE category
                          WHEN 'functional' THEN 0
                          WHEN 'edge_case' THEN 1
                          WHEN 'compliance' THEN 2
                          ELSE 3
                      END,
                      created_at, id",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_row).collect()
    }
}
