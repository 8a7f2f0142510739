//! # caseforge-db
//!
//! PostgreSQL + pgvector persistence for caseforge, plus the text chunker
//! that feeds the vector store.
//!
//! ## Example
//!
//! ```rust,ignore
//! use caseforge_db::Database;
//!
//! let db = Database::connect("postgres://localhost/caseforge", 1536).await?;
//! db.migrate().await?;
//! let job = db.jobs.create_exclusive(document_id, JobType::TestGeneration).await?;
//! ```

pub mod chunking;
pub mod documents;
pub mod jobs;
pub mod pool;
pub mod test_cases;
pub mod vectors;

// Re-export core types
pub use caseforge_core::*;

pub use chunking::{normalize_text, Chunker, ChunkerConfig, SlidingWindowChunker, TextSpan};
pub use documents::PgDocumentRepository;
pub use jobs::PgJobRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use test_cases::PgTestCaseRepository;
pub use vectors::PgVectorStore;

/// Combined database context with all repositories over one pool.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub documents: PgDocumentRepository,
    pub jobs: PgJobRepository,
    pub test_cases: PgTestCaseRepository,
    pub vectors: PgVectorStore,
}

impl Database {
    /// Create a Database from a pool. `dimension` is the embedding dimension
    /// of the `document_chunk.embedding` column.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>, dimension: usize) -> Self {
        Self {
            documents: PgDocumentRepository::new(pool.clone()),
            jobs: PgJobRepository::new(pool.clone()),
            test_cases: PgTestCaseRepository::new(pool.clone()),
            vectors: PgVectorStore::new(pool.clone(), dimension),
            pool,
        }
    }

    /// Connect to the given URL with the default pool configuration.
    pub async fn connect(url: &str, dimension: usize) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool, dimension))
    }

    /// Connect using `DATABASE_URL`.
    pub async fn from_env(dimension: usize) -> Result<Self> {
        let url = std::env::var("DATABASE_URL")
            .map_err(|_| Error::Config("DATABASE_URL is not set".to_string()))?;
        let pool = create_pool_with_config(&url, PoolConfig::from_env()).await?;
        Ok(Self::new(pool, dimension))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
