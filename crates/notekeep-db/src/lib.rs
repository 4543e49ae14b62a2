//! # notekeep-db
//!
//! PostgreSQL attachment layer for notekeep.
//!
//! This crate provides:
//! - Connection pool management
//! - Repositories for notes (ownership only), attachments and quota ledgers
//! - The attachment lifecycle engine (upload, soft-delete, restore, purge)
//! - Quota reconciliation
//! - A filesystem blob store
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use notekeep_db::{Database, FilesystemBackend, RequestContext, StorageConfig, UploadRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/notekeep").await?;
//!     let config = StorageConfig::from_env();
//!     let backend = Arc::new(FilesystemBackend::new(&config.upload_path));
//!     let lifecycle = db.lifecycle(backend, config);
//!
//!     let ctx = RequestContext::new(user_id);
//!     let attachment = lifecycle
//!         .upload(&ctx, note_id, UploadRequest::new("photo.png", bytes))
//!         .await?;
//!     println!("Stored attachment {}", attachment.id);
//!     Ok(())
//! }
//! ```

pub mod attachments;
pub mod blob_store;
pub mod lifecycle;
pub mod notes;
pub mod pool;
pub mod quota;
pub mod reconcile;

// Compiled outside cfg(test) so integration tests (in tests/) can use it
#[cfg(feature = "migrations")]
pub mod test_fixtures;

// Re-export core types
pub use notekeep_core::*;

pub use attachments::{NewAttachment, PgAttachmentRepository};
pub use blob_store::{compute_content_hash, generate_blob_key, FilesystemBackend};
pub use lifecycle::AttachmentLifecycle;
pub use notes::PgNoteRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use quota::PgQuotaLedgerRepository;
pub use reconcile::QuotaReconciler;

use std::sync::Arc;

/// Combined database handle with all repositories.
#[derive(Clone)]
pub struct Database {
    /// Connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Note ownership lookups.
    pub notes: PgNoteRepository,
    pub attachments: PgAttachmentRepository,
    /// Per-user storage ledger.
    pub quota: PgQuotaLedgerRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            notes: PgNoteRepository::new(pool.clone()),
            attachments: PgAttachmentRepository::new(pool.clone()),
            quota: PgQuotaLedgerRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
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

    /// Build the lifecycle engine on this pool.
    pub fn lifecycle(
        &self,
        backend: Arc<dyn StorageBackend>,
        config: StorageConfig,
    ) -> AttachmentLifecycle {
        AttachmentLifecycle::new(self.pool.clone(), backend, config)
    }

    /// Build a standalone reconciler for `policy`.
    pub fn reconciler(&self, policy: QuotaPolicy) -> QuotaReconciler {
        QuotaReconciler::new(
            self.pool.clone(),
            self.notes.clone(),
            self.attachments.clone(),
            self.quota.clone(),
            policy,
        )
    }
}
