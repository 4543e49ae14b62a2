//! Note ownership lookups.
//!
//! Notes are owned by the wider note service. This repository only creates
//! bare rows (for provisioning and tests) and answers "who owns this note".

use sqlx::PgPool;
use uuid::Uuid;

use notekeep_core::{Error, Result};

/// PostgreSQL note ownership repository.
#[derive(Clone)]
pub struct PgNoteRepository {
    pool: PgPool,
}

impl PgNoteRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a note owned by `user_id`.
    pub async fn insert(&self, user_id: Uuid, title: &str) -> Result<Uuid> {
        let id = Uuid::now_v7();
        sqlx::query("INSERT INTO note (id, user_id, title) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(user_id)
            .bind(title)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(id)
    }

    /// Owner of a note, or `None` if it does not exist.
    pub async fn owner_of(&self, note_id: Uuid) -> Result<Option<Uuid>> {
        let owner = sqlx::query_scalar::<_, Uuid>("SELECT user_id FROM note WHERE id = $1")
            .bind(note_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(owner)
    }

    /// Resolve a note for `user_id`, failing with `NotFound` when the note is
    /// absent or owned by someone else.
    pub async fn require_owned(&self, note_id: Uuid, user_id: Uuid) -> Result<()> {
        match self.owner_of(note_id).await? {
            Some(owner) if owner == user_id => Ok(()),
            _ => Err(Error::NotFound(format!("Note {} not found", note_id))),
        }
    }

    /// Every user that owns at least one note.
    pub async fn list_owners(&self) -> Result<Vec<Uuid>> {
        let owners =
            sqlx::query_scalar::<_, Uuid>("SELECT DISTINCT user_id FROM note ORDER BY user_id")
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(owners)
    }
}
