//! Attachment record store.
//!
//! Ownership is never stored on the attachment itself: every user-scoped
//! query joins through `note.user_id`. Queries that precede a state change
//! lock the attachment row with `FOR UPDATE OF a`, always after the owner's
//! ledger row has been locked.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use notekeep_core::{Attachment, AttachmentState, Error, QuotaLedger, Result, TypeCategory};

const ATTACHMENT_COLUMNS: &str = "a.id, a.note_id, a.blob_key, a.original_filename, a.size_bytes, \
     a.category, a.mime_type, a.content_hash, a.state, a.created_at, a.deleted_at";

/// Fields for a new attachment record.
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub id: Uuid,
    pub note_id: Uuid,
    pub blob_key: String,
    pub original_filename: String,
    pub size_bytes: i64,
    pub category: TypeCategory,
    pub mime_type: Option<String>,
    pub content_hash: String,
}

/// PostgreSQL attachment repository.
#[derive(Clone)]
pub struct PgAttachmentRepository {
    pool: PgPool,
}

impl PgAttachmentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new attachment in state `active`.
    pub async fn insert_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        new: &NewAttachment,
    ) -> Result<Attachment> {
        let row = sqlx::query(
            r#"INSERT INTO attachment AS a
               (id, note_id, blob_key, original_filename, size_bytes, category,
                mime_type, content_hash, state)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'active')
               RETURNING a.id, a.note_id, a.blob_key, a.original_filename, a.size_bytes,
                         a.category, a.mime_type, a.content_hash, a.state,
                         a.created_at, a.deleted_at"#,
        )
        .bind(new.id)
        .bind(new.note_id)
        .bind(&new.blob_key)
        .bind(&new.original_filename)
        .bind(new.size_bytes)
        .bind(new.category.to_string())
        .bind(&new.mime_type)
        .bind(&new.content_hash)
        .fetch_one(&mut **tx)
        .await
        .map_err(Error::Database)?;

        attachment_from_row(&row)
    }

    /// Lock an attachment owned by `user_id` that is currently in `state`.
    pub async fn lock_owned_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        attachment_id: Uuid,
        user_id: Uuid,
        state: AttachmentState,
    ) -> Result<Option<Attachment>> {
        let sql = format!(
            r#"SELECT {ATTACHMENT_COLUMNS}
               FROM attachment a
               JOIN note n ON a.note_id = n.id
               WHERE a.id = $1 AND n.user_id = $2 AND a.state = $3
               FOR UPDATE OF a"#
        );
        sqlx::query(&sql)
            .bind(attachment_id)
            .bind(user_id)
            .bind(state.to_string())
            .fetch_optional(&mut **tx)
            .await
            .map_err(Error::Database)?
            .map(|row| attachment_from_row(&row))
            .transpose()
    }

    /// Lock an attachment by ID regardless of owner or state.
    pub async fn lock_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        attachment_id: Uuid,
    ) -> Result<Option<Attachment>> {
        let sql = format!(
            r#"SELECT {ATTACHMENT_COLUMNS}
               FROM attachment a
               WHERE a.id = $1
               FOR UPDATE OF a"#
        );
        sqlx::query(&sql)
            .bind(attachment_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(Error::Database)?
            .map(|row| attachment_from_row(&row))
            .transpose()
    }

    /// Move an attachment to `state`, setting or clearing `deleted_at`.
    pub async fn set_state_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        attachment_id: Uuid,
        state: AttachmentState,
        deleted_at: Option<DateTime<Utc>>,
    ) -> Result<Attachment> {
        let row = sqlx::query(
            r#"UPDATE attachment AS a
               SET state = $2, deleted_at = $3
               WHERE a.id = $1
               RETURNING a.id, a.note_id, a.blob_key, a.original_filename, a.size_bytes,
                         a.category, a.mime_type, a.content_hash, a.state,
                         a.created_at, a.deleted_at"#,
        )
        .bind(attachment_id)
        .bind(state.to_string())
        .bind(deleted_at)
        .fetch_optional(&mut **tx)
        .await
        .map_err(Error::Database)?
        .ok_or(Error::NotFoundOrForbidden(attachment_id))?;

        attachment_from_row(&row)
    }

    /// Permanently remove an attachment record.
    pub async fn delete_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        attachment_id: Uuid,
    ) -> Result<bool> {
        let result = sqlx::query("DELETE FROM attachment WHERE id = $1")
            .bind(attachment_id)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected() > 0)
    }

    /// Owner of the note an attachment belongs to.
    pub async fn owner_of(&self, attachment_id: Uuid) -> Result<Option<Uuid>> {
        let owner = sqlx::query_scalar::<_, Uuid>(
            r#"SELECT n.user_id FROM attachment a
               JOIN note n ON a.note_id = n.id
               WHERE a.id = $1"#,
        )
        .bind(attachment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(owner)
    }

    /// Fetch an attachment owned by `user_id` in `state`.
    pub async fn get_owned(
        &self,
        attachment_id: Uuid,
        user_id: Uuid,
        state: AttachmentState,
    ) -> Result<Option<Attachment>> {
        let sql = format!(
            r#"SELECT {ATTACHMENT_COLUMNS}
               FROM attachment a
               JOIN note n ON a.note_id = n.id
               WHERE a.id = $1 AND n.user_id = $2 AND a.state = $3"#
        );
        sqlx::query(&sql)
            .bind(attachment_id)
            .bind(user_id)
            .bind(state.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?
            .map(|row| attachment_from_row(&row))
            .transpose()
    }

    /// Fetch an attachment by ID regardless of owner or state.
    pub async fn get(&self, attachment_id: Uuid) -> Result<Option<Attachment>> {
        let sql = format!("SELECT {ATTACHMENT_COLUMNS} FROM attachment a WHERE a.id = $1");
        sqlx::query(&sql)
            .bind(attachment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?
            .map(|row| attachment_from_row(&row))
            .transpose()
    }

    /// Attachments of one note in `state`, oldest first.
    pub async fn list_by_note(
        &self,
        note_id: Uuid,
        user_id: Uuid,
        state: AttachmentState,
    ) -> Result<Vec<Attachment>> {
        let sql = format!(
            r#"SELECT {ATTACHMENT_COLUMNS}
               FROM attachment a
               JOIN note n ON a.note_id = n.id
               WHERE a.note_id = $1 AND n.user_id = $2 AND a.state = $3
               ORDER BY a.created_at, a.id"#
        );
        let rows = sqlx::query(&sql)
            .bind(note_id)
            .bind(user_id)
            .bind(state.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        rows.iter().map(attachment_from_row).collect()
    }

    /// Soft-deleted attachments across all of a user's notes, most recently
    /// deleted first.
    pub async fn list_deleted_by_user(&self, user_id: Uuid) -> Result<Vec<Attachment>> {
        let sql = format!(
            r#"SELECT {ATTACHMENT_COLUMNS}
               FROM attachment a
               JOIN note n ON a.note_id = n.id
               WHERE n.user_id = $1 AND a.state = 'soft_deleted'
               ORDER BY a.deleted_at DESC, a.id"#
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        rows.iter().map(attachment_from_row).collect()
    }

    /// IDs of attachments soft-deleted strictly before `cutoff`.
    pub async fn list_deleted_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"SELECT id FROM attachment
               WHERE state = 'soft_deleted' AND deleted_at < $1
               ORDER BY deleted_at, id"#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(ids)
    }

    /// Ground-truth totals over a user's attachments in `states`.
    pub async fn totals_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        states: &[AttachmentState],
    ) -> Result<QuotaLedger> {
        let states: Vec<String> = states.iter().map(|s| s.to_string()).collect();
        let row = sqlx::query(
            r#"SELECT COALESCE(SUM(a.size_bytes), 0)::BIGINT AS used_bytes,
                      COUNT(*)::INT AS file_count,
                      (COUNT(*) FILTER (WHERE a.category = 'image'))::INT AS image_count,
                      (COUNT(*) FILTER (WHERE a.category = 'document'))::INT AS document_count
               FROM attachment a
               JOIN note n ON a.note_id = n.id
               WHERE n.user_id = $1 AND a.state = ANY($2)"#,
        )
        .bind(user_id)
        .bind(&states)
        .fetch_one(&mut **tx)
        .await
        .map_err(Error::Database)?;

        Ok(QuotaLedger {
            used_bytes: row.get("used_bytes"),
            file_count: row.get("file_count"),
            image_count: row.get("image_count"),
            document_count: row.get("document_count"),
            ..QuotaLedger::empty(user_id)
        })
    }
}

/// Convert a database row to an Attachment.
fn attachment_from_row(row: &sqlx::postgres::PgRow) -> Result<Attachment> {
    let category: String = row.get("category");
    let state: String = row.get("state");
    Ok(Attachment {
        id: row.get("id"),
        note_id: row.get("note_id"),
        blob_key: row.get("blob_key"),
        original_filename: row.get("original_filename"),
        size_bytes: row.get("size_bytes"),
        category: category.parse().map_err(Error::Internal)?,
        mime_type: row.get("mime_type"),
        content_hash: row.get("content_hash"),
        state: state.parse().map_err(Error::Internal)?,
        created_at: row.get("created_at"),
        deleted_at: row.get("deleted_at"),
    })
}
