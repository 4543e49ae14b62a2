//! Attachment lifecycle engine.
//!
//! Drives attachments through `active -> soft_deleted -> purged` while keeping
//! each user's quota ledger consistent with the attachments it counts.
//!
//! Every transaction that changes a user's attachments locks that user's
//! ledger row first and the attachment row second. Upload admission is
//! checked twice: unlocked before the blob write, and again under the ledger
//! lock right before the insert.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use notekeep_core::{
    file_extension, resolve_mime_type, sanitize_filename, Attachment, AttachmentState, Error,
    LifecycleEvent, PurgeReport, QuotaLedger, RequestContext, Result, StorageBackend,
    StorageConfig, UploadRequest,
};

use crate::attachments::{NewAttachment, PgAttachmentRepository};
use crate::blob_store::{compute_content_hash, generate_blob_key};
use crate::notes::PgNoteRepository;
use crate::quota::PgQuotaLedgerRepository;
use crate::reconcile::QuotaReconciler;

/// Attachment lifecycle service.
///
/// Cheap to clone; clones share the pool, the blob backend and the config.
#[derive(Clone)]
pub struct AttachmentLifecycle {
    pool: PgPool,
    backend: Arc<dyn StorageBackend>,
    config: Arc<StorageConfig>,
    notes: PgNoteRepository,
    attachments: PgAttachmentRepository,
    quota: PgQuotaLedgerRepository,
    reconciler: QuotaReconciler,
}

impl AttachmentLifecycle {
    pub fn new(pool: PgPool, backend: Arc<dyn StorageBackend>, config: StorageConfig) -> Self {
        let notes = PgNoteRepository::new(pool.clone());
        let attachments = PgAttachmentRepository::new(pool.clone());
        let quota = PgQuotaLedgerRepository::new(pool.clone());
        let reconciler = QuotaReconciler::new(
            pool.clone(),
            notes.clone(),
            attachments.clone(),
            quota.clone(),
            config.quota_policy,
        );
        Self {
            pool,
            backend,
            config: Arc::new(config),
            notes,
            attachments,
            quota,
            reconciler,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Store a new attachment on a note owned by the caller.
    pub async fn upload(
        &self,
        ctx: &RequestContext,
        note_id: Uuid,
        request: UploadRequest,
    ) -> Result<Attachment> {
        let start = Instant::now();
        let user_id = ctx.user_id;

        self.notes.require_owned(note_id, user_id).await?;

        let filename = sanitize_filename(&request.filename);
        let category = self
            .config
            .classify(&filename)
            .ok_or_else(|| Error::UnsupportedType {
                extension: file_extension(&filename),
            })?;

        let size_bytes = request.size_bytes();
        let max_bytes = self.config.max_size_for(category);
        if size_bytes > max_bytes {
            return Err(Error::TooLarge {
                category,
                size_bytes,
                max_bytes,
            });
        }

        let limit_bytes = self.config.max_user_storage;
        if !self.quota.admit(user_id, size_bytes, limit_bytes).await? {
            let ledger = self.quota.get(user_id).await?;
            return Err(quota_exceeded(&ledger, size_bytes, limit_bytes));
        }

        let id = Uuid::now_v7();
        let blob_key = generate_blob_key(&id, file_extension(&filename).as_deref());
        if let Err(e) = self.backend.write(&blob_key, &request.data).await {
            warn!(
                subsystem = "storage",
                component = "lifecycle",
                op = "upload",
                request_id = %ctx.request_id,
                user_id = %user_id,
                blob_key = %blob_key,
                error = %e,
                "Blob write failed"
            );
            return Err(Error::StorageWriteFailed(e.to_string()));
        }

        let new = NewAttachment {
            id,
            note_id,
            blob_key: blob_key.clone(),
            mime_type: resolve_mime_type(&filename, &request.data, request.mime_type.as_deref()),
            content_hash: compute_content_hash(&request.data),
            original_filename: filename,
            size_bytes,
            category,
        };

        let attachment = match self.persist_upload(user_id, &new, limit_bytes).await {
            Ok(attachment) => attachment,
            Err(e) => {
                self.discard_blob(&blob_key, "upload").await;
                return Err(e);
            }
        };

        info!(
            subsystem = "storage",
            component = "lifecycle",
            op = "upload",
            request_id = %ctx.request_id,
            user_id = %user_id,
            note_id = %note_id,
            attachment_id = %attachment.id,
            category = %category,
            size_bytes,
            duration_ms = start.elapsed().as_millis() as u64,
            "Attachment uploaded"
        );
        Ok(attachment)
    }

    async fn persist_upload(
        &self,
        user_id: Uuid,
        new: &NewAttachment,
        limit_bytes: i64,
    ) -> Result<Attachment> {
        let mut tx = self.begin().await?;

        let ledger = self
            .quota
            .lock_tx(&mut tx, user_id)
            .await
            .map_err(persist_failed)?;
        if !ledger.admits(new.size_bytes, limit_bytes) {
            debug!(
                subsystem = "storage",
                component = "lifecycle",
                op = "upload",
                user_id = %user_id,
                used_bytes = ledger.used_bytes,
                size_bytes = new.size_bytes,
                "Admission lost under ledger lock"
            );
            return Err(quota_exceeded(&ledger, new.size_bytes, limit_bytes));
        }

        let attachment = self
            .attachments
            .insert_tx(&mut tx, new)
            .await
            .map_err(persist_failed)?;
        self.quota
            .apply_tx(&mut tx, user_id, attachment.charge())
            .await
            .map_err(persist_failed)?;

        tx.commit().await.map_err(Error::from).map_err(persist_failed)?;
        Ok(attachment)
    }

    /// Active attachments of a note owned by the caller, oldest first.
    pub async fn list_active(&self, ctx: &RequestContext, note_id: Uuid) -> Result<Vec<Attachment>> {
        self.notes.require_owned(note_id, ctx.user_id).await?;
        self.attachments
            .list_by_note(note_id, ctx.user_id, AttachmentState::Active)
            .await
    }

    /// A single active attachment owned by the caller.
    pub async fn get(&self, ctx: &RequestContext, attachment_id: Uuid) -> Result<Attachment> {
        self.attachments
            .get_owned(attachment_id, ctx.user_id, AttachmentState::Active)
            .await?
            .ok_or(Error::NotFoundOrForbidden(attachment_id))
    }

    /// Metadata and bytes of an active attachment owned by the caller.
    pub async fn download(
        &self,
        ctx: &RequestContext,
        attachment_id: Uuid,
    ) -> Result<(Attachment, Vec<u8>)> {
        let attachment = self.get(ctx, attachment_id).await?;
        let data = self.backend.read(&attachment.blob_key).await.map_err(|e| {
            warn!(
                subsystem = "storage",
                component = "lifecycle",
                op = "download",
                request_id = %ctx.request_id,
                attachment_id = %attachment_id,
                blob_key = %attachment.blob_key,
                error = %e,
                "Blob read failed for active attachment"
            );
            e
        })?;
        Ok((attachment, data))
    }

    /// Move an active attachment to the trash. The blob is kept.
    pub async fn soft_delete(&self, ctx: &RequestContext, attachment_id: Uuid) -> Result<Attachment> {
        self.transition_owned(ctx, attachment_id, LifecycleEvent::SoftDelete)
            .await
    }

    /// Bring a soft-deleted attachment back. Admission is not re-checked.
    pub async fn restore(&self, ctx: &RequestContext, attachment_id: Uuid) -> Result<Attachment> {
        self.transition_owned(ctx, attachment_id, LifecycleEvent::Restore)
            .await
    }

    async fn transition_owned(
        &self,
        ctx: &RequestContext,
        attachment_id: Uuid,
        event: LifecycleEvent,
    ) -> Result<Attachment> {
        let start = Instant::now();
        let user_id = ctx.user_id;
        let mut tx = self.begin().await?;

        self.quota
            .lock_tx(&mut tx, user_id)
            .await
            .map_err(persist_failed)?;
        let current = self
            .attachments
            .lock_owned_tx(&mut tx, attachment_id, user_id, event.required_state())
            .await
            .map_err(persist_failed)?
            .ok_or(Error::NotFoundOrForbidden(attachment_id))?;

        let next = current.state.transition(attachment_id, event)?;
        let deleted_at = match next {
            AttachmentState::SoftDeleted => Some(Utc::now()),
            _ => None,
        };
        let updated = self
            .attachments
            .set_state_tx(&mut tx, attachment_id, next, deleted_at)
            .await
            .map_err(persist_failed)?;

        let ledger = self
            .apply_policy_tx(&mut tx, user_id, &current, next)
            .await?;

        tx.commit().await.map_err(Error::from).map_err(persist_failed)?;

        info!(
            subsystem = "storage",
            component = "lifecycle",
            op = ?event,
            request_id = %ctx.request_id,
            user_id = %user_id,
            attachment_id = %attachment_id,
            size_bytes = current.size_bytes,
            used_bytes = ledger.map(|l| l.used_bytes),
            duration_ms = start.elapsed().as_millis() as u64,
            "Attachment {} -> {}",
            current.state,
            next
        );
        Ok(updated)
    }

    /// Permanently remove a soft-deleted attachment and its blob.
    ///
    /// Operator operation: no ownership check. The blob is deleted after the
    /// record is gone; a missing blob or a failed delete is only logged.
    pub async fn purge(&self, attachment_id: Uuid) -> Result<()> {
        let start = Instant::now();
        let not_purgeable = |found| Error::InvalidState {
            id: attachment_id,
            expected: AttachmentState::SoftDeleted,
            found,
        };

        let owner = self
            .attachments
            .owner_of(attachment_id)
            .await
            .map_err(persist_failed)?
            .ok_or_else(|| not_purgeable(None))?;

        let mut tx = self.begin().await?;
        self.quota
            .lock_tx(&mut tx, owner)
            .await
            .map_err(persist_failed)?;
        let current = self
            .attachments
            .lock_tx(&mut tx, attachment_id)
            .await
            .map_err(persist_failed)?
            .ok_or_else(|| not_purgeable(None))?;

        let next = current.state.transition(attachment_id, LifecycleEvent::Purge)?;
        self.attachments
            .delete_tx(&mut tx, attachment_id)
            .await
            .map_err(persist_failed)?;
        self.apply_policy_tx(&mut tx, owner, &current, next).await?;

        tx.commit().await.map_err(Error::from).map_err(persist_failed)?;

        match self.backend.delete(&current.blob_key).await {
            Ok(true) => {}
            Ok(false) => warn!(
                subsystem = "storage",
                component = "lifecycle",
                op = "purge",
                attachment_id = %attachment_id,
                blob_key = %current.blob_key,
                "Blob already absent at purge"
            ),
            Err(e) => warn!(
                subsystem = "storage",
                component = "lifecycle",
                op = "purge",
                attachment_id = %attachment_id,
                blob_key = %current.blob_key,
                error = %e,
                "Blob delete failed after purge, blob orphaned"
            ),
        }

        info!(
            subsystem = "storage",
            component = "lifecycle",
            op = "purge",
            user_id = %owner,
            attachment_id = %attachment_id,
            size_bytes = current.size_bytes,
            duration_ms = start.elapsed().as_millis() as u64,
            "Attachment purged"
        );
        Ok(())
    }

    /// Purge every attachment soft-deleted more than `retention` ago.
    ///
    /// A failing purge is recorded in the report and does not stop the sweep.
    pub async fn purge_expired(&self, retention: chrono::Duration) -> Result<PurgeReport> {
        let start = Instant::now();
        let cutoff = retention_cutoff(Utc::now(), retention)?;
        let candidates = self.attachments.list_deleted_before(cutoff).await?;

        let mut report = PurgeReport::default();
        for attachment_id in candidates {
            match self.purge(attachment_id).await {
                Ok(()) => report.purged.push(attachment_id),
                Err(e) => {
                    warn!(
                        subsystem = "storage",
                        component = "lifecycle",
                        op = "purge_expired",
                        attachment_id = %attachment_id,
                        error_kind = e.kind().as_str(),
                        error = %e,
                        "Skipping attachment in retention sweep"
                    );
                    report.failed.push(attachment_id);
                }
            }
        }

        info!(
            subsystem = "storage",
            component = "lifecycle",
            op = "purge_expired",
            cutoff = %cutoff,
            purged = report.purged.len(),
            failed = report.failed.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Retention sweep finished"
        );
        Ok(report)
    }

    /// Soft-deleted attachments of a user, most recently deleted first.
    pub async fn list_deleted(&self, user_id: Uuid) -> Result<Vec<Attachment>> {
        self.attachments.list_deleted_by_user(user_id).await
    }

    pub async fn get_quota(&self, user_id: Uuid) -> Result<QuotaLedger> {
        self.quota.get(user_id).await
    }

    /// Recompute a user's ledger from their attachments.
    pub async fn reconcile(&self, user_id: Uuid) -> Result<QuotaLedger> {
        self.reconciler.reconcile(user_id).await
    }

    /// Reconcile every known user. Returns how many ledgers changed.
    pub async fn reconcile_all(&self) -> Result<usize> {
        self.reconciler.reconcile_all().await
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| Error::PersistFailed(e.to_string()))
    }

    /// Apply the ledger change, if any, that the quota policy attaches to
    /// `attachment` moving into `to`.
    async fn apply_policy_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        attachment: &Attachment,
        to: AttachmentState,
    ) -> Result<Option<QuotaLedger>> {
        match self.config.quota_policy.delta_for(attachment, to) {
            Some(delta) => self
                .quota
                .apply_tx(tx, user_id, delta)
                .await
                .map(Some)
                .map_err(persist_failed),
            None => Ok(None),
        }
    }

    async fn discard_blob(&self, blob_key: &str, op: &'static str) {
        match self.backend.delete(blob_key).await {
            Ok(_) => debug!(
                subsystem = "storage",
                component = "lifecycle",
                op,
                blob_key = %blob_key,
                "Discarded blob of failed upload"
            ),
            Err(e) => warn!(
                subsystem = "storage",
                component = "lifecycle",
                op,
                blob_key = %blob_key,
                error = %e,
                "Could not discard blob of failed upload, blob orphaned"
            ),
        }
    }
}

fn quota_exceeded(ledger: &QuotaLedger, requested_bytes: i64, limit_bytes: i64) -> Error {
    Error::QuotaExceeded {
        used_bytes: ledger.used_bytes,
        requested_bytes,
        limit_bytes,
    }
}

/// Oldest `deleted_at` that survives a sweep run at `now`. A negative window
/// would purge freshly trashed attachments and is rejected.
fn retention_cutoff(now: DateTime<Utc>, retention: chrono::Duration) -> Result<DateTime<Utc>> {
    if retention < chrono::Duration::zero() {
        return Err(Error::InvalidInput(format!(
            "retention must not be negative, got {} days",
            retention.num_days()
        )));
    }
    now.checked_sub_signed(retention).ok_or_else(|| {
        Error::InvalidInput(format!(
            "retention of {} days reaches before the earliest representable time",
            retention.num_days()
        ))
    })
}

/// Database failures inside a lifecycle transaction surface as `PersistFailed`.
fn persist_failed(err: Error) -> Error {
    match err {
        Error::Database(e) => Error::PersistFailed(e.to_string()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persist_failed_wraps_database_errors() {
        let err = persist_failed(Error::Database(sqlx::Error::RowNotFound));
        assert!(matches!(err, Error::PersistFailed(_)));
    }

    #[test]
    fn test_persist_failed_keeps_domain_errors() {
        let id = Uuid::now_v7();
        let err = persist_failed(Error::NotFoundOrForbidden(id));
        assert!(matches!(err, Error::NotFoundOrForbidden(x) if x == id));
    }

    #[test]
    fn test_retention_cutoff_bounds() {
        let now = Utc::now();
        assert_eq!(
            retention_cutoff(now, chrono::Duration::days(30)).unwrap(),
            now - chrono::Duration::days(30)
        );
        assert_eq!(retention_cutoff(now, chrono::Duration::zero()).unwrap(), now);

        let err = retention_cutoff(now, chrono::Duration::days(-1)).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        // In range for Duration, but past the earliest DateTime<Utc>.
        let huge = chrono::Duration::try_days(10_000_000_000).unwrap();
        assert!(matches!(retention_cutoff(now, huge), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_quota_exceeded_reports_ledger_usage() {
        let ledger = QuotaLedger {
            used_bytes: 300,
            ..QuotaLedger::empty(Uuid::nil())
        };
        match quota_exceeded(&ledger, 250, 500) {
            Error::QuotaExceeded {
                used_bytes,
                requested_bytes,
                limit_bytes,
            } => {
                assert_eq!(used_bytes, 300);
                assert_eq!(requested_bytes, 250);
                assert_eq!(limit_bytes, 500);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
