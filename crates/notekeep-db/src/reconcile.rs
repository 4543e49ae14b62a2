//! Quota ledger reconciliation.
//!
//! Recomputes a user's ledger from the attachments the quota policy counts
//! and overwrites the stored row. Runs under the same ledger row lock as
//! every lifecycle transition, so it never observes a half-applied change.

use std::collections::BTreeSet;
use std::time::Instant;

use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use notekeep_core::{Error, QuotaLedger, QuotaPolicy, Result};

use crate::attachments::PgAttachmentRepository;
use crate::notes::PgNoteRepository;
use crate::quota::PgQuotaLedgerRepository;

#[derive(Clone)]
pub struct QuotaReconciler {
    pool: PgPool,
    notes: PgNoteRepository,
    attachments: PgAttachmentRepository,
    quota: PgQuotaLedgerRepository,
    policy: QuotaPolicy,
}

impl QuotaReconciler {
    pub fn new(
        pool: PgPool,
        notes: PgNoteRepository,
        attachments: PgAttachmentRepository,
        quota: PgQuotaLedgerRepository,
        policy: QuotaPolicy,
    ) -> Self {
        Self {
            pool,
            notes,
            attachments,
            quota,
            policy,
        }
    }

    /// Recompute one user's ledger. Idempotent.
    pub async fn reconcile(&self, user_id: Uuid) -> Result<QuotaLedger> {
        let (ledger, _) = self.reconcile_user(user_id).await?;
        Ok(ledger)
    }

    /// Reconcile every user that owns a note or has a ledger row.
    ///
    /// Returns the number of ledgers whose totals changed.
    pub async fn reconcile_all(&self) -> Result<usize> {
        let start = Instant::now();
        let mut users: BTreeSet<Uuid> = self.notes.list_owners().await?.into_iter().collect();
        users.extend(self.quota.list_users().await?);

        let mut changed = 0;
        for user_id in &users {
            let (_, drifted) = self.reconcile_user(*user_id).await?;
            if drifted {
                changed += 1;
            }
        }

        info!(
            subsystem = "db",
            component = "reconciler",
            op = "reconcile_all",
            users = users.len(),
            changed,
            duration_ms = start.elapsed().as_millis() as u64,
            "Quota reconciliation finished"
        );
        Ok(changed)
    }

    async fn reconcile_user(&self, user_id: Uuid) -> Result<(QuotaLedger, bool)> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::PersistFailed(e.to_string()))?;

        let previous = self.quota.lock_tx(&mut tx, user_id).await?;
        let actual = self
            .attachments
            .totals_tx(&mut tx, user_id, self.policy.counted_states())
            .await?;
        let ledger = self.quota.replace_tx(&mut tx, &actual).await?;

        tx.commit()
            .await
            .map_err(|e| Error::PersistFailed(e.to_string()))?;

        let drifted = !previous.same_totals(&ledger);
        if drifted {
            warn!(
                subsystem = "db",
                component = "reconciler",
                op = "reconcile",
                user_id = %user_id,
                policy = %self.policy,
                old_used_bytes = previous.used_bytes,
                new_used_bytes = ledger.used_bytes,
                old_file_count = previous.file_count,
                new_file_count = ledger.file_count,
                "Quota ledger drift repaired"
            );
        } else {
            debug!(
                subsystem = "db",
                component = "reconciler",
                op = "reconcile",
                user_id = %user_id,
                used_bytes = ledger.used_bytes,
                "Quota ledger already consistent"
            );
        }
        Ok((ledger, drifted))
    }
}
