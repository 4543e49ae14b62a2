//! Per-user storage quota ledger.
//!
//! Every writer takes the ledger row lock (`SELECT ... FOR UPDATE`) before
//! touching attachments for that user. That lock is what serializes
//! admission, apply, and reconcile for a user. Rows are created lazily with
//! zero values, so a user whose ledger row was never provisioned is handled
//! like a fresh account.

use chrono::Utc;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

use notekeep_core::{Error, LedgerDelta, QuotaLedger, Result};

/// PostgreSQL quota ledger repository.
#[derive(Clone)]
pub struct PgQuotaLedgerRepository {
    pool: PgPool,
}

impl PgQuotaLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Current ledger for a user. A missing row reads as zero usage.
    pub async fn get(&self, user_id: Uuid) -> Result<QuotaLedger> {
        let row = sqlx::query(
            r#"SELECT user_id, used_bytes, file_count, image_count, document_count, updated_at
               FROM quota_ledger WHERE user_id = $1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row
            .map(|r| ledger_from_row(&r))
            .unwrap_or_else(|| QuotaLedger::empty(user_id)))
    }

    /// Whether `candidate_bytes` more would fit under `limit_bytes`.
    ///
    /// Read-only and unlocked. Callers that go on to write must re-check
    /// under [`PgQuotaLedgerRepository::lock_tx`].
    pub async fn admit(&self, user_id: Uuid, candidate_bytes: i64, limit_bytes: i64) -> Result<bool> {
        let ledger = self.get(user_id).await?;
        let admitted = ledger.admits(candidate_bytes, limit_bytes);
        debug!(
            subsystem = "db",
            component = "quota",
            op = "admit",
            user_id = %user_id,
            used_bytes = ledger.used_bytes,
            candidate_bytes,
            limit_bytes,
            admitted,
            "Quota admission check"
        );
        Ok(admitted)
    }

    /// Lock the user's ledger row for the rest of the transaction, creating a
    /// zeroed row first if none exists.
    pub async fn lock_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> Result<QuotaLedger> {
        sqlx::query("INSERT INTO quota_ledger (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;

        let row = sqlx::query(
            r#"SELECT user_id, used_bytes, file_count, image_count, document_count, updated_at
               FROM quota_ledger WHERE user_id = $1
               FOR UPDATE"#,
        )
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(Error::Database)?;

        Ok(ledger_from_row(&row))
    }

    /// Apply one attachment entering or leaving the counted set.
    ///
    /// Counters clamp at zero. Returns the ledger as written.
    pub async fn apply_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        delta: LedgerDelta,
    ) -> Result<QuotaLedger> {
        let mut ledger = self.lock_tx(tx, user_id).await?;
        ledger.apply(delta);
        self.write_tx(tx, &ledger).await?;
        debug!(
            subsystem = "db",
            component = "quota",
            op = "apply",
            user_id = %user_id,
            delta_bytes = delta.signed_bytes(),
            category = %delta.category,
            used_bytes = ledger.used_bytes,
            "Applied ledger delta"
        );
        Ok(ledger)
    }

    /// Overwrite the user's ledger unconditionally. Reconciler only.
    pub async fn replace_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ledger: &QuotaLedger,
    ) -> Result<QuotaLedger> {
        let mut ledger = ledger.clone();
        ledger.updated_at = Utc::now();
        sqlx::query(
            r#"INSERT INTO quota_ledger
               (user_id, used_bytes, file_count, image_count, document_count, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6)
               ON CONFLICT (user_id) DO UPDATE SET
                   used_bytes = EXCLUDED.used_bytes,
                   file_count = EXCLUDED.file_count,
                   image_count = EXCLUDED.image_count,
                   document_count = EXCLUDED.document_count,
                   updated_at = EXCLUDED.updated_at"#,
        )
        .bind(ledger.user_id)
        .bind(ledger.used_bytes.max(0))
        .bind(ledger.file_count.max(0))
        .bind(ledger.image_count.max(0))
        .bind(ledger.document_count.max(0))
        .bind(ledger.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;
        Ok(ledger)
    }

    /// Every user with a ledger row.
    pub async fn list_users(&self) -> Result<Vec<Uuid>> {
        let users = sqlx::query_scalar::<_, Uuid>("SELECT user_id FROM quota_ledger ORDER BY user_id")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(users)
    }

    async fn write_tx(&self, tx: &mut Transaction<'_, Postgres>, ledger: &QuotaLedger) -> Result<()> {
        let result = sqlx::query(
            r#"UPDATE quota_ledger
               SET used_bytes = $2, file_count = $3, image_count = $4,
                   document_count = $5, updated_at = $6
               WHERE user_id = $1"#,
        )
        .bind(ledger.user_id)
        .bind(ledger.used_bytes)
        .bind(ledger.file_count)
        .bind(ledger.image_count)
        .bind(ledger.document_count)
        .bind(ledger.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::Internal(format!(
                "quota ledger row for {} vanished while locked",
                ledger.user_id
            )));
        }
        Ok(())
    }
}

/// Convert a database row to a QuotaLedger.
fn ledger_from_row(row: &sqlx::postgres::PgRow) -> QuotaLedger {
    QuotaLedger {
        user_id: row.get("user_id"),
        used_bytes: row.get("used_bytes"),
        file_count: row.get("file_count"),
        image_count: row.get("image_count"),
        document_count: row.get("document_count"),
        updated_at: row.get("updated_at"),
    }
}
