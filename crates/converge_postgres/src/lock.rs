//! Postgres-backed convergence lock.
//!
//! Acquisition is a single conditional insert against the partial unique
//! index `one_live_lock_per_target`: two concurrent publishers race through
//! `ON CONFLICT DO NOTHING` and exactly one sees a row inserted. No
//! read-then-write window exists.

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use converge_core::ports::{LockStore, Result};
use converge_core::types::LockOutcome;

pub struct PgLockStore {
    pool: PgPool,
}

impl PgLockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockStore for PgLockStore {
    async fn try_acquire(
        &self,
        branch_id: Uuid,
        target_ref: &str,
        operation_id: Uuid,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO converge.convergence_locks
                (operation_id, branch_id, target_ref, acquired_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (branch_id, target_ref) WHERE released_at IS NULL
            DO NOTHING
            "#,
        )
        .bind(operation_id)
        .bind(branch_id)
        .bind(target_ref)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, operation_id: Uuid, outcome: LockOutcome) -> Result<()> {
        // Idempotent by construction: an already-released row no longer
        // matches, so a second release affects zero rows and succeeds.
        sqlx::query(
            r#"
            UPDATE converge.convergence_locks
            SET released_at = now(), outcome = $2
            WHERE operation_id = $1 AND released_at IS NULL
            "#,
        )
        .bind(operation_id)
        .bind(outcome.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }
}
