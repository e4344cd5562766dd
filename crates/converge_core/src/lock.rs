//! Per-(branch, target-ref) convergence lock.
//!
//! A branch/target pair has capacity exactly one: acquisition is an atomic
//! acquire-if-absent at the store, so two concurrent publish requests race
//! safely — one acquires, the other receives a structured contention result.
//! Contention is surfaced as a reason value, not an error.

use std::sync::Arc;
use uuid::Uuid;

use crate::ports::{LockStore, Result};
use crate::types::LockOutcome;

/// Result of an acquisition attempt.
#[derive(Debug, Clone)]
pub struct Acquisition {
    pub acquired: bool,
    /// Contention reason suitable for surfacing to the caller as a conflict.
    pub reason: Option<String>,
}

pub struct ConvergenceLock {
    store: Arc<dyn LockStore>,
}

impl ConvergenceLock {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self { store }
    }

    /// Try to take the lock for `operation_id`.
    pub async fn acquire(
        &self,
        branch_id: Uuid,
        target_ref: &str,
        operation_id: Uuid,
    ) -> Result<Acquisition> {
        if self.store.try_acquire(branch_id, target_ref, operation_id).await? {
            crate::metrics::emit_lock_acquired(branch_id, target_ref, operation_id);
            Ok(Acquisition {
                acquired: true,
                reason: None,
            })
        } else {
            crate::metrics::emit_lock_contended(branch_id, target_ref);
            Ok(Acquisition {
                acquired: false,
                reason: Some(format!(
                    "another convergence is already in progress for branch {branch_id} into '{target_ref}'"
                )),
            })
        }
    }

    /// Release unconditionally, tagging the outcome. Idempotent — reachable
    /// from every exit path of the convergence service.
    pub async fn release(&self, operation_id: Uuid, outcome: LockOutcome) -> Result<()> {
        self.store.release(operation_id, outcome).await?;
        crate::metrics::emit_lock_released(operation_id, outcome);
        Ok(())
    }
}
