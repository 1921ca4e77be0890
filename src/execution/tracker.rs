//! Execution-unit lifecycle.
//!
//! [`ResultTracker`] moves a unit through `pending -> running -> terminal`
//! and back to `pending` on retry. A verdict is tied to the attempt that
//! produced it through the unit's retry count. Every transition is checked against the
//! unit's current stored status and persisted before returning.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use super::progress::{EngineGuard, ProgressAggregator};
use crate::core::task::{ExecutionUnit, LiveStats, UnitStatus, Verdict};
use crate::core::types::UnitId;
use crate::storage::{Storage, StorageError};

/// Errors returned by the result tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The unit is not in a status that allows the operation.
    #[error("unit {unit_id} is {status}; cannot {operation}")]
    InvalidState {
        unit_id: UnitId,
        status: UnitStatus,
        operation: &'static str,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Applies unit transitions and triggers progress recomputation.
pub struct ResultTracker<S: Storage> {
    storage: Arc<S>,
    progress: ProgressAggregator<S>,
}

impl<S: Storage> Clone for ResultTracker<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            progress: self.progress.clone(),
        }
    }
}

impl<S: Storage> ResultTracker<S> {
    /// Create a tracker sharing the aggregator's gate.
    pub fn new(storage: Arc<S>, progress: ProgressAggregator<S>) -> Self {
        Self { storage, progress }
    }

    /// The aggregator this tracker reports to.
    pub fn progress(&self) -> &ProgressAggregator<S> {
        &self.progress
    }

    /// Move a pending unit to running.
    pub async fn begin(&self, unit_id: UnitId) -> Result<ExecutionUnit, TrackerError> {
        let _guard = self.progress.lock().await;
        let mut unit = self.storage.get_unit(unit_id).await?;
        if unit.status != UnitStatus::Pending {
            return Err(TrackerError::InvalidState {
                unit_id,
                status: unit.status,
                operation: "begin",
            });
        }
        unit.mark_running();
        self.storage.update_unit(unit.clone()).await?;
        tracing::debug!(unit_id = %unit_id, task_id = %unit.task_id, "unit running");
        Ok(unit)
    }

    /// Record the verdict of a run started by [`begin`](Self::begin).
    ///
    /// `claim` is the unit `begin` returned. The verdict is accepted only
    /// while the stored unit is still running the same attempt; a unit that
    /// was stopped, or stopped and re-queued by a retry, is left untouched.
    pub async fn complete(
        &self,
        claim: &ExecutionUnit,
        verdict: Verdict,
        message: Option<String>,
        log_path: Option<PathBuf>,
    ) -> Result<(ExecutionUnit, LiveStats), TrackerError> {
        let guard = self.progress.lock().await;
        let unit = self.storage.get_unit(claim.id).await?;
        if unit.status != UnitStatus::Running || unit.retry_count != claim.retry_count {
            return Err(TrackerError::InvalidState {
                unit_id: claim.id,
                status: unit.status,
                operation: "complete",
            });
        }
        self.finish_held(&guard, unit, verdict, message, log_path).await
    }

    /// Record a verdict for a unit that never started, such as one whose
    /// case no longer exists.
    pub async fn resolve_pending(
        &self,
        unit_id: UnitId,
        verdict: Verdict,
        message: Option<String>,
    ) -> Result<(ExecutionUnit, LiveStats), TrackerError> {
        let guard = self.progress.lock().await;
        let unit = self.storage.get_unit(unit_id).await?;
        if unit.status != UnitStatus::Pending {
            return Err(TrackerError::InvalidState {
                unit_id,
                status: unit.status,
                operation: "resolve",
            });
        }
        self.finish_held(&guard, unit, verdict, message, None).await
    }

    async fn finish_held(
        &self,
        guard: &EngineGuard,
        mut unit: ExecutionUnit,
        verdict: Verdict,
        message: Option<String>,
        log_path: Option<PathBuf>,
    ) -> Result<(ExecutionUnit, LiveStats), TrackerError> {
        unit.mark_finished(verdict, message, log_path);
        self.storage.update_unit(unit.clone()).await?;

        let (_, stats) = self.progress.recompute_held(guard, unit.task_id).await?;
        tracing::debug!(
            unit_id = %unit.id,
            task_id = %unit.task_id,
            status = %unit.status,
            "unit finished"
        );
        Ok((unit, stats))
    }

    /// Re-queue an errored unit. The caller holds the engine gate for the
    /// whole retry batch.
    pub async fn retry(
        &self,
        _guard: &EngineGuard,
        unit_id: UnitId,
    ) -> Result<ExecutionUnit, TrackerError> {
        let mut unit = self.storage.get_unit(unit_id).await?;
        if unit.status != UnitStatus::Error {
            return Err(TrackerError::InvalidState {
                unit_id,
                status: unit.status,
                operation: "retry",
            });
        }
        unit.reset_for_retry();
        self.storage.update_unit(unit.clone()).await?;
        tracing::debug!(
            unit_id = %unit_id,
            retry_count = unit.retry_count,
            "unit re-queued"
        );
        Ok(unit)
    }
}
