//! Storage abstraction for tasks, execution units and the case catalog.
//!
//! This module provides a trait-based storage abstraction with
//! pluggable backends (in-memory, SQLite). The store is the single source of
//! truth for task state; every write is visible to the next read.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::case::{Case, Category, SortOrder};
use crate::core::task::{ExecutionUnit, Task, UnitStatus};
use crate::core::types::{CaseId, TaskId, UnitId};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A duplicate key was detected.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// A stored value could not be decoded.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

/// Storage trait for persisting engine state.
#[async_trait]
pub trait Storage: Send + Sync {
    // Catalog operations

    /// Insert a category, resolving its sort order.
    async fn save_category(
        &self,
        name: &str,
        sort_order: SortOrder,
    ) -> Result<Category, StorageError>;

    /// List categories ordered by `(sort_order, id)`.
    async fn list_categories(&self) -> Result<Vec<Category>, StorageError>;

    /// Insert a case and return it with its assigned id.
    async fn save_case(&self, case: Case) -> Result<Case, StorageError>;

    /// Get a case by ID.
    async fn get_case(&self, id: CaseId) -> Result<Case, StorageError>;

    /// List enabled cases ordered by category position, then case id.
    async fn list_enabled_cases(&self) -> Result<Vec<Case>, StorageError>;

    // Task operations

    /// Insert a task together with one pending unit per case, atomically.
    async fn create_task(
        &self,
        task: Task,
        case_ids: &[CaseId],
    ) -> Result<(Task, Vec<ExecutionUnit>), StorageError>;

    /// Get a task by ID.
    async fn get_task(&self, id: TaskId) -> Result<Task, StorageError>;

    /// Overwrite a task record.
    async fn update_task(&self, task: Task) -> Result<(), StorageError>;

    /// Delete a task and all of its units.
    async fn delete_task(&self, id: TaskId) -> Result<(), StorageError>;

    // Unit operations

    /// Get a unit by ID.
    async fn get_unit(&self, id: UnitId) -> Result<ExecutionUnit, StorageError>;

    /// List all units of a task in creation order.
    async fn list_units(&self, task_id: TaskId) -> Result<Vec<ExecutionUnit>, StorageError>;

    /// List the units of a task whose status is in `statuses`, in creation order.
    async fn list_units_with_status(
        &self,
        task_id: TaskId,
        statuses: &[UnitStatus],
    ) -> Result<Vec<ExecutionUnit>, StorageError>;

    /// Overwrite a unit record.
    async fn update_unit(&self, unit: ExecutionUnit) -> Result<(), StorageError>;

    /// Move every pending or running unit of a task to `error` with the
    /// stop message. Returns the number of units changed.
    async fn stop_open_units(&self, task_id: TaskId) -> Result<u64, StorageError>;
}
