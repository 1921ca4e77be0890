//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for testing and development.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

use super::{Storage, StorageError};
use crate::core::case::{Case, Category, SortOrder};
use crate::core::task::{ExecutionUnit, Task, UnitStatus};
use crate::core::types::{CaseId, CategoryId, TaskId, UnitId};

/// In-memory storage backend.
///
/// Thread-safe storage using RwLock for concurrent access.
/// Data is not persisted across restarts. Units live in a `BTreeMap` keyed by
/// their ascending id, so iteration order is creation order.
pub struct InMemoryStorage {
    categories: RwLock<BTreeMap<CategoryId, Category>>,
    cases: RwLock<BTreeMap<CaseId, Case>>,
    tasks: RwLock<HashMap<TaskId, Task>>,
    units: RwLock<BTreeMap<UnitId, ExecutionUnit>>,
    next_id: AtomicI64,
}

impl InMemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self {
            categories: RwLock::new(BTreeMap::new()),
            cases: RwLock::new(BTreeMap::new()),
            tasks: RwLock::new(HashMap::new()),
            units: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn save_category(
        &self,
        name: &str,
        sort_order: SortOrder,
    ) -> Result<Category, StorageError> {
        let mut categories = self
            .categories
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if categories.values().any(|c| c.name == name) {
            return Err(StorageError::DuplicateKey(format!("category: {}", name)));
        }
        let current_max = categories.values().map(|c| c.sort_order).max();
        let category = Category {
            id: CategoryId::new(self.allocate_id()),
            name: name.to_string(),
            sort_order: sort_order.resolve(current_max),
        };
        categories.insert(category.id, category.clone());
        Ok(category)
    }

    async fn list_categories(&self) -> Result<Vec<Category>, StorageError> {
        let categories = self
            .categories
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = categories.values().cloned().collect();
        result.sort_by_key(|c| (c.sort_order, c.id));
        Ok(result)
    }

    async fn save_case(&self, mut case: Case) -> Result<Case, StorageError> {
        {
            let categories = self
                .categories
                .read()
                .map_err(|_| StorageError::LockPoisoned)?;
            if !categories.contains_key(&case.category_id) {
                return Err(StorageError::NotFound(format!(
                    "category: {}",
                    case.category_id
                )));
            }
        }
        let mut cases = self.cases.write().map_err(|_| StorageError::LockPoisoned)?;
        if cases
            .values()
            .any(|c| c.name == case.name && c.category_id == case.category_id)
        {
            return Err(StorageError::DuplicateKey(format!("case: {}", case.name)));
        }
        case.id = CaseId::new(self.allocate_id());
        cases.insert(case.id, case.clone());
        Ok(case)
    }

    async fn get_case(&self, id: CaseId) -> Result<Case, StorageError> {
        let cases = self.cases.read().map_err(|_| StorageError::LockPoisoned)?;
        cases
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("case: {}", id)))
    }

    async fn list_enabled_cases(&self) -> Result<Vec<Case>, StorageError> {
        let positions: HashMap<CategoryId, (i32, CategoryId)> = {
            let categories = self
                .categories
                .read()
                .map_err(|_| StorageError::LockPoisoned)?;
            categories
                .values()
                .map(|c| (c.id, (c.sort_order, c.id)))
                .collect()
        };
        let cases = self.cases.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = cases.values().filter(|c| c.enabled).cloned().collect();
        result.sort_by_key(|c| {
            let position = positions
                .get(&c.category_id)
                .copied()
                .unwrap_or((i32::MAX, c.category_id));
            (position, c.id)
        });
        Ok(result)
    }

    async fn create_task(
        &self,
        mut task: Task,
        case_ids: &[CaseId],
    ) -> Result<(Task, Vec<ExecutionUnit>), StorageError> {
        let mut tasks = self.tasks.write().map_err(|_| StorageError::LockPoisoned)?;
        let mut units = self.units.write().map_err(|_| StorageError::LockPoisoned)?;

        task.id = TaskId::new(self.allocate_id());
        let mut created = Vec::with_capacity(case_ids.len());
        for case_id in case_ids {
            let mut unit = ExecutionUnit::new(task.id, *case_id);
            unit.id = UnitId::new(self.allocate_id());
            units.insert(unit.id, unit.clone());
            created.push(unit);
        }
        tasks.insert(task.id, task.clone());
        Ok((task, created))
    }

    async fn get_task(&self, id: TaskId) -> Result<Task, StorageError> {
        let tasks = self.tasks.read().map_err(|_| StorageError::LockPoisoned)?;
        tasks
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("task: {}", id)))
    }

    async fn update_task(&self, task: Task) -> Result<(), StorageError> {
        let mut tasks = self.tasks.write().map_err(|_| StorageError::LockPoisoned)?;
        if !tasks.contains_key(&task.id) {
            return Err(StorageError::NotFound(format!("task: {}", task.id)));
        }
        tasks.insert(task.id, task);
        Ok(())
    }

    async fn delete_task(&self, id: TaskId) -> Result<(), StorageError> {
        let mut tasks = self.tasks.write().map_err(|_| StorageError::LockPoisoned)?;
        let mut units = self.units.write().map_err(|_| StorageError::LockPoisoned)?;
        tasks
            .remove(&id)
            .ok_or_else(|| StorageError::NotFound(format!("task: {}", id)))?;
        units.retain(|_, unit| unit.task_id != id);
        Ok(())
    }

    async fn get_unit(&self, id: UnitId) -> Result<ExecutionUnit, StorageError> {
        let units = self.units.read().map_err(|_| StorageError::LockPoisoned)?;
        units
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("unit: {}", id)))
    }

    async fn list_units(&self, task_id: TaskId) -> Result<Vec<ExecutionUnit>, StorageError> {
        let units = self.units.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(units
            .values()
            .filter(|u| u.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn list_units_with_status(
        &self,
        task_id: TaskId,
        statuses: &[UnitStatus],
    ) -> Result<Vec<ExecutionUnit>, StorageError> {
        let units = self.units.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(units
            .values()
            .filter(|u| u.task_id == task_id && statuses.contains(&u.status))
            .cloned()
            .collect())
    }

    async fn update_unit(&self, unit: ExecutionUnit) -> Result<(), StorageError> {
        let mut units = self.units.write().map_err(|_| StorageError::LockPoisoned)?;
        if !units.contains_key(&unit.id) {
            return Err(StorageError::NotFound(format!("unit: {}", unit.id)));
        }
        units.insert(unit.id, unit);
        Ok(())
    }

    async fn stop_open_units(&self, task_id: TaskId) -> Result<u64, StorageError> {
        let mut units = self.units.write().map_err(|_| StorageError::LockPoisoned)?;
        let mut changed = 0;
        for unit in units.values_mut().filter(|u| {
            u.task_id == task_id && matches!(u.status, UnitStatus::Pending | UnitStatus::Running)
        }) {
            unit.mark_stopped();
            changed += 1;
        }
        Ok(changed)
    }
}
