//! Task submission.

use thiserror::Error;

use crate::core::task::{ExecutionUnit, Task};
use crate::core::types::{CaseId, TargetAddr, UserId};
use crate::storage::{Storage, StorageError};

/// Errors returned when creating a task.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("case not found: {0}")]
    CaseNotFound(CaseId),

    #[error("case is disabled: {0}")]
    CaseDisabled(CaseId),

    #[error("no enabled cases to run")]
    NoEnabledCases,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A request to run detection cases against a target.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub target: TargetAddr,
    pub user_id: UserId,
    pub description: Option<String>,
    /// Explicit case selection; `None` selects every enabled case.
    pub case_ids: Option<Vec<CaseId>>,
}

impl SubmitRequest {
    pub fn new(target: TargetAddr, user_id: UserId) -> Self {
        Self {
            target,
            user_id,
            description: None,
            case_ids: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_cases(mut self, case_ids: Vec<CaseId>) -> Self {
        self.case_ids = Some(case_ids);
        self
    }
}

/// Create a task with one pending unit per selected case.
///
/// Duplicate ids in an explicit selection are collapsed, keeping first
/// occurrence order.
pub async fn submit_task<S: Storage + ?Sized>(
    storage: &S,
    request: SubmitRequest,
) -> Result<(Task, Vec<ExecutionUnit>), SubmitError> {
    let case_ids = match request.case_ids {
        Some(requested) => {
            let mut selected: Vec<CaseId> = Vec::with_capacity(requested.len());
            for case_id in requested {
                if selected.contains(&case_id) {
                    continue;
                }
                let case = match storage.get_case(case_id).await {
                    Ok(case) => case,
                    Err(StorageError::NotFound(_)) => return Err(SubmitError::CaseNotFound(case_id)),
                    Err(e) => return Err(e.into()),
                };
                if !case.enabled {
                    return Err(SubmitError::CaseDisabled(case_id));
                }
                selected.push(case_id);
            }
            selected
        }
        None => storage
            .list_enabled_cases()
            .await?
            .into_iter()
            .map(|case| case.id)
            .collect(),
    };

    if case_ids.is_empty() {
        return Err(SubmitError::NoEnabledCases);
    }

    let mut task = Task::new(request.target, request.user_id, case_ids.len() as u32);
    task.description = request.description;
    let (task, units) = storage.create_task(task, &case_ids).await?;

    tracing::info!(
        task_id = %task.id,
        target = %task.target,
        cases = units.len(),
        "task submitted"
    );
    Ok((task, units))
}
