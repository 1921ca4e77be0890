//! SQLite storage implementation.
//!
//! Provides persistent storage using SQLite database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::{Storage, StorageError};
use crate::core::case::{Case, Category, RiskLevel, SortOrder};
use crate::core::task::{ExecutionUnit, STOPPED_BY_USER, Task, TaskStatus, UnitStatus};
use crate::core::types::{CaseId, CategoryId, TargetAddr, TaskId, UnitId, UserId};

/// SQLite storage backend.
///
/// Provides persistent storage with automatic schema migration.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage with the given database path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| StorageError::Other(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Other(e.to_string()))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

type TaskRow = (
    i64,
    String,
    i64,
    Option<String>,
    String,
    i64,
    i64,
    i64,
    i64,
    i64,
    Option<i64>,
    Option<i64>,
    i64,
    Option<String>,
);

type UnitRow = (
    i64,
    i64,
    i64,
    String,
    i64,
    Option<i64>,
    Option<i64>,
    Option<String>,
    Option<String>,
    i64,
);

type CaseRow = (
    i64,
    String,
    i64,
    String,
    String,
    bool,
    Option<String>,
    Option<String>,
);

const TASK_COLUMNS: &str = "id, target_ip, user_id, description, status, total_cases, \
     completed_cases, passed_count, failed_count, error_count, start_time, end_time, \
     created_at, error_message";

const UNIT_COLUMNS: &str = "id, task_id, case_id, status, retry_count, start_time, end_time, \
     log_path, error_message, created_at";

const CASE_COLUMNS: &str =
    "id, name, category_id, risk_level, script_path, enabled, description, fix_suggestion";

// Helper functions for time conversion
fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn parse_column<T: FromStr<Err = String>>(value: &str) -> Result<T, StorageError> {
    value.parse().map_err(StorageError::SerializationError)
}

fn db_error(e: sqlx::Error) -> StorageError {
    StorageError::Other(e.to_string())
}

fn row_to_task(row: TaskRow) -> Result<Task, StorageError> {
    Ok(Task {
        id: TaskId::new(row.0),
        target: TargetAddr::parse(&row.1)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?,
        user_id: UserId::new(row.2),
        description: row.3,
        status: parse_column::<TaskStatus>(&row.4)?,
        total: row.5 as u32,
        completed: row.6 as u32,
        passed: row.7 as u32,
        failed: row.8 as u32,
        errors: row.9 as u32,
        start_time: row.10.map(from_millis),
        end_time: row.11.map(from_millis),
        created_at: from_millis(row.12),
        error_message: row.13,
    })
}

fn row_to_unit(row: UnitRow) -> Result<ExecutionUnit, StorageError> {
    Ok(ExecutionUnit {
        id: UnitId::new(row.0),
        task_id: TaskId::new(row.1),
        case_id: CaseId::new(row.2),
        status: parse_column::<UnitStatus>(&row.3)?,
        retry_count: row.4 as u32,
        start_time: row.5.map(from_millis),
        end_time: row.6.map(from_millis),
        log_path: row.7.map(PathBuf::from),
        error_message: row.8,
        created_at: from_millis(row.9),
    })
}

fn row_to_case(row: CaseRow) -> Result<Case, StorageError> {
    Ok(Case {
        id: CaseId::new(row.0),
        name: row.1,
        category_id: CategoryId::new(row.2),
        risk_level: parse_column::<RiskLevel>(&row.3)?,
        script_path: PathBuf::from(row.4),
        enabled: row.5,
        description: row.6,
        fix_suggestion: row.7,
    })
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_category(
        &self,
        name: &str,
        sort_order: SortOrder,
    ) -> Result<Category, StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let current_max: Option<i32> = sqlx::query_scalar("SELECT MAX(sort_order) FROM categories")
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error)?;
        let resolved = sort_order.resolve(current_max);

        let result = sqlx::query("INSERT INTO categories (name, sort_order) VALUES (?, ?)")
            .bind(name)
            .bind(resolved)
            .execute(&mut *tx)
            .await;

        let id = match result {
            Ok(done) => done.last_insert_rowid(),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(StorageError::DuplicateKey(format!("category: {}", name)));
            }
            Err(e) => return Err(db_error(e)),
        };
        tx.commit().await.map_err(db_error)?;

        Ok(Category {
            id: CategoryId::new(id),
            name: name.to_string(),
            sort_order: resolved,
        })
    }

    async fn list_categories(&self) -> Result<Vec<Category>, StorageError> {
        let rows: Vec<(i64, String, i32)> =
            sqlx::query_as("SELECT id, name, sort_order FROM categories ORDER BY sort_order, id")
                .fetch_all(&self.pool)
                .await
                .map_err(db_error)?;

        Ok(rows
            .into_iter()
            .map(|row| Category {
                id: CategoryId::new(row.0),
                name: row.1,
                sort_order: row.2,
            })
            .collect())
    }

    async fn save_case(&self, mut case: Case) -> Result<Case, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO cases (name, category_id, risk_level, script_path, enabled, description, fix_suggestion)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&case.name)
        .bind(case.category_id.get())
        .bind(case.risk_level.as_str())
        .bind(case.script_path.to_string_lossy().into_owned())
        .bind(case.enabled)
        .bind(&case.description)
        .bind(&case.fix_suggestion)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => {
                case.id = CaseId::new(done.last_insert_rowid());
                Ok(case)
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::DuplicateKey(format!("case: {}", case.name)))
            }
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => Err(
                StorageError::NotFound(format!("category: {}", case.category_id)),
            ),
            Err(e) => Err(db_error(e)),
        }
    }

    async fn get_case(&self, id: CaseId) -> Result<Case, StorageError> {
        let row: CaseRow = sqlx::query_as(&format!(
            "SELECT {} FROM cases WHERE id = ?",
            CASE_COLUMNS
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or_else(|| StorageError::NotFound(format!("case: {}", id)))?;

        row_to_case(row)
    }

    async fn list_enabled_cases(&self) -> Result<Vec<Case>, StorageError> {
        let rows: Vec<CaseRow> = sqlx::query_as(
            r#"
            SELECT c.id, c.name, c.category_id, c.risk_level, c.script_path, c.enabled,
                   c.description, c.fix_suggestion
            FROM cases c
            JOIN categories g ON g.id = c.category_id
            WHERE c.enabled = 1
            ORDER BY g.sort_order, g.id, c.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(row_to_case).collect()
    }

    async fn create_task(
        &self,
        mut task: Task,
        case_ids: &[CaseId],
    ) -> Result<(Task, Vec<ExecutionUnit>), StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let done = sqlx::query(
            r#"
            INSERT INTO tasks (target_ip, user_id, description, status, total_cases, completed_cases,
                               passed_count, failed_count, error_count, start_time, end_time,
                               created_at, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.target.to_string())
        .bind(task.user_id.get())
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(i64::from(task.total))
        .bind(i64::from(task.completed))
        .bind(i64::from(task.passed))
        .bind(i64::from(task.failed))
        .bind(i64::from(task.errors))
        .bind(task.start_time.map(to_millis))
        .bind(task.end_time.map(to_millis))
        .bind(to_millis(task.created_at))
        .bind(&task.error_message)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
        task.id = TaskId::new(done.last_insert_rowid());

        let mut units = Vec::with_capacity(case_ids.len());
        for case_id in case_ids {
            let mut unit = ExecutionUnit::new(task.id, *case_id);
            let done = sqlx::query(
                "INSERT INTO task_results (task_id, case_id, status, retry_count, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(task.id.get())
            .bind(case_id.get())
            .bind(unit.status.as_str())
            .bind(i64::from(unit.retry_count))
            .bind(to_millis(unit.created_at))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
            unit.id = UnitId::new(done.last_insert_rowid());
            units.push(unit);
        }

        tx.commit().await.map_err(db_error)?;
        Ok((task, units))
    }

    async fn get_task(&self, id: TaskId) -> Result<Task, StorageError> {
        let row: TaskRow = sqlx::query_as(&format!(
            "SELECT {} FROM tasks WHERE id = ?",
            TASK_COLUMNS
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or_else(|| StorageError::NotFound(format!("task: {}", id)))?;

        row_to_task(row)
    }

    async fn update_task(&self, task: Task) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET description = ?, status = ?, total_cases = ?, completed_cases = ?,
                             passed_count = ?, failed_count = ?, error_count = ?, start_time = ?,
                             end_time = ?, error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(i64::from(task.total))
        .bind(i64::from(task.completed))
        .bind(i64::from(task.passed))
        .bind(i64::from(task.failed))
        .bind(i64::from(task.errors))
        .bind(task.start_time.map(to_millis))
        .bind(task.end_time.map(to_millis))
        .bind(&task.error_message)
        .bind(task.id.get())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("task: {}", task.id)));
        }
        Ok(())
    }

    async fn delete_task(&self, id: TaskId) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("task: {}", id)));
        }
        Ok(())
    }

    async fn get_unit(&self, id: UnitId) -> Result<ExecutionUnit, StorageError> {
        let row: UnitRow = sqlx::query_as(&format!(
            "SELECT {} FROM task_results WHERE id = ?",
            UNIT_COLUMNS
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or_else(|| StorageError::NotFound(format!("unit: {}", id)))?;

        row_to_unit(row)
    }

    async fn list_units(&self, task_id: TaskId) -> Result<Vec<ExecutionUnit>, StorageError> {
        let rows: Vec<UnitRow> = sqlx::query_as(&format!(
            "SELECT {} FROM task_results WHERE task_id = ? ORDER BY id",
            UNIT_COLUMNS
        ))
        .bind(task_id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(row_to_unit).collect()
    }

    async fn list_units_with_status(
        &self,
        task_id: TaskId,
        statuses: &[UnitStatus],
    ) -> Result<Vec<ExecutionUnit>, StorageError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM task_results WHERE task_id = ? AND status IN ({}) ORDER BY id",
            UNIT_COLUMNS, placeholders
        );

        let mut query = sqlx::query_as::<_, UnitRow>(&sql).bind(task_id.get());
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query.fetch_all(&self.pool).await.map_err(db_error)?;

        rows.into_iter().map(row_to_unit).collect()
    }

    async fn update_unit(&self, unit: ExecutionUnit) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE task_results SET status = ?, retry_count = ?, start_time = ?, end_time = ?,
                                    log_path = ?, error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(unit.status.as_str())
        .bind(i64::from(unit.retry_count))
        .bind(unit.start_time.map(to_millis))
        .bind(unit.end_time.map(to_millis))
        .bind(
            unit.log_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        )
        .bind(&unit.error_message)
        .bind(unit.id.get())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("unit: {}", unit.id)));
        }
        Ok(())
    }

    async fn stop_open_units(&self, task_id: TaskId) -> Result<u64, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE task_results SET status = 'error', error_message = ?
            WHERE task_id = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(STOPPED_BY_USER)
        .bind(task_id.get())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected())
    }
}
