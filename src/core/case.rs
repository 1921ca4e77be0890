//! Script catalog entries.
//!
//! The engine only reads the catalog: a [`Case`] tells it which script to run
//! for an execution unit, and categories determine the default unit order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::types::{CaseId, CategoryId};

/// Risk classification of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::High => "high",
            RiskLevel::Medium => "medium",
            RiskLevel::Low => "low",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(RiskLevel::High),
            "medium" => Ok(RiskLevel::Medium),
            "low" => Ok(RiskLevel::Low),
            other => Err(format!("unknown risk level: {}", other)),
        }
    }
}

/// Requested position of a category.
///
/// `Unset` asks storage to append after the current maximum; `Explicit(0)` is
/// a real position, not a request for auto-assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Unset,
    Explicit(i32),
}

impl SortOrder {
    /// Resolve against the highest order already in use.
    pub fn resolve(self, current_max: Option<i32>) -> i32 {
        match self {
            SortOrder::Explicit(order) => order,
            SortOrder::Unset => current_max.map_or(0, |max| max + 1),
        }
    }
}

impl From<Option<i32>> for SortOrder {
    fn from(value: Option<i32>) -> Self {
        value.map_or(SortOrder::Unset, SortOrder::Explicit)
    }
}

/// A case category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    /// Resolved position; categories sort by `(sort_order, id)`.
    pub sort_order: i32,
}

/// A detection case backed by a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    pub id: CaseId,
    pub name: String,
    pub category_id: CategoryId,
    pub risk_level: RiskLevel,
    /// Script location relative to the configured scripts root.
    pub script_path: PathBuf,
    pub enabled: bool,
    pub description: Option<String>,
    pub fix_suggestion: Option<String>,
}

impl Case {
    /// Create an enabled case. The id is assigned by storage on insert.
    pub fn new(
        name: impl Into<String>,
        category_id: CategoryId,
        risk_level: RiskLevel,
        script_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: CaseId::new(0),
            name: name.into(),
            category_id,
            risk_level,
            script_path: script_path.into(),
            enabled: true,
            description: None,
            fix_suggestion: None,
        }
    }

    /// Set enabled status.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_fix_suggestion(mut self, fix: impl Into<String>) -> Self {
        self.fix_suggestion = Some(fix.into());
        self
    }
}
