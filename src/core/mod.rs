//! Core domain types: identifiers, task and unit records, catalog entries.

pub mod case;
pub mod task;
pub mod types;
