use std::fmt;

use core_types::ParseEnumError;
use rusqlite::{ErrorCode, ffi};
use thiserror::Error;

/// Which write-time rule rejected a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintRule {
    Unique,
    Check,
    NotNull,
    AppendOnly,
}

impl fmt::Display for ConstraintRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConstraintRule::Unique => "unique",
            ConstraintRule::Check => "check",
            ConstraintRule::NotNull => "not_null",
            ConstraintRule::AppendOnly => "append_only",
        })
    }
}

/// A dependent table still referencing a row whose delete was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependent {
    pub table: &'static str,
    pub rows: u64,
}

impl fmt::Display for Dependent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.table, self.rows)
    }
}

fn format_blockers(blockers: &[Dependent]) -> String {
    if blockers.is_empty() {
        return String::new();
    }
    let names: Vec<String> = blockers.iter().map(ToString::to_string).collect();
    format!("; blocked by {}", names.join(", "))
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{rule} constraint violated on {table} (row {row}): {detail}")]
    ConstraintViolation {
        rule: ConstraintRule,
        table: String,
        row: String,
        detail: String,
    },

    #[error("referential integrity violated on {table} (row {row}): {detail}{}", format_blockers(.blockers))]
    ReferentialIntegrity {
        table: String,
        row: String,
        blockers: Vec<Dependent>,
        detail: String,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("database error: {0}")]
    Database(#[source] rusqlite::Error),

    #[error("corrupt value in {column}: {detail}")]
    Corrupt { column: &'static str, detail: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn constraint_rule(&self) -> Option<ConstraintRule> {
        match self {
            StoreError::ConstraintViolation { rule, .. } => Some(*rule),
            _ => None,
        }
    }

    pub fn is_referential(&self) -> bool {
        matches!(self, StoreError::ReferentialIntegrity { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        classify(err, None, "")
    }
}

impl From<ParseEnumError> for StoreError {
    fn from(err: ParseEnumError) -> Self {
        let table = err.column.split('.').next().unwrap_or(err.column);
        StoreError::ConstraintViolation {
            rule: ConstraintRule::Check,
            table: table.to_string(),
            row: err.value.clone(),
            detail: err.to_string(),
        }
    }
}

/// Maps a SQLite failure onto the store taxonomy, attributing it to `table`/`row`.
pub(crate) fn classify(
    err: rusqlite::Error,
    table: Option<&str>,
    row: impl fmt::Display,
) -> StoreError {
    let (extended_code, message) = match &err {
        rusqlite::Error::SqliteFailure(code, message)
            if code.code == ErrorCode::ConstraintViolation =>
        {
            (code.extended_code, message.clone())
        }
        _ => return StoreError::Database(err),
    };

    let detail = message.unwrap_or_else(|| err.to_string());
    let table = table
        .map(str::to_string)
        .or_else(|| table_from_message(&detail))
        .unwrap_or_else(|| "unknown".to_string());
    let row = row.to_string();

    let rule = match extended_code {
        ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => ConstraintRule::Unique,
        ffi::SQLITE_CONSTRAINT_CHECK => ConstraintRule::Check,
        ffi::SQLITE_CONSTRAINT_NOTNULL => ConstraintRule::NotNull,
        ffi::SQLITE_CONSTRAINT_TRIGGER => ConstraintRule::AppendOnly,
        ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
            return StoreError::ReferentialIntegrity {
                table,
                row,
                blockers: Vec::new(),
                detail,
            };
        }
        _ => return StoreError::Database(err),
    };

    StoreError::ConstraintViolation {
        rule,
        table,
        row,
        detail,
    }
}

// "UNIQUE constraint failed: users.email" -> "users"
fn table_from_message(message: &str) -> Option<String> {
    let (prefix, columns) = message.split_once(": ")?;
    if !(prefix.starts_with("UNIQUE") || prefix.starts_with("NOT NULL")) {
        return None;
    }
    let (table, _) = columns.split_once('.')?;
    Some(table.trim().to_string())
}
