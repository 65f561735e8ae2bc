//! Repository error types
//!
//! Every storage failure surfaces as a [`RepositoryError`] tagged with the
//! repository operation that was running and a coarse [`RepositoryErrorKind`].
//! The error classifier only looks at the kind; the operation and entity
//! context exist for logs.
//!
//! ```rust
//! use crud_core::repository::{RepositoryError, RepositoryErrorKind, RepositoryOperation};
//!
//! let error = RepositoryError::conflict(RepositoryOperation::Create, "duplicate key")
//!     .with_entity("users", "7");
//! assert_eq!(error.kind, RepositoryErrorKind::AlreadyExists);
//! assert_eq!(
//!     error.to_string(),
//!     "repository already_exists error during create: duplicate key [users: 7]"
//! );
//! ```

use std::fmt;

/// Repository operation running when the error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryOperation {
    All,
    Find,
    Create,
    Insert,
    Update,
    Delete,
    DeleteAll,
    Paginate,
    InsertOrIgnore,
    UpdateOrCreate,
    Upsert,
    UpsertOrDelete,
    FindByCondition,
    UpdateWithCondition,
    DeleteByCondition,
    /// Begin, commit or rollback
    Transaction,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::All => "all",
            Self::Find => "find",
            Self::Create => "create",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::DeleteAll => "delete_all",
            Self::Paginate => "paginate",
            Self::InsertOrIgnore => "insert_or_ignore",
            Self::UpdateOrCreate => "update_or_create",
            Self::Upsert => "upsert",
            Self::UpsertOrDelete => "upsert_or_delete",
            Self::FindByCondition => "find_by_condition",
            Self::UpdateWithCondition => "update_with_condition",
            Self::DeleteByCondition => "delete_by_condition",
            Self::Transaction => "transaction",
        };
        f.write_str(name)
    }
}

/// Category of repository error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryErrorKind {
    /// Entity was not found
    NotFound,
    /// Duplicate key
    AlreadyExists,
    /// Foreign key, check or not-null constraint failed
    ConstraintViolation,
    /// Input rejected before reaching storage
    ValidationFailed,
    /// Storage unreachable
    ConnectionFailed,
    /// Storage did not answer in time
    Timeout,
    /// Any other storage failure
    DatabaseError,
    /// Row could not be converted to or from an entity
    SerializationError,
    Other,
}

impl RepositoryErrorKind {
    /// Duplicate-key and constraint failures
    pub fn is_constraint(self) -> bool {
        matches!(self, Self::AlreadyExists | Self::ConstraintViolation)
    }
}

impl fmt::Display for RepositoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::ConstraintViolation => "constraint_violation",
            Self::ValidationFailed => "validation_failed",
            Self::ConnectionFailed => "connection_failed",
            Self::Timeout => "timeout",
            Self::DatabaseError => "database_error",
            Self::SerializationError => "serialization_error",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Structured storage failure with operation and entity context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryError {
    pub operation: RepositoryOperation,
    pub kind: RepositoryErrorKind,
    pub message: String,
    /// Table the operation targeted
    pub entity_type: Option<String>,
    /// Id or identifier values of the affected row
    pub entity_id: Option<String>,
}

impl RepositoryError {
    pub fn new(
        operation: RepositoryOperation,
        kind: RepositoryErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
            entity_type: None,
            entity_id: None,
        }
    }

    /// Row `id` of `table` does not exist
    pub fn not_found(
        operation: RepositoryOperation,
        table: impl Into<String>,
        id: impl fmt::Display,
    ) -> Self {
        Self::new(operation, RepositoryErrorKind::NotFound, "entity not found")
            .with_entity(table, id.to_string())
    }

    /// Duplicate key
    pub fn conflict(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::AlreadyExists, message)
    }

    pub fn constraint_violation(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::ConstraintViolation, message)
    }

    pub fn validation_failed(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::ValidationFailed, message)
    }

    pub fn connection_failed(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::ConnectionFailed, message)
    }

    pub fn timeout(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::Timeout, message)
    }

    pub fn database(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::DatabaseError, message)
    }

    /// Row/entity conversion failure
    pub fn serialization(operation: RepositoryOperation, error: impl fmt::Display) -> Self {
        Self::new(
            operation,
            RepositoryErrorKind::SerializationError,
            error.to_string(),
        )
    }

    #[must_use]
    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Attach the table without an id
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.entity_type = Some(table.into());
        self
    }

    /// Re-tag an error raised by a lower-level call
    #[must_use]
    pub fn with_operation(mut self, operation: RepositoryOperation) -> Self {
        self.operation = operation;
        self
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "repository {} error during {}: {}",
            self.kind, self.operation, self.message
        )?;
        match (&self.entity_type, &self.entity_id) {
            (Some(entity_type), Some(entity_id)) => write!(f, " [{entity_type}: {entity_id}]"),
            (Some(entity_type), None) => write!(f, " [{entity_type}]"),
            _ => Ok(()),
        }
    }
}

impl std::error::Error for RepositoryError {}
