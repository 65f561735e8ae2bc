//! Storage backend interface
//!
//! The repository never talks to a database directly. It describes what it
//! wants as a [`Query`] and hands it to a [`Storage`] implementation together
//! with rows expressed as JSON objects. Traits use RPITIT (Return Position
//! Impl Trait In Traits) so implementations can be written with plain
//! `async fn`.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryStore`](super::MemoryStore), an in-process engine
//! - `PgStore` (feature `database`), a PostgreSQL adapter built on `sqlx`

use std::collections::BTreeMap;
use std::future::Future;

use serde_json::{Map, Value};

use super::error::RepositoryError;
use crate::query::Query;

/// Result type for repository operations
pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// A stored record as a JSON object keyed by column name
pub type Row = Map<String, Value>;

/// Name of the primary key column every table carries
pub const ID_COLUMN: &str = "id";

/// Features a backend declares per table
///
/// Read once when a repository is constructed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Column holding the deletion marker when the table soft-deletes
    pub soft_delete_column: Option<String>,
}

impl Capabilities {
    pub fn soft_deletes(&self) -> bool {
        self.soft_delete_column.is_some()
    }
}

/// Kind of a declared relation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// Related rows point at this row: `related.foreign_key = this.id`
    HasMany,
    /// This row points at one related row: `this.foreign_key = related.id`
    BelongsTo,
}

/// A relation that can be eager-loaded by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub kind: RelationKind,
    /// Table holding the related rows
    pub table: String,
    pub foreign_key: String,
}

/// Declared shape of one table
///
/// ```rust
/// use crud_core::repository::TableSchema;
///
/// let users = TableSchema::new()
///     .unique(["email"])
///     .soft_deletes("deleted_at")
///     .has_many("posts", "posts", "user_id");
///
/// assert!(users.capabilities().soft_deletes());
/// assert!(users.relation("posts").is_some());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    unique_keys: Vec<Vec<String>>,
    soft_delete_column: Option<String>,
    relations: BTreeMap<String, Relation>,
}

impl TableSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a (possibly composite) unique key
    #[must_use]
    pub fn unique<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique_keys
            .push(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Mark deletes as soft deletes recorded in `column`
    #[must_use]
    pub fn soft_deletes(mut self, column: impl Into<String>) -> Self {
        self.soft_delete_column = Some(column.into());
        self
    }

    #[must_use]
    pub fn has_many(
        mut self,
        name: impl Into<String>,
        table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relations.insert(
            name.into(),
            Relation {
                kind: RelationKind::HasMany,
                table: table.into(),
                foreign_key: foreign_key.into(),
            },
        );
        self
    }

    #[must_use]
    pub fn belongs_to(
        mut self,
        name: impl Into<String>,
        table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relations.insert(
            name.into(),
            Relation {
                kind: RelationKind::BelongsTo,
                table: table.into(),
                foreign_key: foreign_key.into(),
            },
        );
        self
    }

    pub fn unique_keys(&self) -> &[Vec<String>] {
        &self.unique_keys
    }

    pub fn soft_delete_column(&self) -> Option<&str> {
        self.soft_delete_column.as_deref()
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.get(name)
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            soft_delete_column: self.soft_delete_column.clone(),
        }
    }
}

/// Executes query descriptions and row writes against a backend
pub trait Storage: Send + Sync {
    /// Declared features of `table`
    fn capabilities(&self, table: &str) -> Capabilities;

    /// Rows matching `query`, with its projection, relations, ordering and window applied
    fn fetch(&self, query: &Query) -> impl Future<Output = RepositoryResult<Vec<Row>>> + Send;

    /// Number of rows matching `query`, ignoring ordering and window
    fn count(&self, query: &Query) -> impl Future<Output = RepositoryResult<u64>> + Send;

    /// Insert every row, failing on the first uniqueness conflict; returns the new ids
    fn insert(
        &self,
        table: &str,
        rows: Vec<Row>,
    ) -> impl Future<Output = RepositoryResult<Vec<i64>>> + Send;

    /// Insert rows, skipping those that conflict; returns how many were inserted
    fn insert_or_ignore(
        &self,
        table: &str,
        rows: Vec<Row>,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send;

    /// Insert rows that match no existing row on `unique_by`; for the rest,
    /// overwrite `update_columns`. Returns the number of affected rows.
    fn upsert(
        &self,
        table: &str,
        rows: Vec<Row>,
        unique_by: &[String],
        update_columns: &[String],
    ) -> impl Future<Output = RepositoryResult<u64>> + Send;

    /// Apply `changes` to every row matching `query`; returns the number updated
    fn update(
        &self,
        query: &Query,
        changes: Row,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send;

    /// Remove every row matching `query`; returns the number removed
    fn delete(&self, query: &Query) -> impl Future<Output = RepositoryResult<u64>> + Send;
}

impl<S: Storage> Storage for &S {
    fn capabilities(&self, table: &str) -> Capabilities {
        (**self).capabilities(table)
    }

    fn fetch(&self, query: &Query) -> impl Future<Output = RepositoryResult<Vec<Row>>> + Send {
        (**self).fetch(query)
    }

    fn count(&self, query: &Query) -> impl Future<Output = RepositoryResult<u64>> + Send {
        (**self).count(query)
    }

    fn insert(
        &self,
        table: &str,
        rows: Vec<Row>,
    ) -> impl Future<Output = RepositoryResult<Vec<i64>>> + Send {
        (**self).insert(table, rows)
    }

    fn insert_or_ignore(
        &self,
        table: &str,
        rows: Vec<Row>,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send {
        (**self).insert_or_ignore(table, rows)
    }

    fn upsert(
        &self,
        table: &str,
        rows: Vec<Row>,
        unique_by: &[String],
        update_columns: &[String],
    ) -> impl Future<Output = RepositoryResult<u64>> + Send {
        (**self).upsert(table, rows, unique_by, update_columns)
    }

    fn update(
        &self,
        query: &Query,
        changes: Row,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send {
        (**self).update(query, changes)
    }

    fn delete(&self, query: &Query) -> impl Future<Output = RepositoryResult<u64>> + Send {
        (**self).delete(query)
    }
}

/// An open storage transaction
///
/// Dropping a transaction without committing rolls it back.
pub trait Transaction: Storage + Sized {
    fn commit(self) -> impl Future<Output = RepositoryResult<()>> + Send;

    fn rollback(self) -> impl Future<Output = RepositoryResult<()>> + Send;
}

/// A backend that can group writes atomically
pub trait TransactionalStorage: Storage {
    type Tx: Transaction;

    fn begin(&self) -> impl Future<Output = RepositoryResult<Self::Tx>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capabilities_hard_delete() {
        let caps = TableSchema::new().capabilities();
        assert!(!caps.soft_deletes());
        assert_eq!(caps, Capabilities::default());
    }

    #[test]
    fn test_schema_relations() {
        let schema = TableSchema::new()
            .has_many("posts", "posts", "user_id")
            .belongs_to("team", "teams", "team_id");

        let posts = schema.relation("posts").unwrap();
        assert_eq!(posts.kind, RelationKind::HasMany);
        assert_eq!(posts.table, "posts");
        assert_eq!(posts.foreign_key, "user_id");

        let team = schema.relation("team").unwrap();
        assert_eq!(team.kind, RelationKind::BelongsTo);
        assert!(schema.relation("comments").is_none());
    }

    #[test]
    fn test_schema_unique_keys() {
        let schema = TableSchema::new().unique(["email"]).unique(["org", "slug"]);
        assert_eq!(
            schema.unique_keys(),
            &[
                vec!["email".to_string()],
                vec!["org".to_string(), "slug".to_string()]
            ]
        );
    }
}
