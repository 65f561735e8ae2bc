//! In-process storage backend
//!
//! Tables live in memory behind a lock. Every write goes through a single
//! async write gate, so writers are serialized and a transaction can stage
//! its changes on a private copy of the tables while holding the gate.
//! Commit swaps the copy in; dropping the transaction discards it.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;
use tokio::sync::OwnedMutexGuard;

use super::error::{RepositoryError, RepositoryOperation};
use super::storage::{
    Capabilities, RelationKind, RepositoryResult, Row, Storage, TableSchema, Transaction,
    TransactionalStorage, ID_COLUMN,
};
use crate::query::{Condition, FilterCondition, FilterOperator, FilterValue, OrderDirection, Query};

#[derive(Debug, Clone)]
struct Table {
    schema: TableSchema,
    rows: BTreeMap<i64, Row>,
    next_id: i64,
}

impl Table {
    fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Id of a row other than `except` sharing a unique key with `row`
    fn conflicting(&self, row: &Row, except: Option<i64>) -> Option<i64> {
        self.schema.unique_keys().iter().find_map(|key| {
            let wanted: Option<Vec<&Value>> = key
                .iter()
                .map(|column| row.get(column).filter(|v| !v.is_null()))
                .collect();
            let wanted = wanted?;

            self.rows
                .iter()
                .filter(|(id, _)| Some(**id) != except)
                .find(|(_, existing)| {
                    key.iter()
                        .zip(&wanted)
                        .all(|(column, value)| existing.get(column).is_some_and(|v| loose_eq(v, value)))
                })
                .map(|(id, _)| *id)
        })
    }

    /// Store `row`, assigning an id when it has none
    fn put(&mut self, mut row: Row, operation: RepositoryOperation) -> RepositoryResult<Option<i64>> {
        let id = match row.get(ID_COLUMN).and_then(Value::as_i64) {
            Some(id) if self.rows.contains_key(&id) => return Ok(None),
            Some(id) => id,
            None => self.next_id,
        };
        row.insert(ID_COLUMN.to_string(), Value::from(id));

        if self.conflicting(&row, Some(id)).is_some() {
            return Ok(None);
        }

        if id <= 0 {
            return Err(RepositoryError::validation_failed(
                operation,
                format!("id must be positive, got {id}"),
            ));
        }

        let following = id.checked_add(1).ok_or_else(|| {
            RepositoryError::validation_failed(operation, format!("id {id} leaves no room for another row"))
        })?;
        self.next_id = self.next_id.max(following);
        self.rows.insert(id, row);
        Ok(Some(id))
    }

    fn matching_ids(&self, conditions: &[Condition]) -> Vec<i64> {
        self.rows
            .iter()
            .filter(|(_, row)| conditions.iter().all(|c| condition_matches(c, row)))
            .map(|(id, _)| *id)
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
struct Tables {
    tables: BTreeMap<String, Table>,
}

impl Tables {
    fn table_mut(&mut self, name: &str) -> &mut Table {
        self.tables
            .entry(name.to_string())
            .or_insert_with(|| Table::new(TableSchema::default()))
    }

    fn capabilities(&self, table: &str) -> Capabilities {
        self.tables
            .get(table)
            .map(|t| t.schema.capabilities())
            .unwrap_or_default()
    }

    fn fetch(&self, query: &Query) -> RepositoryResult<Vec<Row>> {
        let Some(table) = self.tables.get(query.table_name()) else {
            return Ok(Vec::new());
        };

        let conditions = query.effective_conditions();
        let mut rows: Vec<&Row> = table
            .rows
            .values()
            .filter(|row| conditions.iter().all(|c| condition_matches(c, row)))
            .collect();

        for (field, direction) in query.ordering().iter().rev() {
            rows.sort_by(|a, b| {
                let ordering = order_values(a.get(field), b.get(field));
                match direction {
                    OrderDirection::Ascending => ordering,
                    OrderDirection::Descending => ordering.reverse(),
                }
            });
        }

        let mut rows: Vec<Row> = match query.pagination() {
            Some(window) => rows
                .into_iter()
                .skip(usize::try_from(window.offset).unwrap_or(usize::MAX))
                .take(usize::try_from(window.limit).unwrap_or(usize::MAX))
                .cloned()
                .collect(),
            None => rows.into_iter().cloned().collect(),
        };

        for relation in query.relations() {
            self.load_relation(table, query.table_name(), relation, &mut rows)?;
        }

        if !query.columns().is_empty() {
            for row in &mut rows {
                row.retain(|key, _| {
                    query.columns().iter().any(|c| c == key)
                        || query.relations().iter().any(|r| r == key)
                });
            }
        }

        Ok(rows)
    }

    /// Attach `name` to every row with one pass over the related table
    fn load_relation(
        &self,
        table: &Table,
        table_name: &str,
        name: &str,
        rows: &mut [Row],
    ) -> RepositoryResult<()> {
        let relation = table.schema.relation(name).ok_or_else(|| {
            RepositoryError::validation_failed(
                RepositoryOperation::Find,
                format!("undefined relation '{name}'"),
            )
            .with_table(table_name)
        })?;

        let related: Vec<&Row> = match self.tables.get(&relation.table) {
            Some(related) => {
                let scope = Query::table(&relation.table);
                let scope = match related.schema.capabilities().soft_delete_column {
                    Some(column) => scope.soft_deletes(column),
                    None => scope,
                };
                let conditions = scope.effective_conditions();
                related
                    .rows
                    .values()
                    .filter(|row| conditions.iter().all(|c| condition_matches(c, row)))
                    .collect()
            }
            None => Vec::new(),
        };

        match relation.kind {
            RelationKind::HasMany => {
                let mut grouped: HashMap<i64, Vec<Value>> = HashMap::new();
                for row in related {
                    if let Some(owner) = row.get(&relation.foreign_key).and_then(Value::as_i64) {
                        grouped
                            .entry(owner)
                            .or_default()
                            .push(Value::Object(row.clone()));
                    }
                }
                for row in rows.iter_mut() {
                    let children = row
                        .get(ID_COLUMN)
                        .and_then(Value::as_i64)
                        .and_then(|id| grouped.get(&id).cloned())
                        .unwrap_or_default();
                    row.insert(name.to_string(), Value::Array(children));
                }
            }
            RelationKind::BelongsTo => {
                let by_id: HashMap<i64, &Row> = related
                    .into_iter()
                    .filter_map(|row| row.get(ID_COLUMN).and_then(Value::as_i64).map(|id| (id, row)))
                    .collect();
                for row in rows.iter_mut() {
                    let parent = row
                        .get(&relation.foreign_key)
                        .and_then(Value::as_i64)
                        .and_then(|id| by_id.get(&id))
                        .map(|parent| Value::Object((*parent).clone()))
                        .unwrap_or(Value::Null);
                    row.insert(name.to_string(), parent);
                }
            }
        }

        Ok(())
    }

    fn count(&self, query: &Query) -> u64 {
        self.tables.get(query.table_name()).map_or(0, |table| {
            table.matching_ids(&query.effective_conditions()).len() as u64
        })
    }

    fn insert(&mut self, table: &str, rows: Vec<Row>) -> RepositoryResult<Vec<i64>> {
        let mut staged = self.table_mut(table).clone();
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            match staged.put(row, RepositoryOperation::Insert)? {
                Some(id) => ids.push(id),
                None => {
                    return Err(RepositoryError::conflict(
                        RepositoryOperation::Insert,
                        "duplicate key value violates unique constraint",
                    )
                    .with_table(table))
                }
            }
        }
        *self.table_mut(table) = staged;
        Ok(ids)
    }

    fn insert_or_ignore(&mut self, table: &str, rows: Vec<Row>) -> RepositoryResult<u64> {
        let mut staged = self.table_mut(table).clone();
        let mut inserted = 0;
        for row in rows {
            if staged.put(row, RepositoryOperation::InsertOrIgnore)?.is_some() {
                inserted += 1;
            }
        }
        *self.table_mut(table) = staged;
        Ok(inserted)
    }

    fn upsert(
        &mut self,
        table: &str,
        rows: Vec<Row>,
        unique_by: &[String],
        update_columns: &[String],
    ) -> RepositoryResult<u64> {
        let mut staged = self.table_mut(table).clone();
        let mut affected = 0;

        for row in rows {
            let existing = staged
                .rows
                .iter()
                .find(|(_, existing)| {
                    unique_by.iter().all(|column| match (existing.get(column), row.get(column)) {
                        (Some(a), Some(b)) => !b.is_null() && loose_eq(a, b),
                        _ => false,
                    })
                })
                .map(|(id, _)| *id);

            match existing {
                Some(id) => {
                    let mut updated = staged.rows.get(&id).cloned().unwrap_or_default();
                    for column in update_columns.iter().filter(|c| *c != ID_COLUMN) {
                        if let Some(value) = row.get(column) {
                            updated.insert(column.clone(), value.clone());
                        }
                    }
                    if staged.conflicting(&updated, Some(id)).is_some() {
                        return Err(RepositoryError::conflict(
                            RepositoryOperation::Upsert,
                            "update would duplicate a unique key",
                        )
                        .with_entity(table, id.to_string()));
                    }
                    staged.rows.insert(id, updated);
                }
                None => {
                    if staged.put(row, RepositoryOperation::Upsert)?.is_none() {
                        return Err(RepositoryError::conflict(
                            RepositoryOperation::Upsert,
                            "duplicate key value violates unique constraint",
                        )
                        .with_table(table));
                    }
                }
            }
            affected += 1;
        }

        *self.table_mut(table) = staged;
        Ok(affected)
    }

    fn update(&mut self, query: &Query, changes: Row) -> RepositoryResult<u64> {
        let Some(table) = self.tables.get_mut(query.table_name()) else {
            return Ok(0);
        };

        let ids = table.matching_ids(&query.effective_conditions());
        let mut staged = table.clone();
        for id in &ids {
            let Some(mut row) = staged.rows.get(id).cloned() else {
                continue;
            };
            for (column, value) in &changes {
                if column != ID_COLUMN {
                    row.insert(column.clone(), value.clone());
                }
            }
            if staged.conflicting(&row, Some(*id)).is_some() {
                return Err(RepositoryError::conflict(
                    RepositoryOperation::Update,
                    "update would duplicate a unique key",
                )
                .with_entity(query.table_name(), id.to_string()));
            }
            staged.rows.insert(*id, row);
        }

        *table = staged;
        Ok(ids.len() as u64)
    }

    fn delete(&mut self, query: &Query) -> u64 {
        let Some(table) = self.tables.get_mut(query.table_name()) else {
            return 0;
        };
        let ids = table.matching_ids(&query.effective_conditions());
        for id in &ids {
            table.rows.remove(id);
        }
        ids.len() as u64
    }
}

/// In-memory [`Storage`] with declared schemas and snapshot transactions
///
/// ```rust
/// use crud_core::repository::{MemoryStore, TableSchema};
///
/// let store = MemoryStore::new()
///     .with_table("users", TableSchema::new().unique(["email"]).soft_deletes("deleted_at"))
///     .with_table("posts", TableSchema::new());
/// assert!(store.schema("users").is_some());
/// ```
///
/// Cloning is cheap; clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<Tables>>,
    write_gate: Arc<tokio::sync::Mutex<()>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a table (builder style)
    #[must_use]
    pub fn with_table(self, name: impl Into<String>, schema: TableSchema) -> Self {
        self.define(name, schema);
        self
    }

    /// Declare or redeclare a table, keeping any rows it already holds
    pub fn define(&self, name: impl Into<String>, schema: TableSchema) {
        let mut tables = self.write();
        let name = name.into();
        match tables.tables.get_mut(&name) {
            Some(table) => table.schema = schema,
            None => {
                tables.tables.insert(name, Table::new(schema));
            }
        }
    }

    pub fn schema(&self, table: &str) -> Option<TableSchema> {
        self.read().tables.get(table).map(|t| t.schema.clone())
    }

    /// Every stored row of `table` in id order, soft-deleted rows included
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.read()
            .tables
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for MemoryStore {
    fn capabilities(&self, table: &str) -> Capabilities {
        self.read().capabilities(table)
    }

    async fn fetch(&self, query: &Query) -> RepositoryResult<Vec<Row>> {
        self.read().fetch(query)
    }

    async fn count(&self, query: &Query) -> RepositoryResult<u64> {
        Ok(self.read().count(query))
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> RepositoryResult<Vec<i64>> {
        let _gate = self.write_gate.lock().await;
        self.write().insert(table, rows)
    }

    async fn insert_or_ignore(&self, table: &str, rows: Vec<Row>) -> RepositoryResult<u64> {
        let _gate = self.write_gate.lock().await;
        self.write().insert_or_ignore(table, rows)
    }

    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Row>,
        unique_by: &[String],
        update_columns: &[String],
    ) -> RepositoryResult<u64> {
        let _gate = self.write_gate.lock().await;
        self.write().upsert(table, rows, unique_by, update_columns)
    }

    async fn update(&self, query: &Query, changes: Row) -> RepositoryResult<u64> {
        let _gate = self.write_gate.lock().await;
        self.write().update(query, changes)
    }

    async fn delete(&self, query: &Query) -> RepositoryResult<u64> {
        let _gate = self.write_gate.lock().await;
        Ok(self.write().delete(query))
    }
}

/// Transaction over a [`MemoryStore`]
///
/// Holds the store's write gate until committed or dropped, so other writers
/// wait. Readers outside the transaction keep seeing the committed tables.
#[derive(Debug)]
pub struct MemoryTransaction {
    store: MemoryStore,
    staged: Mutex<Tables>,
    _gate: OwnedMutexGuard<()>,
}

impl MemoryTransaction {
    fn staged(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.staged.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TransactionalStorage for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> RepositoryResult<MemoryTransaction> {
        let gate = Arc::clone(&self.write_gate).lock_owned().await;
        let staged = self.read().clone();
        Ok(MemoryTransaction {
            store: self.clone(),
            staged: Mutex::new(staged),
            _gate: gate,
        })
    }
}

impl Storage for MemoryTransaction {
    fn capabilities(&self, table: &str) -> Capabilities {
        self.staged().capabilities(table)
    }

    async fn fetch(&self, query: &Query) -> RepositoryResult<Vec<Row>> {
        self.staged().fetch(query)
    }

    async fn count(&self, query: &Query) -> RepositoryResult<u64> {
        Ok(self.staged().count(query))
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> RepositoryResult<Vec<i64>> {
        self.staged().insert(table, rows)
    }

    async fn insert_or_ignore(&self, table: &str, rows: Vec<Row>) -> RepositoryResult<u64> {
        self.staged().insert_or_ignore(table, rows)
    }

    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Row>,
        unique_by: &[String],
        update_columns: &[String],
    ) -> RepositoryResult<u64> {
        self.staged().upsert(table, rows, unique_by, update_columns)
    }

    async fn update(&self, query: &Query, changes: Row) -> RepositoryResult<u64> {
        self.staged().update(query, changes)
    }

    async fn delete(&self, query: &Query) -> RepositoryResult<u64> {
        Ok(self.staged().delete(query))
    }
}

impl Transaction for MemoryTransaction {
    async fn commit(self) -> RepositoryResult<()> {
        let staged = self.staged.into_inner().unwrap_or_else(PoisonError::into_inner);
        *self.store.write() = staged;
        Ok(())
    }

    async fn rollback(self) -> RepositoryResult<()> {
        Ok(())
    }
}

fn condition_matches(condition: &Condition, row: &Row) -> bool {
    match condition {
        Condition::Field(filter) => filter_matches(filter, row),
        Condition::Any(groups) => groups
            .iter()
            .any(|group| group.iter().all(|filter| filter_matches(filter, row))),
    }
}

fn filter_matches(filter: &FilterCondition, row: &Row) -> bool {
    let value = row.get(&filter.field).filter(|v| !v.is_null());

    match (filter.operator, &filter.value, value) {
        (FilterOperator::IsNull, _, value) => value.is_none(),
        (FilterOperator::IsNotNull, _, value) => value.is_some(),
        // null never compares equal, in or out of a set
        (_, _, None) => false,
        (FilterOperator::Equal, FilterValue::Value(expected), Some(value)) => {
            loose_eq(value, expected)
        }
        (FilterOperator::In, FilterValue::List(candidates), Some(value)) => {
            candidates.iter().any(|c| loose_eq(value, c))
        }
        (FilterOperator::NotIn, FilterValue::List(candidates), Some(value)) => {
            !candidates.iter().any(|c| loose_eq(value, c))
        }
        (FilterOperator::Between, FilterValue::Range(lower, upper), Some(value)) => {
            matches!(compare(lower, value), Some(Ordering::Less | Ordering::Equal))
                && matches!(compare(value, upper), Some(Ordering::Less | Ordering::Equal))
        }
        (FilterOperator::DateEquals, FilterValue::Date(date), Some(value)) => {
            calendar_date(value) == Some(*date)
        }
        _ => false,
    }
}

/// Equality that treats `1` and `1.0` as the same number
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Total order for sorting; nulls first, then by JSON type
fn order_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Object(_)) => 5,
        }
    }

    match (a, b) {
        (Some(x), Some(y)) => compare(x, y).unwrap_or_else(|| rank(a).cmp(&rank(b))),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Calendar date of a stored timestamp or date string
fn calendar_date(value: &Value) -> Option<NaiveDate> {
    let text = value.as_str()?;
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(text) {
        return Some(timestamp.date_naive());
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(timestamp) = NaiveDateTime::parse_from_str(text, format) {
            return Some(timestamp.date());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Pagination;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn store() -> MemoryStore {
        MemoryStore::new()
            .with_table(
                "users",
                TableSchema::new()
                    .unique(["email"])
                    .soft_deletes("deleted_at")
                    .has_many("posts", "posts", "user_id"),
            )
            .with_table(
                "posts",
                TableSchema::new().belongs_to("author", "users", "user_id"),
            )
    }

    #[tokio::test]
    async fn test_insert_assigns_sequential_ids() {
        let store = store();
        let ids = store
            .insert(
                "users",
                vec![row(json!({"email": "a@x"})), row(json!({"email": "b@x"}))],
            )
            .await
            .unwrap();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(store.rows("users")[1]["id"], json!(2));
    }

    #[tokio::test]
    async fn test_insert_conflict_is_atomic() {
        let store = store();
        store
            .insert("users", vec![row(json!({"email": "a@x"}))])
            .await
            .unwrap();

        let err = store
            .insert(
                "users",
                vec![row(json!({"email": "b@x"})), row(json!({"email": "a@x"}))],
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind, super::super::RepositoryErrorKind::AlreadyExists);
        assert_eq!(store.rows("users").len(), 1);
    }

    #[tokio::test]
    async fn test_insert_or_ignore_skips_conflicts() {
        let store = store();
        store
            .insert("users", vec![row(json!({"email": "a@x"}))])
            .await
            .unwrap();

        let inserted = store
            .insert_or_ignore(
                "users",
                vec![
                    row(json!({"email": "a@x"})),
                    row(json!({"email": "b@x"})),
                    row(json!({"id": 1, "email": "c@x"})),
                ],
            )
            .await
            .unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(store.rows("users").len(), 2);
    }

    #[tokio::test]
    async fn test_insert_or_ignore_failure_keeps_table() {
        let store = store();
        let err = store
            .insert_or_ignore(
                "users",
                vec![row(json!({"email": "a@x"})), row(json!({"id": -4, "email": "b@x"}))],
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind, super::super::RepositoryErrorKind::ValidationFailed);
        assert!(store.rows("users").is_empty());
    }

    #[tokio::test]
    async fn test_largest_id_is_rejected() {
        let store = store();
        let err = store
            .insert("users", vec![row(json!({"id": i64::MAX, "email": "a@x"}))])
            .await
            .unwrap_err();

        assert_eq!(err.kind, super::super::RepositoryErrorKind::ValidationFailed);
        assert!(store.rows("users").is_empty());
    }

    #[tokio::test]
    async fn test_fetch_scopes_soft_deleted_rows() {
        let store = store();
        store
            .insert(
                "users",
                vec![
                    row(json!({"email": "a@x", "deleted_at": null})),
                    row(json!({"email": "b@x", "deleted_at": "2024-01-01T00:00:00Z"})),
                ],
            )
            .await
            .unwrap();

        let scoped = Query::table("users").soft_deletes("deleted_at");
        assert_eq!(store.fetch(&scoped).await.unwrap().len(), 1);
        assert_eq!(store.fetch(&scoped.with_trashed()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_orders_windows_and_projects() {
        let store = store();
        for email in ["a@x", "b@x", "c@x", "d@x"] {
            store
                .insert("users", vec![row(json!({"email": email, "age": 20}))])
                .await
                .unwrap();
        }

        let query = Query::table("users")
            .select(&["id"])
            .order_by("id", OrderDirection::Descending)
            .paginate(Pagination::page(2, 3));

        let rows = store.fetch(&query).await.unwrap();
        assert_eq!(rows, vec![row(json!({"id": 1}))]);
    }

    #[tokio::test]
    async fn test_relations_are_attached() {
        let store = store();
        store
            .insert("users", vec![row(json!({"email": "a@x"})), row(json!({"email": "b@x"}))])
            .await
            .unwrap();
        store
            .insert(
                "posts",
                vec![
                    row(json!({"user_id": 1, "title": "one"})),
                    row(json!({"user_id": 1, "title": "two"})),
                ],
            )
            .await
            .unwrap();

        let users = store
            .fetch(&Query::table("users").with(&["posts"]))
            .await
            .unwrap();
        assert_eq!(users[0]["posts"].as_array().unwrap().len(), 2);
        assert_eq!(users[1]["posts"], json!([]));

        let posts = store
            .fetch(&Query::table("posts").with(&["author"]))
            .await
            .unwrap();
        assert_eq!(posts[0]["author"]["email"], json!("a@x"));
    }

    #[tokio::test]
    async fn test_unknown_relation_is_rejected() {
        let store = store();
        store
            .insert("users", vec![row(json!({"email": "a@x"}))])
            .await
            .unwrap();

        let err = store
            .fetch(&Query::table("users").with(&["comments"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, super::super::RepositoryErrorKind::ValidationFailed);
    }

    #[tokio::test]
    async fn test_upsert_updates_only_listed_columns() {
        let store = store();
        store
            .insert("users", vec![row(json!({"email": "a@x", "name": "A", "age": 1}))])
            .await
            .unwrap();

        let affected = store
            .upsert(
                "users",
                vec![
                    row(json!({"email": "a@x", "name": "A2", "age": 99})),
                    row(json!({"email": "b@x", "name": "B", "age": 2})),
                ],
                &["email".to_string()],
                &["name".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(affected, 2);
        let rows = store.rows("users");
        assert_eq!(rows[0]["name"], json!("A2"));
        assert_eq!(rows[0]["age"], json!(1));
        assert_eq!(rows[1]["email"], json!("b@x"));
    }

    #[tokio::test]
    async fn test_transaction_commit_and_drop() {
        let store = store();

        let tx = store.begin().await.unwrap();
        tx.insert("users", vec![row(json!({"email": "a@x"}))])
            .await
            .unwrap();
        assert!(store.rows("users").is_empty());
        tx.commit().await.unwrap();
        assert_eq!(store.rows("users").len(), 1);

        {
            let tx = store.begin().await.unwrap();
            tx.delete(&Query::table("users")).await.unwrap();
        }
        assert_eq!(store.rows("users").len(), 1);
    }

    #[test]
    fn test_filter_semantics() {
        let r = row(json!({
            "age": 25,
            "name": "mia",
            "parent": null,
            "created_at": "2024-03-05T23:59:59Z"
        }));

        assert!(filter_matches(&FilterCondition::eq("age", 25.0), &r));
        assert!(filter_matches(&FilterCondition::is_in("name", vec![json!("mia")]), &r));
        assert!(!filter_matches(&FilterCondition::not_in("name", vec![json!("mia")]), &r));
        assert!(!filter_matches(&FilterCondition::not_in("parent", vec![json!(1)]), &r));
        assert!(filter_matches(&FilterCondition::between("age", json!(25), json!(30)), &r));
        assert!(!filter_matches(&FilterCondition::between("age", json!(26), json!(30)), &r));
        assert!(filter_matches(&FilterCondition::is_null("parent"), &r));
        assert!(filter_matches(&FilterCondition::is_null("missing"), &r));
        assert!(filter_matches(
            &FilterCondition::date("created_at", NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()),
            &r
        ));
        assert!(!filter_matches(&FilterCondition::is_in("age", vec![]), &r));
    }

    #[test]
    fn test_any_condition() {
        let r = row(json!({"a": 1, "b": 2}));
        let hit = Condition::Any(vec![
            vec![FilterCondition::eq("a", 9)],
            vec![FilterCondition::eq("a", 1), FilterCondition::eq("b", 2)],
        ]);
        assert!(condition_matches(&hit, &r));
        assert!(!condition_matches(&Condition::Any(vec![]), &r));
    }

    #[test]
    fn test_calendar_date_formats() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(calendar_date(&json!("2024-01-02")), Some(date));
        assert_eq!(calendar_date(&json!("2024-01-02 10:11:12")), Some(date));
        assert_eq!(calendar_date(&json!("2024-01-02T10:11:12.5")), Some(date));
        assert_eq!(calendar_date(&json!("2024-01-02T10:11:12+05:00")), Some(date));
        assert_eq!(calendar_date(&json!(20240102)), None);
    }
}
