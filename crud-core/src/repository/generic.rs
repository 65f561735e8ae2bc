//! Generic repository over any entity and storage backend

use std::marker::PhantomData;

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::error::{RepositoryError, RepositoryOperation};
use super::page::Page;
use super::storage::{
    Capabilities, RepositoryResult, Row, Storage, Transaction, TransactionalStorage, ID_COLUMN,
};
use crate::query::{
    ConditionQueryBuilder, FilterCondition, OrderDirection, Pagination, Query, QuerySpec,
};

/// Column stamped when a row is created
pub const CREATED_AT: &str = "created_at";
/// Column stamped whenever a row is written
pub const UPDATED_AT: &str = "updated_at";

/// A record type bound to a table
///
/// Entities round-trip through [`Row`]s with serde, so field names are column
/// names. Every table has an integer `id` primary key.
///
/// ```rust
/// use crud_core::repository::Entity;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct Tag {
///     id: i64,
///     label: String,
/// }
///
/// impl Entity for Tag {
///     const TABLE: &'static str = "tags";
///     const TIMESTAMPS: bool = false;
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    const TABLE: &'static str;

    /// Whether writes stamp `created_at`/`updated_at`
    const TIMESTAMPS: bool = true;
}

/// Convert any serializable value into a [`Row`]
pub fn to_row<T: Serialize>(value: &T) -> RepositoryResult<Row> {
    match serde_json::to_value(value) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(other) => Err(RepositoryError::serialization(
            RepositoryOperation::Insert,
            format!("expected a JSON object, got {other}"),
        )),
        Err(e) => Err(RepositoryError::serialization(RepositoryOperation::Insert, e)),
    }
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// CRUD, pagination, upsert and condition queries for one entity type
///
/// Soft deletion is decided once, from the backend's declared
/// [`Capabilities`] for `E::TABLE`: when supported, default queries exclude
/// deleted rows and deletes set the marker column instead of removing rows.
///
/// # Example
///
/// ```rust
/// use crud_core::query::QuerySpec;
/// use crud_core::repository::{to_row, Entity, GenericRepository, MemoryStore, TableSchema};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct User {
///     id: i64,
///     email: String,
///     status: i64,
/// }
///
/// impl Entity for User {
///     const TABLE: &'static str = "users";
///     const TIMESTAMPS: bool = false;
/// }
///
/// # tokio_test_block(async {
/// let store = MemoryStore::new().with_table("users", TableSchema::new().unique(["email"]));
/// let users = GenericRepository::<User, _>::new(store);
///
/// let attributes = to_row(&serde_json::json!({"email": "a@example.com", "status": 1})).unwrap();
/// let created = users.create(attributes).await.unwrap();
/// assert_eq!(created.id, 1);
///
/// let spec = QuerySpec::builder().equals("status", 1).build().unwrap();
/// assert_eq!(users.find_by_condition(&[], &spec).await.unwrap().len(), 1);
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct GenericRepository<E, S> {
    storage: S,
    capabilities: Capabilities,
    builder: ConditionQueryBuilder,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity, S: Storage> GenericRepository<E, S> {
    pub fn new(storage: S) -> Self {
        let capabilities = storage.capabilities(E::TABLE);
        let builder = match &capabilities.soft_delete_column {
            Some(column) => ConditionQueryBuilder::new().with_soft_deletes(column.clone()),
            None => ConditionQueryBuilder::new(),
        };
        Self {
            storage,
            capabilities,
            builder,
            _entity: PhantomData,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// The default query: every live row of `E::TABLE`
    pub fn base_query(&self) -> Query {
        self.builder.base(E::TABLE)
    }

    fn by_id(&self, id: i64) -> Query {
        self.base_query().filter(FilterCondition::eq(ID_COLUMN, id))
    }

    fn decode(&self, row: Row, operation: RepositoryOperation) -> RepositoryResult<E> {
        serde_json::from_value(Value::Object(row))
            .map_err(|e| RepositoryError::serialization(operation, e).with_table(E::TABLE))
    }

    fn decode_all(&self, rows: Vec<Row>, operation: RepositoryOperation) -> RepositoryResult<Vec<E>> {
        rows.into_iter().map(|row| self.decode(row, operation)).collect()
    }

    fn stamp_created(&self, row: &mut Row) {
        if E::TIMESTAMPS {
            let now = now();
            row.entry(CREATED_AT).or_insert_with(|| now.clone());
            row.insert(UPDATED_AT.to_string(), now);
        }
    }

    fn stamp_updated(&self, row: &mut Row) {
        if E::TIMESTAMPS {
            row.insert(UPDATED_AT.to_string(), now());
        }
    }

    /// Delete, or mark deleted when the table soft-deletes
    async fn remove(&self, query: &Query) -> RepositoryResult<u64> {
        match &self.capabilities.soft_delete_column {
            Some(column) => {
                let mut changes = Row::new();
                changes.insert(column.clone(), now());
                self.stamp_updated(&mut changes);
                self.storage.update(query, changes).await
            }
            None => self.storage.delete(query).await,
        }
    }

    /// Every row, projected to `columns` (`["*"]` or empty for all)
    pub async fn all(&self, columns: &[&str], include_soft_deleted: bool) -> RepositoryResult<Vec<Row>> {
        let mut query = self.base_query().select(columns);
        if include_soft_deleted && self.capabilities.soft_deletes() {
            query = query.with_trashed();
        }
        self.storage
            .fetch(&query)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::All))
    }

    /// Every row as an entity
    pub async fn all_entities(&self, include_soft_deleted: bool) -> RepositoryResult<Vec<E>> {
        let rows = self.all(&[], include_soft_deleted).await?;
        self.decode_all(rows, RepositoryOperation::All)
    }

    /// Look up one row, eager-loading `relations`
    pub async fn find_row(&self, id: i64, relations: &[&str]) -> RepositoryResult<Option<Row>> {
        let query = self.by_id(id).with(relations).paginate(Pagination::first());
        let rows = self
            .storage
            .fetch(&query)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Find))?;
        Ok(rows.into_iter().next())
    }

    pub async fn find(&self, id: i64, relations: &[&str]) -> RepositoryResult<Option<E>> {
        self.find_row(id, relations)
            .await?
            .map(|row| self.decode(row, RepositoryOperation::Find))
            .transpose()
    }

    /// Insert one row and return it as stored
    pub async fn create(&self, attributes: Row) -> RepositoryResult<E> {
        let mut row = attributes;
        self.stamp_created(&mut row);

        let ids = self
            .storage
            .insert(E::TABLE, vec![row])
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Create))?;
        let id = ids.first().copied().ok_or_else(|| {
            RepositoryError::database(RepositoryOperation::Create, "insert returned no id")
                .with_table(E::TABLE)
        })?;

        let query = Query::table(E::TABLE)
            .filter(FilterCondition::eq(ID_COLUMN, id))
            .paginate(Pagination::first());
        let row = self
            .storage
            .fetch(&query)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Create))?
            .into_iter()
            .next()
            .ok_or_else(|| RepositoryError::not_found(RepositoryOperation::Create, E::TABLE, id))?;

        tracing::debug!(table = E::TABLE, id, "created entity");
        self.decode(row, RepositoryOperation::Create)
    }

    /// Bulk insert without timestamps or per-row results
    pub async fn insert(&self, records: Vec<Row>) -> RepositoryResult<bool> {
        self.storage
            .insert(E::TABLE, records)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Insert))?;
        Ok(true)
    }

    /// Apply `data` to row `id`; `None` when the row does not exist
    pub async fn update(&self, id: i64, data: Row) -> RepositoryResult<Option<E>> {
        let mut changes = data;
        self.stamp_updated(&mut changes);

        let updated = self
            .storage
            .update(&self.by_id(id), changes)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Update))?;
        if updated == 0 {
            return Ok(None);
        }

        self.find(id, &[])
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Update))
    }

    pub async fn delete(&self, id: i64) -> RepositoryResult<bool> {
        let removed = self
            .remove(&self.by_id(id))
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Delete))?;
        Ok(removed > 0)
    }

    /// Delete every row matched by the default query
    pub async fn delete_all(&self) -> RepositoryResult<bool> {
        let removed = self
            .remove(&self.base_query())
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::DeleteAll))?;
        tracing::warn!(table = E::TABLE, removed, "deleted all rows");
        Ok(removed > 0)
    }

    /// One page of rows, newest first (descending id)
    pub async fn paginate(
        &self,
        relations: &[&str],
        page: u64,
        per_page: u64,
    ) -> RepositoryResult<Page<E>> {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let query = self
            .base_query()
            .with(relations)
            .order_by(ID_COLUMN, OrderDirection::Descending);

        let total = self
            .storage
            .count(&query.unbounded())
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Paginate))?;
        let rows = self
            .storage
            .fetch(&query.paginate(Pagination::page(page, per_page)))
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Paginate))?;

        let items = self.decode_all(rows, RepositoryOperation::Paginate)?;
        Ok(Page::new(items, page, per_page, total))
    }

    /// Bulk insert skipping rows that violate a uniqueness constraint
    pub async fn insert_or_ignore(&self, rows: Vec<Row>) -> RepositoryResult<u64> {
        self.storage
            .insert_or_ignore(E::TABLE, rows)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::InsertOrIgnore))
    }

    /// Update the first row matching `attributes` with `values`, or create one
    /// from both. Constraint violations are logged and yield `Ok(None)`.
    pub async fn update_or_create(&self, attributes: Row, values: Row) -> RepositoryResult<Option<E>> {
        match self.try_update_or_create(attributes, values).await {
            Err(e) if e.kind.is_constraint() => {
                tracing::warn!(table = E::TABLE, error = %e, "update_or_create skipped");
                Ok(None)
            }
            other => other.map_err(|e| e.with_operation(RepositoryOperation::UpdateOrCreate)),
        }
    }

    async fn try_update_or_create(&self, attributes: Row, values: Row) -> RepositoryResult<Option<E>> {
        let mut query = self.base_query().paginate(Pagination::first());
        for (field, value) in &attributes {
            query = query.filter(FilterCondition::eq(field.clone(), value.clone()));
        }

        let existing = self.storage.fetch(&query).await?.into_iter().next();
        let existing_id = existing.as_ref().and_then(|row| row.get(ID_COLUMN)).and_then(Value::as_i64);

        match existing_id {
            Some(id) => self.update(id, values).await,
            None => {
                let mut merged = attributes;
                merged.extend(values);
                self.create(merged).await.map(Some)
            }
        }
    }

    /// Insert rows that match no stored row on `identifiers`, else overwrite
    /// `update_columns`. With `restore_deleted` on a soft-deleting table the
    /// deletion marker is cleared too.
    pub async fn upsert(
        &self,
        rows: Vec<Row>,
        identifiers: &[&str],
        update_columns: &[&str],
        restore_deleted: bool,
    ) -> RepositoryResult<bool> {
        if rows.is_empty() {
            return Ok(false);
        }

        let mut rows = rows;
        let mut update_columns: Vec<String> = update_columns.iter().map(|c| c.to_string()).collect();

        if let (true, Some(column)) = (restore_deleted, &self.capabilities.soft_delete_column) {
            for row in &mut rows {
                row.insert(column.clone(), Value::Null);
            }
            if !update_columns.contains(column) {
                update_columns.push(column.clone());
            }
        }

        if E::TIMESTAMPS {
            for row in &mut rows {
                self.stamp_created(row);
            }
            if !update_columns.iter().any(|c| c == UPDATED_AT) {
                update_columns.push(UPDATED_AT.to_string());
            }
        }

        let identifiers: Vec<String> = identifiers.iter().map(|c| c.to_string()).collect();
        let affected = self
            .storage
            .upsert(E::TABLE, rows, &identifiers, &update_columns)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Upsert))?;
        Ok(affected > 0)
    }

    /// A query for `spec` with `relations`, not executed
    pub fn query_by_condition(&self, relations: &[&str], spec: &QuerySpec) -> Query {
        self.builder.build(self.base_query(), relations, spec)
    }

    pub async fn find_by_condition(&self, relations: &[&str], spec: &QuerySpec) -> RepositoryResult<Vec<E>> {
        let rows = self
            .storage
            .fetch(&self.query_by_condition(relations, spec))
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::FindByCondition))?;
        self.decode_all(rows, RepositoryOperation::FindByCondition)
    }

    pub async fn find_one_by_condition(
        &self,
        relations: &[&str],
        spec: &QuerySpec,
    ) -> RepositoryResult<Option<E>> {
        let query = self
            .query_by_condition(relations, spec)
            .paginate(Pagination::first());
        let row = self
            .storage
            .fetch(&query)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::FindByCondition))?
            .into_iter()
            .next();
        row.map(|row| self.decode(row, RepositoryOperation::FindByCondition))
            .transpose()
    }

    /// Bulk update. `updated_at` is stamped unless `preserve_updated_at` is
    /// set, in which case it is left exactly as stored.
    pub async fn update_with_condition(
        &self,
        data: Row,
        spec: &QuerySpec,
        preserve_updated_at: bool,
    ) -> RepositoryResult<bool> {
        let mut changes = data;
        if preserve_updated_at {
            changes.remove(UPDATED_AT);
        } else {
            self.stamp_updated(&mut changes);
        }

        let updated = self
            .storage
            .update(&self.query_by_condition(&[], spec), changes)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::UpdateWithCondition))?;
        Ok(updated > 0)
    }

    pub async fn delete_by_condition(&self, spec: &QuerySpec) -> RepositoryResult<bool> {
        let removed = self
            .remove(&self.query_by_condition(&[], spec))
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::DeleteByCondition))?;
        Ok(removed > 0)
    }
}

impl<E: Entity, S: TransactionalStorage> GenericRepository<E, S> {
    /// Make the stored rows match `rows` exactly on `identifiers`
    ///
    /// Within one transaction: upsert `rows` with soft-delete restoration,
    /// then delete every row that matches none of the input identifier
    /// combinations. Returns whether anything was deleted. An empty input is
    /// a no-op.
    pub async fn upsert_or_delete(
        &self,
        rows: Vec<Row>,
        identifiers: &[&str],
        update_columns: &[&str],
    ) -> RepositoryResult<bool> {
        if rows.is_empty() {
            return Ok(false);
        }

        let tx = self
            .storage
            .begin()
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Transaction))?;

        let result = GenericRepository::<E, &S::Tx>::new(&tx)
            .reconcile(rows, identifiers, update_columns)
            .await;

        match result {
            Ok(deleted) => {
                tx.commit()
                    .await
                    .map_err(|e| e.with_operation(RepositoryOperation::Transaction))?;
                tracing::debug!(table = E::TABLE, deleted, "reconciled rows");
                Ok(deleted > 0)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(table = E::TABLE, error = %rollback, "rollback failed");
                }
                Err(e.with_operation(RepositoryOperation::UpsertOrDelete))
            }
        }
    }
}

impl<E: Entity, S: Storage> GenericRepository<E, S> {
    async fn reconcile(
        &self,
        rows: Vec<Row>,
        identifiers: &[&str],
        update_columns: &[&str],
    ) -> RepositoryResult<u64> {
        let groups: Vec<Vec<FilterCondition>> = rows
            .iter()
            .map(|row| {
                identifiers
                    .iter()
                    .map(|field| {
                        FilterCondition::eq(*field, row.get(*field).cloned().unwrap_or(Value::Null))
                    })
                    .collect()
            })
            .collect();

        self.upsert(rows, identifiers, update_columns, true).await?;

        let kept = self
            .storage
            .fetch(&self.base_query().select(&[ID_COLUMN]).where_any(groups))
            .await?;
        let kept_ids: Vec<Value> = kept
            .iter()
            .filter_map(|row| row.get(ID_COLUMN).cloned())
            .collect();

        self.remove(&self.base_query().where_not_in(ID_COLUMN, kept_ids))
            .await
    }
}
