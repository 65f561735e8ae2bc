//! PostgreSQL storage backend
//!
//! Renders [`Query`] values with `sqlx::QueryBuilder` and exchanges rows as
//! `jsonb`. Tables are declared with the same [`TableSchema`] the memory
//! backend uses; only its soft-delete column and relations matter here,
//! uniqueness is enforced by the database.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool, Postgres};

use super::error::{RepositoryError, RepositoryErrorKind, RepositoryOperation};
use super::storage::{
    Capabilities, RepositoryResult, Row, Storage, TableSchema, Transaction, TransactionalStorage,
};
use crate::config::DatabaseConfig;
use crate::query::sql::{self, OnConflict, RelationPlan, Statement, UpdatePlan};
use crate::query::Query;

/// Map a driver error to a repository error
fn map_sqlx_error(operation: RepositoryOperation, err: sqlx::Error) -> RepositoryError {
    use sqlx::Error as E;
    match err {
        E::RowNotFound => RepositoryError::new(operation, RepositoryErrorKind::NotFound, "row not found"),
        E::PoolTimedOut => RepositoryError::timeout(operation, "connection pool timed out"),
        E::PoolClosed => RepositoryError::connection_failed(operation, "connection pool is closed"),
        E::WorkerCrashed => RepositoryError::connection_failed(operation, "database worker crashed"),
        E::Io(e) => RepositoryError::connection_failed(operation, e.to_string()),
        E::Tls(e) => RepositoryError::connection_failed(operation, format!("TLS error: {e}")),
        E::ColumnDecode { index, source } => RepositoryError::serialization(
            operation,
            format!("failed to decode column {index}: {source}"),
        ),
        E::Decode(e) => RepositoryError::serialization(operation, e),
        E::Database(db_err) => {
            if db_err.is_unique_violation() {
                RepositoryError::conflict(operation, db_err.to_string())
            } else if db_err.is_foreign_key_violation()
                || db_err.is_check_violation()
                || db_err.code().as_deref() == Some("23502")
            {
                RepositoryError::constraint_violation(operation, db_err.to_string())
            } else {
                RepositoryError::database(operation, db_err.to_string())
            }
        }
        other => RepositoryError::database(operation, other.to_string()),
    }
}

/// Hide the password of a connection URL
fn sanitize_connection_url(url: &str) -> String {
    if let (Some(at_pos), Some(scheme_end)) = (url.rfind('@'), url.find("://")) {
        let credentials = &url[scheme_end + 3..at_pos];
        if let Some(colon_pos) = credentials.find(':') {
            return format!(
                "{}{}:***{}",
                &url[..scheme_end + 3],
                &credentials[..colon_pos],
                &url[at_pos..]
            );
        }
    }
    url.to_string()
}

#[derive(Debug, Clone, Default)]
struct Schemas(HashMap<String, TableSchema>);

impl Schemas {
    fn capabilities(&self, table: &str) -> Capabilities {
        self.0
            .get(table)
            .map(TableSchema::capabilities)
            .unwrap_or_default()
    }

    fn select(&self, query: &Query) -> RepositoryResult<Statement> {
        let schema = self.0.get(query.table_name());
        let mut plans = Vec::with_capacity(query.relations().len());
        for name in query.relations() {
            let relation = schema.and_then(|s| s.relation(name)).ok_or_else(|| {
                RepositoryError::validation_failed(
                    RepositoryOperation::Find,
                    format!("undefined relation '{name}'"),
                )
                .with_table(query.table_name())
            })?;
            let soft_delete_column = self
                .0
                .get(&relation.table)
                .and_then(|related| related.soft_delete_column());
            plans.push(RelationPlan {
                name,
                relation,
                soft_delete_column,
            });
        }
        Ok(sql::select(query, &plans))
    }
}

async fn fetch_rows<'c, X>(executor: X, mut statement: Statement) -> RepositoryResult<Vec<Row>>
where
    X: Executor<'c, Database = Postgres>,
{
    tracing::debug!(sql = statement.sql(), "fetch");
    let values = statement
        .build_query_scalar::<Value>()
        .fetch_all(executor)
        .await
        .map_err(|e| map_sqlx_error(RepositoryOperation::Find, e))?;

    values
        .into_iter()
        .map(|value| match value {
            Value::Object(row) => Ok(row),
            other => Err(RepositoryError::serialization(
                RepositoryOperation::Find,
                format!("expected a JSON object row, got {other}"),
            )),
        })
        .collect()
}

async fn count_rows<'c, X>(executor: X, mut statement: Statement) -> RepositoryResult<u64>
where
    X: Executor<'c, Database = Postgres>,
{
    tracing::debug!(sql = statement.sql(), "count");
    let total: i64 = statement
        .build_query_scalar()
        .fetch_one(executor)
        .await
        .map_err(|e| map_sqlx_error(RepositoryOperation::Find, e))?;
    Ok(u64::try_from(total).unwrap_or_default())
}

async fn execute<'c, X>(
    executor: X,
    statement: Option<Statement>,
    operation: RepositoryOperation,
) -> RepositoryResult<u64>
where
    X: Executor<'c, Database = Postgres>,
{
    let Some(mut statement) = statement else {
        return Ok(0);
    };
    tracing::debug!(sql = statement.sql(), %operation, "execute");
    let result = statement
        .build()
        .execute(executor)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;
    Ok(result.rows_affected())
}

/// Rows matched by an update, whether or not anything was set
async fn apply_update<'c, X>(executor: X, plan: UpdatePlan) -> RepositoryResult<u64>
where
    X: Executor<'c, Database = Postgres>,
{
    match plan {
        UpdatePlan::Write(statement) => execute(executor, Some(statement), RepositoryOperation::Update).await,
        UpdatePlan::Unchanged(statement) => count_rows(executor, statement).await,
    }
}

async fn insert_returning<'c, X>(executor: X, table: &str, rows: Vec<Row>) -> RepositoryResult<Vec<i64>>
where
    X: Executor<'c, Database = Postgres>,
{
    let Some(statement) = sql::insert(table, rows, OnConflict::Fail) else {
        return Ok(Vec::new());
    };
    let mut statement = sql::returning_id(statement);
    tracing::debug!(sql = statement.sql(), "insert");
    statement
        .build_query_scalar::<i64>()
        .fetch_all(executor)
        .await
        .map_err(|e| map_sqlx_error(RepositoryOperation::Insert, e).with_table(table))
}

/// [`Storage`] over a PostgreSQL pool
///
/// ```rust,ignore
/// use crud_core::repository::{GenericRepository, PgStore, TableSchema};
///
/// let store = PgStore::connect(&config.database.unwrap())
///     .await?
///     .with_table("users", TableSchema::new().soft_deletes("deleted_at"));
/// let users = GenericRepository::<User, _>::new(store);
/// ```
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    schemas: Arc<Schemas>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schemas: Arc::new(Schemas::default()),
        }
    }

    /// Open a pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> RepositoryResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| {
                tracing::error!(
                    url = %sanitize_connection_url(&config.url),
                    error = %e,
                    "failed to connect to database"
                );
                map_sqlx_error(RepositoryOperation::Transaction, e)
            })?;

        tracing::info!(
            max_connections = config.max_connections,
            "database connection pool created"
        );
        Ok(Self::new(pool))
    }

    /// Declare a table's soft-delete column and relations
    #[must_use]
    pub fn with_table(mut self, name: impl Into<String>, schema: TableSchema) -> Self {
        Arc::make_mut(&mut self.schemas).0.insert(name.into(), schema);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Storage for PgStore {
    fn capabilities(&self, table: &str) -> Capabilities {
        self.schemas.capabilities(table)
    }

    async fn fetch(&self, query: &Query) -> RepositoryResult<Vec<Row>> {
        let statement = self.schemas.select(query)?;
        fetch_rows(&self.pool, statement).await
    }

    async fn count(&self, query: &Query) -> RepositoryResult<u64> {
        count_rows(&self.pool, sql::count(query)).await
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> RepositoryResult<Vec<i64>> {
        insert_returning(&self.pool, table, rows).await
    }

    async fn insert_or_ignore(&self, table: &str, rows: Vec<Row>) -> RepositoryResult<u64> {
        let statement = sql::insert(table, rows, OnConflict::Ignore);
        execute(&self.pool, statement, RepositoryOperation::InsertOrIgnore).await
    }

    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Row>,
        unique_by: &[String],
        update_columns: &[String],
    ) -> RepositoryResult<u64> {
        let statement = sql::insert(
            table,
            rows,
            OnConflict::Update {
                unique_by,
                columns: update_columns,
            },
        );
        execute(&self.pool, statement, RepositoryOperation::Upsert).await
    }

    async fn update(&self, query: &Query, changes: Row) -> RepositoryResult<u64> {
        apply_update(&self.pool, sql::update(query, changes)).await
    }

    async fn delete(&self, query: &Query) -> RepositoryResult<u64> {
        execute(&self.pool, Some(sql::delete(query)), RepositoryOperation::Delete).await
    }
}

/// An open PostgreSQL transaction
///
/// Statements run one at a time on the transaction's connection.
#[derive(Debug)]
pub struct PgTransaction {
    tx: tokio::sync::Mutex<sqlx::Transaction<'static, Postgres>>,
    schemas: Arc<Schemas>,
}

impl TransactionalStorage for PgStore {
    type Tx = PgTransaction;

    async fn begin(&self) -> RepositoryResult<PgTransaction> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::Transaction, e))?;
        Ok(PgTransaction {
            tx: tokio::sync::Mutex::new(tx),
            schemas: Arc::clone(&self.schemas),
        })
    }
}

impl Storage for PgTransaction {
    fn capabilities(&self, table: &str) -> Capabilities {
        self.schemas.capabilities(table)
    }

    async fn fetch(&self, query: &Query) -> RepositoryResult<Vec<Row>> {
        let statement = self.schemas.select(query)?;
        let mut tx = self.tx.lock().await;
        fetch_rows(&mut **tx, statement).await
    }

    async fn count(&self, query: &Query) -> RepositoryResult<u64> {
        let mut tx = self.tx.lock().await;
        count_rows(&mut **tx, sql::count(query)).await
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> RepositoryResult<Vec<i64>> {
        let mut tx = self.tx.lock().await;
        insert_returning(&mut **tx, table, rows).await
    }

    async fn insert_or_ignore(&self, table: &str, rows: Vec<Row>) -> RepositoryResult<u64> {
        let statement = sql::insert(table, rows, OnConflict::Ignore);
        let mut tx = self.tx.lock().await;
        execute(&mut **tx, statement, RepositoryOperation::InsertOrIgnore).await
    }

    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Row>,
        unique_by: &[String],
        update_columns: &[String],
    ) -> RepositoryResult<u64> {
        let statement = sql::insert(
            table,
            rows,
            OnConflict::Update {
                unique_by,
                columns: update_columns,
            },
        );
        let mut tx = self.tx.lock().await;
        execute(&mut **tx, statement, RepositoryOperation::Upsert).await
    }

    async fn update(&self, query: &Query, changes: Row) -> RepositoryResult<u64> {
        let mut tx = self.tx.lock().await;
        apply_update(&mut **tx, sql::update(query, changes)).await
    }

    async fn delete(&self, query: &Query) -> RepositoryResult<u64> {
        let mut tx = self.tx.lock().await;
        execute(&mut **tx, Some(sql::delete(query)), RepositoryOperation::Delete).await
    }
}

impl Transaction for PgTransaction {
    async fn commit(self) -> RepositoryResult<()> {
        self.tx
            .into_inner()
            .commit()
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::Transaction, e))
    }

    async fn rollback(self) -> RepositoryResult<()> {
        self.tx
            .into_inner()
            .rollback()
            .await
            .map_err(|e| map_sqlx_error(RepositoryOperation::Transaction, e))
    }
}
