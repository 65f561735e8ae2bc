//! Generic data access
//!
//! [`GenericRepository`] implements CRUD, pagination, bulk insert, upsert,
//! reconciliation and [`QuerySpec`](crate::query::QuerySpec) driven queries
//! for any [`Entity`]. It never executes SQL itself: queries are described
//! with [`Query`](crate::query::Query) and run by a [`Storage`] backend.
//!
//! # Backends
//!
//! - [`MemoryStore`]: in-process tables, unique keys, soft deletes, relations
//!   and snapshot transactions
//! - `PgStore` (feature `database`): PostgreSQL via `sqlx`
//!
//! # Errors
//!
//! Every failure is a [`RepositoryError`]. The only operation that recovers
//! locally is [`GenericRepository::update_or_create`], which turns
//! constraint violations into `Ok(None)`.

mod error;
mod generic;
mod memory;
mod page;
#[cfg(feature = "database")]
mod postgres;
mod storage;

pub use error::{RepositoryError, RepositoryErrorKind, RepositoryOperation};
pub use generic::{to_row, Entity, GenericRepository, CREATED_AT, UPDATED_AT};
pub use memory::{MemoryStore, MemoryTransaction};
pub use page::Page;
#[cfg(feature = "database")]
pub use postgres::{PgStore, PgTransaction};
pub use storage::{
    Capabilities, Relation, RelationKind, RepositoryResult, Row, Storage, TableSchema, Transaction,
    TransactionalStorage, ID_COLUMN,
};
