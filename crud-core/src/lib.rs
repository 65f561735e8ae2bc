//! # crud-core
//!
//! Condition-driven data access and uniform JSON responses for CRUD APIs.
//!
//! ## Features
//!
//! - **Query specs**: typed filter buckets (`equals`, `in`, `not_in`,
//!   `between`, `date`) turned into executable queries
//! - **Generic repository**: CRUD, pagination, bulk insert, upsert and
//!   transactional upsert-or-delete reconciliation for any entity
//! - **Storage backends**: in-process [`MemoryStore`](repository::MemoryStore)
//!   and PostgreSQL via `sqlx` (feature `database`)
//! - **Response envelope**: `{correlationId, code, message, data}` on every
//!   response, with a `paginate` block for pages
//! - **Error classification**: one first-match mapping from errors to status,
//!   message and diagnostics
//! - **Request context**: per-request correlation id threaded through
//!   handlers, logs and envelopes
//!
//! ## Example
//!
//! ```rust,no_run
//! use axum::{extract::Query, routing::get, Router};
//! use crud_core::prelude::*;
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct User {
//!     id: i64,
//!     email: String,
//! }
//!
//! impl Entity for User {
//!     const TABLE: &'static str = "users";
//!     const TIMESTAMPS: bool = false;
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let store = MemoryStore::new().with_table("users", TableSchema::new().unique(["email"]));
//!     let users = Arc::new(GenericRepository::<User, _>::new(store));
//!     let bounds = config.pagination.clone();
//!
//!     let app = Router::new().route(
//!         "/users",
//!         get(move |ctx: RequestContext, Query(page): Query<PageRequest>| {
//!             let users = Arc::clone(&users);
//!             let (page, per_page) = page.resolve(&bounds);
//!             async move {
//!                 let result = users.paginate(&[], page, per_page).await.map_err(Error::from);
//!                 ctx.respond(result)
//!             }
//!         }),
//!     );
//!     let app = attach(app, ContextSettings::from_config(&config));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080")
//!         .await
//!         .map_err(anyhow::Error::from)?;
//!     axum::serve(listener, app).await.map_err(anyhow::Error::from)?;
//!     Ok(())
//! }
//! ```

pub mod classifier;
pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod middleware;
pub mod observability;
pub mod query;
pub mod repository;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::classifier::{Classification, ErrorClassifier, ErrorDetails, ErrorKind};
    pub use crate::config::{Config, DeploymentMode, PageRequest, PaginationConfig};
    pub use crate::context::{RequestContext, RequestInfo};
    pub use crate::envelope::{Envelope, IntoData, WireResponse};
    pub use crate::error::{Error, FieldErrors, Result};
    pub use crate::ids::CorrelationId;
    pub use crate::middleware::{attach, ContextSettings};
    pub use crate::observability::init_tracing;
    pub use crate::query::{
        ConditionQueryBuilder, FilterCondition, OrderDirection, Query, QuerySpec, QuerySpecError,
    };
    pub use crate::repository::{
        to_row, Entity, GenericRepository, MemoryStore, Page, RepositoryError,
        RepositoryErrorKind, RepositoryResult, Row, Storage, TableSchema, TransactionalStorage,
    };

    #[cfg(feature = "database")]
    pub use crate::repository::PgStore;
}
