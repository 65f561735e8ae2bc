//! Declarative conditions and executable query descriptions
//!
//! - [`QuerySpec`]: validated filter buckets (equals, in, not-in, between, date)
//! - [`ConditionQueryBuilder`]: turns a spec into a [`Query`]
//! - [`Query`]: table, conditions, relations, ordering and window, executed
//!   later by a [`Storage`](crate::repository::Storage) backend

mod builder;
mod spec;
#[cfg(feature = "database")]
pub(crate) mod sql;

pub use builder::{
    Condition, ConditionQueryBuilder, FilterCondition, FilterOperator, FilterValue,
    OrderDirection, Pagination, Query,
};
pub use spec::{Bucket, QuerySpec, QuerySpecBuilder, QuerySpecError};
