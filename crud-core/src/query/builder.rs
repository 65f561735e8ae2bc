//! Executable query descriptions and the condition query builder
//!
//! [`ConditionQueryBuilder`] turns a [`QuerySpec`] into a [`Query`]: a plain
//! value describing table, conditions, eager-loaded relations, ordering and
//! pagination. Building never touches storage; a [`Storage`] backend executes
//! the query later, so the same query can be counted and then sliced.
//!
//! [`Storage`]: crate::repository::Storage
//!
//! # Example
//!
//! ```rust
//! use crud_core::query::{ConditionQueryBuilder, OrderDirection, Pagination, QuerySpec};
//!
//! let spec = QuerySpec::builder()
//!     .equals("status", 1)
//!     .not_in("role", ["guest"])
//!     .build()
//!     .unwrap();
//!
//! let builder = ConditionQueryBuilder::new().with_soft_deletes("deleted_at");
//! let query = builder
//!     .build(builder.base("users"), &["posts"], &spec)
//!     .order_by("id", OrderDirection::Descending)
//!     .paginate(Pagination::page(2, 10));
//!
//! assert_eq!(query.conditions().len(), 2);
//! assert_eq!(query.relations(), ["posts".to_string()]);
//! // soft-deleted rows are excluded unless `with_trashed()` is requested
//! assert_eq!(query.effective_conditions().len(), 3);
//! ```

use std::fmt;

use chrono::NaiveDate;
use serde_json::Value;

use super::spec::QuerySpec;

/// Direction for ordering results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    /// Sort in ascending order (A-Z, 0-9)
    #[default]
    Ascending,
    /// Sort in descending order (Z-A, 9-0)
    Descending,
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascending => write!(f, "asc"),
            Self::Descending => write!(f, "desc"),
        }
    }
}

/// Offset/limit window over a result set
///
/// ```rust
/// use crud_core::query::Pagination;
///
/// let page3 = Pagination::page(3, 20);
/// assert_eq!(page3.offset, 40);
/// assert_eq!(page3.limit, 20);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Number of results to skip
    pub offset: u64,
    /// Maximum number of results to return
    pub limit: u64,
}

impl Pagination {
    /// Skip `offset`, take `limit`
    #[must_use]
    pub const fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }

    /// Window for a 1-indexed page number
    #[must_use]
    pub const fn page(page_number: u64, page_size: u64) -> Self {
        let offset = page_number.saturating_sub(1).saturating_mul(page_size);
        Self {
            offset,
            limit: page_size,
        }
    }

    /// Only the first row
    #[must_use]
    pub const fn first() -> Self {
        Self { offset: 0, limit: 1 }
    }
}

/// Comparison operators for filter conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    /// Equal to (=)
    Equal,
    /// Value is in a list (IN)
    In,
    /// Value is not in a list (NOT IN)
    NotIn,
    /// Inclusive range (BETWEEN)
    Between,
    /// Calendar date of a timestamp equals a date
    DateEquals,
    /// Value is null (IS NULL)
    IsNull,
    /// Value is not null (IS NOT NULL)
    IsNotNull,
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal => write!(f, "="),
            Self::In => write!(f, "IN"),
            Self::NotIn => write!(f, "NOT IN"),
            Self::Between => write!(f, "BETWEEN"),
            Self::DateEquals => write!(f, "DATE ="),
            Self::IsNull => write!(f, "IS NULL"),
            Self::IsNotNull => write!(f, "IS NOT NULL"),
        }
    }
}

/// Operand of a filter condition
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Single value (for `=`)
    Value(Value),
    /// List of values (for IN / NOT IN)
    List(Vec<Value>),
    /// Inclusive bounds (for BETWEEN)
    Range(Value, Value),
    /// Calendar date
    Date(NaiveDate),
    /// No operand (IS NULL / IS NOT NULL)
    None,
}

/// A single condition on one field
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCondition {
    /// The field name to filter on
    pub field: String,
    /// The comparison operator
    pub operator: FilterOperator,
    /// The operand
    pub value: FilterValue,
}

impl FilterCondition {
    /// Equality filter; a `null` value becomes `IS NULL`
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        if value.is_null() {
            return Self::is_null(field);
        }
        Self {
            field: field.into(),
            operator: FilterOperator::Equal,
            value: FilterValue::Value(value),
        }
    }

    /// Set-membership filter
    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::In,
            value: FilterValue::List(values),
        }
    }

    /// Set-exclusion filter
    pub fn not_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::NotIn,
            value: FilterValue::List(values),
        }
    }

    /// Inclusive range filter
    pub fn between(field: impl Into<String>, lower: Value, upper: Value) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::Between,
            value: FilterValue::Range(lower, upper),
        }
    }

    /// Calendar-date filter
    pub fn date(field: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::DateEquals,
            value: FilterValue::Date(date),
        }
    }

    /// Null check
    pub fn is_null(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::IsNull,
            value: FilterValue::None,
        }
    }

    /// Non-null check
    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::IsNotNull,
            value: FilterValue::None,
        }
    }
}

/// One entry of a query's WHERE clause; entries are ANDed
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// A single field condition
    Field(FilterCondition),
    /// Disjunction of conjunctions: `(a AND b) OR (c AND d)`.
    /// An empty list matches nothing.
    Any(Vec<Vec<FilterCondition>>),
}

impl From<FilterCondition> for Condition {
    fn from(condition: FilterCondition) -> Self {
        Self::Field(condition)
    }
}

/// An executable query description
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    table: String,
    columns: Vec<String>,
    conditions: Vec<Condition>,
    relations: Vec<String>,
    order_by: Vec<(String, OrderDirection)>,
    pagination: Option<Pagination>,
    soft_delete_column: Option<String>,
    with_trashed: bool,
}

impl Query {
    /// A query over every row of `table`
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            conditions: Vec::new(),
            relations: Vec::new(),
            order_by: Vec::new(),
            pagination: None,
            soft_delete_column: None,
            with_trashed: false,
        }
    }

    /// Project the given columns; `*` or an empty list selects everything
    #[must_use]
    pub fn select<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.columns = columns
            .iter()
            .map(|c| c.as_ref().to_string())
            .filter(|c| c != "*")
            .collect();
        self
    }

    /// AND a condition
    #[must_use]
    pub fn filter(mut self, condition: impl Into<Condition>) -> Self {
        self.conditions.push(condition.into());
        self
    }

    /// AND a disjunction of condition groups
    #[must_use]
    pub fn where_any(mut self, groups: Vec<Vec<FilterCondition>>) -> Self {
        self.conditions.push(Condition::Any(groups));
        self
    }

    /// Eager-load the named relations in the same query plan
    #[must_use]
    pub fn with<S: AsRef<str>>(mut self, relations: &[S]) -> Self {
        for relation in relations {
            let relation = relation.as_ref();
            if !self.relations.iter().any(|r| r == relation) {
                self.relations.push(relation.to_string());
            }
        }
        self
    }

    /// Append an ORDER BY term
    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, direction: OrderDirection) -> Self {
        self.order_by.push((field.into(), direction));
        self
    }

    /// Restrict to a window
    #[must_use]
    pub fn paginate(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    /// Cap the number of rows, keeping any existing offset
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        let offset = self.pagination.map_or(0, |p| p.offset);
        self.pagination = Some(Pagination::new(offset, limit));
        self
    }

    /// Skip rows, keeping any existing limit (unbounded if none)
    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        let limit = self.pagination.map_or(u64::MAX, |p| p.limit);
        self.pagination = Some(Pagination::new(offset, limit));
        self
    }

    /// AND a NOT IN condition
    #[must_use]
    pub fn where_not_in(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.filter(FilterCondition::not_in(field, values))
    }

    /// Exclude rows whose `column` is set
    #[must_use]
    pub fn soft_deletes(mut self, column: impl Into<String>) -> Self {
        self.soft_delete_column = Some(column.into());
        self
    }

    /// Include soft-deleted rows
    #[must_use]
    pub fn with_trashed(mut self) -> Self {
        self.with_trashed = true;
        self
    }

    /// The same query with ordering, pagination, projection and relations
    /// removed, as used for counting, bulk updates and deletes
    #[must_use]
    pub fn unbounded(&self) -> Self {
        Self {
            columns: Vec::new(),
            relations: Vec::new(),
            order_by: Vec::new(),
            pagination: None,
            ..self.clone()
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Conditions added explicitly
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn relations(&self) -> &[String] {
        &self.relations
    }

    pub fn ordering(&self) -> &[(String, OrderDirection)] {
        &self.order_by
    }

    pub fn pagination(&self) -> Option<Pagination> {
        self.pagination
    }

    pub fn includes_trashed(&self) -> bool {
        self.with_trashed
    }

    /// Explicit conditions plus the soft-delete scope, which backends must apply
    pub fn effective_conditions(&self) -> Vec<Condition> {
        let mut conditions = self.conditions.clone();
        if let (Some(column), false) = (&self.soft_delete_column, self.with_trashed) {
            conditions.push(FilterCondition::is_null(column.clone()).into());
        }
        conditions
    }
}

/// Translates a [`QuerySpec`] into a [`Query`]
///
/// Buckets are applied in the order equals, in, not-in, between, date. The
/// order does not change the result set because every condition is ANDed.
#[derive(Debug, Clone, Default)]
pub struct ConditionQueryBuilder {
    soft_delete_column: Option<String>,
}

impl ConditionQueryBuilder {
    /// Builder without soft-delete scoping
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope every base query to rows whose `column` is null
    #[must_use]
    pub fn with_soft_deletes(mut self, column: impl Into<String>) -> Self {
        self.soft_delete_column = Some(column.into());
        self
    }

    /// The soft-delete column, if scoping is enabled
    pub fn soft_delete_column(&self) -> Option<&str> {
        self.soft_delete_column.as_deref()
    }

    /// The default query for `table`
    pub fn base(&self, table: &str) -> Query {
        let query = Query::table(table);
        match &self.soft_delete_column {
            Some(column) => query.soft_deletes(column.clone()),
            None => query,
        }
    }

    /// Apply `relations` and every condition of `spec` to `base`
    pub fn build(&self, base: Query, relations: &[&str], spec: &QuerySpec) -> Query {
        self.apply(base.with(relations), spec)
    }

    /// Apply every condition of `spec` to `query`
    pub fn apply(&self, query: Query, spec: &QuerySpec) -> Query {
        let mut query = query;

        for (field, value) in spec.equals() {
            query = query.filter(FilterCondition::eq(field.clone(), value.clone()));
        }

        for (field, values) in spec.in_values() {
            query = query.filter(FilterCondition::is_in(field.clone(), values.clone()));
        }

        for (field, values) in spec.not_in() {
            query = query.filter(FilterCondition::not_in(field.clone(), values.clone()));
        }

        for (field, (lower, upper)) in spec.between() {
            query = query.filter(FilterCondition::between(
                field.clone(),
                lower.clone(),
                upper.clone(),
            ));
        }

        for (field, date) in spec.dates() {
            query = query.filter(FilterCondition::date(field.clone(), *date));
        }

        query
    }
}
