//! PostgreSQL rendering of [`Query`] values
//!
//! Values travel as bound `jsonb` parameters and are compared against
//! `to_jsonb(column)`, so one rendering works for every column type. Rows
//! come back as a single `jsonb` object per row.

use std::collections::BTreeSet;

use serde_json::Value;
use sqlx::{Postgres, QueryBuilder};

use super::builder::{Condition, FilterCondition, FilterOperator, FilterValue, OrderDirection, Query};
use crate::repository::{Relation, RelationKind, Row, ID_COLUMN};

/// Alias of the queried table in every statement
const ALIAS: &str = "t";

pub(crate) type Statement = QueryBuilder<'static, Postgres>;

/// A relation to eager-load: name, declaration, soft-delete column of the related table
pub(crate) struct RelationPlan<'a> {
    pub name: &'a str,
    pub relation: &'a Relation,
    pub soft_delete_column: Option<&'a str>,
}

/// Double-quote an identifier
pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn column(ident: &str) -> String {
    format!("{ALIAS}.{}", quote(ident))
}

/// `SELECT <row as jsonb> FROM table AS t WHERE ... ORDER BY ... LIMIT ... OFFSET ...`
pub(crate) fn select(query: &Query, relations: &[RelationPlan<'_>]) -> Statement {
    let mut statement = QueryBuilder::new("SELECT ");

    if query.columns().is_empty() {
        statement.push(format!("to_jsonb({ALIAS})"));
    } else {
        statement.push("jsonb_build_object(");
        for (i, name) in query.columns().iter().enumerate() {
            if i > 0 {
                statement.push(", ");
            }
            statement.push_bind(name.clone());
            statement.push(format!("::text, {}", column(name)));
        }
        statement.push(")");
    }

    for plan in relations {
        statement.push(" || jsonb_build_object(");
        statement.push_bind(plan.name.to_string());
        statement.push("::text, ");
        push_relation(&mut statement, plan);
        statement.push(")");
    }

    statement.push(format!(" AS row FROM {} AS {ALIAS}", quote(query.table_name())));
    push_where(&mut statement, &query.effective_conditions());

    if !query.ordering().is_empty() {
        statement.push(" ORDER BY ");
        for (i, (field, direction)) in query.ordering().iter().enumerate() {
            if i > 0 {
                statement.push(", ");
            }
            let direction = match direction {
                OrderDirection::Ascending => "ASC",
                OrderDirection::Descending => "DESC",
            };
            statement.push(format!("{} {direction}", column(field)));
        }
    }

    if let Some(window) = query.pagination() {
        statement.push(" LIMIT ");
        statement.push_bind(i64::try_from(window.limit).unwrap_or(i64::MAX));
        statement.push(" OFFSET ");
        statement.push_bind(i64::try_from(window.offset).unwrap_or(i64::MAX));
    }

    statement
}

fn push_relation(statement: &mut Statement, plan: &RelationPlan<'_>) {
    let related = quote(&plan.relation.table);
    let foreign_key = quote(&plan.relation.foreign_key);
    let id = quote(ID_COLUMN);

    match plan.relation.kind {
        RelationKind::HasMany => statement.push(format!(
            "(SELECT coalesce(jsonb_agg(to_jsonb(r) ORDER BY r.{id}), '[]'::jsonb) \
             FROM {related} AS r WHERE r.{foreign_key} = {ALIAS}.{id}"
        )),
        RelationKind::BelongsTo => statement.push(format!(
            "(SELECT to_jsonb(r) FROM {related} AS r WHERE r.{id} = {ALIAS}.{foreign_key}"
        )),
    };

    if let Some(marker) = plan.soft_delete_column {
        statement.push(format!(" AND r.{} IS NULL", quote(marker)));
    }
    if plan.relation.kind == RelationKind::BelongsTo {
        statement.push(" LIMIT 1");
    }
    statement.push(")");
}

/// `SELECT count(*) FROM table AS t WHERE ...`
pub(crate) fn count(query: &Query) -> Statement {
    let mut statement = QueryBuilder::new(format!(
        "SELECT count(*) FROM {} AS {ALIAS}",
        quote(query.table_name())
    ));
    push_where(&mut statement, &query.effective_conditions());
    statement
}

/// What an update runs
pub(crate) enum UpdatePlan {
    /// An `UPDATE`; the affected-row count is the result
    Write(Statement),
    /// Nothing to set: a `count(*)` of the matched rows is the result
    Unchanged(Statement),
}

/// `UPDATE table AS t SET (cols) = (SELECT ... FROM jsonb_populate_record(...)) WHERE ...`
///
/// The JSON values are cast to the column types by PostgreSQL.
pub(crate) fn update(query: &Query, changes: Row) -> UpdatePlan {
    let columns: Vec<String> = changes
        .keys()
        .filter(|c| c.as_str() != ID_COLUMN)
        .map(|c| quote(c))
        .collect();
    if columns.is_empty() {
        return UpdatePlan::Unchanged(count(query));
    }

    let table = quote(query.table_name());
    let mut statement = QueryBuilder::new(format!(
        "UPDATE {table} AS {ALIAS} SET ({}) = (SELECT {} FROM jsonb_populate_record(NULL::{table}, ",
        columns.join(", "),
        columns.iter().map(|c| format!("v.{c}")).collect::<Vec<_>>().join(", "),
    ));
    statement.push_bind(Value::Object(changes));
    statement.push(") AS v)");
    push_where(&mut statement, &query.effective_conditions());
    UpdatePlan::Write(statement)
}

/// `DELETE FROM table AS t WHERE ...`
pub(crate) fn delete(query: &Query) -> Statement {
    let mut statement = QueryBuilder::new(format!(
        "DELETE FROM {} AS {ALIAS}",
        quote(query.table_name())
    ));
    push_where(&mut statement, &query.effective_conditions());
    statement
}

/// How an insert reacts to a unique violation
pub(crate) enum OnConflict<'a> {
    Fail,
    Ignore,
    Update {
        unique_by: &'a [String],
        columns: &'a [String],
    },
}

/// `INSERT INTO table (cols) SELECT ... FROM jsonb_populate_recordset(...) [ON CONFLICT ...]`
///
/// The column list is the union of the rows' keys; a row missing a key
/// inserts NULL there.
pub(crate) fn insert(table: &str, rows: Vec<Row>, on_conflict: OnConflict<'_>) -> Option<Statement> {
    let keys: BTreeSet<String> = rows.iter().flat_map(|row| row.keys().cloned()).collect();
    if rows.is_empty() || keys.is_empty() {
        return None;
    }

    let table_name = quote(table);
    let columns: Vec<String> = keys.iter().map(|k| quote(k)).collect();
    let mut statement = QueryBuilder::new(format!(
        "INSERT INTO {table_name} ({}) SELECT {} FROM jsonb_populate_recordset(NULL::{table_name}, ",
        columns.join(", "),
        columns.iter().map(|c| format!("v.{c}")).collect::<Vec<_>>().join(", "),
    ));
    statement.push_bind(Value::Array(rows.into_iter().map(Value::Object).collect()));
    statement.push(") AS v");

    match on_conflict {
        OnConflict::Fail => {}
        OnConflict::Ignore => {
            statement.push(" ON CONFLICT DO NOTHING");
        }
        OnConflict::Update { unique_by, columns } => {
            let target: Vec<String> = unique_by.iter().map(|c| quote(c)).collect();
            let assignments: Vec<String> = columns
                .iter()
                .filter(|c| c.as_str() != ID_COLUMN)
                .map(|c| format!("{0} = EXCLUDED.{0}", quote(c)))
                .collect();
            if assignments.is_empty() {
                statement.push(format!(" ON CONFLICT ({}) DO NOTHING", target.join(", ")));
            } else {
                statement.push(format!(
                    " ON CONFLICT ({}) DO UPDATE SET {}",
                    target.join(", "),
                    assignments.join(", ")
                ));
            }
        }
    }

    Some(statement)
}

/// Append ` RETURNING "id"`
pub(crate) fn returning_id(mut statement: Statement) -> Statement {
    statement.push(format!(" RETURNING {}", quote(ID_COLUMN)));
    statement
}

fn push_where(statement: &mut Statement, conditions: &[Condition]) {
    for (i, condition) in conditions.iter().enumerate() {
        statement.push(if i == 0 { " WHERE " } else { " AND " });
        match condition {
            Condition::Field(filter) => push_filter(statement, filter),
            Condition::Any(groups) if groups.is_empty() => {
                statement.push("FALSE");
            }
            Condition::Any(groups) => {
                statement.push("(");
                for (g, group) in groups.iter().enumerate() {
                    if g > 0 {
                        statement.push(" OR ");
                    }
                    statement.push("(");
                    if group.is_empty() {
                        statement.push("TRUE");
                    }
                    for (f, filter) in group.iter().enumerate() {
                        if f > 0 {
                            statement.push(" AND ");
                        }
                        push_filter(statement, filter);
                    }
                    statement.push(")");
                }
                statement.push(")");
            }
        }
    }
}

fn push_filter(statement: &mut Statement, filter: &FilterCondition) {
    let target = column(&filter.field);

    match (filter.operator, &filter.value) {
        (FilterOperator::IsNull, _) => {
            statement.push(format!("{target} IS NULL"));
        }
        (FilterOperator::IsNotNull, _) => {
            statement.push(format!("{target} IS NOT NULL"));
        }
        (FilterOperator::Equal, FilterValue::Value(value)) => {
            statement.push(format!("to_jsonb({target}) = "));
            statement.push_bind(value.clone());
        }
        (FilterOperator::In, FilterValue::List(values)) => {
            statement.push("EXISTS (SELECT 1 FROM jsonb_array_elements(");
            statement.push_bind(Value::Array(values.clone()));
            statement.push(format!(") AS c(v) WHERE c.v = to_jsonb({target}))"));
        }
        (FilterOperator::NotIn, FilterValue::List(values)) => {
            statement.push(format!(
                "({target} IS NOT NULL AND NOT EXISTS (SELECT 1 FROM jsonb_array_elements("
            ));
            statement.push_bind(Value::Array(values.clone()));
            statement.push(format!(") AS c(v) WHERE c.v = to_jsonb({target})))"));
        }
        (FilterOperator::Between, FilterValue::Range(lower, upper)) => {
            statement.push(format!("to_jsonb({target}) BETWEEN "));
            statement.push_bind(lower.clone());
            statement.push(" AND ");
            statement.push_bind(upper.clone());
        }
        (FilterOperator::DateEquals, FilterValue::Date(date)) => {
            statement.push(format!("({target})::date = "));
            statement.push_bind(*date);
        }
        // operator and operand disagree; match nothing
        _ => {
            statement.push("FALSE");
        }
    }
}
