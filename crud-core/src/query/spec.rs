//! Declarative condition specifications
//!
//! A [`QuerySpec`] describes *what* rows a caller wants, independent of any
//! storage engine. It holds five buckets:
//!
//! - `equals`: field equals value (`null` matches missing/NULL)
//! - `in` / `not_in`: field is (not) one of a list of values
//! - `between`: field lies in an inclusive `[lower, upper]` range
//! - `date`: the calendar date of a timestamp field equals a date
//!
//! A field may appear in at most one bucket. Specs that violate this are
//! rejected when built or deserialized, as are unknown bucket names.
//!
//! # Example
//!
//! ```rust
//! use crud_core::query::QuerySpec;
//! use chrono::NaiveDate;
//!
//! let spec = QuerySpec::builder()
//!     .equals("status", 1)
//!     .is_in("role", ["admin", "editor"])
//!     .between("age", 18, 65)
//!     .date("created_at", NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(spec.len(), 4);
//!
//! let parsed: QuerySpec = serde_json::from_str(
//!     r#"{"equals": {"status": 1}, "not_in": {"id": [3, 4]}}"#,
//! ).unwrap();
//! assert!(parsed.not_in().contains_key("id"));
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of a filter bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bucket {
    /// Exact match
    Equals,
    /// Set membership
    In,
    /// Set exclusion
    NotIn,
    /// Inclusive range
    Between,
    /// Calendar-date match
    Date,
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals => write!(f, "equals"),
            Self::In => write!(f, "in"),
            Self::NotIn => write!(f, "not_in"),
            Self::Between => write!(f, "between"),
            Self::Date => write!(f, "date"),
        }
    }
}

/// Errors raised while constructing a [`QuerySpec`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuerySpecError {
    /// The same field was placed in two buckets
    #[error("field '{field}' appears in both '{first}' and '{second}' conditions")]
    OverlappingField {
        /// The repeated field
        field: String,
        /// Bucket processed first
        first: Bucket,
        /// Bucket processed second
        second: Bucket,
    },

    /// A condition was given an empty field name
    #[error("empty field name in '{0}' conditions")]
    EmptyField(Bucket),
}

/// Typed, validated filter container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawQuerySpec")]
pub struct QuerySpec {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    equals: BTreeMap<String, Value>,
    #[serde(rename = "in", skip_serializing_if = "BTreeMap::is_empty")]
    in_values: BTreeMap<String, Vec<Value>>,
    #[serde(rename = "not_in", skip_serializing_if = "BTreeMap::is_empty")]
    not_in_values: BTreeMap<String, Vec<Value>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    between: BTreeMap<String, (Value, Value)>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    date: BTreeMap<String, NaiveDate>,
}

/// Wire shape accepted before validation
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawQuerySpec {
    #[serde(default, alias = "queries")]
    equals: BTreeMap<String, Value>,
    #[serde(default, rename = "in", alias = "in_queries")]
    in_values: BTreeMap<String, Vec<Value>>,
    #[serde(default, rename = "not_in", alias = "not_in_queries")]
    not_in_values: BTreeMap<String, Vec<Value>>,
    #[serde(default, alias = "between_queries")]
    between: BTreeMap<String, (Value, Value)>,
    #[serde(default, alias = "date_queries")]
    date: BTreeMap<String, NaiveDate>,
}

impl TryFrom<RawQuerySpec> for QuerySpec {
    type Error = QuerySpecError;

    fn try_from(raw: RawQuerySpec) -> Result<Self, Self::Error> {
        let spec = Self {
            equals: raw.equals,
            in_values: raw.in_values,
            not_in_values: raw.not_in_values,
            between: raw.between,
            date: raw.date,
        };
        spec.validate()?;
        Ok(spec)
    }
}

impl QuerySpec {
    /// An empty spec (matches every row)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start building a spec
    #[must_use]
    pub fn builder() -> QuerySpecBuilder {
        QuerySpecBuilder::default()
    }

    /// Equality conditions
    pub fn equals(&self) -> &BTreeMap<String, Value> {
        &self.equals
    }

    /// Set-membership conditions
    pub fn in_values(&self) -> &BTreeMap<String, Vec<Value>> {
        &self.in_values
    }

    /// Set-exclusion conditions
    pub fn not_in(&self) -> &BTreeMap<String, Vec<Value>> {
        &self.not_in_values
    }

    /// Inclusive range conditions
    pub fn between(&self) -> &BTreeMap<String, (Value, Value)> {
        &self.between
    }

    /// Calendar-date conditions
    pub fn dates(&self) -> &BTreeMap<String, NaiveDate> {
        &self.date
    }

    /// Total number of conditions across all buckets
    pub fn len(&self) -> usize {
        self.equals.len()
            + self.in_values.len()
            + self.not_in_values.len()
            + self.between.len()
            + self.date.len()
    }

    /// Whether the spec has no conditions at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every `(field, bucket)` pair, in processing order
    pub fn fields(&self) -> impl Iterator<Item = (&str, Bucket)> {
        let equals = self.equals.keys().map(|k| (k.as_str(), Bucket::Equals));
        let in_values = self.in_values.keys().map(|k| (k.as_str(), Bucket::In));
        let not_in = self.not_in_values.keys().map(|k| (k.as_str(), Bucket::NotIn));
        let between = self.between.keys().map(|k| (k.as_str(), Bucket::Between));
        let date = self.date.keys().map(|k| (k.as_str(), Bucket::Date));

        equals.chain(in_values).chain(not_in).chain(between).chain(date)
    }

    fn validate(&self) -> Result<(), QuerySpecError> {
        let mut seen: BTreeMap<&str, Bucket> = BTreeMap::new();
        for (field, bucket) in self.fields() {
            if field.trim().is_empty() {
                return Err(QuerySpecError::EmptyField(bucket));
            }
            if let Some(first) = seen.insert(field, bucket) {
                return Err(QuerySpecError::OverlappingField {
                    field: field.to_string(),
                    first,
                    second: bucket,
                });
            }
        }
        Ok(())
    }
}

/// Builder for [`QuerySpec`]
///
/// Adding the same field twice to one bucket keeps the last value; adding it
/// to two different buckets fails in [`QuerySpecBuilder::build`].
#[derive(Debug, Default)]
pub struct QuerySpecBuilder {
    spec: QuerySpec,
}

impl QuerySpecBuilder {
    /// Field equals value
    #[must_use]
    pub fn equals(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.spec.equals.insert(field.into(), value.into());
        self
    }

    /// Field is one of `values`
    #[must_use]
    pub fn is_in<V: Into<Value>>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.spec.in_values.insert(field.into(), values);
        self
    }

    /// Field is none of `values`
    #[must_use]
    pub fn not_in<V: Into<Value>>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.spec.not_in_values.insert(field.into(), values);
        self
    }

    /// `lower <= field <= upper`
    #[must_use]
    pub fn between(
        mut self,
        field: impl Into<String>,
        lower: impl Into<Value>,
        upper: impl Into<Value>,
    ) -> Self {
        self.spec
            .between
            .insert(field.into(), (lower.into(), upper.into()));
        self
    }

    /// Calendar date of field equals `date`
    #[must_use]
    pub fn date(mut self, field: impl Into<String>, date: NaiveDate) -> Self {
        self.spec.date.insert(field.into(), date);
        self
    }

    /// Validate and return the spec
    pub fn build(self) -> Result<QuerySpec, QuerySpecError> {
        self.spec.validate()?;
        Ok(self.spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_fills_buckets() {
        let spec = QuerySpec::builder()
            .equals("status", 1)
            .is_in("role", ["admin", "editor"])
            .not_in("id", [7, 8])
            .between("age", 18, 30)
            .date("created_at", NaiveDate::from_ymd_opt(2024, 1, 2).unwrap())
            .build()
            .unwrap();

        assert_eq!(spec.equals()["status"], json!(1));
        assert_eq!(spec.in_values()["role"], vec![json!("admin"), json!("editor")]);
        assert_eq!(spec.not_in()["id"], vec![json!(7), json!(8)]);
        assert_eq!(spec.between()["age"], (json!(18), json!(30)));
        assert_eq!(spec.len(), 5);
        assert!(!spec.is_empty());
    }

    #[test]
    fn test_empty_spec() {
        let spec = QuerySpec::new();
        assert!(spec.is_empty());
        assert_eq!(spec.fields().count(), 0);
    }

    #[test]
    fn test_overlapping_field_rejected() {
        let err = QuerySpec::builder()
            .equals("status", 1)
            .is_in("status", [1, 2])
            .build()
            .unwrap_err();

        assert_eq!(
            err,
            QuerySpecError::OverlappingField {
                field: "status".to_string(),
                first: Bucket::Equals,
                second: Bucket::In,
            }
        );
    }

    #[test]
    fn test_same_bucket_last_wins() {
        let spec = QuerySpec::builder()
            .equals("status", 1)
            .equals("status", 2)
            .build()
            .unwrap();
        assert_eq!(spec.equals()["status"], json!(2));
    }

    #[test]
    fn test_empty_field_rejected() {
        let err = QuerySpec::builder().between(" ", 1, 2).build().unwrap_err();
        assert_eq!(err, QuerySpecError::EmptyField(Bucket::Between));
    }

    #[test]
    fn test_deserialize_wire_shape() {
        let spec: QuerySpec = serde_json::from_value(json!({
            "equals": {"status": 1},
            "in": {"role": ["a", "b"]},
            "not_in": {"id": [1]},
            "between": {"age": [10, 20]},
            "date": {"created_at": "2024-03-04"}
        }))
        .unwrap();

        assert_eq!(spec.len(), 5);
        assert_eq!(
            spec.dates()["created_at"],
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
        );
    }

    #[test]
    fn test_deserialize_legacy_bucket_names() {
        let spec: QuerySpec = serde_json::from_value(json!({
            "queries": {"status": 1},
            "in_queries": {"role": ["a"]},
            "between_queries": {"age": [1, 2]}
        }))
        .unwrap();

        assert_eq!(spec.len(), 3);
    }

    #[test]
    fn test_deserialize_rejects_unknown_bucket() {
        let result: Result<QuerySpec, _> =
            serde_json::from_value(json!({"like": {"name": "%a%"}}));
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_rejects_overlap() {
        let result: Result<QuerySpec, _> = serde_json::from_value(json!({
            "equals": {"status": 1},
            "not_in": {"status": [2]}
        }));
        let message = result.unwrap_err().to_string();
        assert!(message.contains("status"));
    }

    #[test]
    fn test_deserialize_rejects_malformed_range() {
        let result: Result<QuerySpec, _> =
            serde_json::from_value(json!({"between": {"age": [1, 2, 3]}}));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_skips_empty_buckets() {
        let spec = QuerySpec::builder().is_in("role", ["a"]).build().unwrap();
        assert_eq!(serde_json::to_value(&spec).unwrap(), json!({"in": {"role": ["a"]}}));
    }

    #[test]
    fn test_bucket_display() {
        assert_eq!(Bucket::Equals.to_string(), "equals");
        assert_eq!(Bucket::NotIn.to_string(), "not_in");
        assert_eq!(Bucket::Date.to_string(), "date");
    }
}
