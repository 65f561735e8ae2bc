//! Property-based tests for condition queries and reconciliation.
//!
//! - Commutativity: applying filter buckets in either order selects the same rows
//! - Convergence: after `upsert_or_delete`, the live rows are exactly the input,
//!   whatever the table held before

use std::collections::BTreeSet;

use crud_core::query::{ConditionQueryBuilder, QuerySpec};
use crud_core::repository::{Entity, GenericRepository, MemoryStore, Row, Storage, TableSchema};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// =============================================================================
// HELPERS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Item {
    id: i64,
    code: String,
    #[serde(default)]
    group: i64,
    #[serde(default)]
    weight: i64,
    #[serde(default)]
    deleted_at: Option<String>,
}

impl Entity for Item {
    const TABLE: &'static str = "items";
    const TIMESTAMPS: bool = false;
}

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

fn store() -> MemoryStore {
    MemoryStore::new().with_table(
        "items",
        TableSchema::new().unique(["code"]).soft_deletes("deleted_at"),
    )
}

fn item_strategy() -> impl Strategy<Value = (i64, i64)> {
    (0i64..5, 0i64..50)
}

fn ids(rows: &[Row]) -> BTreeSet<i64> {
    rows.iter()
        .filter_map(|r| r.get("id").and_then(Value::as_i64))
        .collect()
}

// =============================================================================
// FILTER COMMUTATIVITY
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn buckets_commute(
        items in prop::collection::vec(item_strategy(), 0..30),
        groups in prop::collection::btree_set(0i64..5, 0..4),
        low in 0i64..50,
        span in 0i64..30,
    ) {
        let store = store();
        let rows = items
            .iter()
            .enumerate()
            .map(|(n, (group, weight))| row(json!({"code": format!("c{n}"), "group": group, "weight": weight})))
            .collect();
        block_on(store.insert("items", rows)).unwrap();

        let in_spec = QuerySpec::builder().is_in("group", groups.iter().copied()).build().unwrap();
        let between_spec = QuerySpec::builder().between("weight", low, low + span).build().unwrap();
        let builder = ConditionQueryBuilder::new().with_soft_deletes("deleted_at");

        let in_first = builder.apply(builder.apply(builder.base("items"), &in_spec), &between_spec);
        let between_first = builder.apply(builder.apply(builder.base("items"), &between_spec), &in_spec);

        let a = ids(&block_on(store.fetch(&in_first)).unwrap());
        let b = ids(&block_on(store.fetch(&between_first)).unwrap());
        prop_assert_eq!(&a, &b);

        let expected: BTreeSet<i64> = items
            .iter()
            .enumerate()
            .filter(|(_, (g, w))| groups.contains(g) && *w >= low && *w <= low + span)
            .map(|(n, _)| n as i64 + 1)
            .collect();
        prop_assert_eq!(a, expected);
    }
}

// =============================================================================
// RECONCILIATION
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn upsert_or_delete_converges(
        before in prop::collection::btree_set(0u8..10, 0..8),
        deleted in prop::collection::btree_set(0u8..10, 0..4),
        after in prop::collection::btree_set(0u8..10, 1..8),
        weight in 0i64..100,
    ) {
        let live = block_on(async {
            let repo = GenericRepository::<Item, _>::new(store());

            let prior: Vec<Row> = before
                .iter()
                .map(|n| row(json!({"code": format!("k{n}"), "weight": 0})))
                .collect();
            if !prior.is_empty() {
                repo.insert(prior).await.unwrap();
            }
            let doomed = QuerySpec::builder()
                .is_in("code", deleted.iter().map(|n| format!("k{n}")))
                .build()
                .unwrap();
            repo.delete_by_condition(&doomed).await.unwrap();

            let incoming = after
                .iter()
                .map(|n| row(json!({"code": format!("k{n}"), "weight": weight})))
                .collect();
            repo.upsert_or_delete(incoming, &["code"], &["weight"]).await.unwrap();

            let wanted = QuerySpec::builder()
                .is_in("code", (0u8..10).map(|n| format!("k{n}")))
                .build()
                .unwrap();
            repo.find_by_condition(&[], &wanted).await.unwrap()
        });

        let codes: BTreeSet<String> = live.iter().map(|i| i.code.clone()).collect();
        let expected: BTreeSet<String> = after.iter().map(|n| format!("k{n}")).collect();
        prop_assert_eq!(codes, expected);
        prop_assert!(live.iter().all(|i| i.weight == weight));
    }
}
