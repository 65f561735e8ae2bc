//! Repository behaviour across pagination, bulk writes and the envelope

use crud_core::config::DeploymentMode;
use crud_core::envelope::Envelope;
use crud_core::ids::CorrelationId;
use crud_core::query::QuerySpec;
use crud_core::repository::{
    Entity, GenericRepository, MemoryStore, RepositoryErrorKind, Row, TableSchema,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Product {
    id: i64,
    sku: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    price: i64,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    deleted_at: Option<String>,
}

impl Entity for Product {
    const TABLE: &'static str = "products";
}

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn products() -> GenericRepository<Product, MemoryStore> {
    let store = MemoryStore::new().with_table(
        "products",
        TableSchema::new().unique(["sku"]).soft_deletes("deleted_at"),
    );
    GenericRepository::new(store)
}

async fn seeded(count: i64) -> GenericRepository<Product, MemoryStore> {
    let repo = products();
    let rows = (1..=count)
        .map(|n| row(json!({"sku": format!("SKU-{n:03}"), "category": "tools", "price": n})))
        .collect();
    assert!(repo.insert(rows).await.unwrap());
    repo
}

fn ids(items: &[Product]) -> Vec<i64> {
    items.iter().map(|p| p.id).collect()
}

#[tokio::test]
async fn test_paginate_middle_page() {
    let repo = seeded(25).await;
    let page = repo.paginate(&[], 2, 10).await.unwrap();

    assert_eq!(page.items().len(), 10);
    assert_eq!(page.current_page(), 2);
    assert_eq!(page.last_page(), 3);
    assert_eq!(page.next(), Some(3));
    assert_eq!(page.prev(), Some(1));
    assert_eq!(page.total(), 25);
    assert_eq!(ids(page.items()), (6..=15).rev().collect::<Vec<_>>());
}

#[tokio::test]
async fn test_paginate_last_page() {
    let repo = seeded(25).await;
    let page = repo.paginate(&[], 3, 10).await.unwrap();

    assert_eq!(page.items().len(), 5);
    assert_eq!(page.next(), None);
    assert_eq!(page.prev(), Some(2));
    assert_eq!(ids(page.items()), vec![5, 4, 3, 2, 1]);
}

#[tokio::test]
async fn test_paginate_skips_soft_deleted_rows() {
    let repo = seeded(12).await;
    assert!(repo.delete(12).await.unwrap());
    assert!(repo.delete(11).await.unwrap());

    let page = repo.paginate(&[], 1, 10).await.unwrap();
    assert_eq!(page.total(), 10);
    assert_eq!(page.last_page(), 1);
    assert_eq!(page.items()[0].id, 10);
}

#[tokio::test]
async fn test_paginate_empty_table() {
    let page = products().paginate(&[], 1, 10).await.unwrap();
    assert!(page.items().is_empty());
    assert_eq!(page.last_page(), 1);
    assert_eq!(page.next(), None);
}

#[tokio::test]
async fn test_paginate_far_past_the_end() {
    let repo = seeded(3).await;
    let page = repo.paginate(&[], u64::MAX, 20).await.unwrap();

    assert!(page.items().is_empty());
    assert_eq!(page.total(), 3);
    assert_eq!(page.next(), None);
    assert_eq!(page.prev(), Some(u64::MAX - 1));
}

#[tokio::test]
async fn test_insert_or_ignore_counts_only_new_rows() {
    let repo = products();
    repo.create(row(json!({"sku": "A", "price": 10}))).await.unwrap();

    let batch = ["B", "C", "A", "D", "E"]
        .iter()
        .map(|sku| row(json!({"sku": sku, "price": 99})))
        .collect();
    assert_eq!(repo.insert_or_ignore(batch).await.unwrap(), 4);

    let spec = QuerySpec::builder().equals("sku", "A").build().unwrap();
    let original = repo.find_one_by_condition(&[], &spec).await.unwrap().unwrap();
    assert_eq!(original.id, 1);
    assert_eq!(original.price, 10);
    assert_eq!(repo.all_entities(false).await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_update_or_create_creates_one_merged_row() {
    let repo = seeded(3).await;
    let created = repo
        .update_or_create(row(json!({"sku": "NEW"})), row(json!({"category": "garden", "price": 7})))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(created.id, 4);
    assert_eq!(created.sku, "NEW");
    assert_eq!(created.category, "garden");
    assert_eq!(created.price, 7);
    assert_eq!(repo.all_entities(false).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_update_or_create_conflict_returns_none() {
    let repo = seeded(3).await;
    let result = repo
        .update_or_create(row(json!({"category": "nowhere"})), row(json!({"sku": "SKU-001"})))
        .await
        .unwrap();

    assert!(result.is_none());
    assert_eq!(repo.all_entities(false).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_create_conflict_propagates() {
    let repo = seeded(1).await;
    let err = repo.create(row(json!({"sku": "SKU-001"}))).await.unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::AlreadyExists);
}

#[tokio::test]
async fn test_condition_buckets_combine() {
    let repo = seeded(20).await;
    let spec = QuerySpec::builder()
        .is_in("sku", ["SKU-002", "SKU-004", "SKU-006", "SKU-008"])
        .between("price", 3, 7)
        .not_in("id", [6])
        .build()
        .unwrap();

    let found = repo.find_by_condition(&[], &spec).await.unwrap();
    assert_eq!(ids(&found), vec![4]);
    assert!(repo.delete_by_condition(&spec).await.unwrap());
    assert!(repo.find_by_condition(&[], &spec).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_upsert_or_delete_converges() {
    let repo = seeded(5).await;
    let incoming = vec![
        row(json!({"sku": "SKU-002", "category": "tools", "price": 200})),
        row(json!({"sku": "SKU-009", "category": "tools", "price": 900})),
    ];

    assert!(repo.upsert_or_delete(incoming, &["sku"], &["price"]).await.unwrap());

    let live = repo.all_entities(false).await.unwrap();
    let mut skus: Vec<_> = live.iter().map(|p| (p.sku.as_str(), p.price)).collect();
    skus.sort();
    assert_eq!(skus, vec![("SKU-002", 200), ("SKU-009", 900)]);

    // removed rows are soft deleted, not dropped
    assert_eq!(repo.all_entities(true).await.unwrap().len(), 6);
}

#[tokio::test]
async fn test_envelope_for_each_page() {
    let repo = seeded(25).await;
    let envelope = Envelope::new(CorrelationId::new(), DeploymentMode::Production);

    let mut seen = Vec::new();
    for number in 1..=3 {
        let page = repo.paginate(&[], number, 10).await.unwrap();
        let expected = serde_json::to_value(page.items()).unwrap();
        let wire = envelope.success(page);

        assert_eq!(wire.body["paginate"]["total"], 25);
        assert_eq!(wire.body["paginate"]["current_page"], number);
        assert_eq!(wire.body["data"], expected);
        seen.extend(wire.body["data"].as_array().unwrap().iter().map(|p| p["id"].clone()));
    }

    assert_eq!(seen.len(), 25);
    assert_eq!(seen.first(), Some(&json!(25)));
    assert_eq!(seen.last(), Some(&json!(1)));
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Label {
    id: i64,
    name: String,
}

impl Entity for Label {
    const TABLE: &'static str = "labels";
    const TIMESTAMPS: bool = false;
}

#[tokio::test]
async fn test_empty_update_still_resolves_the_row() {
    let repo = GenericRepository::<Label, _>::new(MemoryStore::new().with_table("labels", TableSchema::new()));
    let label = repo.create(row(json!({"name": "urgent"}))).await.unwrap();

    let unchanged = repo.update(label.id, Row::new()).await.unwrap();
    assert_eq!(unchanged, Some(label.clone()));
    assert_eq!(repo.update(label.id + 1, Row::new()).await.unwrap(), None);

    let kept = repo
        .update_or_create(row(json!({"name": "urgent"})), Row::new())
        .await
        .unwrap();
    assert_eq!(kept, Some(label));
}
