//! Label selection over a small, fixed data set.

mod common;

use std::collections::BTreeSet;

use common::{StorageBuilder, TestHarness};
use delegator::pagination::{ListParams, Paginator};
use delegator::resource::{Scope, Storage};

async fn seeded() -> TestHarness {
    let harness = TestHarness::with_plugins(Vec::new()).await;
    let resources = [
        StorageBuilder::new("first").label("tier", "prod").label("env", "prod"),
        StorageBuilder::new("second").label("tier", "dev").label("env", "staging"),
        StorageBuilder::new("third")
            .label("tier", "prod")
            .label("env", "staging")
            .label("rank", "3"),
    ];
    for builder in resources {
        harness
            .storages
            .create(&harness.ctx, builder.build())
            .await
            .expect("Failed to create storage");
    }
    harness
}

async fn select(harness: &TestHarness, selector: &str) -> Vec<String> {
    let params = ListParams::new().selector(selector);
    let items: Vec<Storage> = Paginator::new(harness.storages.as_ref(), params)
        .collect_all(&harness.ctx)
        .await
        .expect("List failed");
    items.into_iter().map(|s| s.metadata.name).collect()
}

#[tokio::test]
async fn test_equality_selects_exact_match() {
    let harness = seeded().await;
    assert_eq!(select(&harness, "tier=prod,env=prod").await, vec!["first"]);
}

#[tokio::test]
async fn test_numeric_comparison_is_evaluated_caller_side() {
    let harness = seeded().await;
    assert_eq!(select(&harness, "rank>2").await, vec!["third"]);
    assert!(select(&harness, "rank>3").await.is_empty());
}

#[tokio::test]
async fn test_set_membership_matches_equality() {
    let harness = seeded().await;
    assert_eq!(
        select(&harness, "tier in (prod)").await,
        select(&harness, "tier=prod").await
    );
    assert_eq!(select(&harness, "tier=prod").await, vec!["first", "third"]);
}

#[tokio::test]
async fn test_wildcard_value() {
    let harness = seeded().await;
    assert_eq!(select(&harness, "env=stag*").await, vec!["second", "third"]);
}

#[tokio::test]
async fn test_invalid_selector_yields_nothing() {
    let harness = seeded().await;
    assert!(select(&harness, "tier=+=prod").await.is_empty());
}

#[tokio::test]
async fn test_pagination_is_complete_without_duplicates() {
    let harness = seeded().await;
    for i in 0..20 {
        harness
            .storages
            .create(
                &harness.ctx,
                StorageBuilder::new(&format!("bulk-{:02}", i)).scope("acme", "dev").build(),
            )
            .await
            .unwrap();
    }

    let mut paginator = Paginator::new(harness.storages.as_ref(), ListParams::new().limit(6));
    let mut seen = BTreeSet::new();
    let mut pages = 0;
    while let Some(items) = paginator.next_page(&harness.ctx).await.unwrap() {
        pages += 1;
        for item in items {
            assert!(seen.insert(item.metadata.key()), "duplicate {}", item.metadata.name);
        }
    }
    assert_eq!(seen.len(), 23);
    assert_eq!(pages, 4);

    let scoped = Paginator::new(
        harness.storages.as_ref(),
        ListParams::new().in_scope(Scope::new("acme", "dev")).limit(7),
    )
    .collect_all(&harness.ctx)
    .await
    .unwrap();
    assert_eq!(scoped.len(), 20);
}
