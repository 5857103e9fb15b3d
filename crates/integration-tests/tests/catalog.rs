//! Catalog pagination tests over a catalog built through the admin path.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;

use streetline_commerce::CommerceError;
use streetline_commerce::catalog::{CatalogQuery, CatalogService, PAGE_SIZE, SortField};
use streetline_commerce::models::{CreateProductInput, CreateVariantInput};
use streetline_commerce::store::{MemoryStore, SortDirection};

use streetline_core::{Price, SizeCode};

fn input(name: &str, base: &str, cents: i64) -> CreateProductInput {
    CreateProductInput {
        name: name.to_string(),
        description: String::new(),
        category: "tshirts".to_string(),
        base_code: base.to_string(),
        price: Price::usd_cents(cents),
        sizes: vec![SizeCode::M],
        variants: vec![CreateVariantInput {
            color: "black".to_string(),
            color_display: None,
            inventory: HashMap::from([(SizeCode::M, 10)]),
        }],
    }
}

async fn seeded_service(count: usize) -> CatalogService<MemoryStore> {
    let service = CatalogService::new(Arc::new(MemoryStore::new()));
    for i in 0..count {
        service
            .create_product(input(
                &format!("Product {i:02}"),
                &format!("P{i}"),
                1000 + i64::try_from(i).unwrap() * 250,
            ))
            .await
            .unwrap();
    }
    service
}

#[tokio::test]
async fn test_name_sort_walks_whole_catalog_in_order() {
    let service = seeded_service(9).await;

    let mut names = Vec::new();
    let mut cursor = None;
    let mut total = None;
    loop {
        let page = service
            .page(&CatalogQuery {
                sort: SortField::Name,
                direction: SortDirection::Asc,
                cursor,
            })
            .await
            .unwrap();
        if page.total_count.is_some() {
            total = page.total_count;
        }
        names.extend(page.items.iter().map(|p| p.name.clone()));
        if !page.has_more {
            break;
        }
        cursor = page.next_cursor;
    }

    assert_eq!(total, Some(9));
    assert_eq!(names.len(), 9);
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
}

#[tokio::test]
async fn test_pages_never_repeat_under_price_sort() {
    let service = seeded_service(10).await;

    let mut seen = Vec::new();
    let mut cursor = None;
    loop {
        let page = service
            .page(&CatalogQuery {
                sort: SortField::Price,
                direction: SortDirection::Desc,
                cursor,
            })
            .await
            .unwrap();

        // Each page is internally price-ordered even though the walk is by
        // creation time.
        let amounts: Vec<Decimal> = page.items.iter().map(|p| p.price.amount).collect();
        let mut expected = amounts.clone();
        expected.sort_by(|a, b| b.cmp(a));
        assert_eq!(amounts, expected);

        seen.extend(page.items.iter().map(|p| p.id));
        if !page.has_more {
            break;
        }
        cursor = page.next_cursor;
    }

    assert_eq!(seen.len(), 10);
    let mut deduped = seen.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(deduped.len(), 10);
}

#[tokio::test]
async fn test_exact_multiple_of_page_size_ends_cleanly() {
    let service = seeded_service(PAGE_SIZE * 2).await;

    let first = service.page(&CatalogQuery::default()).await.unwrap();
    assert!(first.has_more);

    let second = service
        .page(&CatalogQuery {
            cursor: first.next_cursor,
            ..CatalogQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(second.items.len(), PAGE_SIZE);
    // A full final page is final: no phantom empty page after it.
    assert!(!second.has_more);
    assert!(second.next_cursor.is_none());
}

#[tokio::test]
async fn test_cursor_is_bound_to_its_sort() {
    let service = seeded_service(6).await;

    let page = service
        .page(&CatalogQuery {
            sort: SortField::Name,
            direction: SortDirection::Asc,
            cursor: None,
        })
        .await
        .unwrap();

    let result = service
        .page(&CatalogQuery {
            sort: SortField::Name,
            direction: SortDirection::Desc,
            cursor: page.next_cursor,
        })
        .await;
    assert!(matches!(result, Err(CommerceError::Validation(_))));
}
