//! Paginated catalog queries and product creation.
//!
//! Pagination is keyset-based over `(sort value, id)` with an opaque cursor.
//! Price is not a stored sort key: a price-sorted query walks the catalog in
//! stored creation order and sorts each fetched page in memory, so the
//! cursor chain stays stable while per-page ordering reflects price.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use streetline_core::{ProductId, Sku, VariantId};

use crate::error::{CommerceError, Result};
use crate::models::{CreateProductInput, InventoryLevel, Product, Variant};
use crate::store::{CommerceStore, SortBoundary, SortDirection, StoredSort};

/// Products returned per page.
pub const PAGE_SIZE: usize = 4;

/// Caller-facing sort fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    Name,
    Price,
}

impl SortField {
    /// The stored sort key backing this field. Price-sorted pages walk the
    /// catalog in creation order and re-sort in memory.
    const fn stored(self) -> StoredSort {
        match self {
            Self::CreatedAt | Self::Price => StoredSort::CreatedAt,
            Self::Name => StoredSort::Name,
        }
    }
}

/// Opaque continuation token handed back with each non-final page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageCursor(String);

impl PageCursor {
    /// The encoded token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What a cursor actually encodes. The sort field and direction are baked
/// in so a cursor cannot be replayed against a different ordering.
#[derive(Debug, Serialize, Deserialize)]
struct CursorEnvelope {
    field: SortField,
    direction: SortDirection,
    boundary: SortBoundary,
}

impl CursorEnvelope {
    fn encode(&self) -> Result<PageCursor> {
        let json = serde_json::to_vec(self)
            .map_err(|e| CommerceError::Validation(format!("cursor encoding failed: {e}")))?;
        Ok(PageCursor(URL_SAFE_NO_PAD.encode(json)))
    }

    fn decode(cursor: &PageCursor) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(&cursor.0)
            .map_err(|_| CommerceError::Validation("invalid page cursor".to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|_| CommerceError::Validation("invalid page cursor".to_string()))
    }
}

/// A catalog page request.
#[derive(Debug, Clone, Default)]
pub struct CatalogQuery {
    pub sort: SortField,
    pub direction: SortDirection,
    /// Continue after a previous page; `None` starts a fresh query.
    pub cursor: Option<PageCursor>,
}

/// One page of catalog results.
#[derive(Debug, Clone)]
pub struct CatalogPage {
    pub items: Vec<Product>,
    /// Whether another page may exist.
    pub has_more: bool,
    /// Cursor for the next page; present only when `has_more`.
    pub next_cursor: Option<PageCursor>,
    /// Total catalog size; computed only for fresh (cursorless) queries.
    pub total_count: Option<u64>,
}

/// Catalog read and admin operations.
pub struct CatalogService<S> {
    store: Arc<S>,
}

impl<S: CommerceStore> CatalogService<S> {
    /// Create a service over a store.
    #[must_use]
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Fetch one page of products.
    ///
    /// # Errors
    ///
    /// Returns [`CommerceError::Validation`] for a malformed cursor or a
    /// cursor minted under a different sort field or direction.
    #[instrument(skip(self, query), fields(sort = ?query.sort))]
    pub async fn page(&self, query: &CatalogQuery) -> Result<CatalogPage> {
        let after = match &query.cursor {
            None => None,
            Some(cursor) => {
                let envelope = CursorEnvelope::decode(cursor)?;
                if envelope.field != query.sort || envelope.direction != query.direction {
                    return Err(CommerceError::Validation(
                        "page cursor does not match the requested sort".to_string(),
                    ));
                }
                Some(envelope.boundary)
            }
        };

        let mut items = self
            .store
            .product_page(
                query.sort.stored(),
                // The stored walk for price sorting is always ascending by
                // creation time; direction applies to the in-memory sort.
                if query.sort == SortField::Price {
                    SortDirection::Asc
                } else {
                    query.direction
                },
                after.as_ref(),
                // One extra row distinguishes a full final page from a page
                // with a successor.
                PAGE_SIZE + 1,
            )
            .await?;

        let has_more = items.len() > PAGE_SIZE;
        items.truncate(PAGE_SIZE);
        let next_cursor = if has_more {
            items
                .last()
                .map(|last| {
                    CursorEnvelope {
                        field: query.sort,
                        direction: query.direction,
                        boundary: SortBoundary {
                            value: match query.sort.stored() {
                                StoredSort::CreatedAt => {
                                    crate::store::CursorValue::Timestamp(last.created_at)
                                }
                                StoredSort::Name => {
                                    crate::store::CursorValue::Text(last.name.clone())
                                }
                            },
                            id: last.id,
                        },
                    }
                    .encode()
                })
                .transpose()?
        } else {
            None
        };

        if query.sort == SortField::Price {
            items.sort_by(|a, b| {
                let forward = a.price.amount.cmp(&b.price.amount).then(a.id.cmp(&b.id));
                match query.direction {
                    SortDirection::Asc => forward,
                    SortDirection::Desc => forward.reverse(),
                }
            });
        }

        let total_count = if query.cursor.is_none() {
            Some(self.store.product_count().await?)
        } else {
            None
        };

        Ok(CatalogPage {
            items,
            has_more,
            next_cursor,
            total_count,
        })
    }

    /// Fetch a single product by id.
    ///
    /// # Errors
    ///
    /// Returns [`CommerceError::NotFound`] if the product does not exist.
    pub async fn product(&self, id: ProductId) -> Result<Product> {
        self.store
            .product(id)
            .await?
            .ok_or_else(|| CommerceError::NotFound(format!("product {id}")))
    }

    /// Create a product with its variants and initial inventory levels.
    ///
    /// Every variant gets one SKU per stocked size, derived from the base
    /// code, color, and size; sizes absent from a variant's inventory map
    /// start at zero stock.
    ///
    /// # Errors
    ///
    /// Returns [`CommerceError::Validation`] for empty names or codes, or a
    /// product with no variants or sizes.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_product(&self, input: CreateProductInput) -> Result<Product> {
        if input.name.trim().is_empty() {
            return Err(CommerceError::Validation(
                "product name cannot be empty".to_string(),
            ));
        }
        if input.base_code.trim().is_empty() {
            return Err(CommerceError::Validation(
                "product base code cannot be empty".to_string(),
            ));
        }
        if input.category.trim().is_empty() {
            return Err(CommerceError::Validation(
                "product category cannot be empty".to_string(),
            ));
        }
        if input.variants.is_empty() {
            return Err(CommerceError::Validation(
                "product needs at least one variant".to_string(),
            ));
        }
        if input.sizes.is_empty() {
            return Err(CommerceError::Validation(
                "product needs at least one size".to_string(),
            ));
        }

        let product_id = ProductId::generate();
        let mut variants = Vec::with_capacity(input.variants.len());
        let mut levels = Vec::new();

        for variant_input in &input.variants {
            let variant_id = VariantId::generate();
            let color_name = variant_input
                .color_display
                .as_deref()
                .unwrap_or(&variant_input.color);
            let slug = slugify(&format!("{} {} {}", input.category, input.name, color_name));

            let mut skus = Vec::with_capacity(input.sizes.len());
            for &size in &input.sizes {
                let sku = Sku::derive(&input.base_code, &variant_input.color, size);
                let stock = variant_input.inventory.get(&size).copied().unwrap_or(0);
                levels.push(InventoryLevel {
                    sku: sku.clone(),
                    product_id,
                    variant_id,
                    size,
                    stock,
                });
                skus.push(sku);
            }

            variants.push(Variant {
                id: variant_id,
                product_id,
                color: variant_input.color.clone(),
                color_display: variant_input.color_display.clone(),
                slug,
                skus,
            });
        }

        let product = Product {
            id: product_id,
            name: input.name,
            description: input.description,
            category: input.category,
            base_code: input.base_code,
            price: input.price,
            created_at: chrono::Utc::now(),
            variants,
        };

        self.store.insert_product(&product).await?;
        for level in &levels {
            self.store.upsert_inventory_level(level).await?;
        }

        Ok(product)
    }
}

fn slugify(s: &str) -> String {
    s.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}
