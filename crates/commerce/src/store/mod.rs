//! Persistence abstraction for the commerce engine.
//!
//! The engine talks to a document store through [`CommerceStore`]. The
//! contract the engine relies on:
//!
//! - per-document atomic read-modify-write: [`CommerceStore::apply_decrement`],
//!   [`CommerceStore::release_decrement`], and
//!   [`CommerceStore::transition_order_status`] are linearized per SKU /
//!   per order and idempotent by key
//! - everything else is plain single-owner CRUD with no cross-request
//!   locking requirements
//!
//! Two implementations ship with the crate: [`MemoryStore`] (reference,
//! used by tests) and [`PostgresStore`].

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use streetline_core::{CheckoutSessionId, OrderId, OrderStatus, ProductId, Sku, UserId};

use crate::models::{Cart, CheckoutSession, InventoryLevel, Order, Product, ReconciliationLog};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The store is temporarily unreachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Data in the store is corrupted or fails to deserialize.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested record was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate order id).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

impl StoreError {
    /// Whether the failure is worth retrying with backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Database(err) => matches!(err, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut),
            Self::DataCorruption(_) | Self::NotFound | Self::Conflict(_) => false,
        }
    }
}

/// Outcome of an idempotent stock decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecrementOutcome {
    /// Stock was decremented by this call.
    Applied,
    /// A decrement for this (key, SKU) pair was already recorded; stock is
    /// unchanged by this call.
    AlreadyApplied,
    /// Stock is insufficient; nothing was changed.
    Insufficient {
        /// Units currently available.
        available: u32,
    },
}

/// Stored sort keys for catalog pagination.
///
/// Price is deliberately absent: it is not a stored sort key, and
/// price-sorted queries walk the catalog in `CreatedAt` order (see
/// `catalog`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoredSort {
    CreatedAt,
    Name,
}

/// Sort direction for catalog pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Last-seen sort value for keyset pagination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorValue {
    Timestamp(DateTime<Utc>),
    Text(String),
}

/// Keyset boundary: the page continues strictly after this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortBoundary {
    pub value: CursorValue,
    pub id: ProductId,
}

/// The persistence contract consumed by every commerce service.
#[async_trait]
pub trait CommerceStore: Send + Sync {
    // =========================================================================
    // Catalog
    // =========================================================================

    /// Insert a new product.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the product id already exists.
    async fn insert_product(&self, product: &Product) -> Result<(), StoreError>;

    /// Fetch a product by id.
    async fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// Fetch one page of products in `(sort value, id)` keyset order,
    /// strictly after `after` when present.
    async fn product_page(
        &self,
        sort: StoredSort,
        direction: SortDirection,
        after: Option<&SortBoundary>,
        limit: usize,
    ) -> Result<Vec<Product>, StoreError>;

    /// Total number of products.
    async fn product_count(&self) -> Result<u64, StoreError>;

    // =========================================================================
    // Inventory
    // =========================================================================

    /// Fetch the inventory level for a SKU.
    async fn inventory_level(&self, sku: &Sku) -> Result<Option<InventoryLevel>, StoreError>;

    /// Create or replace an inventory level.
    async fn upsert_inventory_level(&self, level: &InventoryLevel) -> Result<(), StoreError>;

    /// Atomically decrement stock for `sku` by `qty`, recorded under `key`.
    ///
    /// This is the serialization point for concurrent reconciliations: the
    /// sufficiency check and the decrement happen as one atomic unit per
    /// SKU, and a repeated call with the same `(key, sku)` is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no inventory level exists for
    /// the SKU.
    async fn apply_decrement(
        &self,
        key: CheckoutSessionId,
        sku: &Sku,
        qty: u32,
    ) -> Result<DecrementOutcome, StoreError>;

    /// Release the decrement recorded under `(key, sku)`, re-crediting the
    /// stock it took. Returns `false` (and changes nothing) if no such
    /// decrement is recorded - releases are idempotent, never blind
    /// re-increments.
    async fn release_decrement(&self, key: CheckoutSessionId, sku: &Sku)
    -> Result<bool, StoreError>;

    // =========================================================================
    // Carts
    // =========================================================================

    /// Fetch a user's cart.
    async fn cart(&self, user_id: UserId) -> Result<Option<Cart>, StoreError>;

    /// Create or replace a user's cart.
    async fn put_cart(&self, cart: &Cart) -> Result<(), StoreError>;

    /// Delete a user's cart. Returns `false` if there was none.
    async fn delete_cart(&self, user_id: UserId) -> Result<bool, StoreError>;

    // =========================================================================
    // Checkout sessions
    // =========================================================================

    /// Fetch a user's checkout session.
    async fn checkout_session(&self, user_id: UserId)
    -> Result<Option<CheckoutSession>, StoreError>;

    /// Create or replace a user's checkout session.
    async fn put_checkout_session(&self, session: &CheckoutSession) -> Result<(), StoreError>;

    /// Delete a user's checkout session. Returns `false` if there was none.
    async fn delete_checkout_session(&self, user_id: UserId) -> Result<bool, StoreError>;

    // =========================================================================
    // Orders
    // =========================================================================

    /// Insert a new order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the order id already exists.
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError>;

    /// Fetch an order by id.
    async fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// All orders for a user, newest first.
    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, StoreError>;

    /// Compare-and-set the order status. Returns `true` only if the order
    /// existed with status `from` and was moved to `to` by this call.
    async fn transition_order_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError>;

    // =========================================================================
    // Reconciliation logs
    // =========================================================================

    /// Fetch the reconciliation log for an idempotency key.
    async fn reconciliation(
        &self,
        key: CheckoutSessionId,
    ) -> Result<Option<ReconciliationLog>, StoreError>;

    /// Atomically claim an idempotency key: store `log` if the key has no
    /// log yet and return it, otherwise return the log already stored.
    /// This is the linearization point for concurrent reconciliations of
    /// the same key; exactly one caller's snapshot wins.
    async fn create_reconciliation(
        &self,
        log: &ReconciliationLog,
    ) -> Result<ReconciliationLog, StoreError>;

    /// Create or replace a reconciliation log.
    async fn put_reconciliation(&self, log: &ReconciliationLog) -> Result<(), StoreError>;

    /// Delete a reconciliation log. Returns `false` if there was none.
    async fn delete_reconciliation(&self, key: CheckoutSessionId) -> Result<bool, StoreError>;
}
