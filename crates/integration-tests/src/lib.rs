//! Integration test harness for Streetline.
//!
//! Tests exercise the full engine (cart, checkout, reconciliation, orders)
//! against the in-memory store, which shares the semantics contract with
//! the Postgres store. [`FaultStore`] wraps the store with a countdown
//! fault injector so tests can model a process that dies or loses its
//! database mid-flow and then retries.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use streetline_core::{
    AddressId, CheckoutSessionId, Email, OrderId, OrderStatus, Price, ProductId, SizeCode, Sku,
    UserId, VariantId,
};

use streetline_commerce::AuthContext;
use streetline_commerce::models::{
    Address, Cart, CheckoutSession, InventoryLevel, Order, Product, ReconciliationLog,
};
use streetline_commerce::retry::RetryPolicy;
use streetline_commerce::store::{
    CommerceStore, DecrementOutcome, MemoryStore, SortBoundary, SortDirection, StoreError,
    StoredSort,
};

// =============================================================================
// Fixtures
// =============================================================================

/// A verified buyer identity.
#[must_use]
pub fn verified_ctx() -> AuthContext {
    AuthContext::verified(
        UserId::generate(),
        Email::parse("buyer@example.com").expect("valid email"),
    )
}

/// A complete shipping/billing address.
#[must_use]
pub fn test_address() -> Address {
    Address {
        id: AddressId::generate(),
        full_name: "Sam Porter".to_string(),
        line1: "1 Delivery Way".to_string(),
        line2: None,
        city: "Portland".to_string(),
        region: "OR".to_string(),
        postal_code: "97201".to_string(),
        country: "US".to_string(),
    }
}

/// A retry policy with negligible delays so fault-injection tests run fast.
#[must_use]
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    }
}

/// Seed a product with a single size-M variant SKU at the given stock.
///
/// # Panics
///
/// Panics if the store rejects the seed writes.
pub async fn seed_product<S: CommerceStore>(
    store: &S,
    base_code: &str,
    cents: i64,
    stock: u32,
) -> (ProductId, Sku) {
    let product = Product {
        id: ProductId::generate(),
        name: format!("{base_code} Demo Product"),
        description: String::new(),
        category: "tshirts".to_string(),
        base_code: base_code.to_string(),
        price: Price::usd_cents(cents),
        created_at: Utc::now(),
        variants: Vec::new(),
    };
    store.insert_product(&product).await.expect("seed product");

    let sku = Sku::derive(base_code, "black", SizeCode::M);
    store
        .upsert_inventory_level(&InventoryLevel {
            sku: sku.clone(),
            product_id: product.id,
            variant_id: VariantId::generate(),
            size: SizeCode::M,
            stock,
        })
        .await
        .expect("seed inventory");

    (product.id, sku)
}

// =============================================================================
// Fault injection
// =============================================================================

/// A [`CommerceStore`] wrapper that injects transient failures.
///
/// Every mutating call passes through a countdown: after `pass` successful
/// mutations, the next `faults` mutations fail with
/// [`StoreError::Unavailable`], then the store recovers. Reads are never
/// faulted. Arm the injector after seeding so fixture writes don't consume
/// the countdown.
pub struct FaultStore {
    inner: Arc<MemoryStore>,
    pass: AtomicU32,
    faults: AtomicU32,
}

impl FaultStore {
    /// Wrap a store with the injector disarmed.
    #[must_use]
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            pass: AtomicU32::new(u32::MAX),
            faults: AtomicU32::new(0),
        }
    }

    /// Let the next `pass` mutating calls succeed, then fail the following
    /// `faults` mutating calls.
    pub fn fail_after(&self, pass: u32, faults: u32) {
        self.pass.store(pass, Ordering::SeqCst);
        self.faults.store(faults, Ordering::SeqCst);
    }

    /// The wrapped store, for direct assertions.
    #[must_use]
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn gate(&self) -> Result<(), StoreError> {
        if self.pass.load(Ordering::SeqCst) > 0 {
            self.pass.fetch_sub(1, Ordering::SeqCst);
            return Ok(());
        }
        if self.faults.load(Ordering::SeqCst) > 0 {
            self.faults.fetch_sub(1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected fault".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CommerceStore for FaultStore {
    async fn insert_product(&self, product: &Product) -> Result<(), StoreError> {
        self.gate()?;
        self.inner.insert_product(product).await
    }

    async fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        self.inner.product(id).await
    }

    async fn product_page(
        &self,
        sort: StoredSort,
        direction: SortDirection,
        after: Option<&SortBoundary>,
        limit: usize,
    ) -> Result<Vec<Product>, StoreError> {
        self.inner.product_page(sort, direction, after, limit).await
    }

    async fn product_count(&self) -> Result<u64, StoreError> {
        self.inner.product_count().await
    }

    async fn inventory_level(&self, sku: &Sku) -> Result<Option<InventoryLevel>, StoreError> {
        self.inner.inventory_level(sku).await
    }

    async fn upsert_inventory_level(&self, level: &InventoryLevel) -> Result<(), StoreError> {
        self.gate()?;
        self.inner.upsert_inventory_level(level).await
    }

    async fn apply_decrement(
        &self,
        key: CheckoutSessionId,
        sku: &Sku,
        qty: u32,
    ) -> Result<DecrementOutcome, StoreError> {
        self.gate()?;
        self.inner.apply_decrement(key, sku, qty).await
    }

    async fn release_decrement(
        &self,
        key: CheckoutSessionId,
        sku: &Sku,
    ) -> Result<bool, StoreError> {
        self.gate()?;
        self.inner.release_decrement(key, sku).await
    }

    async fn cart(&self, user_id: UserId) -> Result<Option<Cart>, StoreError> {
        self.inner.cart(user_id).await
    }

    async fn put_cart(&self, cart: &Cart) -> Result<(), StoreError> {
        self.gate()?;
        self.inner.put_cart(cart).await
    }

    async fn delete_cart(&self, user_id: UserId) -> Result<bool, StoreError> {
        self.gate()?;
        self.inner.delete_cart(user_id).await
    }

    async fn checkout_session(
        &self,
        user_id: UserId,
    ) -> Result<Option<CheckoutSession>, StoreError> {
        self.inner.checkout_session(user_id).await
    }

    async fn put_checkout_session(&self, session: &CheckoutSession) -> Result<(), StoreError> {
        self.gate()?;
        self.inner.put_checkout_session(session).await
    }

    async fn delete_checkout_session(&self, user_id: UserId) -> Result<bool, StoreError> {
        self.gate()?;
        self.inner.delete_checkout_session(user_id).await
    }

    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        self.gate()?;
        self.inner.insert_order(order).await
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        self.inner.order(id).await
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        self.inner.orders_for_user(user_id).await
    }

    async fn transition_order_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        self.gate()?;
        self.inner.transition_order_status(id, from, to).await
    }

    async fn reconciliation(
        &self,
        key: CheckoutSessionId,
    ) -> Result<Option<ReconciliationLog>, StoreError> {
        self.inner.reconciliation(key).await
    }

    async fn create_reconciliation(
        &self,
        log: &ReconciliationLog,
    ) -> Result<ReconciliationLog, StoreError> {
        self.gate()?;
        self.inner.create_reconciliation(log).await
    }

    async fn put_reconciliation(&self, log: &ReconciliationLog) -> Result<(), StoreError> {
        self.gate()?;
        self.inner.put_reconciliation(log).await
    }

    async fn delete_reconciliation(&self, key: CheckoutSessionId) -> Result<bool, StoreError> {
        self.gate()?;
        self.inner.delete_reconciliation(key).await
    }
}
