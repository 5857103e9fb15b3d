//! In-memory reference implementation of [`CommerceStore`].
//!
//! A single mutex over typed maps. Critical sections are short and never
//! await, which is what makes `apply_decrement` and
//! `transition_order_status` linearization points for free. Used by unit
//! and integration tests; the semantics here are the contract the Postgres
//! store must match.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use streetline_core::{CheckoutSessionId, OrderId, OrderStatus, ProductId, Sku, UserId};

use crate::models::{Cart, CheckoutSession, InventoryLevel, Order, Product, ReconciliationLog};
use crate::store::{
    CommerceStore, CursorValue, DecrementOutcome, SortBoundary, SortDirection, StoreError,
    StoredSort,
};

#[derive(Default)]
struct Inner {
    products: HashMap<ProductId, Product>,
    inventory: HashMap<Sku, InventoryLevel>,
    movements: HashMap<(CheckoutSessionId, Sku), u32>,
    carts: HashMap<UserId, Cart>,
    sessions: HashMap<UserId, CheckoutSession>,
    orders: HashMap<OrderId, Order>,
    reconciliations: HashMap<CheckoutSessionId, ReconciliationLog>,
}

/// In-memory commerce store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current stock for a SKU, for test assertions.
    #[must_use]
    pub fn stock_of(&self, sku: &Sku) -> Option<u32> {
        self.lock().inventory.get(sku).map(|level| level.stock)
    }
}

fn sort_key(product: &Product, sort: StoredSort) -> CursorValue {
    match sort {
        StoredSort::CreatedAt => CursorValue::Timestamp(product.created_at),
        StoredSort::Name => CursorValue::Text(product.name.clone()),
    }
}

fn compare_values(a: &CursorValue, b: &CursorValue) -> std::cmp::Ordering {
    match (a, b) {
        (CursorValue::Timestamp(x), CursorValue::Timestamp(y)) => x.cmp(y),
        (CursorValue::Text(x), CursorValue::Text(y)) => x.cmp(y),
        // Mixed values mean a corrupted cursor; treat as equal and let the
        // id tiebreak keep the order total.
        _ => std::cmp::Ordering::Equal,
    }
}

fn keyset_cmp(
    a: (&CursorValue, ProductId),
    b: (&CursorValue, ProductId),
    direction: SortDirection,
) -> std::cmp::Ordering {
    let forward = compare_values(a.0, b.0).then(a.1.cmp(&b.1));
    match direction {
        SortDirection::Asc => forward,
        SortDirection::Desc => forward.reverse(),
    }
}

#[async_trait]
impl CommerceStore for MemoryStore {
    async fn insert_product(&self, product: &Product) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.products.contains_key(&product.id) {
            return Err(StoreError::Conflict(format!(
                "product {} already exists",
                product.id
            )));
        }
        inner.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.lock().products.get(&id).cloned())
    }

    async fn product_page(
        &self,
        sort: StoredSort,
        direction: SortDirection,
        after: Option<&SortBoundary>,
        limit: usize,
    ) -> Result<Vec<Product>, StoreError> {
        let inner = self.lock();
        let mut keyed: Vec<(CursorValue, Product)> = inner
            .products
            .values()
            .map(|product| (sort_key(product, sort), product.clone()))
            .collect();
        drop(inner);

        if let Some(boundary) = after {
            keyed.retain(|(value, product)| {
                keyset_cmp(
                    (value, product.id),
                    (&boundary.value, boundary.id),
                    direction,
                ) == std::cmp::Ordering::Greater
            });
        }

        keyed.sort_by(|a, b| keyset_cmp((&a.0, a.1.id), (&b.0, b.1.id), direction));
        keyed.truncate(limit);

        Ok(keyed.into_iter().map(|(_, product)| product).collect())
    }

    async fn product_count(&self) -> Result<u64, StoreError> {
        Ok(self.lock().products.len() as u64)
    }

    async fn inventory_level(&self, sku: &Sku) -> Result<Option<InventoryLevel>, StoreError> {
        Ok(self.lock().inventory.get(sku).cloned())
    }

    async fn upsert_inventory_level(&self, level: &InventoryLevel) -> Result<(), StoreError> {
        self.lock()
            .inventory
            .insert(level.sku.clone(), level.clone());
        Ok(())
    }

    async fn apply_decrement(
        &self,
        key: CheckoutSessionId,
        sku: &Sku,
        qty: u32,
    ) -> Result<DecrementOutcome, StoreError> {
        let mut inner = self.lock();
        if inner.movements.contains_key(&(key, sku.clone())) {
            return Ok(DecrementOutcome::AlreadyApplied);
        }
        let level = inner.inventory.get_mut(sku).ok_or(StoreError::NotFound)?;
        if level.stock < qty {
            return Ok(DecrementOutcome::Insufficient {
                available: level.stock,
            });
        }
        level.stock -= qty;
        inner.movements.insert((key, sku.clone()), qty);
        Ok(DecrementOutcome::Applied)
    }

    async fn release_decrement(
        &self,
        key: CheckoutSessionId,
        sku: &Sku,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let Some(qty) = inner.movements.remove(&(key, sku.clone())) else {
            return Ok(false);
        };
        let level = inner.inventory.get_mut(sku).ok_or_else(|| {
            StoreError::DataCorruption(format!("movement for unknown inventory level {sku}"))
        })?;
        level.stock = level.stock.saturating_add(qty);
        Ok(true)
    }

    async fn cart(&self, user_id: UserId) -> Result<Option<Cart>, StoreError> {
        Ok(self.lock().carts.get(&user_id).cloned())
    }

    async fn put_cart(&self, cart: &Cart) -> Result<(), StoreError> {
        self.lock().carts.insert(cart.user_id, cart.clone());
        Ok(())
    }

    async fn delete_cart(&self, user_id: UserId) -> Result<bool, StoreError> {
        Ok(self.lock().carts.remove(&user_id).is_some())
    }

    async fn checkout_session(
        &self,
        user_id: UserId,
    ) -> Result<Option<CheckoutSession>, StoreError> {
        Ok(self.lock().sessions.get(&user_id).cloned())
    }

    async fn put_checkout_session(&self, session: &CheckoutSession) -> Result<(), StoreError> {
        self.lock().sessions.insert(session.user_id, session.clone());
        Ok(())
    }

    async fn delete_checkout_session(&self, user_id: UserId) -> Result<bool, StoreError> {
        Ok(self.lock().sessions.remove(&user_id).is_some())
    }

    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.orders.contains_key(&order.id) {
            return Err(StoreError::Conflict(format!(
                "order {} already exists",
                order.id
            )));
        }
        inner.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.lock().orders.get(&id).cloned())
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .lock()
            .orders
            .values()
            .filter(|order| order.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by_key(|order| std::cmp::Reverse::<DateTime<Utc>>(order.created_at));
        Ok(orders)
    }

    async fn transition_order_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        match inner.orders.get_mut(&id) {
            Some(order) if order.status == from => {
                order.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reconciliation(
        &self,
        key: CheckoutSessionId,
    ) -> Result<Option<ReconciliationLog>, StoreError> {
        Ok(self.lock().reconciliations.get(&key).cloned())
    }

    async fn create_reconciliation(
        &self,
        log: &ReconciliationLog,
    ) -> Result<ReconciliationLog, StoreError> {
        let mut inner = self.lock();
        Ok(inner
            .reconciliations
            .entry(log.key)
            .or_insert_with(|| log.clone())
            .clone())
    }

    async fn put_reconciliation(&self, log: &ReconciliationLog) -> Result<(), StoreError> {
        self.lock().reconciliations.insert(log.key, log.clone());
        Ok(())
    }

    async fn delete_reconciliation(&self, key: CheckoutSessionId) -> Result<bool, StoreError> {
        Ok(self.lock().reconciliations.remove(&key).is_some())
    }
}
