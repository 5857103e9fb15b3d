//! Order history and lifecycle transitions.
//!
//! Orders only ever move forward: `pending -> fulfilled` or `pending ->
//! cancelled`. Transitions use compare-and-set on the stored status, so two
//! racing callers resolve deterministically. Cancellation re-credits stock
//! through the same idempotent release path reconciliation uses, which
//! makes a crashed-and-retried cancel safe.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use streetline_core::{OrderId, OrderStatus};

use crate::auth::AuthContext;
use crate::error::{CommerceError, Result};
use crate::models::Order;
use crate::retry::{RetryPolicy, with_backoff};
use crate::store::CommerceStore;

/// Order read and lifecycle operations.
pub struct OrderService<S> {
    store: Arc<S>,
    retry: RetryPolicy,
}

impl<S: CommerceStore> OrderService<S> {
    /// Create a service with the default retry policy.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    /// Create a service with an explicit retry policy.
    #[must_use]
    pub const fn with_policy(store: Arc<S>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// The caller's orders, newest first.
    pub async fn orders(&self, ctx: &AuthContext) -> Result<Vec<Order>> {
        Ok(self.store.orders_for_user(ctx.user_id).await?)
    }

    /// One of the caller's orders.
    ///
    /// # Errors
    ///
    /// Returns [`CommerceError::NotFound`] if the order does not exist or
    /// belongs to another user; ownership is not leaked through a distinct
    /// error.
    pub async fn order(&self, ctx: &AuthContext, id: OrderId) -> Result<Order> {
        self.store
            .order(id)
            .await?
            .filter(|order| order.user_id == ctx.user_id)
            .ok_or_else(|| CommerceError::NotFound(format!("order {id}")))
    }

    /// Cancel one of the caller's pending orders, re-crediting its stock.
    ///
    /// Safe against races and replays: the status flip is a compare-and-set
    /// and the re-credit is idempotent per line, so a cancel that crashed
    /// after flipping the status finishes its releases when retried, and a
    /// double cancel never credits twice.
    ///
    /// # Errors
    ///
    /// Returns [`CommerceError::Conflict`] if the order is already
    /// fulfilled.
    #[instrument(skip(self, ctx), fields(user = %ctx.user_id, order = %id))]
    pub async fn cancel(&self, ctx: &AuthContext, id: OrderId) -> Result<Order> {
        let order = self.order(ctx, id).await?;

        match order.status {
            OrderStatus::Fulfilled => {
                return Err(CommerceError::Conflict(
                    "order is already fulfilled".to_string(),
                ));
            }
            OrderStatus::Pending => {
                let flipped = self
                    .store
                    .transition_order_status(id, OrderStatus::Pending, OrderStatus::Cancelled)
                    .await?;
                if !flipped {
                    // Lost a race; see what won.
                    let current = self.order(ctx, id).await?;
                    if current.status == OrderStatus::Fulfilled {
                        return Err(CommerceError::Conflict(
                            "order was fulfilled concurrently".to_string(),
                        ));
                    }
                }
            }
            OrderStatus::Cancelled => {}
        }

        // Status is now cancelled. Always run the releases: a previous
        // cancel may have crashed between the flip and the re-credit, and
        // releasing an already-released line is a no-op.
        for item in &order.items {
            let released = with_backoff(self.retry, || {
                self.store
                    .release_decrement(order.reconciliation_key, &item.sku)
            })
            .await?;
            if released {
                info!(sku = %item.sku, quantity = item.quantity, "re-credited stock");
            }
        }

        let cancelled = self.order(ctx, id).await?;
        if cancelled.status != OrderStatus::Cancelled {
            warn!(order = %id, status = %cancelled.status, "cancel finished with unexpected status");
        }
        Ok(cancelled)
    }

    /// Mark a pending order fulfilled. Operator-side action, no caller
    /// context.
    ///
    /// # Errors
    ///
    /// Returns [`CommerceError::NotFound`] for an unknown order and
    /// [`CommerceError::Conflict`] if it is not pending.
    #[instrument(skip(self), fields(order = %id))]
    pub async fn fulfill(&self, id: OrderId) -> Result<Order> {
        let flipped = self
            .store
            .transition_order_status(id, OrderStatus::Pending, OrderStatus::Fulfilled)
            .await?;
        if !flipped {
            let order = self
                .store
                .order(id)
                .await?
                .ok_or_else(|| CommerceError::NotFound(format!("order {id}")))?;
            return Err(CommerceError::Conflict(format!(
                "order is {}, not pending",
                order.status
            )));
        }
        self.store
            .order(id)
            .await?
            .ok_or_else(|| CommerceError::NotFound(format!("order {id}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use streetline_core::{
        AddressId, CheckoutSessionId, Email, Price, ProductId, ShippingOption, SizeCode, Sku,
        UserId, VariantId,
    };

    use super::*;
    use crate::models::{Address, InventoryLevel, OrderItem, PaymentRef};
    use crate::store::MemoryStore;

    fn ctx() -> AuthContext {
        AuthContext::verified(
            UserId::generate(),
            Email::parse("buyer@example.com").unwrap(),
        )
    }

    fn address() -> Address {
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

    /// Seed an order whose stock decrement is recorded under its
    /// reconciliation key, as placement leaves things.
    async fn seed_placed_order(store: &MemoryStore, ctx: &AuthContext) -> (Order, Sku) {
        let sku = Sku::derive("UT", "black", SizeCode::M);
        let product_id = ProductId::generate();
        store
            .upsert_inventory_level(&InventoryLevel {
                sku: sku.clone(),
                product_id,
                variant_id: VariantId::generate(),
                size: SizeCode::M,
                stock: 5,
            })
            .await
            .unwrap();

        let key = CheckoutSessionId::generate();
        store.apply_decrement(key, &sku, 2).await.unwrap();

        let order = Order {
            id: OrderId::generate(),
            user_id: ctx.user_id,
            email: ctx.email.clone(),
            items: vec![OrderItem {
                product_id,
                variant_id: VariantId::generate(),
                sku: sku.clone(),
                name: "Urban Tech Tee".to_string(),
                quantity: 2,
                unit_price: Price::usd_cents(4999),
            }],
            shipping_address: address(),
            billing_address: address(),
            shipping_option: ShippingOption::Standard,
            shipping_cost: Price::usd_cents(0),
            payment_ref: PaymentRef::new("tok_1"),
            total: Price::usd_cents(9998),
            status: OrderStatus::Pending,
            reconciliation_key: key,
            created_at: Utc::now(),
        };
        store.insert_order(&order).await.unwrap();
        (order, sku)
    }

    #[tokio::test]
    async fn test_cancel_pending_recredits_stock() {
        let store = Arc::new(MemoryStore::new());
        let ctx = ctx();
        let (order, sku) = seed_placed_order(&store, &ctx).await;
        assert_eq!(store.stock_of(&sku), Some(3));

        let service = OrderService::new(Arc::clone(&store));
        let cancelled = service.cancel(&ctx, order.id).await.unwrap();

        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(store.stock_of(&sku), Some(5));
    }

    #[tokio::test]
    async fn test_double_cancel_credits_once() {
        let store = Arc::new(MemoryStore::new());
        let ctx = ctx();
        let (order, sku) = seed_placed_order(&store, &ctx).await;

        let service = OrderService::new(Arc::clone(&store));
        service.cancel(&ctx, order.id).await.unwrap();
        let again = service.cancel(&ctx, order.id).await.unwrap();

        assert_eq!(again.status, OrderStatus::Cancelled);
        assert_eq!(store.stock_of(&sku), Some(5));
    }

    #[tokio::test]
    async fn test_cancel_fulfilled_is_conflict() {
        let store = Arc::new(MemoryStore::new());
        let ctx = ctx();
        let (order, sku) = seed_placed_order(&store, &ctx).await;

        let service = OrderService::new(Arc::clone(&store));
        service.fulfill(order.id).await.unwrap();

        let result = service.cancel(&ctx, order.id).await;
        assert!(matches!(result, Err(CommerceError::Conflict(_))));
        assert_eq!(store.stock_of(&sku), Some(3));
    }

    #[tokio::test]
    async fn test_crashed_cancel_finishes_on_retry() {
        let store = Arc::new(MemoryStore::new());
        let ctx = ctx();
        let (order, sku) = seed_placed_order(&store, &ctx).await;

        // Model a cancel that flipped the status and crashed before the
        // re-credit.
        assert!(
            store
                .transition_order_status(order.id, OrderStatus::Pending, OrderStatus::Cancelled)
                .await
                .unwrap()
        );
        assert_eq!(store.stock_of(&sku), Some(3));

        let service = OrderService::new(Arc::clone(&store));
        let cancelled = service.cancel(&ctx, order.id).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(store.stock_of(&sku), Some(5));
    }

    #[tokio::test]
    async fn test_fulfill_cancelled_is_conflict() {
        let store = Arc::new(MemoryStore::new());
        let ctx = ctx();
        let (order, _) = seed_placed_order(&store, &ctx).await;

        let service = OrderService::new(Arc::clone(&store));
        service.cancel(&ctx, order.id).await.unwrap();

        let result = service.fulfill(order.id).await;
        assert!(matches!(result, Err(CommerceError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_foreign_order_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let owner = ctx();
        let (order, _) = seed_placed_order(&store, &owner).await;

        let service = OrderService::new(store);
        let stranger = ctx();
        let result = service.order(&stranger, order.id).await;
        assert!(matches!(result, Err(CommerceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_orders_newest_first() {
        let store = Arc::new(MemoryStore::new());
        let ctx = ctx();
        let (first, _) = seed_placed_order(&store, &ctx).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let (second, _) = seed_placed_order(&store, &ctx).await;

        let service = OrderService::new(store);
        let orders = service.orders(&ctx).await.unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].id, second.id);
        assert_eq!(orders[1].id, first.id);
    }
}
