//! Order placement: atomic cart-to-order conversion with inventory
//! reconciliation.
//!
//! The flow is a small phase machine persisted in a [`ReconciliationLog`]
//! keyed by the checkout session id:
//!
//! ```text
//! reserving -> reserved -> order_written -> completed
//! ```
//!
//! The full order snapshot is written into the log before the first stock
//! decrement, so a crashed or retried call resumes from the recorded phase
//! without re-reading the cart or catalog. Every decrement and release is
//! idempotent by `(key, sku)`, which makes replaying any phase safe.
//! `reserved` is the commit point: an insufficiency before it releases all
//! reservations and aborts; after it the order always materializes.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use streetline_core::{CheckoutStage, OrderId, OrderStatus, Price};

use crate::auth::AuthContext;
use crate::error::{CommerceError, Result};
use crate::models::{
    Address, Order, OrderItem, PaymentRef, ReconciliationLog, ReconciliationPhase,
};
use crate::retry::{RetryPolicy, with_backoff};
use crate::store::{CommerceStore, DecrementOutcome, StoreError};

/// Drives cart-to-order reconciliation.
pub struct Reconciler<S> {
    store: Arc<S>,
    retry: RetryPolicy,
}

impl<S: CommerceStore> Reconciler<S> {
    /// Create a reconciler with the default retry policy.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    /// Create a reconciler with an explicit retry policy.
    #[must_use]
    pub const fn with_policy(store: Arc<S>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Convert the caller's cart into an order, decrementing stock for every
    /// line.
    ///
    /// The checkout session id is the idempotency key: calling again after a
    /// crash or transient failure resumes the in-flight reconciliation and
    /// returns the same order instead of decrementing twice. The payment
    /// reference is recorded verbatim; this engine never talks to the
    /// processor.
    ///
    /// # Errors
    ///
    /// - [`CommerceError::Unauthorized`] for an unverified identity
    /// - [`CommerceError::NotFound`] when no checkout session exists
    /// - [`CommerceError::Validation`] when the session is not ready for
    ///   payment or the cart is empty
    /// - [`CommerceError::InsufficientStock`] when any line cannot be
    ///   covered; no stock is held and no order exists afterwards
    /// - [`CommerceError::Dependency`] when the store fails after bounded
    ///   retries; the call may be safely repeated
    #[instrument(skip(self, ctx, payment, billing_address), fields(user = %ctx.user_id))]
    pub async fn place_order(
        &self,
        ctx: &AuthContext,
        payment: PaymentRef,
        billing_address: Address,
    ) -> Result<Order> {
        ctx.require_payment_identity()?;

        let session = self
            .store
            .checkout_session(ctx.user_id)
            .await?
            .ok_or_else(|| CommerceError::NotFound("checkout session".to_string()))?;

        // An existing log means a previous attempt got past the decision
        // point; resume it rather than re-deciding anything.
        if let Some(log) = self.store.reconciliation(session.id).await? {
            info!(key = %session.id, phase = ?log.phase, "resuming in-flight reconciliation");
            return self.drive(log).await;
        }

        if session.stage != CheckoutStage::ReadyForPayment {
            return Err(CommerceError::Validation(format!(
                "checkout session is not ready for payment (stage: {})",
                session.stage
            )));
        }
        let (shipping_option, shipping_cost) = match (session.shipping_option, session.shipping_cost)
        {
            (Some(option), Some(cost)) => (option, cost),
            _ => {
                return Err(CommerceError::Validation(
                    "checkout session has no priced shipping option".to_string(),
                ));
            }
        };

        let cart = self
            .store
            .cart(ctx.user_id)
            .await?
            .filter(|cart| !cart.items.is_empty())
            .ok_or_else(|| CommerceError::Validation("cart is empty".to_string()))?;

        // Snapshot catalog prices and fast-fail on obviously short stock.
        // The authoritative sufficiency check is the atomic decrement below.
        let mut items = Vec::with_capacity(cart.items.len());
        let mut total = Price::new(Decimal::ZERO, shipping_cost.currency_code);
        for line in &cart.items {
            let product = self.store.product(line.product_id).await?.ok_or_else(|| {
                CommerceError::NotFound(format!("product {}", line.product_id))
            })?;
            let level = self
                .store
                .inventory_level(&line.sku)
                .await?
                .ok_or_else(|| CommerceError::NotFound(format!("sku {}", line.sku)))?;
            if level.stock < line.quantity {
                return Err(CommerceError::InsufficientStock(line.sku.clone()));
            }
            if product.price.currency_code != total.currency_code {
                return Err(CommerceError::Validation(format!(
                    "cart mixes currencies: {} and {}",
                    total.currency_code.code(),
                    product.price.currency_code.code()
                )));
            }
            total.amount += product.price.amount * Decimal::from(line.quantity);
            items.push(OrderItem {
                product_id: line.product_id,
                variant_id: line.variant_id,
                sku: line.sku.clone(),
                name: product.name,
                quantity: line.quantity,
                unit_price: product.price,
            });
        }
        total.amount += shipping_cost.amount;

        let order = Order {
            id: OrderId::generate(),
            user_id: ctx.user_id,
            email: session.email.clone(),
            items,
            shipping_address: session.shipping_address.clone(),
            billing_address,
            shipping_option,
            shipping_cost,
            payment_ref: payment,
            total,
            status: OrderStatus::Pending,
            reconciliation_key: session.id,
            created_at: Utc::now(),
        };

        let log = ReconciliationLog {
            key: session.id,
            order,
            phase: ReconciliationPhase::Reserving,
            updated_at: Utc::now(),
        };
        // The log insert is the atomic claim on the idempotency key. If a
        // concurrent call got there first we drive its snapshot instead of
        // ours; every later step is idempotent by key, so both callers
        // converge on the winning order.
        let claimed = with_backoff(self.retry, || self.store.create_reconciliation(&log)).await?;
        if claimed.order.id != log.order.id {
            info!(key = %session.id, "key already claimed; driving existing reconciliation");
        }

        self.drive(claimed).await
    }

    /// Advance a reconciliation from its recorded phase to completion.
    async fn drive(&self, mut log: ReconciliationLog) -> Result<Order> {
        if log.phase == ReconciliationPhase::Reserving {
            self.reserve(&mut log).await?;
        }
        if log.phase == ReconciliationPhase::Reserved {
            self.write_order(&mut log).await?;
        }
        if log.phase == ReconciliationPhase::OrderWritten {
            self.cleanup(&mut log).await;
        }
        Ok(log.order)
    }

    /// Apply every line's stock decrement, aborting on insufficiency.
    async fn reserve(&self, log: &mut ReconciliationLog) -> Result<()> {
        for item in &log.order.items {
            let outcome = with_backoff(self.retry, || {
                self.store.apply_decrement(log.key, &item.sku, item.quantity)
            })
            .await
            .map_err(|err| match err {
                StoreError::NotFound => CommerceError::NotFound(format!("sku {}", item.sku)),
                other => CommerceError::Dependency(other),
            })?;

            match outcome {
                DecrementOutcome::Applied | DecrementOutcome::AlreadyApplied => {}
                DecrementOutcome::Insufficient { available } => {
                    warn!(
                        key = %log.key,
                        sku = %item.sku,
                        requested = item.quantity,
                        available,
                        "aborting reconciliation: insufficient stock"
                    );
                    self.abort(log).await?;
                    return Err(CommerceError::InsufficientStock(item.sku.clone()));
                }
            }
        }

        log.phase = ReconciliationPhase::Reserved;
        log.updated_at = Utc::now();
        with_backoff(self.retry, || self.store.put_reconciliation(log)).await?;
        Ok(())
    }

    /// Release every reservation taken under this key and drop the log.
    ///
    /// Releases are idempotent, so a store failure here leaves the log in
    /// place and a retried `place_order` runs the abort again to completion.
    async fn abort(&self, log: &ReconciliationLog) -> Result<()> {
        for item in &log.order.items {
            with_backoff(self.retry, || {
                self.store.release_decrement(log.key, &item.sku)
            })
            .await?;
        }
        with_backoff(self.retry, || self.store.delete_reconciliation(log.key)).await?;
        Ok(())
    }

    /// Persist the order record. A duplicate-id conflict means an earlier
    /// attempt already wrote it, which is success here.
    async fn write_order(&self, log: &mut ReconciliationLog) -> Result<()> {
        let result = with_backoff(self.retry, || self.store.insert_order(&log.order)).await;
        match result {
            Ok(()) | Err(StoreError::Conflict(_)) => {}
            Err(err) => return Err(err.into()),
        }

        log.phase = ReconciliationPhase::OrderWritten;
        log.updated_at = Utc::now();
        with_backoff(self.retry, || self.store.put_reconciliation(log)).await?;
        info!(key = %log.key, order = %log.order.id, "order written");
        Ok(())
    }

    /// Consume the cart and session. Best effort: the order already exists,
    /// so failures here are logged and the order is still returned; the log
    /// stays at `order_written` for a later replay to finish the job.
    async fn cleanup(&self, log: &mut ReconciliationLog) {
        let user_id = log.order.user_id;
        let swept = async {
            with_backoff(self.retry, || self.store.delete_cart(user_id)).await?;
            with_backoff(self.retry, || self.store.delete_checkout_session(user_id)).await?;
            log.phase = ReconciliationPhase::Completed;
            log.updated_at = Utc::now();
            with_backoff(self.retry, || self.store.put_reconciliation(&*log)).await
        }
        .await;

        if let Err(err) = swept {
            warn!(key = %log.key, error = %err, "order placed but cleanup incomplete");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use streetline_core::{
        AddressId, CheckoutSessionId, CurrencyCode, Email, ProductId, ShippingOption, SizeCode,
        Sku, UserId, VariantId,
    };

    use super::*;
    use crate::models::{Cart, CartItem, CheckoutSession, InventoryLevel, Product};
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

    async fn seed_sku(store: &MemoryStore, cents: i64, stock: u32) -> (ProductId, Sku) {
        let product = Product {
            id: ProductId::generate(),
            name: "Urban Tech Tee".to_string(),
            description: String::new(),
            category: "tshirts".to_string(),
            base_code: "UT".to_string(),
            price: Price::usd_cents(cents),
            created_at: Utc::now(),
            variants: Vec::new(),
        };
        store.insert_product(&product).await.unwrap();
        let sku = Sku::derive(
            "UT",
            &format!("c{cents}"),
            SizeCode::M,
        );
        store
            .upsert_inventory_level(&InventoryLevel {
                sku: sku.clone(),
                product_id: product.id,
                variant_id: VariantId::generate(),
                size: SizeCode::M,
                stock,
            })
            .await
            .unwrap();
        (product.id, sku)
    }

    async fn ready_session(store: &MemoryStore, ctx: &AuthContext) -> CheckoutSessionId {
        let session = CheckoutSession {
            id: CheckoutSessionId::generate(),
            user_id: ctx.user_id,
            email: ctx.email.clone(),
            shipping_address: address(),
            shipping_option: Some(ShippingOption::Standard),
            shipping_cost: Some(Price::usd_cents(0)),
            stage: CheckoutStage::ReadyForPayment,
            updated_at: Utc::now(),
        };
        store.put_checkout_session(&session).await.unwrap();
        session.id
    }

    async fn put_cart(store: &MemoryStore, ctx: &AuthContext, lines: &[(ProductId, Sku, u32)]) {
        let cart = Cart {
            user_id: ctx.user_id,
            items: lines
                .iter()
                .map(|(product_id, sku, quantity)| CartItem {
                    product_id: *product_id,
                    variant_id: VariantId::generate(),
                    sku: sku.clone(),
                    quantity: *quantity,
                })
                .collect(),
            updated_at: Utc::now(),
        };
        store.put_cart(&cart).await.unwrap();
    }

    #[tokio::test]
    async fn test_successful_placement_decrements_and_consumes() {
        let store = Arc::new(MemoryStore::new());
        let ctx = ctx();
        let (product_id, sku) = seed_sku(&store, 4999, 5).await;
        ready_session(&store, &ctx).await;
        put_cart(&store, &ctx, &[(product_id, sku.clone(), 2)]).await;

        let reconciler = Reconciler::new(Arc::clone(&store));
        let order = reconciler
            .place_order(&ctx, PaymentRef::new("tok_1"), address())
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total, Price::usd_cents(9998));
        assert_eq!(store.stock_of(&sku), Some(3));
        assert!(store.cart(ctx.user_id).await.unwrap().is_none());
        assert!(store.checkout_session(ctx.user_id).await.unwrap().is_none());
        assert!(store.order(order.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_insufficient_stock_changes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let ctx = ctx();
        let (product_id, sku) = seed_sku(&store, 4999, 5).await;
        let key = ready_session(&store, &ctx).await;
        put_cart(&store, &ctx, &[(product_id, sku.clone(), 10)]).await;

        let reconciler = Reconciler::new(Arc::clone(&store));
        let result = reconciler
            .place_order(&ctx, PaymentRef::new("tok_1"), address())
            .await;

        assert!(matches!(result, Err(CommerceError::InsufficientStock(s)) if s == sku));
        assert_eq!(store.stock_of(&sku), Some(5));
        assert!(store.orders_for_user(ctx.user_id).await.unwrap().is_empty());
        assert!(store.reconciliation(key).await.unwrap().is_none());
        // The cart survives so the buyer can adjust it.
        assert!(store.cart(ctx.user_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_partial_insufficiency_releases_earlier_lines() {
        let store = Arc::new(MemoryStore::new());
        let ctx = ctx();
        let (p1, sku1) = seed_sku(&store, 1000, 5).await;
        let (p2, sku2) = seed_sku(&store, 2000, 1).await;
        ready_session(&store, &ctx).await;
        put_cart(&store, &ctx, &[(p1, sku1.clone(), 2), (p2, sku2.clone(), 2)]).await;

        let reconciler = Reconciler::new(Arc::clone(&store));
        let result = reconciler
            .place_order(&ctx, PaymentRef::new("tok_1"), address())
            .await;

        // The pre-check catches this before any decrement; either way both
        // stocks must be untouched.
        assert!(matches!(result, Err(CommerceError::InsufficientStock(_))));
        assert_eq!(store.stock_of(&sku1), Some(5));
        assert_eq!(store.stock_of(&sku2), Some(1));
    }

    #[tokio::test]
    async fn test_mixed_currency_cart_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let ctx = ctx();
        let (usd_id, usd_sku) = seed_sku(&store, 1000, 5).await;

        let eur_product = Product {
            id: ProductId::generate(),
            name: "Euro Tee".to_string(),
            description: String::new(),
            category: "tshirts".to_string(),
            base_code: "EU".to_string(),
            price: Price::new(Decimal::new(4999, 2), CurrencyCode::EUR),
            created_at: Utc::now(),
            variants: Vec::new(),
        };
        store.insert_product(&eur_product).await.unwrap();
        let eur_sku = Sku::derive("EU", "black", SizeCode::M);
        store
            .upsert_inventory_level(&InventoryLevel {
                sku: eur_sku.clone(),
                product_id: eur_product.id,
                variant_id: VariantId::generate(),
                size: SizeCode::M,
                stock: 5,
            })
            .await
            .unwrap();

        ready_session(&store, &ctx).await;
        put_cart(
            &store,
            &ctx,
            &[(usd_id, usd_sku.clone(), 1), (eur_product.id, eur_sku.clone(), 1)],
        )
        .await;

        let reconciler = Reconciler::new(Arc::clone(&store));
        let result = reconciler
            .place_order(&ctx, PaymentRef::new("tok_1"), address())
            .await;

        assert!(matches!(result, Err(CommerceError::Validation(_))));
        assert_eq!(store.stock_of(&usd_sku), Some(5));
        assert_eq!(store.stock_of(&eur_sku), Some(5));
        assert!(store.orders_for_user(ctx.user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unverified_identity_is_unauthorized() {
        let store = Arc::new(MemoryStore::new());
        let unverified = AuthContext::new(
            UserId::generate(),
            Email::parse("buyer@example.com").unwrap(),
            false,
        );
        let reconciler = Reconciler::new(store);

        let result = reconciler
            .place_order(&unverified, PaymentRef::new("tok_1"), address())
            .await;
        assert!(matches!(result, Err(CommerceError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_session_not_ready_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let ctx = ctx();
        let session = CheckoutSession {
            id: CheckoutSessionId::generate(),
            user_id: ctx.user_id,
            email: ctx.email.clone(),
            shipping_address: address(),
            shipping_option: None,
            shipping_cost: None,
            stage: CheckoutStage::ShippingSubmitted,
            updated_at: Utc::now(),
        };
        store.put_checkout_session(&session).await.unwrap();

        let reconciler = Reconciler::new(store);
        let result = reconciler
            .place_order(&ctx, PaymentRef::new("tok_1"), address())
            .await;
        assert!(matches!(result, Err(CommerceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_empty_cart_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let ctx = ctx();
        ready_session(&store, &ctx).await;

        let reconciler = Reconciler::new(store);
        let result = reconciler
            .place_order(&ctx, PaymentRef::new("tok_1"), address())
            .await;
        assert!(matches!(result, Err(CommerceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_resume_from_reserved_writes_order_once() {
        let store = Arc::new(MemoryStore::new());
        let ctx = ctx();
        let (product_id, sku) = seed_sku(&store, 4999, 5).await;
        let key = ready_session(&store, &ctx).await;
        put_cart(&store, &ctx, &[(product_id, sku.clone(), 2)]).await;

        // Simulate a crash after the reserve phase committed: decrement
        // applied, log at `reserved`, no order yet.
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
        store.apply_decrement(key, &sku, 2).await.unwrap();
        store
            .put_reconciliation(&ReconciliationLog {
                key,
                order: order.clone(),
                phase: ReconciliationPhase::Reserved,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let reconciler = Reconciler::new(Arc::clone(&store));
        let placed = reconciler
            .place_order(&ctx, PaymentRef::new("tok_other"), address())
            .await
            .unwrap();

        // Same order, stock decremented exactly once.
        assert_eq!(placed.id, order.id);
        assert_eq!(placed.payment_ref, PaymentRef::new("tok_1"));
        assert_eq!(store.stock_of(&sku), Some(3));
        assert_eq!(store.orders_for_user(ctx.user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replay_of_completed_key_returns_same_order() {
        let store = Arc::new(MemoryStore::new());
        let ctx = ctx();
        let (product_id, sku) = seed_sku(&store, 4999, 5).await;
        let key = ready_session(&store, &ctx).await;
        put_cart(&store, &ctx, &[(product_id, sku.clone(), 2)]).await;

        let reconciler = Reconciler::new(Arc::clone(&store));
        let first = reconciler
            .place_order(&ctx, PaymentRef::new("tok_1"), address())
            .await
            .unwrap();

        // Re-create the session under the same id to model a stale client
        // retrying after a lost response.
        let session = CheckoutSession {
            id: key,
            user_id: ctx.user_id,
            email: ctx.email.clone(),
            shipping_address: address(),
            shipping_option: Some(ShippingOption::Standard),
            shipping_cost: Some(Price::usd_cents(0)),
            stage: CheckoutStage::ReadyForPayment,
            updated_at: Utc::now(),
        };
        store.put_checkout_session(&session).await.unwrap();

        let second = reconciler
            .place_order(&ctx, PaymentRef::new("tok_2"), address())
            .await
            .unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(store.stock_of(&sku), Some(3));
        assert_eq!(store.orders_for_user(ctx.user_id).await.unwrap().len(), 1);
    }
}
