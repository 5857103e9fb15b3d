//! Per-user cart operations.
//!
//! Carts hold SKU references and quantities only; prices are always read
//! from the catalog at display or reconciliation time, never stored in the
//! cart. Adds merge into an existing line for the same SKU.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::instrument;

use streetline_core::{Price, Sku};

use crate::auth::AuthContext;
use crate::error::{CommerceError, Result};
use crate::models::{Cart, CartItem};
use crate::store::CommerceStore;

/// Cart read and write operations.
pub struct CartService<S> {
    store: Arc<S>,
}

impl<S: CommerceStore> CartService<S> {
    /// Create a service over a store.
    #[must_use]
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The caller's cart, empty if none has been stored yet.
    pub async fn cart(&self, ctx: &AuthContext) -> Result<Cart> {
        Ok(self
            .store
            .cart(ctx.user_id)
            .await?
            .unwrap_or_else(|| Cart::empty(ctx.user_id)))
    }

    /// Add `quantity` units of a SKU to the caller's cart.
    ///
    /// Adding a SKU already in the cart merges into the existing line.
    /// Stock is not reserved here; sufficiency is checked only at order
    /// placement.
    ///
    /// # Errors
    ///
    /// Returns [`CommerceError::Validation`] for a zero quantity and
    /// [`CommerceError::NotFound`] for a SKU with no inventory record.
    #[instrument(skip(self, ctx), fields(user = %ctx.user_id, sku = %sku))]
    pub async fn add_item(&self, ctx: &AuthContext, sku: &Sku, quantity: u32) -> Result<Cart> {
        if quantity == 0 {
            return Err(CommerceError::Validation(
                "quantity must be at least 1".to_string(),
            ));
        }
        let level = self
            .store
            .inventory_level(sku)
            .await?
            .ok_or_else(|| CommerceError::NotFound(format!("sku {sku}")))?;

        let mut cart = self.cart(ctx).await?;
        if let Some(line) = cart.items.iter_mut().find(|item| &item.sku == sku) {
            line.quantity = line.quantity.saturating_add(quantity);
        } else {
            cart.items.push(CartItem {
                product_id: level.product_id,
                variant_id: level.variant_id,
                sku: sku.clone(),
                quantity,
            });
        }
        cart.updated_at = Utc::now();
        self.store.put_cart(&cart).await?;
        Ok(cart)
    }

    /// Remove a SKU's line from the caller's cart. Removing a SKU that is
    /// not in the cart is a no-op.
    #[instrument(skip(self, ctx), fields(user = %ctx.user_id, sku = %sku))]
    pub async fn remove_item(&self, ctx: &AuthContext, sku: &Sku) -> Result<Cart> {
        let mut cart = self.cart(ctx).await?;
        let before = cart.items.len();
        cart.items.retain(|item| &item.sku != sku);
        if cart.items.len() != before {
            cart.updated_at = Utc::now();
            self.store.put_cart(&cart).await?;
        }
        Ok(cart)
    }

    /// Delete the caller's cart entirely.
    #[instrument(skip(self, ctx), fields(user = %ctx.user_id))]
    pub async fn clear(&self, ctx: &AuthContext) -> Result<()> {
        self.store.delete_cart(ctx.user_id).await?;
        Ok(())
    }

    /// Current cart total at today's catalog prices, excluding shipping.
    ///
    /// # Errors
    ///
    /// Returns [`CommerceError::NotFound`] if a cart line references a
    /// product no longer in the catalog, and [`CommerceError::Validation`]
    /// if the lines are not all priced in one currency.
    pub async fn total(&self, ctx: &AuthContext) -> Result<Price> {
        let cart = self.cart(ctx).await?;
        let mut total: Option<Price> = None;
        for item in &cart.items {
            let product = self
                .store
                .product(item.product_id)
                .await?
                .ok_or_else(|| CommerceError::NotFound(format!("product {}", item.product_id)))?;
            let line_amount = product.price.amount * Decimal::from(item.quantity);
            match &mut total {
                None => total = Some(Price::new(line_amount, product.price.currency_code)),
                Some(total) => {
                    if product.price.currency_code != total.currency_code {
                        return Err(CommerceError::Validation(format!(
                            "cart mixes currencies: {} and {}",
                            total.currency_code.code(),
                            product.price.currency_code.code()
                        )));
                    }
                    total.amount += line_amount;
                }
            }
        }
        Ok(total.unwrap_or_else(|| Price::usd_cents(0)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use streetline_core::{CurrencyCode, ProductId, SizeCode, VariantId};

    use super::*;
    use crate::models::{InventoryLevel, Product};
    use crate::store::MemoryStore;

    fn ctx() -> AuthContext {
        AuthContext::verified(
            streetline_core::UserId::generate(),
            "buyer@example.com".parse().unwrap(),
        )
    }

    async fn seed_sku(store: &MemoryStore, cents: i64) -> Sku {
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
        let sku = Sku::derive("UT", "black", SizeCode::M);
        store
            .upsert_inventory_level(&InventoryLevel {
                sku: sku.clone(),
                product_id: product.id,
                variant_id: VariantId::generate(),
                size: SizeCode::M,
                stock: 10,
            })
            .await
            .unwrap();
        sku
    }

    #[tokio::test]
    async fn test_add_merges_existing_line() {
        let store = Arc::new(MemoryStore::new());
        let sku = seed_sku(&store, 4999).await;
        let service = CartService::new(store);
        let ctx = ctx();

        service.add_item(&ctx, &sku, 2).await.unwrap();
        let cart = service.add_item(&ctx, &sku, 3).await.unwrap();

        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.line(&sku).map(|item| item.quantity), Some(5));
    }

    #[tokio::test]
    async fn test_add_zero_quantity_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let sku = seed_sku(&store, 4999).await;
        let service = CartService::new(store);

        let result = service.add_item(&ctx(), &sku, 0).await;
        assert!(matches!(result, Err(CommerceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_add_unknown_sku_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let service = CartService::new(store);

        let sku = Sku::parse("NO-SUC-HS").unwrap();
        let result = service.add_item(&ctx(), &sku, 1).await;
        assert!(matches!(result, Err(CommerceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_missing_line_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let sku = seed_sku(&store, 4999).await;
        let service = CartService::new(store);
        let ctx = ctx();

        service.add_item(&ctx, &sku, 2).await.unwrap();
        let other = Sku::parse("UT-NAV-MD").unwrap();
        let cart = service.remove_item(&ctx, &other).await.unwrap();
        assert_eq!(cart.items.len(), 1);
    }

    #[tokio::test]
    async fn test_total_uses_current_catalog_prices() {
        let store = Arc::new(MemoryStore::new());
        let sku = seed_sku(&store, 4999).await;
        let service = CartService::new(store);
        let ctx = ctx();

        service.add_item(&ctx, &sku, 2).await.unwrap();
        let total = service.total(&ctx).await.unwrap();
        assert_eq!(total, Price::usd_cents(9998));
    }

    #[tokio::test]
    async fn test_total_rejects_mixed_currencies() {
        let store = Arc::new(MemoryStore::new());
        let usd_sku = seed_sku(&store, 4999).await;

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
                stock: 10,
            })
            .await
            .unwrap();

        let service = CartService::new(store);
        let ctx = ctx();
        service.add_item(&ctx, &usd_sku, 1).await.unwrap();
        service.add_item(&ctx, &eur_sku, 1).await.unwrap();

        let result = service.total(&ctx).await;
        assert!(matches!(result, Err(CommerceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_clear_deletes_cart() {
        let store = Arc::new(MemoryStore::new());
        let sku = seed_sku(&store, 4999).await;
        let service = CartService::new(Arc::clone(&store));
        let ctx = ctx();

        service.add_item(&ctx, &sku, 1).await.unwrap();
        service.clear(&ctx).await.unwrap();
        assert!(store.cart(ctx.user_id).await.unwrap().is_none());
    }
}
