//! Domain models persisted by the commerce store.
//!
//! Orders are immutable snapshots: item prices, addresses, and the payment
//! reference are captured at reconciliation time and never re-read from the
//! catalog. Carts and checkout sessions are transient, single-owner records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use streetline_core::{
    AddressId, CheckoutSessionId, CheckoutStage, Email, OrderId, OrderStatus, Price, ProductId,
    ShippingOption, SizeCode, Sku, UserId, VariantId,
};

// =============================================================================
// Catalog
// =============================================================================

/// A catalog product with its variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    /// Lowercased category, e.g. `tshirts`, `trousers`, `glasses`.
    pub category: String,
    /// Base code used to derive variant SKUs.
    pub base_code: String,
    pub price: Price,
    pub created_at: DateTime<Utc>,
    pub variants: Vec<Variant>,
}

/// A color variant of a product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub product_id: ProductId,
    pub color: String,
    /// Display override for the color, e.g. "Jet Black" for `jet black`.
    pub color_display: Option<String>,
    /// URL slug derived from category, name, and color.
    pub slug: String,
    /// SKUs of the inventory levels owned by this variant, one per size.
    pub skus: Vec<Sku>,
}

/// Per-SKU inventory record; the unit of stock mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryLevel {
    pub sku: Sku,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub size: SizeCode,
    /// Non-negative by construction; every decrement checks sufficiency
    /// atomically.
    pub stock: u32,
}

/// Input for creating a product with variants and initial inventory.
#[derive(Debug, Clone)]
pub struct CreateProductInput {
    pub name: String,
    pub description: String,
    pub category: String,
    pub base_code: String,
    pub price: Price,
    /// Sizes stocked for every variant of this product.
    pub sizes: Vec<SizeCode>,
    pub variants: Vec<CreateVariantInput>,
}

/// Input for one variant of a new product.
#[derive(Debug, Clone)]
pub struct CreateVariantInput {
    pub color: String,
    pub color_display: Option<String>,
    /// Initial stock per size; missing sizes start at zero.
    pub inventory: HashMap<SizeCode, u32>,
}

// =============================================================================
// Cart
// =============================================================================

/// A per-user cart. At most one line per SKU (adds merge).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    pub user_id: UserId,
    pub items: Vec<CartItem>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// Create an empty cart for a user.
    #[must_use]
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            items: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Find the line for a SKU, if present.
    #[must_use]
    pub fn line(&self, sku: &Sku) -> Option<&CartItem> {
        self.items.iter().find(|item| &item.sku == sku)
    }
}

/// One cart line: a SKU reference and a quantity of at least 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub sku: Sku,
    pub quantity: u32,
}

// =============================================================================
// Checkout
// =============================================================================

/// A shipping or billing address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    pub full_name: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub region: String,
    pub postal_code: String,
    pub country: String,
}

impl Address {
    /// Name of the first missing required field, if any.
    #[must_use]
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.full_name.trim().is_empty() {
            return Some("full_name");
        }
        if self.line1.trim().is_empty() {
            return Some("line1");
        }
        if self.city.trim().is_empty() {
            return Some("city");
        }
        if self.postal_code.trim().is_empty() {
            return Some("postal_code");
        }
        if self.country.trim().is_empty() {
            return Some("country");
        }
        None
    }
}

/// Transient checkout state between "shipping submitted" and order creation.
///
/// The session id doubles as the reconciliation idempotency key; the session
/// itself is deleted only as a side effect of successful order creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: CheckoutSessionId,
    pub user_id: UserId,
    pub email: Email,
    pub shipping_address: Address,
    pub shipping_option: Option<ShippingOption>,
    pub shipping_cost: Option<Price>,
    pub stage: CheckoutStage,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Orders
// =============================================================================

/// Opaque payment confirmation token from the payment processor.
///
/// Recorded on the order, never verified here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentRef(String);

impl PaymentRef {
    /// Wrap a processor-supplied confirmation token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One order line with the unit price snapshotted at purchase time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub sku: Sku,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Price,
}

/// An immutable order record.
///
/// Created only by successful reconciliation; nothing but the status ever
/// changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub email: Email,
    pub items: Vec<OrderItem>,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub shipping_option: ShippingOption,
    pub shipping_cost: Price,
    pub payment_ref: PaymentRef,
    pub total: Price,
    pub status: OrderStatus,
    /// Idempotency key of the reconciliation that produced this order; also
    /// keys the stock movements released by cancellation.
    pub reconciliation_key: CheckoutSessionId,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Reconciliation
// =============================================================================

/// Progress marker for an in-flight reconciliation.
///
/// `Reserved` is the commit point: decrements before it are released on
/// abort, decrements after it are never rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationPhase {
    /// Decrements may be partially applied; all are idempotent by key.
    Reserving,
    /// Every decrement committed; the order must now be written.
    Reserved,
    /// The order record exists; cart and session cleanup remains.
    OrderWritten,
    /// Fully done; kept for idempotent replay of the same key.
    Completed,
}

/// Durable record of an in-flight reconciliation, keyed by the checkout
/// session id. Lets a crashed or retried call resume from the recorded
/// phase instead of re-deciding anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationLog {
    pub key: CheckoutSessionId,
    /// The fully built order snapshot, written before any decrement so a
    /// resume never has to re-read the (possibly changed) cart or catalog.
    pub order: Order,
    pub phase: ReconciliationPhase,
    pub updated_at: DateTime<Utc>,
}
