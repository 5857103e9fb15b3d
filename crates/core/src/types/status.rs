//! Status enums for orders, checkout sessions, and shipping.

use serde::{Deserialize, Serialize};

/// Order lifecycle status.
///
/// Orders are created as `Pending` by reconciliation and only ever move
/// forward to `Fulfilled` or `Cancelled`; both are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Fulfilled,
    Cancelled,
}

impl OrderStatus {
    /// Whether the status admits no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Fulfilled | Self::Cancelled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Fulfilled => write!(f, "fulfilled"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "fulfilled" => Ok(Self::Fulfilled),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid order status: {s}")),
        }
    }
}

/// Checkout session progress.
///
/// `empty -> shipping_submitted -> shipping_option_selected ->
/// ready_for_payment -> consumed`. A consumed session is deleted rather
/// than stored; the variant exists for serialized history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStage {
    #[default]
    Empty,
    ShippingSubmitted,
    ShippingOptionSelected,
    ReadyForPayment,
    Consumed,
}

impl std::fmt::Display for CheckoutStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::ShippingSubmitted => write!(f, "shipping_submitted"),
            Self::ShippingOptionSelected => write!(f, "shipping_option_selected"),
            Self::ReadyForPayment => write!(f, "ready_for_payment"),
            Self::Consumed => write!(f, "consumed"),
        }
    }
}

/// Shipping options offered at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingOption {
    Standard,
    Expedited,
}

impl std::fmt::Display for ShippingOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Expedited => write!(f, "expedited"),
        }
    }
}
