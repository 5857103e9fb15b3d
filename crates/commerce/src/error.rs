//! Closed error taxonomy for the commerce engine.
//!
//! Every operation returns `Result<T, CommerceError>`; errors are tagged
//! variants propagated explicitly, never ad hoc values thrown across
//! layers. All variants mean "nothing was committed" - the reconciliation
//! contract guarantees there is no "partially applied" outcome to report.

use thiserror::Error;

use streetline_core::Sku;

use crate::store::StoreError;

/// Engine-level error type.
#[derive(Debug, Error)]
pub enum CommerceError {
    /// Malformed input: zero quantity, missing shipping field, bad cursor.
    #[error("validation error: {0}")]
    Validation(String),

    /// The caller's identity is missing or not verified for this operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A cart line requested more units than the SKU has in stock.
    /// Nothing was committed; the caller may re-fetch the catalog and retry.
    #[error("insufficient stock for {0}")]
    InsufficientStock(Sku),

    /// A concurrent writer won a race (status transition, duplicate write).
    /// Retrying the whole operation once is the expected recovery.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Cart, session, order, or catalog record missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// The document store failed after bounded retries.
    #[error("dependency error: {0}")]
    Dependency(#[from] StoreError),
}

impl CommerceError {
    /// Whether retrying the same call can reasonably succeed.
    ///
    /// `Conflict` and `Dependency` are transient; everything else needs a
    /// changed input (or changed stock) first.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Dependency(_))
    }
}

/// Result type alias for [`CommerceError`].
pub type Result<T> = std::result::Result<T, CommerceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = CommerceError::InsufficientStock(Sku::parse("A-BLK-M").expect("valid sku"));
        assert_eq!(err.to_string(), "insufficient stock for A-BLK-M");

        let err = CommerceError::Validation("quantity must be at least 1".to_string());
        assert_eq!(err.to_string(), "validation error: quantity must be at least 1");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(CommerceError::Conflict("lost race".to_string()).is_retryable());
        assert!(CommerceError::Dependency(StoreError::Unavailable("down".to_string())).is_retryable());
        assert!(!CommerceError::Validation("bad".to_string()).is_retryable());
        assert!(!CommerceError::NotFound("cart".to_string()).is_retryable());
        assert!(
            !CommerceError::InsufficientStock(Sku::parse("A-BLK-M").expect("valid sku"))
                .is_retryable()
        );
    }
}
