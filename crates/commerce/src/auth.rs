//! Caller identity passed explicitly into every operation.
//!
//! The authentication provider itself is a boundary contract: it hands the
//! engine a verified identity and nothing else. There is no ambient
//! "current user" - operations that need an identity take it as an
//! argument.

use streetline_core::{Email, UserId};

use crate::error::{CommerceError, Result};

/// A verified caller identity supplied by the authentication provider.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: UserId,
    pub email: Email,
    /// Whether the provider has verified the email address. Payment-bearing
    /// operations refuse unverified identities.
    pub email_verified: bool,
}

impl AuthContext {
    /// Build a context from provider-supplied fields.
    #[must_use]
    pub const fn new(user_id: UserId, email: Email, email_verified: bool) -> Self {
        Self {
            user_id,
            email,
            email_verified,
        }
    }

    /// Build a verified context; convenience for provider integrations and
    /// tests.
    #[must_use]
    pub const fn verified(user_id: UserId, email: Email) -> Self {
        Self::new(user_id, email, true)
    }

    /// Require an identity strong enough for payment-bearing operations.
    ///
    /// # Errors
    ///
    /// Returns [`CommerceError::Unauthorized`] if the email is unverified.
    pub fn require_payment_identity(&self) -> Result<()> {
        if self.email_verified {
            Ok(())
        } else {
            Err(CommerceError::Unauthorized(
                "payment operations require a verified identity".to_string(),
            ))
        }
    }
}
