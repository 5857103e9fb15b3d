//! Checkout session state machine.
//!
//! A session advances `shipping_submitted -> shipping_option_selected ->
//! ready_for_payment`; each step validates that the previous one happened.
//! Re-submitting shipping info resets any selected option, so a changed
//! address always forces the shipping choice to be made again. The session
//! is consumed (deleted) only by successful order placement.

use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use streetline_core::{CheckoutSessionId, CheckoutStage, Email, Price, ShippingOption};

use crate::auth::AuthContext;
use crate::error::{CommerceError, Result};
use crate::models::{Address, CheckoutSession};
use crate::store::CommerceStore;

/// Flat-rate shipping cost for an option.
#[must_use]
pub fn shipping_cost(option: ShippingOption) -> Price {
    match option {
        ShippingOption::Standard => Price::usd_cents(0),
        ShippingOption::Expedited => Price::usd_cents(1499),
    }
}

/// Checkout session operations.
pub struct CheckoutService<S> {
    store: Arc<S>,
}

impl<S: CommerceStore> CheckoutService<S> {
    /// Create a service over a store.
    #[must_use]
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The caller's current checkout session, if any.
    pub async fn session(&self, ctx: &AuthContext) -> Result<Option<CheckoutSession>> {
        Ok(self.store.checkout_session(ctx.user_id).await?)
    }

    /// Record the contact email and shipping address, starting or restarting
    /// the checkout flow.
    ///
    /// An existing session keeps its id (and therefore its idempotency key),
    /// but any previously selected shipping option and cost are cleared.
    ///
    /// # Errors
    ///
    /// Returns [`CommerceError::Validation`] when a required address field
    /// is missing.
    #[instrument(skip(self, ctx, email, address), fields(user = %ctx.user_id))]
    pub async fn submit_shipping_info(
        &self,
        ctx: &AuthContext,
        email: Email,
        address: Address,
    ) -> Result<CheckoutSession> {
        if let Some(field) = address.missing_field() {
            return Err(CommerceError::Validation(format!(
                "missing required shipping field: {field}"
            )));
        }

        let id = self
            .store
            .checkout_session(ctx.user_id)
            .await?
            .map_or_else(CheckoutSessionId::generate, |existing| existing.id);

        let session = CheckoutSession {
            id,
            user_id: ctx.user_id,
            email,
            shipping_address: address,
            shipping_option: None,
            shipping_cost: None,
            stage: CheckoutStage::ShippingSubmitted,
            updated_at: Utc::now(),
        };
        self.store.put_checkout_session(&session).await?;
        Ok(session)
    }

    /// Record the chosen shipping option.
    ///
    /// # Errors
    ///
    /// Returns [`CommerceError::NotFound`] when no session exists, i.e.
    /// shipping info has not been submitted.
    #[instrument(skip(self, ctx), fields(user = %ctx.user_id, option = %option))]
    pub async fn select_shipping_option(
        &self,
        ctx: &AuthContext,
        option: ShippingOption,
    ) -> Result<CheckoutSession> {
        let mut session = self
            .store
            .checkout_session(ctx.user_id)
            .await?
            .ok_or_else(|| CommerceError::NotFound("checkout session".to_string()))?;

        session.shipping_option = Some(option);
        session.shipping_cost = None;
        session.stage = CheckoutStage::ShippingOptionSelected;
        session.updated_at = Utc::now();
        self.store.put_checkout_session(&session).await?;
        Ok(session)
    }

    /// Price the selected option and mark the session ready for payment.
    ///
    /// # Errors
    ///
    /// Returns [`CommerceError::NotFound`] when no session exists and
    /// [`CommerceError::Validation`] when no shipping option has been
    /// selected yet.
    #[instrument(skip(self, ctx), fields(user = %ctx.user_id))]
    pub async fn submit_shipping_option(&self, ctx: &AuthContext) -> Result<CheckoutSession> {
        let mut session = self
            .store
            .checkout_session(ctx.user_id)
            .await?
            .ok_or_else(|| CommerceError::NotFound("checkout session".to_string()))?;

        let option = session.shipping_option.ok_or_else(|| {
            CommerceError::Validation("no shipping option selected".to_string())
        })?;

        session.shipping_cost = Some(shipping_cost(option));
        session.stage = CheckoutStage::ReadyForPayment;
        session.updated_at = Utc::now();
        self.store.put_checkout_session(&session).await?;
        Ok(session)
    }
}
