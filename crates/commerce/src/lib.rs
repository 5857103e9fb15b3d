//! Streetline Commerce - the storefront engine.
//!
//! This crate implements the commerce flows behind the storefront:
//!
//! - [`catalog`] - Paginated, sortable catalog queries and product creation
//! - [`cart`] - Per-user cart with merge-on-add line items
//! - [`checkout`] - Staged checkout session lifecycle
//! - [`reconcile`] - Atomic, idempotent cart-to-order reconciliation
//! - [`orders`] - Order queries, cancellation, and fulfillment
//!
//! Persistence goes through the [`store::CommerceStore`] trait; the crate
//! ships an in-memory reference implementation ([`store::MemoryStore`]) and
//! a `PostgreSQL` implementation ([`store::PostgresStore`]).
//!
//! Every operation takes an explicit [`auth::AuthContext`] - there is no
//! ambient "current user".

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod auth;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod config;
pub mod error;
pub mod models;
pub mod orders;
pub mod reconcile;
pub mod retry;
pub mod store;

pub use auth::AuthContext;
pub use error::{CommerceError, Result};
