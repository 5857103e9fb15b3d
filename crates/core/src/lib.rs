//! Streetline Core - Shared types library.
//!
//! This crate provides common types used across all Streetline components:
//! - `commerce` - Catalog, cart, checkout, and order reconciliation engine
//! - `cli` - Command-line tools for migrations and catalog seeding
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access, no
//! async code. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, SKUs, prices, emails,
//!   and statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
