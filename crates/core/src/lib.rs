//! Adam Store Core - Shared types library.
//!
//! This crate provides common types used across the Adam Store components:
//! - `storefront` - Cart, checkout and payment reconciliation over the commerce API
//! - `integration-tests` - End-to-end tests against an in-process fake API
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no HTTP clients, no runtime.
//! This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, prices, and statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
