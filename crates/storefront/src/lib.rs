//! Adam Store Storefront library.
//!
//! Cart, pricing pipeline and checkout for the Adam Store commerce API,
//! exposed as a library so the binary and the integration tests share one
//! router.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod checkout;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod pricing;
pub mod routes;
pub mod state;
pub mod stores;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;
