//! Domain models for storefront sessions.

pub mod session;

pub use session::{CurrentCustomer, keys as session_keys};
