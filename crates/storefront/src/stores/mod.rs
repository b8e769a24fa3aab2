//! Selection stores.
//!
//! Each store holds one slice of the shopper's choices (cart, address,
//! promotion, payment method) in a `tokio::sync::watch` channel. The narrow
//! method set on each store is the only way to change its state; anyone can
//! [`subscribe`](CartStore::subscribe) to be told when it changes.
//!
//! Stores are independent of each other. The pricing pipeline re-reads all
//! four whenever one of them changes.

pub mod address;
pub mod cart;
pub mod payment;
pub mod promotion;

pub use address::{AddressState, AddressStore};
pub use cart::{CartError, CartState, CartStore};
pub use payment::{PaymentMethodState, PaymentMethodStore, PaymentSelection};
pub use promotion::{PromotionState, PromotionStore};

use adam_store_core::{AddressId, PaymentMethod, PromotionId};
use thiserror::Error;

/// Errors raised by explicit selection overrides.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// The address is not among the loaded addresses.
    #[error("Address {0} is not one of your addresses")]
    UnknownAddress(AddressId),

    /// The promotion is not among the eligible promotions.
    #[error("Promotion {0} is not available to you")]
    UnknownPromotion(PromotionId),

    /// The payment method is not offered.
    #[error("Payment method {0} is not available")]
    MethodUnavailable(PaymentMethod),
}
