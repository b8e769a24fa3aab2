//! Session-related types.
//!
//! Types stored in the session for authentication and checkout state.

use serde::{Deserialize, Serialize};

use adam_store_core::UserId;

/// Session-stored customer identity.
///
/// Written by the identity provider's login flow. The access token authorizes
/// commerce API calls made on the customer's behalf.
#[derive(Clone, Serialize, Deserialize)]
pub struct CurrentCustomer {
    /// Customer's id in the commerce API.
    pub id: UserId,
    /// Customer's email address.
    pub email: String,
    /// Bearer token for the commerce API.
    pub access_token: String,
}

impl std::fmt::Debug for CurrentCustomer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurrentCustomer")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// Session keys.
pub mod keys {
    /// Key for storing the current logged-in customer.
    pub const CURRENT_CUSTOMER: &str = "current_customer";

    /// Key for the persisted payment method selection.
    pub const PAYMENT_SELECTION: &str = "payment_selection";
}
