//! Customer authentication extractor.
//!
//! Customers log in through the external identity provider, which stores a
//! [`CurrentCustomer`] (id, email, API bearer token) in the session. Every
//! cart and checkout route requires one.

use axum::{extract::FromRequestParts, http::request::Parts};
use tower_sessions::Session;

use crate::error::{AppError, set_sentry_user};
use crate::models::{CurrentCustomer, session_keys};

/// Extractor that requires a logged-in customer.
///
/// Rejects with `401` and a JSON error body otherwise.
///
/// # Example
///
/// ```rust,ignore
/// async fn cart(RequireCustomer(customer): RequireCustomer) -> impl IntoResponse {
///     format!("Cart for {}", customer.email)
/// }
/// ```
pub struct RequireCustomer(pub CurrentCustomer);

impl<S> FromRequestParts<S> for RequireCustomer
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Set by SessionManagerLayer
        let session = parts
            .extensions
            .get::<Session>()
            .ok_or_else(|| AppError::Internal("session layer missing".to_string()))?;

        let customer: CurrentCustomer = session
            .get(session_keys::CURRENT_CUSTOMER)
            .await
            .ok()
            .flatten()
            .ok_or_else(|| AppError::Unauthorized("Please log in to continue".to_string()))?;

        set_sentry_user(&customer.id, Some(&customer.email));
        Ok(Self(customer))
    }
}

/// Store the logged-in customer in the session.
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn set_current_customer(
    session: &Session,
    customer: &CurrentCustomer,
) -> Result<(), tower_sessions::session::Error> {
    session
        .insert(session_keys::CURRENT_CUSTOMER, customer)
        .await
}
