//! HTTP route handlers for storefront.
//!
//! All routes speak JSON and, apart from `/health`, require a logged-in
//! customer.
//!
//! # Route Structure
//!
//! ```text
//! GET    /health                              - Health check
//!
//! # Cart
//! GET    /cart                                - Cart snapshot
//! POST   /cart/items                          - Add item
//! PATCH  /cart/items/{id}                     - Update quantity, color or size
//! DELETE /cart/items/{id}                     - Remove item
//! POST   /cart/items/{id}/selection           - Check / uncheck for checkout
//! DELETE /cart                                - Clear cart
//!
//! # Checkout
//! GET    /checkout/addresses                  - Addresses and current choice
//! PUT    /checkout/address                    - Choose address
//! GET    /checkout/promotions                 - Eligible promotions and choice
//! PUT    /checkout/promotion                  - Choose or clear promotion
//! GET    /checkout/payment-method             - Available methods and choice
//! PUT    /checkout/payment-method             - Choose payment method
//! GET    /checkout/summary                    - Lines, totals, calculating flag
//! POST   /checkout                            - Submit order
//! GET    /checkout/payment-callback           - Reconcile a VNPay return
//! POST   /checkout/payment-callback/dismiss   - Location without the callback query
//! ```

pub mod cart;
pub mod checkout;

use axum::{
    Router,
    middleware::from_fn,
    routing::{get, patch, post, put},
};
use tower_http::trace::TraceLayer;

use crate::middleware::{create_session_layer, request_id_middleware};
use crate::state::AppState;

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show).delete(cart::clear))
        .route("/items", post(cart::add))
        .route("/items/{id}", patch(cart::update).delete(cart::remove))
        .route("/items/{id}/selection", post(cart::select))
}

/// Create the checkout routes router.
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(checkout::submit))
        .route("/addresses", get(checkout::addresses))
        .route("/address", put(checkout::select_address))
        .route("/promotions", get(checkout::promotions))
        .route("/promotion", put(checkout::select_promotion))
        .route(
            "/payment-method",
            get(checkout::payment_methods).put(checkout::select_payment_method),
        )
        .route("/summary", get(checkout::summary))
        .route("/payment-callback", get(checkout::payment_callback))
        .route("/payment-callback/dismiss", post(checkout::dismiss_callback))
}

/// Create all routes for the storefront, without session or tracing layers.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .nest("/cart", cart_routes())
        .nest("/checkout", checkout_routes())
}

/// The full application: routes plus sessions, request ids and tracing.
pub fn app(state: AppState) -> Router {
    let session_layer = create_session_layer(state.config());

    routes()
        .layer(session_layer)
        .layer(from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::{Method, StatusCode};

    use super::test_support::{router, send};
    use crate::testing::FakeCommerceApi;

    #[tokio::test]
    async fn test_health() {
        let fake = Arc::new(FakeCommerceApi::new());
        let (status, body) = send(&router(&fake, false), Method::GET, "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_cart_requires_login() {
        let fake = Arc::new(FakeCommerceApi::new());
        let (status, body) = send(&router(&fake, false), Method::GET, "/cart", None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].as_str().is_some());
        assert_eq!(fake.calls("fetch_cart_items"), 0);
    }
}
