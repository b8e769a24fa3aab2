//! Adam Store commerce API access.
//!
//! # Architecture
//!
//! - The remote API is the source of truth - NO local persistence, direct calls
//! - [`CommerceApi`] is the seam: the pipeline only ever talks to the trait,
//!   [`CommerceClient`] implements it over `reqwest`
//! - Calls are authorized per customer with the bearer token issued by the
//!   identity provider (see [`CommerceApiProvider`])
//!
//! # Example
//!
//! ```rust,ignore
//! use adam_store_storefront::api::{CommerceApi, CommerceClient, PageRequest};
//!
//! let client = CommerceClient::new(&config.api)?.authorized(token);
//!
//! let page = client.fetch_cart_items(user_id, PageRequest::first(100)).await?;
//! let variant = client.fetch_variant(product_id, color_id, size_id).await?;
//! ```

mod client;
pub mod types;

pub use client::CommerceClient;
pub use types::*;

use std::sync::Arc;

use adam_store_core::{CartItemId, ColorId, ProductId, SizeId, UserId};
use async_trait::async_trait;
use thiserror::Error;

use crate::models::CurrentCustomer;

/// Errors that can occur when calling the commerce API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limited by the API.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// A request URL could not be built.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl ApiError {
    /// Message suitable for showing to a shopper.
    ///
    /// API-provided messages pass through; transport details do not.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Api { message, .. } => message.clone(),
            Self::NotFound(what) => format!("{what} was not found"),
            Self::RateLimited(_) => "Too many requests, please try again shortly".to_string(),
            Self::Http(_) | Self::Parse(_) | Self::Url(_) => {
                "The store is unreachable right now, please try again".to_string()
            }
        }
    }
}

/// Remote calls consumed by the cart and checkout pipeline.
#[async_trait]
pub trait CommerceApi: Send + Sync {
    /// List a user's cart items.
    async fn fetch_cart_items(
        &self,
        user_id: UserId,
        page: PageRequest,
    ) -> Result<Page<CartItem>, ApiError>;

    /// Add a variant to the cart.
    async fn add_cart_item(&self, item: NewCartItem) -> Result<CartItem, ApiError>;

    /// Change quantity, color or size of a cart line.
    async fn update_cart_item(
        &self,
        id: CartItemId,
        update: CartItemUpdate,
    ) -> Result<CartItem, ApiError>;

    /// Delete a cart line.
    async fn delete_cart_item(&self, id: CartItemId) -> Result<(), ApiError>;

    /// Full product details.
    async fn fetch_product(&self, id: ProductId) -> Result<Product, ApiError>;

    /// Resolve a variant by color and size.
    async fn fetch_variant(
        &self,
        product_id: ProductId,
        color_id: ColorId,
        size_id: SizeId,
    ) -> Result<ProductVariant, ApiError>;

    /// Compute the shipping fee for an address and a set of lines.
    async fn calculate_shipping_fee(
        &self,
        request: ShippingFeeRequest,
    ) -> Result<ShippingFee, ApiError>;

    /// Promotions the current user is eligible for.
    async fn fetch_my_promotions(&self, page: PageRequest) -> Result<Page<Promotion>, ApiError>;

    /// The current user's addresses.
    async fn fetch_my_addresses(&self) -> Result<Vec<Address>, ApiError>;

    /// Create an order.
    async fn create_order(&self, request: CreateOrderRequest) -> Result<Order, ApiError>;

    /// Verify a VNPay return against the server's view of the payment.
    async fn verify_payment_callback(
        &self,
        request: PaymentVerificationRequest,
    ) -> Result<PaymentVerification, ApiError>;
}

/// Hands out API handles authorized for a given customer.
pub trait CommerceApiProvider: Send + Sync {
    /// An API handle acting on behalf of `customer`.
    fn for_customer(&self, customer: &CurrentCustomer) -> Arc<dyn CommerceApi>;
}
