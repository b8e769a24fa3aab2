//! HTTP implementation of the commerce API.
//!
//! Uses `reqwest` with JSON bodies. Every response is an `{code, message, result}`
//! envelope; non-success statuses are turned into [`ApiError`] with the
//! envelope message when one is present.

use std::sync::Arc;

use adam_store_core::{CartItemId, ColorId, ProductId, SizeId, UserId};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use super::types::{
    Address, ApiEnvelope, CartItem, CartItemUpdate, CreateOrderRequest, NewCartItem, Order, Page,
    PageRequest, PaymentVerification, PaymentVerificationRequest, Product, ProductVariant,
    Promotion, ShippingFee, ShippingFeeRequest,
};
use super::{ApiError, CommerceApi, CommerceApiProvider};
use crate::config::CommerceApiConfig;
use crate::models::CurrentCustomer;

/// Maximum number of body characters kept in logs and error messages.
const BODY_PREVIEW_CHARS: usize = 200;

// =============================================================================
// CommerceClient
// =============================================================================

/// Client for the Adam Store REST API.
///
/// Cheap to clone. An unauthorized client can be turned into a per-customer
/// handle with [`CommerceClient::authorized`].
#[derive(Clone)]
pub struct CommerceClient {
    inner: Arc<CommerceClientInner>,
    access_token: Option<Arc<SecretString>>,
}

struct CommerceClientInner {
    client: reqwest::Client,
    base_url: Url,
}

impl std::fmt::Debug for CommerceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommerceClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("authorized", &self.access_token.is_some())
            .finish()
    }
}

impl CommerceClient {
    /// Create a new API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new(config: &CommerceApiConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("adam-store-storefront/", env!("CARGO_PKG_VERSION")))
            .build()?;

        // A trailing slash makes `Url::join` append instead of replacing the last segment
        let mut base_url = config.base_url.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            inner: Arc::new(CommerceClientInner { client, base_url }),
            access_token: None,
        })
    }

    /// A handle that sends `token` as a bearer credential.
    #[must_use]
    pub fn authorized(&self, token: SecretString) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            access_token: Some(Arc::new(token)),
        }
    }

    /// Build an absolute URL for an API path such as `v1/orders`.
    fn url(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.inner.base_url.join(path.trim_start_matches('/'))?)
    }

    /// Build a listing URL with pagination parameters.
    fn paged_url(&self, path: &str, page: &PageRequest) -> Result<Url, ApiError> {
        let mut url = self.url(path)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("page", &page.page.to_string());
            query.append_pair("size", &page.size.to_string());
            if let Some(sort) = &page.sort {
                query.append_pair("sort", sort);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.inner.client.request(method, url);
        match &self.access_token {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    /// Send a request and unwrap the envelope's `result`.
    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let envelope = self.execute_envelope::<T>(request).await?;
        envelope
            .result
            .ok_or_else(|| ApiError::NotFound("response result".to_string()))
    }

    /// Send a request whose success carries no payload.
    async fn execute_empty(&self, request: RequestBuilder) -> Result<(), ApiError> {
        self.execute_envelope::<serde_json::Value>(request)
            .await
            .map(|_| ())
    }

    async fn execute_envelope<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<ApiEnvelope<T>, ApiError> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(ApiError::RateLimited(retry_after));
        }

        // Get response body as text first for better error diagnostics
        let body = response.text().await?;

        if !status.is_success() {
            let message = error_message(&body);
            tracing::warn!(
                status = %status,
                body = %preview(&body),
                "Commerce API returned non-success status"
            );

            if status == StatusCode::NOT_FOUND {
                return Err(ApiError::NotFound(message));
            }
            return Err(ApiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        if body.trim().is_empty() {
            return Ok(ApiEnvelope {
                code: i32::from(status.as_u16()),
                message: None,
                result: None,
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %preview(&body),
                "Failed to parse commerce API response"
            );
            ApiError::Parse(e)
        })
    }
}

/// Extract the envelope message from an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ApiEnvelope<serde_json::Value>>(body)
        .ok()
        .and_then(|envelope| envelope.message)
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| preview(body))
}

fn preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW_CHARS).collect()
}

// =============================================================================
// CommerceApi
// =============================================================================

#[async_trait]
impl CommerceApi for CommerceClient {
    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn fetch_cart_items(
        &self,
        user_id: UserId,
        page: PageRequest,
    ) -> Result<Page<CartItem>, ApiError> {
        let url = self.paged_url(&format!("v1/users/{user_id}/cart-items"), &page)?;
        self.execute(self.request(Method::GET, url)).await
    }

    #[instrument(skip(self, item), fields(product_id = %item.product_id))]
    async fn add_cart_item(&self, item: NewCartItem) -> Result<CartItem, ApiError> {
        let url = self.url("v1/cart-items")?;
        self.execute(self.request(Method::POST, url).json(&item))
            .await
    }

    #[instrument(skip(self, update), fields(cart_item_id = %id))]
    async fn update_cart_item(
        &self,
        id: CartItemId,
        update: CartItemUpdate,
    ) -> Result<CartItem, ApiError> {
        let url = self.url(&format!("v1/cart-items/{id}"))?;
        self.execute(self.request(Method::PUT, url).json(&update))
            .await
    }

    #[instrument(skip(self), fields(cart_item_id = %id))]
    async fn delete_cart_item(&self, id: CartItemId) -> Result<(), ApiError> {
        let url = self.url(&format!("v1/cart-items/{id}"))?;
        self.execute_empty(self.request(Method::DELETE, url)).await
    }

    #[instrument(skip(self), fields(product_id = %id))]
    async fn fetch_product(&self, id: ProductId) -> Result<Product, ApiError> {
        let url = self.url(&format!("v1/products/{id}"))?;
        self.execute(self.request(Method::GET, url)).await
    }

    #[instrument(skip(self))]
    async fn fetch_variant(
        &self,
        product_id: ProductId,
        color_id: ColorId,
        size_id: SizeId,
    ) -> Result<ProductVariant, ApiError> {
        let url = self.url(&format!(
            "v1/product-variants/{product_id}/{color_id}/{size_id}"
        ))?;
        self.execute(self.request(Method::GET, url)).await
    }

    #[instrument(skip(self, request), fields(address_id = %request.address_id, lines = request.order_items.len()))]
    async fn calculate_shipping_fee(
        &self,
        request: ShippingFeeRequest,
    ) -> Result<ShippingFee, ApiError> {
        let url = self.url("v1/shipping/calculate-fee")?;
        let fee: ShippingFee = self
            .execute(self.request(Method::POST, url).json(&request))
            .await?;
        debug!(total = %fee.total, "Shipping fee calculated");
        Ok(fee)
    }

    #[instrument(skip(self))]
    async fn fetch_my_promotions(&self, page: PageRequest) -> Result<Page<Promotion>, ApiError> {
        let url = self.paged_url("v1/users/promotions", &page)?;
        self.execute(self.request(Method::GET, url)).await
    }

    #[instrument(skip(self))]
    async fn fetch_my_addresses(&self) -> Result<Vec<Address>, ApiError> {
        let url = self.url("v1/users/addresses")?;
        self.execute(self.request(Method::GET, url)).await
    }

    #[instrument(skip(self, request), fields(payment_method = %request.payment_method))]
    async fn create_order(&self, request: CreateOrderRequest) -> Result<Order, ApiError> {
        let url = self.url("v1/orders")?;
        self.execute(self.request(Method::POST, url).json(&request))
            .await
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn verify_payment_callback(
        &self,
        request: PaymentVerificationRequest,
    ) -> Result<PaymentVerification, ApiError> {
        let url = self.url("v1/orders/vn-pay-callback")?;
        self.execute(self.request(Method::POST, url).json(&request))
            .await
    }
}

impl CommerceApiProvider for CommerceClient {
    fn for_customer(&self, customer: &CurrentCustomer) -> Arc<dyn super::CommerceApi> {
        Arc::new(self.authorized(SecretString::from(customer.access_token.clone())))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn client(base: &str) -> CommerceClient {
        CommerceClient::new(&CommerceApiConfig {
            base_url: Url::parse(base).unwrap(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_url_keeps_base_path() {
        let client = client("https://api.adamstore.test/api");
        let url = client.url("v1/orders").unwrap();
        assert_eq!(url.as_str(), "https://api.adamstore.test/api/v1/orders");
    }

    #[test]
    fn test_paged_url() {
        let client = client("https://api.adamstore.test/");
        let page = PageRequest::first(100).sorted_by("createdAt,desc");
        let url = client.paged_url("v1/users/5/cart-items", &page).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.adamstore.test/v1/users/5/cart-items?page=0&size=100&sort=createdAt%2Cdesc"
        );
    }

    #[test]
    fn test_error_message_prefers_envelope() {
        let body = r#"{"code": 400, "message": "Quantity exceeds stock"}"#;
        assert_eq!(error_message(body), "Quantity exceeds stock");
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn test_debug_does_not_leak_token() {
        let client = client("https://api.adamstore.test/")
            .authorized(SecretString::from("super-secret-token"));
        let debug = format!("{client:?}");
        assert!(debug.contains("authorized: true"));
        assert!(!debug.contains("super-secret-token"));
    }
}
