//! Integration tests for the Adam Store storefront.
//!
//! Each test serves the real router on a loopback port, backed by the
//! in-process fake commerce API, and talks to it over HTTP with a client that
//! keeps the session cookie.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p adam-store-integration-tests
//! ```
//!
//! # Logging In
//!
//! Customers normally log in through the external identity provider. Here the
//! client sends [`TEST_CUSTOMER_HEADER`] and a middleware stores the matching
//! customer in the session.

use std::sync::Arc;
use std::time::Duration;

use adam_store_core::{AddressId, Price};
use adam_store_storefront::config::{CommerceApiConfig, PricingConfig, StorefrontConfig};
use adam_store_storefront::middleware::{create_session_layer, set_current_customer};
use adam_store_storefront::routes;
use adam_store_storefront::state::AppState;
use adam_store_storefront::testing::{FakeCommerceApi, FakeProvider, fixtures};
use axum::{
    extract::Request,
    middleware::{Next, from_fn},
    response::Response,
};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tokio::task::JoinHandle;
use tower_sessions::Session;

/// Header naming the customer a request logs in as.
pub const TEST_CUSTOMER_HEADER: &str = "x-test-customer";

/// Customer the default context logs in as.
pub const CUSTOMER: i64 = 11;

/// Shipping debounce used by the test server.
pub const TEST_DEBOUNCE: Duration = Duration::from_millis(100);

/// Configuration for a loopback storefront.
///
/// # Panics
///
/// Never in practice; the literals are valid.
#[must_use]
pub fn test_config() -> StorefrontConfig {
    StorefrontConfig {
        host: [127, 0, 0, 1].into(),
        port: 0,
        base_url: "http://127.0.0.1".to_string(),
        session_secret: secrecy::SecretString::from("Qm7#vT2$kP9!xR4&wL8*zN3@hB6^dF1%"),
        api: CommerceApiConfig {
            base_url: url::Url::parse("http://api.adamstore.test/api/").expect("valid URL"),
            timeout: Duration::from_secs(5),
        },
        pricing: PricingConfig {
            shipping_debounce: TEST_DEBOUNCE,
            ..PricingConfig::default()
        },
        sentry_dsn: None,
        sentry_environment: None,
    }
}

/// The catalog most tests start from.
///
/// - Linen Shirt (3) at 250.000 ₫ and Chino Pants (4) at 400.000 ₫
/// - Cart lines 7 (2 shirts) and 8 (1 pants) for [`CUSTOMER`]
/// - Addresses 1 (default, 35.000 ₫ shipping) and 2 (50.000 ₫)
/// - Promotion 5, 10% off
#[must_use]
pub fn seeded_api() -> Arc<FakeCommerceApi> {
    let fake = Arc::new(FakeCommerceApi::new());
    fake.add_product(fixtures::product(3, "Linen Shirt", 250_000, &[(1, 2), (1, 3)]));
    fake.add_product(fixtures::product(4, "Chino Pants", 400_000, &[(2, 4)]));
    fake.add_to_cart(fixtures::cart_item(7, CUSTOMER, (3, 1, 2), 2, 250_000));
    fake.add_to_cart(fixtures::cart_item(8, CUSTOMER, (4, 2, 4), 1, 400_000));
    fake.add_address(fixtures::address(1, true));
    fake.add_address(fixtures::address(2, false));
    fake.add_promotion(fixtures::promotion(5, "WELCOME10", 10));
    fake.set_shipping_fee(AddressId::new(1), Price::from_dong(35_000));
    fake.set_shipping_fee(AddressId::new(2), Price::from_dong(50_000));
    fake
}

/// Decode a JSON price.
///
/// # Panics
///
/// Panics if the value is not a price.
#[must_use]
pub fn price(value: &Value) -> Price {
    serde_json::from_value(value.clone()).expect("price")
}

async fn test_login(session: Session, request: Request, next: Next) -> Response {
    let customer = request
        .headers()
        .get(TEST_CUSTOMER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok());

    if let Some(id) = customer {
        set_current_customer(&session, &fixtures::customer(id))
            .await
            .expect("store test customer");
    }
    next.run(request).await
}

/// A running storefront and an HTTP client for it.
pub struct TestContext {
    pub fake: Arc<FakeCommerceApi>,
    pub state: AppState,
    client: reqwest::Client,
    base_url: String,
    server: JoinHandle<()>,
}

impl TestContext {
    /// Serve the storefront logged in as [`CUSTOMER`].
    pub async fn start(fake: Arc<FakeCommerceApi>) -> Self {
        Self::start_as(fake, Some(CUSTOMER)).await
    }

    /// Serve the storefront, logged in as `customer` when given.
    ///
    /// # Panics
    ///
    /// Panics if the loopback listener cannot be bound.
    pub async fn start_as(fake: Arc<FakeCommerceApi>, customer: Option<i64>) -> Self {
        let config = test_config();
        let session_layer = create_session_layer(&config);
        let state = AppState::with_provider(config, Arc::new(FakeProvider(Arc::clone(&fake))));

        let app = routes::routes()
            .layer(from_fn(test_login))
            .layer(session_layer)
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind loopback");
        let addr = listener.local_addr().expect("local address");
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("test server");
        });

        let mut headers = HeaderMap::new();
        if let Some(id) = customer {
            headers.insert(TEST_CUSTOMER_HEADER, HeaderValue::from(id));
        }
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .default_headers(headers)
            .build()
            .expect("HTTP client");

        Self {
            fake,
            state,
            client,
            base_url: format!("http://{addr}"),
            server,
        }
    }

    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Send a request and decode the JSON response (`Null` when empty).
    ///
    /// # Panics
    ///
    /// Panics if the server cannot be reached.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = self.client.request(method, self.url(path));
        if let Some(json) = body {
            request = request.json(&json);
        }
        let response = request.send().await.expect("request sent");
        let status = response.status();
        let text = response.text().await.expect("response body");
        let json = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        (status, json)
    }

    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        self.request(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PUT, path, Some(body)).await
    }

    /// Check a cart line for checkout.
    ///
    /// # Panics
    ///
    /// Panics if the line cannot be selected.
    pub async fn select_line(&self, id: i64) {
        let (status, body) = self
            .post(
                &format!("/cart/items/{id}/selection"),
                serde_json::json!({"selected": true}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "select {id}: {body}");
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        self.server.abort();
    }
}
