//! In-process fake of the commerce API.
//!
//! Keeps a small catalog, cart, address book and promotion list in memory and
//! records every call so tests can assert on how often (and with what) the
//! pipeline talks to the remote side. Failure modes and latencies can be
//! switched on per entity while a test runs.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use adam_store_core::{
    AddressId, CartItemId, ColorId, OrderId, OrderStatus, PaymentMethod, PaymentStatus, Price,
    ProductId, PromotionId, PromotionStatus, SizeId, UserId, VariantId,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::api::{
    Address, ApiError, CartItem, CartItemUpdate, CartProduct, CommerceApi, CommerceApiProvider,
    CreateOrderRequest, Named, NewCartItem, Order, Page, PageRequest, PaymentVerification,
    PaymentVerificationRequest, Product, ProductVariant, Promotion, ShippingFee,
    ShippingFeeRequest,
};
use crate::models::CurrentCustomer;

type VariantKey = (ProductId, ColorId, SizeId);

#[derive(Default)]
struct FakeState {
    cart: Vec<CartItem>,
    next_cart_item_id: i64,
    products: HashMap<ProductId, Product>,
    variants: HashMap<VariantKey, ProductVariant>,
    addresses: Vec<Address>,
    promotions: Vec<Promotion>,
    next_order_id: i64,

    failing_products: HashSet<ProductId>,
    failing_deletes: HashSet<CartItemId>,
    failing_cart_fetch: bool,
    failing_shipping: bool,
    failing_verification: bool,
    order_error: Option<String>,

    shipping_fees: HashMap<AddressId, Price>,
    default_shipping_fee: Price,
    shipping_delays: HashMap<AddressId, Duration>,
    cart_fetch_delay: Option<Duration>,
    variant_delay: Option<Duration>,
    order_delay: Option<Duration>,

    calls: HashMap<&'static str, usize>,
    shipping_requests: Vec<ShippingFeeRequest>,
    order_requests: Vec<CreateOrderRequest>,
    verification_requests: Vec<PaymentVerificationRequest>,
}

/// In-memory stand-in for the remote commerce API.
#[derive(Default)]
pub struct FakeCommerceApi {
    state: Mutex<FakeState>,
}

impl FakeCommerceApi {
    /// An empty fake with a 30.000 ₫ default shipping fee.
    #[must_use]
    pub fn new() -> Self {
        let fake = Self::default();
        {
            let mut state = fake.state();
            state.next_cart_item_id = 1000;
            state.next_order_id = 500;
            state.default_shipping_fee = Price::from_dong(30_000);
        }
        fake
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: &'static str) {
        *self.state().calls.entry(call).or_insert(0) += 1;
    }

    // -------------------------------------------------------------------------
    // Seeding
    // -------------------------------------------------------------------------

    /// Register a product and all of its variants.
    pub fn add_product(&self, product: Product) {
        let mut state = self.state();
        for variant in &product.variants {
            state.variants.insert(
                (product.id, variant.color.id, variant.size.id),
                variant.clone(),
            );
        }
        state.products.insert(product.id, product);
    }

    /// Put an item straight into the server-side cart.
    pub fn add_to_cart(&self, item: CartItem) {
        self.state().cart.push(item);
    }

    /// Register an address.
    pub fn add_address(&self, address: Address) {
        self.state().addresses.push(address);
    }

    /// Register an eligible promotion.
    pub fn add_promotion(&self, promotion: Promotion) {
        self.state().promotions.push(promotion);
    }

    /// Change the price of a registered variant.
    pub fn set_variant_price(&self, key: VariantKey, price: Price) {
        let mut state = self.state();
        if let Some(variant) = state.variants.get_mut(&key) {
            variant.price = price;
        }
    }

    /// Make a variant lookup fail with 404.
    pub fn remove_variant(&self, key: VariantKey) {
        self.state().variants.remove(&key);
    }

    // -------------------------------------------------------------------------
    // Behaviour switches
    // -------------------------------------------------------------------------

    /// Fail product detail lookups for `id`.
    pub fn fail_product(&self, id: ProductId) {
        self.state().failing_products.insert(id);
    }

    /// Fail deletes of the given cart item.
    pub fn fail_delete(&self, id: CartItemId) {
        self.state().failing_deletes.insert(id);
    }

    /// Fail cart listing calls.
    pub fn fail_cart_fetch(&self, fail: bool) {
        self.state().failing_cart_fetch = fail;
    }

    /// Fail shipping fee calculations.
    pub fn fail_shipping(&self, fail: bool) {
        self.state().failing_shipping = fail;
    }

    /// Fail payment verification calls.
    pub fn fail_verification(&self, fail: bool) {
        self.state().failing_verification = fail;
    }

    /// Reject order creation with `message`.
    pub fn fail_orders(&self, message: Option<&str>) {
        self.state().order_error = message.map(str::to_string);
    }

    /// Fee returned for a specific address.
    pub fn set_shipping_fee(&self, address_id: AddressId, fee: Price) {
        self.state().shipping_fees.insert(address_id, fee);
    }

    /// Latency of shipping calculations for a specific address.
    pub fn set_shipping_delay(&self, address_id: AddressId, delay: Duration) {
        self.state().shipping_delays.insert(address_id, delay);
    }

    /// Latency of cart listing calls.
    pub fn set_cart_fetch_delay(&self, delay: Duration) {
        self.state().cart_fetch_delay = Some(delay);
    }

    /// Latency of variant lookups.
    pub fn set_variant_delay(&self, delay: Duration) {
        self.state().variant_delay = Some(delay);
    }

    /// Latency of order creation calls.
    pub fn set_order_delay(&self, delay: Duration) {
        self.state().order_delay = Some(delay);
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Number of times a trait method was called, by method name.
    #[must_use]
    pub fn calls(&self, method: &str) -> usize {
        self.state().calls.get(method).copied().unwrap_or(0)
    }

    /// Shipping requests received, oldest first.
    #[must_use]
    pub fn shipping_requests(&self) -> Vec<ShippingFeeRequest> {
        self.state().shipping_requests.clone()
    }

    /// Order requests received, oldest first.
    #[must_use]
    pub fn order_requests(&self) -> Vec<CreateOrderRequest> {
        self.state().order_requests.clone()
    }

    /// Verification requests received, oldest first.
    #[must_use]
    pub fn verification_requests(&self) -> Vec<PaymentVerificationRequest> {
        self.state().verification_requests.clone()
    }

    /// Ids currently in the server-side cart.
    #[must_use]
    pub fn cart_ids(&self) -> Vec<CartItemId> {
        self.state().cart.iter().map(|item| item.id).collect()
    }
}

#[async_trait]
impl CommerceApi for FakeCommerceApi {
    async fn fetch_cart_items(
        &self,
        user_id: UserId,
        page: PageRequest,
    ) -> Result<Page<CartItem>, ApiError> {
        self.record("fetch_cart_items");
        let delay = self.state().cart_fetch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state();
        if state.failing_cart_fetch {
            return Err(server_error("cart service unavailable"));
        }

        let items: Vec<CartItem> = state
            .cart
            .iter()
            .filter(|item| item.user_id == user_id)
            .take(page.size as usize)
            .cloned()
            .collect();
        Ok(Page::single(items))
    }

    async fn add_cart_item(&self, item: NewCartItem) -> Result<CartItem, ApiError> {
        self.record("add_cart_item");
        let mut state = self.state();

        let key = (item.product_id, item.color_id, item.size_id);
        let variant = state
            .variants
            .get(&key)
            .cloned()
            .ok_or_else(|| ApiError::NotFound("Variant".to_string()))?;
        let product = state
            .products
            .get(&item.product_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound("Product".to_string()))?;

        state.next_cart_item_id += 1;
        let created = CartItem {
            id: CartItemId::new(state.next_cart_item_id),
            product: CartProduct {
                id: product.id,
                name: product.name,
                image: product.main_image,
            },
            color: variant.color,
            size: variant.size,
            quantity: item.quantity,
            price: variant.price,
            user_id: item.user_id,
        };
        state.cart.push(created.clone());
        Ok(created)
    }

    async fn update_cart_item(
        &self,
        id: CartItemId,
        update: CartItemUpdate,
    ) -> Result<CartItem, ApiError> {
        self.record("update_cart_item");
        let mut state = self.state();

        let current = state
            .cart
            .iter()
            .find(|item| item.id == id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound("Cart item".to_string()))?;

        let key = (
            current.product.id,
            update.color_id.unwrap_or(current.color.id),
            update.size_id.unwrap_or(current.size.id),
        );
        let variant = state
            .variants
            .get(&key)
            .cloned()
            .ok_or_else(|| ApiError::NotFound("Variant".to_string()))?;

        let updated = CartItem {
            color: variant.color,
            size: variant.size,
            price: variant.price,
            quantity: update.quantity.unwrap_or(current.quantity),
            ..current
        };
        if let Some(slot) = state.cart.iter_mut().find(|item| item.id == id) {
            *slot = updated.clone();
        }
        Ok(updated)
    }

    async fn delete_cart_item(&self, id: CartItemId) -> Result<(), ApiError> {
        self.record("delete_cart_item");
        let mut state = self.state();
        if state.failing_deletes.contains(&id) {
            return Err(server_error("could not delete cart item"));
        }
        state.cart.retain(|item| item.id != id);
        Ok(())
    }

    async fn fetch_product(&self, id: ProductId) -> Result<Product, ApiError> {
        self.record("fetch_product");
        let state = self.state();
        if state.failing_products.contains(&id) {
            return Err(server_error("product service unavailable"));
        }
        state
            .products
            .get(&id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound("Product".to_string()))
    }

    async fn fetch_variant(
        &self,
        product_id: ProductId,
        color_id: ColorId,
        size_id: SizeId,
    ) -> Result<ProductVariant, ApiError> {
        self.record("fetch_variant");
        let delay = self.state().variant_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state()
            .variants
            .get(&(product_id, color_id, size_id))
            .cloned()
            .ok_or_else(|| ApiError::NotFound("Variant".to_string()))
    }

    async fn calculate_shipping_fee(
        &self,
        request: ShippingFeeRequest,
    ) -> Result<ShippingFee, ApiError> {
        self.record("calculate_shipping_fee");
        let delay = {
            let mut state = self.state();
            state.shipping_requests.push(request.clone());
            state.shipping_delays.get(&request.address_id).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state();
        if state.failing_shipping {
            return Err(server_error("shipping provider timeout"));
        }
        let fee = state
            .shipping_fees
            .get(&request.address_id)
            .copied()
            .unwrap_or(state.default_shipping_fee);
        Ok(ShippingFee::flat(fee))
    }

    async fn fetch_my_promotions(&self, page: PageRequest) -> Result<Page<Promotion>, ApiError> {
        self.record("fetch_my_promotions");
        let items = self
            .state()
            .promotions
            .iter()
            .take(page.size as usize)
            .cloned()
            .collect();
        Ok(Page::single(items))
    }

    async fn fetch_my_addresses(&self) -> Result<Vec<Address>, ApiError> {
        self.record("fetch_my_addresses");
        Ok(self.state().addresses.clone())
    }

    async fn create_order(&self, request: CreateOrderRequest) -> Result<Order, ApiError> {
        self.record("create_order");
        let delay = self.state().order_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.order_requests.push(request.clone());
        if let Some(message) = state.order_error.clone() {
            return Err(ApiError::Api {
                status: 400,
                message,
            });
        }

        state.next_order_id += 1;
        let id = OrderId::new(state.next_order_id);
        let payment_url = (request.payment_method == PaymentMethod::Vnpay).then(|| {
            format!("https://sandbox.vnpayment.vn/paymentv2/vpcpay.html?vnp_TxnRef={id}")
        });

        Ok(Order {
            id,
            order_status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            total_price: Price::ZERO,
            payment_url,
        })
    }

    async fn verify_payment_callback(
        &self,
        request: PaymentVerificationRequest,
    ) -> Result<PaymentVerification, ApiError> {
        self.record("verify_payment_callback");
        let mut state = self.state();
        state.verification_requests.push(request.clone());
        if state.failing_verification {
            return Err(server_error("verification failed"));
        }

        let payment_status = if request.response_code == "00" {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Failed
        };
        Ok(PaymentVerification { payment_status })
    }
}

/// Provider handing out the same fake for every customer.
#[derive(Clone)]
pub struct FakeProvider(pub Arc<FakeCommerceApi>);

impl CommerceApiProvider for FakeProvider {
    fn for_customer(&self, _customer: &CurrentCustomer) -> Arc<dyn CommerceApi> {
        Arc::clone(&self.0) as Arc<dyn CommerceApi>
    }
}

fn server_error(message: &str) -> ApiError {
    ApiError::Api {
        status: 500,
        message: message.to_string(),
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Builders for realistic test data.
pub mod fixtures {
    use super::*;

    /// A product with one variant per `(color, size)` pair, all at `price`.
    #[must_use]
    pub fn product(id: i64, name: &str, price: i64, combos: &[(i64, i64)]) -> Product {
        let product_id = ProductId::new(id);
        let variants = combos
            .iter()
            .enumerate()
            .map(|(i, &(color, size))| ProductVariant {
                id: VariantId::new(id * 100 + i64::try_from(i).unwrap_or(0)),
                product_id,
                color: Named::new(ColorId::new(color), format!("Color {color}")),
                size: Named::new(SizeId::new(size), format!("Size {size}")),
                price: Price::from_dong(price),
                quantity: 10,
                available: true,
            })
            .collect();

        Product {
            id: product_id,
            name: name.to_string(),
            main_image: Some(format!("https://cdn.adamstore.test/products/{id}.jpg")),
            min_price: Price::from_dong(price),
            max_price: Price::from_dong(price),
            variants,
        }
    }

    /// A cart line for `user` with a cached unit `price`.
    #[must_use]
    pub fn cart_item(
        id: i64,
        user: i64,
        (product, color, size): (i64, i64, i64),
        quantity: u32,
        price: i64,
    ) -> CartItem {
        CartItem {
            id: CartItemId::new(id),
            product: CartProduct {
                id: ProductId::new(product),
                name: format!("Cached product {product}"),
                image: Some(format!("https://cdn.adamstore.test/cached/{product}.jpg")),
            },
            color: Named::new(ColorId::new(color), format!("Color {color}")),
            size: Named::new(SizeId::new(size), format!("Size {size}")),
            quantity,
            price: Price::from_dong(price),
            user_id: UserId::new(user),
        }
    }

    /// An address in Hanoi.
    #[must_use]
    pub fn address(id: i64, is_default: bool) -> Address {
        Address {
            id: AddressId::new(id),
            province: Named::new(201, "Hà Nội"),
            district: Named::new(1490, "Quận Hoàng Mai"),
            ward: Named::new("1A0807".to_string(), "Phường Hoàng Liệt"),
            street_detail: format!("{id} Giải Phóng"),
            phone: "0912345678".to_string(),
            is_default,
        }
    }

    /// An active promotion valid through 2026.
    #[must_use]
    pub fn promotion(id: i64, code: &str, percent: i64) -> Promotion {
        Promotion {
            id: PromotionId::new(id),
            code: code.to_string(),
            description: None,
            discount_percent: Decimal::from(percent),
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2026, 12, 31).unwrap_or_default(),
            status: PromotionStatus::Active,
        }
    }

    /// A logged-in customer.
    #[must_use]
    pub fn customer(id: i64) -> CurrentCustomer {
        CurrentCustomer {
            id: UserId::new(id),
            email: format!("customer{id}@adamstore.test"),
            access_token: format!("token-{id}"),
        }
    }
}
