//! Domain types for the Adam Store commerce API.
//!
//! These mirror the JSON the API speaks (camelCase fields, an envelope around
//! every response) while exposing type-safe ids and decimal prices.

use adam_store_core::{
    AddressId, CartItemId, ColorId, OrderId, OrderStatus, PaymentMethod, PaymentStatus, Price,
    ProductId, PromotionId, PromotionStatus, SizeId, UserId, VariantId,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Envelope Types
// =============================================================================

/// Response envelope wrapping every API payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    /// Application status code (mirrors HTTP status on success).
    #[serde(default)]
    pub code: i32,
    /// Human-readable message, present on errors.
    #[serde(default)]
    pub message: Option<String>,
    /// The payload.
    pub result: Option<T>,
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    /// Zero-based page index.
    #[serde(default)]
    pub page: u32,
    /// Requested page size.
    #[serde(default)]
    pub size: u32,
    /// Total number of pages.
    #[serde(default)]
    pub total_pages: u32,
    /// Total number of items across all pages.
    #[serde(default)]
    pub total_items: u64,
    /// Items on this page.
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

impl<T> Page<T> {
    /// Wrap a full list as a single page.
    #[must_use]
    pub fn single(items: Vec<T>) -> Self {
        let len = items.len();
        Self {
            page: 0,
            size: u32::try_from(len).unwrap_or(u32::MAX),
            total_pages: 1,
            total_items: len as u64,
            items,
        }
    }
}

/// Pagination parameters for listing calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Zero-based page index.
    pub page: u32,
    /// Page size.
    pub size: u32,
    /// Sort expression, e.g. `createdAt,desc`.
    pub sort: Option<String>,
}

impl PageRequest {
    /// First page of the given size.
    #[must_use]
    pub const fn first(size: u32) -> Self {
        Self {
            page: 0,
            size,
            sort: None,
        }
    }

    /// Add a sort expression.
    #[must_use]
    pub fn sorted_by(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }
}

/// An id with a display name (colors, sizes, administrative regions).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Named<I> {
    pub id: I,
    pub name: String,
}

impl<I> Named<I> {
    /// Create a named reference.
    pub fn new(id: I, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

// =============================================================================
// Cart Types
// =============================================================================

/// Product summary embedded in a cart item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartProduct {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
}

/// A user's chosen product variant and quantity, pending checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub id: CartItemId,
    pub product: CartProduct,
    pub color: Named<ColorId>,
    pub size: Named<SizeId>,
    pub quantity: u32,
    /// Unit price as of the last cart fetch. Never used for order pricing.
    pub price: Price,
    pub user_id: UserId,
}

impl CartItem {
    /// Cached unit price multiplied by quantity.
    #[must_use]
    pub fn line_total(&self) -> Price {
        self.price.times(self.quantity)
    }
}

/// Request body for adding a variant to the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCartItem {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub color_id: ColorId,
    pub size_id: SizeId,
    pub quantity: u32,
}

/// Request body for editing a cart line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_id: Option<ColorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_id: Option<SizeId>,
}

// =============================================================================
// Address Types
// =============================================================================

/// A shipping destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub id: AddressId,
    pub province: Named<i64>,
    pub district: Named<i64>,
    pub ward: Named<String>,
    pub street_detail: String,
    pub phone: String,
    #[serde(default)]
    pub is_default: bool,
}

// =============================================================================
// Promotion Types
// =============================================================================

/// A discount code the user is eligible for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Promotion {
    pub id: PromotionId,
    pub code: String,
    #[serde(default)]
    pub description: Option<String>,
    pub discount_percent: Decimal,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub status: PromotionStatus,
}

// =============================================================================
// Product Types
// =============================================================================

/// A specific color and size combination of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductVariant {
    pub id: VariantId,
    pub product_id: ProductId,
    pub color: Named<ColorId>,
    pub size: Named<SizeId>,
    pub price: Price,
    pub quantity: u32,
    #[serde(default = "default_available")]
    pub available: bool,
}

const fn default_available() -> bool {
    true
}

/// Full product details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub main_image: Option<String>,
    #[serde(default)]
    pub min_price: Price,
    #[serde(default)]
    pub max_price: Price,
    #[serde(default)]
    pub variants: Vec<ProductVariant>,
}

// =============================================================================
// Shipping Types
// =============================================================================

/// A (variant, quantity) pair sent to shipping and order calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemInput {
    pub product_variant_id: VariantId,
    pub quantity: u32,
}

/// Request body for the shipping fee calculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingFeeRequest {
    pub address_id: AddressId,
    pub order_items: Vec<OrderItemInput>,
}

/// Fee breakdown computed by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingFee {
    #[serde(default)]
    pub service_fee: Price,
    #[serde(default)]
    pub insurance_fee: Price,
    pub total: Price,
}

impl ShippingFee {
    /// A fee consisting only of a total.
    #[must_use]
    pub const fn flat(total: Price) -> Self {
        Self {
            service_fee: total,
            insurance_fee: Price::ZERO,
            total,
        }
    }
}

// =============================================================================
// Order Types
// =============================================================================

/// Request body for order creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub address_id: AddressId,
    pub order_items: Vec<OrderItemInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion_id: Option<PromotionId>,
    pub payment_method: PaymentMethod,
}

/// An order as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    #[serde(default)]
    pub order_status: OrderStatus,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    pub total_price: Price,
    /// Gateway URL to redirect to, present for VNPay orders.
    #[serde(default)]
    pub payment_url: Option<String>,
}

/// Request body for verifying a VNPay return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentVerificationRequest {
    pub order_id: String,
    pub response_code: String,
}

/// Result of a payment callback verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentVerification {
    #[serde(default)]
    pub payment_status: PaymentStatus,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cart_item_deserializes_from_api() {
        let json = r#"{
            "id": 7,
            "product": {"id": 3, "name": "Linen Shirt", "image": "https://cdn/img.png"},
            "color": {"id": 1, "name": "White"},
            "size": {"id": 2, "name": "M"},
            "quantity": 2,
            "price": 250000,
            "userId": 11
        }"#;

        let item: CartItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.id, CartItemId::new(7));
        assert_eq!(item.product.name, "Linen Shirt");
        assert_eq!(item.color, Named::new(ColorId::new(1), "White"));
        assert_eq!(item.line_total(), Price::from_dong(500_000));
    }

    #[test]
    fn test_envelope_with_page() {
        let json = r#"{
            "code": 200,
            "message": "ok",
            "result": {"page": 0, "size": 20, "totalPages": 1, "totalItems": 0, "items": []}
        }"#;

        let envelope: ApiEnvelope<Page<Promotion>> =
            serde_json::from_str(json).unwrap();
        assert_eq!(envelope.code, 200);
        assert!(envelope.result.is_some_and(|p| p.items.is_empty()));
    }

    #[test]
    fn test_create_order_request_serialization() {
        let request = CreateOrderRequest {
            address_id: AddressId::new(5),
            order_items: vec![OrderItemInput {
                product_variant_id: VariantId::new(9),
                quantity: 1,
            }],
            promotion_id: None,
            payment_method: PaymentMethod::Vnpay,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["addressId"], 5);
        assert_eq!(value["orderItems"][0]["productVariantId"], 9);
        assert_eq!(value["paymentMethod"], "VNPAY");
        assert!(value.get("promotionId").is_none());
    }

    #[test]
    fn test_variant_defaults_to_available() {
        let json = r#"{
            "id": 9, "productId": 3,
            "color": {"id": 1, "name": "White"}, "size": {"id": 2, "name": "M"},
            "price": "199000", "quantity": 4
        }"#;

        let variant: ProductVariant = serde_json::from_str(json).unwrap();
        assert!(variant.available);
        assert_eq!(variant.price, Price::from_dong(199_000));
    }

    #[test]
    fn test_promotion_dates() {
        let json = r#"{
            "id": 1, "code": "SUMMER10", "discountPercent": 10,
            "startDate": "2026-06-01", "endDate": "2026-08-31", "status": "ACTIVE"
        }"#;

        let promotion: Promotion = serde_json::from_str(json).unwrap();
        assert_eq!(promotion.discount_percent, Decimal::from(10));
        assert!(promotion.start_date < promotion.end_date);
    }
}
