//! End-to-end checkout over HTTP: cart selection, live totals, submission.

use adam_store_core::{PaymentMethod, Price, UserId};
use adam_store_integration_tests::{CUSTOMER, TestContext, price, seeded_api};
use reqwest::{Method, StatusCode};
use serde_json::json;

// =============================================================================
// Totals
// =============================================================================

#[tokio::test]
async fn test_settled_totals_for_selected_lines() {
    let ctx = TestContext::start(seeded_api()).await;
    ctx.select_line(7).await;
    ctx.select_line(8).await;

    let (status, body) = ctx.get("/checkout/summary?settled=true").await;

    assert_eq!(status, StatusCode::OK);
    let totals = &body["totals"];
    assert_eq!(price(&totals["subtotal"]), Price::from_dong(900_000));
    assert_eq!(price(&totals["shippingFee"]), Price::from_dong(35_000));
    assert_eq!(price(&totals["discount"]), Price::from_dong(90_000));
    assert_eq!(price(&totals["total"]), Price::from_dong(845_000));
    assert_eq!(totals["calculating"], false);
    assert_eq!(body["canSubmit"], true);
    assert_eq!(ctx.fake.calls("calculate_shipping_fee"), 1);
}

#[tokio::test]
async fn test_quick_selection_changes_price_shipping_once() {
    let ctx = TestContext::start(seeded_api()).await;
    ctx.get("/checkout/summary").await;

    ctx.select_line(7).await;
    ctx.select_line(8).await;
    ctx.post("/cart/items/8/selection", json!({"selected": false}))
        .await;

    let (_, body) = ctx.get("/checkout/summary?settled=true").await;

    assert_eq!(price(&body["totals"]["subtotal"]), Price::from_dong(500_000));
    assert_eq!(ctx.fake.calls("calculate_shipping_fee"), 1);
    let sent = ctx.fake.shipping_requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].order_items.len(), 1);
}

#[tokio::test]
async fn test_clearing_promotion_removes_discount() {
    let ctx = TestContext::start(seeded_api()).await;
    ctx.select_line(7).await;

    let (status, _) = ctx
        .put("/checkout/promotion", json!({"promotionId": null}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = ctx.get("/checkout/summary?settled=true").await;
    assert_eq!(price(&body["totals"]["discount"]), Price::ZERO);
    assert_eq!(price(&body["totals"]["total"]), Price::from_dong(535_000));
    assert_eq!(body["promotion"], serde_json::Value::Null);
}

#[tokio::test]
async fn test_shipping_failure_is_not_fatal() {
    let fake = seeded_api();
    fake.fail_shipping(true);
    let ctx = TestContext::start(fake).await;
    ctx.select_line(7).await;

    let (status, body) = ctx.get("/checkout/summary?settled=true").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(price(&body["totals"]["shippingFee"]), Price::ZERO);
    assert!(body["shippingError"].as_str().is_some());
    assert_eq!(body["totals"]["calculating"], false);
}

#[tokio::test]
async fn test_lines_use_current_variant_price() {
    let fake = seeded_api();
    fake.set_variant_price(
        (
            adam_store_core::ProductId::new(3),
            adam_store_core::ColorId::new(1),
            adam_store_core::SizeId::new(2),
        ),
        Price::from_dong(260_000),
    );
    let ctx = TestContext::start(fake).await;
    ctx.select_line(7).await;

    let (_, cart) = ctx.get("/cart").await;
    let (_, body) = ctx.get("/checkout/summary?settled=true").await;

    assert_eq!(price(&cart["items"][0]["price"]), Price::from_dong(250_000));
    assert_eq!(price(&body["lines"][0]["unitPrice"]), Price::from_dong(260_000));
    assert_eq!(price(&body["lines"][0]["lineTotal"]), Price::from_dong(520_000));
}

#[tokio::test]
async fn test_vanished_variant_is_reported_unavailable() {
    let fake = seeded_api();
    fake.remove_variant((
        adam_store_core::ProductId::new(4),
        adam_store_core::ColorId::new(2),
        adam_store_core::SizeId::new(4),
    ));
    let ctx = TestContext::start(fake).await;
    ctx.select_line(7).await;
    ctx.select_line(8).await;

    let (_, body) = ctx.get("/checkout/summary?settled=true").await;

    assert_eq!(body["lines"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["unavailable"][0]["cartItemId"], 8);
}

// =============================================================================
// Submission
// =============================================================================

#[tokio::test]
async fn test_cash_order_is_placed_and_cart_refetched() {
    let ctx = TestContext::start(seeded_api()).await;
    ctx.select_line(7).await;
    ctx.select_line(8).await;
    ctx.get("/checkout/summary?settled=true").await;

    let (status, body) = ctx.request(Method::POST, "/checkout", None).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["kind"], "placed");

    let orders = ctx.fake.order_requests();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].payment_method, PaymentMethod::Cash);
    assert_eq!(orders[0].address_id.as_i64(), 1);
    assert_eq!(orders[0].promotion_id.map(|p| p.as_i64()), Some(5));
    assert_eq!(orders[0].order_items.len(), 2);

    ctx.get("/cart").await;
    assert_eq!(ctx.fake.calls("fetch_cart_items"), 2);
}

#[tokio::test]
async fn test_vnpay_order_returns_gateway_url() {
    let ctx = TestContext::start(seeded_api()).await;
    ctx.select_line(7).await;
    let (status, _) = ctx
        .put("/checkout/payment-method", json!({"method": "VNPAY"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    ctx.get("/checkout/summary?settled=true").await;

    let (status, body) = ctx.request(Method::POST, "/checkout", None).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["kind"], "redirect_to_gateway");
    let url = body["paymentUrl"].as_str().unwrap_or_default();
    assert!(url.starts_with("https://sandbox.vnpayment.vn/"));
    assert_eq!(ctx.fake.order_requests()[0].payment_method, PaymentMethod::Vnpay);
}

#[tokio::test]
async fn test_order_failure_surfaces_message() {
    let fake = seeded_api();
    fake.fail_orders(Some("Sản phẩm đã hết hàng"));
    let ctx = TestContext::start(fake).await;
    ctx.select_line(7).await;
    ctx.get("/checkout/summary?settled=true").await;

    let (status, body) = ctx.request(Method::POST, "/checkout", None).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "Sản phẩm đã hết hàng");

    let (_, summary) = ctx.get("/checkout/summary").await;
    assert_eq!(summary["checkout"]["phase"], "idle");
}

#[tokio::test]
async fn test_submit_before_fee_settles_is_rejected() {
    let ctx = TestContext::start(seeded_api()).await;
    ctx.select_line(7).await;

    let (status, _) = ctx.request(Method::POST, "/checkout", None).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(ctx.fake.calls("create_order"), 0);
}

// =============================================================================
// Session
// =============================================================================

#[tokio::test]
async fn test_payment_method_survives_checkout_session_restart() {
    let ctx = TestContext::start(seeded_api()).await;
    ctx.put("/checkout/payment-method", json!({"method": "VNPAY"}))
        .await;

    ctx.state.sessions().end(UserId::new(CUSTOMER)).await;

    let (_, body) = ctx.get("/checkout/payment-method").await;
    assert_eq!(body["selected"], "VNPAY");
}

#[tokio::test]
async fn test_anonymous_checkout_is_unauthorized() {
    let ctx = TestContext::start_as(seeded_api(), None).await;

    let (status, _) = ctx.get("/checkout/summary").await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(ctx.fake.calls("fetch_cart_items"), 0);
}
