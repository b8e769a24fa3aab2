//! Checkout route handlers.
//!
//! Selections (address, promotion, payment method) are held by the
//! customer's [`CheckoutSession`]. The payment method is also written to the
//! HTTP session so it survives a server-side session expiring.

use std::sync::Arc;

use adam_store_core::{AddressId, LoadStatus, PaymentMethod, PromotionId};
use axum::{
    Json,
    extract::{OriginalUri, Query, State},
    http::Uri,
    response::Redirect,
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::{debug, instrument, warn};

use crate::api::{Address, Promotion};
use crate::checkout::{
    CheckoutOutcome, CheckoutSession, CheckoutState, CheckoutSummary, PaymentCallback,
    PaymentDialog,
};
use crate::error::{AppError, add_breadcrumb};
use crate::middleware::RequireCustomer;
use crate::models::{CurrentCustomer, session_keys};
use crate::state::AppState;
use crate::stores::PaymentSelection;

// =============================================================================
// Views and Forms
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressesView {
    pub addresses: Vec<Address>,
    pub current_id: Option<AddressId>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionsView {
    pub promotions: Vec<Promotion>,
    pub selected_id: Option<PromotionId>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodsView {
    pub available: Vec<PaymentMethod>,
    pub selected: Option<PaymentMethod>,
}

/// Checkout page data.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryView {
    #[serde(flatten)]
    pub summary: CheckoutSummary,
    pub available_payment_methods: Vec<PaymentMethod>,
    /// Lines present, address chosen and shipping fee settled.
    pub can_submit: bool,
    pub checkout: CheckoutState,
}

#[derive(Debug, Serialize)]
pub struct CallbackView {
    pub dialog: Option<PaymentDialog>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressForm {
    pub address_id: AddressId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionForm {
    #[serde(default)]
    pub promotion_id: Option<PromotionId>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentMethodForm {
    pub method: PaymentMethod,
}

#[derive(Debug, Default, Deserialize)]
pub struct SummaryQuery {
    /// Wait for the shipping fee to settle before answering.
    #[serde(default)]
    pub settled: bool,
}

#[derive(Debug, Deserialize)]
pub struct DismissForm {
    /// Location the dialog was shown at, query included.
    pub location: String,
}

// =============================================================================
// Session Helpers
// =============================================================================

/// Re-apply the payment method stored in the HTTP session.
async fn restore_payment(checkout: &CheckoutSession, session: &Session) {
    let stored = session
        .get::<PaymentSelection>(session_keys::PAYMENT_SELECTION)
        .await
        .ok()
        .flatten();

    if let Some(selection) = stored
        && checkout.payment().selected() != Some(selection.method)
        && !checkout.payment().restore(selection)
    {
        debug!(method = %selection.method, "Stored payment method no longer available");
    }
}

/// The customer's session with cart, addresses and promotions loaded.
///
/// Cart failures are returned; address and promotion failures are kept in
/// their stores and surface through the summary.
async fn prepared_session(
    state: &AppState,
    customer: &CurrentCustomer,
    session: &Session,
) -> Result<Arc<CheckoutSession>, AppError> {
    let checkout = state.sessions().for_customer(customer).await;

    let load_promotions = async {
        if matches!(
            checkout.promotions().snapshot().status,
            LoadStatus::Idle | LoadStatus::Error
        ) {
            checkout.promotions().load().await
        } else {
            Ok(())
        }
    };

    let (cart, addresses, promotions) = tokio::join!(
        checkout.cart().fetch_cart(customer.id),
        checkout.addresses().load(),
        load_promotions,
    );
    cart?;
    if let Err(e) = addresses {
        warn!(error = %e, "Failed to load addresses");
    }
    if let Err(e) = promotions {
        warn!(error = %e, "Failed to load promotions");
    }

    restore_payment(&checkout, session).await;
    Ok(checkout)
}

// =============================================================================
// Handlers
// =============================================================================

/// List addresses and the current choice.
#[instrument(skip(state, customer), fields(user_id = %customer.id))]
pub async fn addresses(
    State(state): State<AppState>,
    RequireCustomer(customer): RequireCustomer,
) -> Result<Json<AddressesView>, AppError> {
    let checkout = state.sessions().for_customer(&customer).await;
    checkout.addresses().load().await?;

    let snapshot = checkout.addresses().snapshot();
    Ok(Json(AddressesView {
        current_id: snapshot.current.as_ref().map(|a| a.id),
        addresses: snapshot.addresses,
        error: snapshot.error,
    }))
}

/// Choose the shipping address.
#[instrument(skip(state, customer), fields(user_id = %customer.id))]
pub async fn select_address(
    State(state): State<AppState>,
    RequireCustomer(customer): RequireCustomer,
    Json(form): Json<AddressForm>,
) -> Result<Json<Address>, AppError> {
    let checkout = state.sessions().for_customer(&customer).await;
    checkout.addresses().load().await?;
    let address = checkout.addresses().select(form.address_id)?;
    Ok(Json(address))
}

/// List eligible promotions and the current choice.
#[instrument(skip(state, customer), fields(user_id = %customer.id))]
pub async fn promotions(
    State(state): State<AppState>,
    RequireCustomer(customer): RequireCustomer,
) -> Result<Json<PromotionsView>, AppError> {
    let checkout = state.sessions().for_customer(&customer).await;
    checkout.promotions().load().await?;

    let snapshot = checkout.promotions().snapshot();
    Ok(Json(PromotionsView {
        selected_id: snapshot.selected.as_ref().map(|p| p.id),
        promotions: snapshot.promotions,
        error: snapshot.error,
    }))
}

/// Choose a promotion, or clear the choice with `null`.
#[instrument(skip(state, customer), fields(user_id = %customer.id))]
pub async fn select_promotion(
    State(state): State<AppState>,
    RequireCustomer(customer): RequireCustomer,
    Json(form): Json<PromotionForm>,
) -> Result<Json<PromotionsView>, AppError> {
    let checkout = state.sessions().for_customer(&customer).await;
    if checkout.promotions().snapshot().status != LoadStatus::Ready {
        checkout.promotions().load().await?;
    }
    checkout.promotions().select(form.promotion_id)?;

    let snapshot = checkout.promotions().snapshot();
    Ok(Json(PromotionsView {
        selected_id: snapshot.selected.as_ref().map(|p| p.id),
        promotions: snapshot.promotions,
        error: snapshot.error,
    }))
}

/// Available payment methods and the current choice.
#[instrument(skip(state, customer, session), fields(user_id = %customer.id))]
pub async fn payment_methods(
    State(state): State<AppState>,
    RequireCustomer(customer): RequireCustomer,
    session: Session,
) -> Json<PaymentMethodsView> {
    let checkout = state.sessions().for_customer(&customer).await;
    restore_payment(&checkout, &session).await;

    Json(PaymentMethodsView {
        available: checkout.payment().available(),
        selected: checkout.payment().selected(),
    })
}

/// Choose the payment method and remember it in the HTTP session.
#[instrument(skip(state, customer, session), fields(user_id = %customer.id))]
pub async fn select_payment_method(
    State(state): State<AppState>,
    RequireCustomer(customer): RequireCustomer,
    session: Session,
    Json(form): Json<PaymentMethodForm>,
) -> Result<Json<PaymentMethodsView>, AppError> {
    let checkout = state.sessions().for_customer(&customer).await;
    checkout.payment().select(form.method)?;

    if let Some(selection) = checkout.payment().snapshot()
        && let Err(e) = session
            .insert(session_keys::PAYMENT_SELECTION, selection)
            .await
    {
        warn!(error = %e, "Failed to persist payment method");
    }

    Ok(Json(PaymentMethodsView {
        available: checkout.payment().available(),
        selected: checkout.payment().selected(),
    }))
}

/// Lines, selections and totals.
///
/// `?settled=true` waits for a pending shipping fee instead of answering
/// with `calculating: true`.
#[instrument(skip(state, customer, session), fields(user_id = %customer.id))]
pub async fn summary(
    State(state): State<AppState>,
    RequireCustomer(customer): RequireCustomer,
    session: Session,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<SummaryView>, AppError> {
    let checkout = prepared_session(&state, &customer, &session).await?;

    let summary = if query.settled {
        checkout.settled_summary().await
    } else {
        checkout.summary().await
    };

    Ok(Json(SummaryView {
        can_submit: summary.totals.can_checkout()
            && summary.totals.is_final()
            && summary.address.is_some(),
        available_payment_methods: checkout.payment().available(),
        checkout: checkout.flow().snapshot(),
        summary,
    }))
}

/// Place the order.
///
/// Cash orders answer with the order; gateway orders with the URL to send
/// the shopper to.
#[instrument(skip(state, customer, session), fields(user_id = %customer.id))]
pub async fn submit(
    State(state): State<AppState>,
    RequireCustomer(customer): RequireCustomer,
    session: Session,
) -> Result<Json<CheckoutOutcome>, AppError> {
    let checkout = prepared_session(&state, &customer, &session).await?;
    let outcome = checkout.submit().await?;

    let order_id = outcome.order_id().to_string();
    add_breadcrumb("checkout", "Order submitted", Some(&[("order_id", &order_id)]));

    Ok(Json(outcome))
}

/// Reconcile the shopper's return from the payment gateway.
///
/// Without callback parameters there is nothing to show.
#[instrument(skip(state, customer, uri), fields(user_id = %customer.id))]
pub async fn payment_callback(
    State(state): State<AppState>,
    RequireCustomer(customer): RequireCustomer,
    OriginalUri(uri): OriginalUri,
) -> Json<CallbackView> {
    let Some(callback) = PaymentCallback::from_uri(&uri) else {
        return Json(CallbackView { dialog: None });
    };

    let checkout = state.sessions().for_customer(&customer).await;
    let dialog = callback.reconcile(checkout.api()).await;

    Json(CallbackView {
        dialog: Some(dialog),
    })
}

/// Close the result dialog: back to the callback route without its query.
#[instrument(skip(_customer, form))]
pub async fn dismiss_callback(
    RequireCustomer(_customer): RequireCustomer,
    Json(form): Json<DismissForm>,
) -> Result<Redirect, AppError> {
    let uri: Uri = form
        .location
        .parse()
        .map_err(|_| AppError::BadRequest("Invalid location".to_string()))?;

    let location = PaymentDialog::dismiss_location(&uri);
    if !location.starts_with('/') || location.starts_with("//") {
        return Err(AppError::BadRequest("Invalid location".to_string()));
    }

    Ok(Redirect::to(&location))
}
