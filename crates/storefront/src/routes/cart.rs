//! Cart route handlers.
//!
//! Every handler works on the customer's [`CheckoutSession`], loading the
//! cart on first use. Changes flow from the cart store into the pricing
//! pipeline without further action here.

use std::sync::Arc;

use adam_store_core::{CartItemId, ColorId, LoadStatus, Price, ProductId, SizeId};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::{CartItem, CartItemUpdate};
use crate::checkout::CheckoutSession;
use crate::error::{AppError, add_breadcrumb};
use crate::middleware::RequireCustomer;
use crate::models::CurrentCustomer;
use crate::state::AppState;
use crate::stores::CartState;

/// Cart line as shown to the shopper.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemView {
    #[serde(flatten)]
    pub item: CartItem,
    pub selected: bool,
    pub line_total: Price,
}

/// Cart as shown to the shopper.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub status: LoadStatus,
    pub items: Vec<CartItemView>,
    pub selected_count: usize,
    /// Cached prices only; checkout totals re-resolve every line.
    pub selected_total: Price,
    pub selected_total_display: String,
    pub error: Option<String>,
}

impl From<CartState> for CartView {
    fn from(state: CartState) -> Self {
        let selected_total = state.selected_total_price();
        let items = state
            .items
            .iter()
            .map(|item| CartItemView {
                selected: state.selected.contains(&item.id),
                line_total: item.line_total(),
                item: item.clone(),
            })
            .collect();

        Self {
            status: state.status,
            items,
            selected_count: state.selected.len(),
            selected_total,
            selected_total_display: selected_total.display(),
            error: state.error,
        }
    }
}

/// Add-to-cart form data.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartForm {
    pub product_id: ProductId,
    pub color_id: ColorId,
    pub size_id: SizeId,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

const fn default_quantity() -> u32 {
    1
}

/// Check / uncheck form data.
#[derive(Debug, Deserialize)]
pub struct SelectionForm {
    pub selected: bool,
}

/// The customer's session with the cart loaded.
async fn loaded_session(
    state: &AppState,
    customer: &CurrentCustomer,
) -> Result<Arc<CheckoutSession>, AppError> {
    let session = state.sessions().for_customer(customer).await;
    session.cart().fetch_cart(customer.id).await?;
    Ok(session)
}

// =============================================================================
// Handlers
// =============================================================================

/// Show the cart.
#[instrument(skip(state, customer), fields(user_id = %customer.id))]
pub async fn show(
    State(state): State<AppState>,
    RequireCustomer(customer): RequireCustomer,
) -> Result<Json<CartView>, AppError> {
    let session = loaded_session(&state, &customer).await?;
    Ok(Json(session.cart().snapshot().into()))
}

/// Add a variant to the cart.
#[instrument(skip(state, customer), fields(user_id = %customer.id))]
pub async fn add(
    State(state): State<AppState>,
    RequireCustomer(customer): RequireCustomer,
    Json(form): Json<AddToCartForm>,
) -> Result<(StatusCode, Json<CartItemView>), AppError> {
    let session = loaded_session(&state, &customer).await?;
    let item = session
        .cart()
        .add_item(form.product_id, form.color_id, form.size_id, form.quantity)
        .await?;

    let item_id = item.id.to_string();
    add_breadcrumb("cart", "Added item to cart", Some(&[("cart_item_id", &item_id)]));

    Ok((
        StatusCode::CREATED,
        Json(CartItemView {
            line_total: item.line_total(),
            selected: true,
            item,
        }),
    ))
}

/// Change quantity, color or size of a line.
#[instrument(skip(state, customer), fields(user_id = %customer.id))]
pub async fn update(
    State(state): State<AppState>,
    RequireCustomer(customer): RequireCustomer,
    Path(id): Path<CartItemId>,
    Json(update): Json<CartItemUpdate>,
) -> Result<Json<CartItemView>, AppError> {
    let session = loaded_session(&state, &customer).await?;
    let item = session.cart().update_item(id, update).await?;
    let selected = session.cart().snapshot().selected.contains(&item.id);

    Ok(Json(CartItemView {
        line_total: item.line_total(),
        selected,
        item,
    }))
}

/// Remove a line.
#[instrument(skip(state, customer), fields(user_id = %customer.id))]
pub async fn remove(
    State(state): State<AppState>,
    RequireCustomer(customer): RequireCustomer,
    Path(id): Path<CartItemId>,
) -> Result<StatusCode, AppError> {
    let session = loaded_session(&state, &customer).await?;
    session.cart().remove_item(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Check or uncheck a line for checkout.
#[instrument(skip(state, customer), fields(user_id = %customer.id))]
pub async fn select(
    State(state): State<AppState>,
    RequireCustomer(customer): RequireCustomer,
    Path(id): Path<CartItemId>,
    Json(form): Json<SelectionForm>,
) -> Result<Json<CartView>, AppError> {
    let session = loaded_session(&state, &customer).await?;
    session.cart().set_selected(id, form.selected)?;
    Ok(Json(session.cart().snapshot().into()))
}

/// Remove every line.
///
/// A partial failure answers with an error; the cart has been re-synced and
/// the next `GET /cart` shows what is left.
#[instrument(skip(state, customer), fields(user_id = %customer.id))]
pub async fn clear(
    State(state): State<AppState>,
    RequireCustomer(customer): RequireCustomer,
) -> Result<Json<CartView>, AppError> {
    let session = loaded_session(&state, &customer).await?;
    session.cart().clear_cart().await?;
    add_breadcrumb("cart", "Cleared cart", None);
    Ok(Json(session.cart().snapshot().into()))
}
