//! Variant resolution for order pricing.
//!
//! Turns the checked cart lines into priced order lines using live product
//! and variant data. Cart prices are never trusted here: every line is priced
//! from a fresh variant lookup. Lines whose variant can't be resolved are
//! reported as [`UnavailableItem`]s instead of failing the whole resolution.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use adam_store_core::{CartItemId, ColorId, Price, ProductId, SizeId, VariantId};
use futures::future::join_all;
use moka::future::Cache;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::api::{ApiError, CartItem, CommerceApi, OrderItemInput, ProductVariant};

/// Upper bound on cached selections per resolver.
const MAX_CACHED_SELECTIONS: u64 = 256;

/// A cart line priced from live variant data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub cart_item_id: CartItemId,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub name: String,
    pub image: Option<String>,
    pub color: String,
    pub size: String,
    pub quantity: u32,
    pub unit_price: Price,
    pub line_total: Price,
}

impl OrderLine {
    /// The `(variant, quantity)` pair sent to shipping and order calls.
    #[must_use]
    pub const fn as_input(&self) -> OrderItemInput {
        OrderItemInput {
            product_variant_id: self.variant_id,
            quantity: self.quantity,
        }
    }
}

/// A checked cart line whose variant could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnavailableItem {
    pub cart_item_id: CartItemId,
    pub product_id: ProductId,
    pub name: String,
    pub reason: String,
}

/// Outcome of resolving a selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedLines {
    pub lines: Vec<OrderLine>,
    pub unavailable: Vec<UnavailableItem>,
}

impl ResolvedLines {
    /// Order payload lines.
    #[must_use]
    pub fn order_items(&self) -> Vec<OrderItemInput> {
        self.lines.iter().map(OrderLine::as_input).collect()
    }

    /// Sum of the freshly priced line totals.
    #[must_use]
    pub fn total(&self) -> Price {
        self.lines.iter().map(|line| line.line_total).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Identity of a selection: which lines, which variants, how many of each.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectionKey(Vec<(CartItemId, ProductId, ColorId, SizeId, u32)>);

impl SelectionKey {
    /// Key for a set of cart lines, independent of their order.
    #[must_use]
    pub fn from_items(items: &[CartItem]) -> Self {
        let mut entries: Vec<_> = items
            .iter()
            .map(|item| {
                (
                    item.id,
                    item.product.id,
                    item.color.id,
                    item.size.id,
                    item.quantity,
                )
            })
            .collect();
        entries.sort_unstable();
        Self(entries)
    }
}

/// Resolves selections against the commerce API, caching each result for a
/// fixed time-to-live.
pub struct VariantResolver {
    api: Arc<dyn CommerceApi>,
    cache: Cache<SelectionKey, Arc<ResolvedLines>>,
}

impl VariantResolver {
    #[must_use]
    pub fn new(api: Arc<dyn CommerceApi>, ttl: Duration) -> Self {
        Self {
            api,
            cache: Cache::builder()
                .max_capacity(MAX_CACHED_SELECTIONS)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Priced lines for `items`.
    ///
    /// The same selection resolved again within the time-to-live returns the
    /// cached result without remote calls. Concurrent resolutions of the same
    /// selection share one set of calls.
    #[instrument(skip_all, fields(items = items.len()))]
    pub async fn resolve(&self, items: &[CartItem]) -> Arc<ResolvedLines> {
        if items.is_empty() {
            return Arc::default();
        }

        let key = SelectionKey::from_items(items);
        let api = self.api.as_ref();
        self.cache
            .get_with(key, async move { Arc::new(resolve_lines(api, items).await) })
            .await
    }

    /// Drop every cached selection.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

async fn resolve_lines(api: &dyn CommerceApi, items: &[CartItem]) -> ResolvedLines {
    let product_ids: BTreeSet<ProductId> = items.iter().map(|item| item.product.id).collect();

    let details: HashMap<ProductId, (String, Option<String>)> =
        join_all(product_ids.into_iter().map(|id| async move {
            (id, api.fetch_product(id).await)
        }))
        .await
        .into_iter()
        .filter_map(|(id, result)| match result {
            Ok(product) => Some((id, (product.name, product.main_image))),
            Err(e) => {
                warn!(product_id = %id, error = %e, "Product details unavailable, using cart data");
                None
            }
        })
        .collect();

    let details = &details;
    let outcomes = join_all(items.iter().map(|item| async move {
        let lookup = api
            .fetch_variant(item.product.id, item.color.id, item.size.id)
            .await;
        price_line(item, details.get(&item.product.id), lookup)
    }))
    .await;

    let mut resolved = ResolvedLines::default();
    for outcome in outcomes {
        match outcome {
            Ok(line) => resolved.lines.push(line),
            Err(item) => resolved.unavailable.push(item),
        }
    }

    debug!(
        lines = resolved.lines.len(),
        unavailable = resolved.unavailable.len(),
        "Selection resolved"
    );
    resolved
}

fn price_line(
    item: &CartItem,
    details: Option<&(String, Option<String>)>,
    lookup: Result<ProductVariant, ApiError>,
) -> Result<OrderLine, UnavailableItem> {
    let (name, image) = details.cloned().unwrap_or_else(|| {
        (item.product.name.clone(), item.product.image.clone())
    });

    let unavailable = |reason: String| UnavailableItem {
        cart_item_id: item.id,
        product_id: item.product.id,
        name: name.clone(),
        reason,
    };

    let variant = match lookup {
        Ok(variant) if variant.available => variant,
        Ok(_) => return Err(unavailable("This variant is no longer sold".to_string())),
        Err(e) => {
            warn!(cart_item_id = %item.id, error = %e, "Variant lookup failed");
            return Err(unavailable(e.user_message()));
        }
    };

    Ok(OrderLine {
        cart_item_id: item.id,
        product_id: item.product.id,
        variant_id: variant.id,
        name,
        image,
        color: variant.color.name,
        size: variant.size.name,
        quantity: item.quantity,
        unit_price: variant.price,
        line_total: variant.price.times(item.quantity),
    })
}
