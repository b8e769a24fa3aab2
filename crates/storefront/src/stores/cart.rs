//! Cart store.
//!
//! Caches the customer's cart lines and which of them are checked for
//! checkout. Prices here are the ones returned by the last cart fetch; order
//! pricing re-resolves every line (see [`crate::pricing::variants`]).

use std::collections::BTreeSet;
use std::sync::Arc;

use adam_store_core::{CartItemId, ColorId, LoadStatus, Price, ProductId, SizeId, UserId};
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use crate::api::{ApiError, CartItem, CartItemUpdate, CommerceApi, NewCartItem, PageRequest};

/// Largest cart page requested in one call.
const CART_PAGE_SIZE: u32 = 100;

/// Newest lines first.
const CART_SORT: &str = "createdAt,desc";

/// Errors from cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// The remote call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Quantities must be at least one.
    #[error("Quantity must be at least 1")]
    InvalidQuantity,

    /// The line is not in the cart.
    #[error("Cart item {0} is not in your cart")]
    UnknownItem(CartItemId),

    /// The cart has not been loaded for any customer yet.
    #[error("Cart has not been loaded")]
    NotLoaded,

    /// Some deletes of a bulk clear failed; the cart was re-synced.
    #[error("Could not remove {failed} of {total} cart items")]
    PartialClear { failed: usize, total: usize },
}

impl CartError {
    /// Message suitable for showing to a shopper.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Api(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

/// Snapshot of the cart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CartState {
    pub status: LoadStatus,
    /// Owner of the loaded lines.
    pub user_id: Option<UserId>,
    pub items: Vec<CartItem>,
    /// Lines checked for checkout.
    pub selected: BTreeSet<CartItemId>,
    /// Last fetch failure, shown to the shopper.
    pub error: Option<String>,
}

impl CartState {
    /// Lines checked for checkout, in cart order.
    #[must_use]
    pub fn selected_items(&self) -> Vec<CartItem> {
        self.items
            .iter()
            .filter(|item| self.selected.contains(&item.id))
            .cloned()
            .collect()
    }

    /// Sum of cached unit price × quantity over the selected lines.
    #[must_use]
    pub fn selected_total_price(&self) -> Price {
        self.items
            .iter()
            .filter(|item| self.selected.contains(&item.id))
            .map(CartItem::line_total)
            .sum()
    }

    fn contains(&self, id: CartItemId) -> bool {
        self.items.iter().any(|item| item.id == id)
    }

    fn upsert(&mut self, item: CartItem) {
        match self.items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => *existing = item,
            None => self.items.insert(0, item),
        }
    }

    fn remove(&mut self, id: CartItemId) {
        self.items.retain(|item| item.id != id);
        self.selected.remove(&id);
    }

    fn replace_items(&mut self, items: Vec<CartItem>) {
        self.selected
            .retain(|id| items.iter().any(|item| item.id == *id));
        self.items = items;
    }
}

/// Cart lines for one customer.
pub struct CartStore {
    api: Arc<dyn CommerceApi>,
    state: watch::Sender<CartState>,
}

impl CartStore {
    /// An empty, idle cart.
    #[must_use]
    pub fn new(api: Arc<dyn CommerceApi>) -> Self {
        Self {
            api,
            state: watch::Sender::new(CartState::default()),
        }
    }

    /// Current cart state.
    #[must_use]
    pub fn snapshot(&self) -> CartState {
        self.state.borrow().clone()
    }

    /// Be notified of every change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CartState> {
        self.state.subscribe()
    }

    /// Lines checked for checkout.
    #[must_use]
    pub fn selected_items(&self) -> Vec<CartItem> {
        self.state.borrow().selected_items()
    }

    /// Cached total of the checked lines.
    #[must_use]
    pub fn selected_total_price(&self) -> Price {
        self.state.borrow().selected_total_price()
    }

    /// Load the cart for `user_id`.
    ///
    /// Does nothing when the cart is already loading or loaded for that user.
    ///
    /// # Errors
    ///
    /// Returns the API error when the fetch fails; the store is then in the
    /// `Error` state with no lines.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn fetch_cart(&self, user_id: UserId) -> Result<(), CartError> {
        let claimed = self.state.send_if_modified(|state| {
            if state.user_id == Some(user_id) && state.status.is_settled_or_pending() {
                return false;
            }
            if state.user_id != Some(user_id) {
                *state = CartState::default();
            }
            state.user_id = Some(user_id);
            state.status = LoadStatus::Loading;
            state.error = None;
            true
        });

        if !claimed {
            debug!("Cart already loaded or loading");
            return Ok(());
        }

        self.load(user_id).await
    }

    /// Fetch unconditionally and apply the result.
    async fn load(&self, user_id: UserId) -> Result<(), CartError> {
        let page = PageRequest::first(CART_PAGE_SIZE).sorted_by(CART_SORT);

        match self.api.fetch_cart_items(user_id, page).await {
            Ok(page) => {
                debug!(items = page.items.len(), "Cart loaded");
                self.state.send_if_modified(|state| {
                    if state.user_id != Some(user_id) {
                        return false;
                    }
                    state.replace_items(page.items);
                    state.status = LoadStatus::Ready;
                    state.error = None;
                    true
                });
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch cart");
                let message = e.user_message();
                self.state.send_if_modified(|state| {
                    if state.user_id != Some(user_id) {
                        return false;
                    }
                    state.items.clear();
                    state.selected.clear();
                    state.status = LoadStatus::Error;
                    state.error = Some(message);
                    true
                });
                Err(e.into())
            }
        }
    }

    /// Add a variant to the cart. The new line is checked for checkout.
    ///
    /// # Errors
    ///
    /// Rejects a zero quantity before calling the API, and fails when no cart
    /// has been loaded or the remote add fails.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn add_item(
        &self,
        product_id: ProductId,
        color_id: ColorId,
        size_id: SizeId,
        quantity: u32,
    ) -> Result<CartItem, CartError> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity);
        }
        let user_id = self.state.borrow().user_id.ok_or(CartError::NotLoaded)?;

        let item = self
            .api
            .add_cart_item(NewCartItem {
                user_id,
                product_id,
                color_id,
                size_id,
                quantity,
            })
            .await?;

        self.state.send_modify(|state| {
            state.selected.insert(item.id);
            state.upsert(item.clone());
        });
        Ok(item)
    }

    /// Change quantity, color or size of a line.
    ///
    /// # Errors
    ///
    /// Rejects a zero quantity or an unknown line before calling the API, and
    /// fails when the remote update fails.
    #[instrument(skip(self, update), fields(cart_item_id = %id))]
    pub async fn update_item(
        &self,
        id: CartItemId,
        update: CartItemUpdate,
    ) -> Result<CartItem, CartError> {
        if update.quantity == Some(0) {
            return Err(CartError::InvalidQuantity);
        }
        if !self.state.borrow().contains(id) {
            return Err(CartError::UnknownItem(id));
        }

        let item = self.api.update_cart_item(id, update).await?;
        self.state.send_modify(|state| state.upsert(item.clone()));
        Ok(item)
    }

    /// Delete a line.
    ///
    /// # Errors
    ///
    /// Fails for unknown lines and when the remote delete fails; the line is
    /// kept locally in that case.
    #[instrument(skip(self), fields(cart_item_id = %id))]
    pub async fn remove_item(&self, id: CartItemId) -> Result<(), CartError> {
        if !self.state.borrow().contains(id) {
            return Err(CartError::UnknownItem(id));
        }

        self.api.delete_cart_item(id).await?;
        self.state.send_modify(|state| state.remove(id));
        Ok(())
    }

    /// Delete every line.
    ///
    /// All deletes are issued concurrently. When every delete succeeds the
    /// cart is emptied. Otherwise the lines known to be gone are dropped, the
    /// cart is re-fetched to match the server, and
    /// [`CartError::PartialClear`] reports how many deletes failed. Nothing is
    /// rolled back.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::PartialClear`] when at least one delete failed.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self) -> Result<(), CartError> {
        let (user_id, ids): (Option<UserId>, Vec<CartItemId>) = {
            let state = self.state.borrow();
            (state.user_id, state.items.iter().map(|item| item.id).collect())
        };
        if ids.is_empty() {
            return Ok(());
        }

        let api = &self.api;
        let results = join_all(
            ids.iter()
                .map(|&id| async move { (id, api.delete_cart_item(id).await) }),
        )
        .await;

        let mut deleted = Vec::with_capacity(ids.len());
        let mut failed = 0;
        for (id, result) in results {
            match result {
                Ok(()) => deleted.push(id),
                Err(e) => {
                    warn!(cart_item_id = %id, error = %e, "Failed to delete cart item");
                    failed += 1;
                }
            }
        }

        self.state.send_modify(|state| {
            for id in &deleted {
                state.remove(*id);
            }
        });

        if failed == 0 {
            debug!(items = ids.len(), "Cart cleared");
            return Ok(());
        }

        if let Some(user_id) = user_id {
            self.state.send_modify(|state| state.status = LoadStatus::Loading);
            if let Err(e) = self.load(user_id).await {
                warn!(error = %e, "Cart re-sync after partial clear failed");
            }
        }

        Err(CartError::PartialClear {
            failed,
            total: ids.len(),
        })
    }

    /// Check or uncheck a line for checkout.
    ///
    /// # Errors
    ///
    /// Fails for unknown lines.
    pub fn set_selected(&self, id: CartItemId, selected: bool) -> Result<(), CartError> {
        let mut known = true;
        self.state.send_if_modified(|state| {
            if !state.contains(id) {
                known = false;
                return false;
            }
            if selected {
                state.selected.insert(id)
            } else {
                state.selected.remove(&id)
            }
        });

        if known {
            Ok(())
        } else {
            Err(CartError::UnknownItem(id))
        }
    }

    /// Check or uncheck every line.
    pub fn select_all(&self, selected: bool) {
        self.state.send_if_modified(|state| {
            let next: BTreeSet<CartItemId> = if selected {
                state.items.iter().map(|item| item.id).collect()
            } else {
                BTreeSet::new()
            };
            if next == state.selected {
                return false;
            }
            state.selected = next;
            true
        });
    }

    /// Forget the loaded cart so the next [`fetch_cart`](Self::fetch_cart)
    /// goes to the server.
    pub fn invalidate(&self) {
        self.state.send_replace(CartState::default());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::{FakeCommerceApi, fixtures};

    const USER: i64 = 11;

    fn seeded() -> Arc<FakeCommerceApi> {
        let fake = Arc::new(FakeCommerceApi::new());
        fake.add_product(fixtures::product(3, "Linen Shirt", 250_000, &[(1, 2), (1, 3)]));
        fake.add_to_cart(fixtures::cart_item(7, USER, (3, 1, 2), 2, 250_000));
        fake.add_to_cart(fixtures::cart_item(8, USER, (3, 1, 3), 1, 240_000));
        fake
    }

    fn store(fake: &Arc<FakeCommerceApi>) -> CartStore {
        CartStore::new(Arc::clone(fake) as Arc<dyn CommerceApi>)
    }

    #[tokio::test]
    async fn test_fetch_cart_is_idempotent() {
        let fake = seeded();
        let cart = store(&fake);

        cart.fetch_cart(UserId::new(USER)).await.unwrap();
        cart.fetch_cart(UserId::new(USER)).await.unwrap();

        assert_eq!(fake.calls("fetch_cart_items"), 1);
        let state = cart.snapshot();
        assert_eq!(state.status, LoadStatus::Ready);
        assert_eq!(state.items.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_fetch_issues_one_call() {
        let fake = seeded();
        fake.set_cart_fetch_delay(std::time::Duration::from_millis(20));
        let cart = store(&fake);

        let (a, b) = tokio::join!(
            cart.fetch_cart(UserId::new(USER)),
            cart.fetch_cart(UserId::new(USER))
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(fake.calls("fetch_cart_items"), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_empty_error_state() {
        let fake = seeded();
        fake.fail_cart_fetch(true);
        let cart = store(&fake);

        let err = cart.fetch_cart(UserId::new(USER)).await.unwrap_err();
        assert!(matches!(err, CartError::Api(_)));

        let state = cart.snapshot();
        assert_eq!(state.status, LoadStatus::Error);
        assert!(state.items.is_empty());
        assert!(state.error.is_some());

        // An errored cart may be fetched again
        fake.fail_cart_fetch(false);
        cart.fetch_cart(UserId::new(USER)).await.unwrap();
        assert_eq!(cart.snapshot().items.len(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let fake = seeded();
        let cart = store(&fake);

        cart.fetch_cart(UserId::new(USER)).await.unwrap();
        cart.invalidate();
        assert_eq!(cart.snapshot().status, LoadStatus::Idle);

        cart.fetch_cart(UserId::new(USER)).await.unwrap();
        assert_eq!(fake.calls("fetch_cart_items"), 2);
    }

    #[tokio::test]
    async fn test_selected_total_uses_cached_prices() {
        let fake = seeded();
        let cart = store(&fake);
        cart.fetch_cart(UserId::new(USER)).await.unwrap();

        assert_eq!(cart.selected_total_price(), Price::ZERO);

        cart.select_all(true);
        assert_eq!(cart.selected_total_price(), Price::from_dong(740_000));

        cart.set_selected(CartItemId::new(8), false).unwrap();
        assert_eq!(cart.selected_items().len(), 1);
        assert_eq!(cart.selected_total_price(), Price::from_dong(500_000));
    }

    #[tokio::test]
    async fn test_set_selected_rejects_unknown_item() {
        let fake = seeded();
        let cart = store(&fake);
        cart.fetch_cart(UserId::new(USER)).await.unwrap();

        let err = cart.set_selected(CartItemId::new(99), true).unwrap_err();
        assert!(matches!(err, CartError::UnknownItem(id) if id == CartItemId::new(99)));
    }

    #[tokio::test]
    async fn test_add_item_validates_quantity_locally() {
        let fake = seeded();
        let cart = store(&fake);
        cart.fetch_cart(UserId::new(USER)).await.unwrap();

        let err = cart
            .add_item(ProductId::new(3), ColorId::new(1), SizeId::new(2), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::InvalidQuantity));
        assert_eq!(fake.calls("add_cart_item"), 0);
    }

    #[tokio::test]
    async fn test_add_item_requires_loaded_cart() {
        let fake = seeded();
        let cart = store(&fake);

        let err = cart
            .add_item(ProductId::new(3), ColorId::new(1), SizeId::new(2), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::NotLoaded));
    }

    #[tokio::test]
    async fn test_add_item_appends_and_selects() {
        let fake = seeded();
        let cart = store(&fake);
        cart.fetch_cart(UserId::new(USER)).await.unwrap();

        let item = cart
            .add_item(ProductId::new(3), ColorId::new(1), SizeId::new(3), 2)
            .await
            .unwrap();

        let state = cart.snapshot();
        assert_eq!(state.items.len(), 3);
        assert_eq!(state.items[0].id, item.id);
        assert!(state.selected.contains(&item.id));
    }

    #[tokio::test]
    async fn test_update_item_replaces_line() {
        let fake = seeded();
        let cart = store(&fake);
        cart.fetch_cart(UserId::new(USER)).await.unwrap();

        let update = CartItemUpdate {
            quantity: Some(5),
            ..CartItemUpdate::default()
        };
        cart.update_item(CartItemId::new(7), update).await.unwrap();

        let state = cart.snapshot();
        let line = state.items.iter().find(|i| i.id == CartItemId::new(7)).unwrap();
        assert_eq!(line.quantity, 5);

        let zero = CartItemUpdate {
            quantity: Some(0),
            ..CartItemUpdate::default()
        };
        let err = cart.update_item(CartItemId::new(7), zero).await.unwrap_err();
        assert!(matches!(err, CartError::InvalidQuantity));
        assert_eq!(fake.calls("update_cart_item"), 1);
    }

    #[tokio::test]
    async fn test_remove_item_deselects() {
        let fake = seeded();
        let cart = store(&fake);
        cart.fetch_cart(UserId::new(USER)).await.unwrap();
        cart.select_all(true);

        cart.remove_item(CartItemId::new(7)).await.unwrap();

        let state = cart.snapshot();
        assert_eq!(state.items.len(), 1);
        assert!(!state.selected.contains(&CartItemId::new(7)));
        assert_eq!(fake.cart_ids(), vec![CartItemId::new(8)]);
    }

    #[tokio::test]
    async fn test_failed_remove_keeps_line() {
        let fake = seeded();
        fake.fail_delete(CartItemId::new(7));
        let cart = store(&fake);
        cart.fetch_cart(UserId::new(USER)).await.unwrap();

        assert!(cart.remove_item(CartItemId::new(7)).await.is_err());
        assert_eq!(cart.snapshot().items.len(), 2);
    }

    #[tokio::test]
    async fn test_clear_cart_empties_store() {
        let fake = seeded();
        let cart = store(&fake);
        cart.fetch_cart(UserId::new(USER)).await.unwrap();
        cart.select_all(true);

        cart.clear_cart().await.unwrap();

        let state = cart.snapshot();
        assert!(state.items.is_empty());
        assert!(state.selected.is_empty());
        assert_eq!(fake.calls("delete_cart_item"), 2);
        assert!(fake.cart_ids().is_empty());
    }

    #[tokio::test]
    async fn test_partial_clear_resyncs_from_server() {
        let fake = seeded();
        fake.fail_delete(CartItemId::new(8));
        let cart = store(&fake);
        cart.fetch_cart(UserId::new(USER)).await.unwrap();

        let err = cart.clear_cart().await.unwrap_err();
        assert!(matches!(
            err,
            CartError::PartialClear {
                failed: 1,
                total: 2
            }
        ));

        // Compensating re-fetch reflects what the server still holds
        assert_eq!(fake.calls("fetch_cart_items"), 2);
        let state = cart.snapshot();
        assert_eq!(state.status, LoadStatus::Ready);
        assert_eq!(
            state.items.iter().map(|i| i.id).collect::<Vec<_>>(),
            vec![CartItemId::new(8)]
        );
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let fake = seeded();
        let cart = store(&fake);
        let mut rx = cart.subscribe();

        cart.fetch_cart(UserId::new(USER)).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().items.len(), 2);

        // Re-selecting an already empty selection is not a change
        cart.select_all(false);
        assert!(!rx.has_changed().unwrap());
    }
}
