//! Promotion store.
//!
//! Holds at most one promotion for checkout, drawn from the promotions the
//! customer is eligible for. Eligibility and validity windows are checked by
//! the server when the order is created, not here.

use std::sync::Arc;

use adam_store_core::{LoadStatus, PromotionId};
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use super::SelectionError;
use crate::api::{ApiError, CommerceApi, PageRequest, Promotion};

const PROMOTION_PAGE_SIZE: u32 = 20;

/// Snapshot of the promotion selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromotionState {
    pub status: LoadStatus,
    pub promotions: Vec<Promotion>,
    pub selected: Option<Promotion>,
    /// Set once the shopper picks (or clears) a promotion themselves.
    pub user_chose: bool,
    pub error: Option<String>,
}

/// Selected promotion for one customer.
pub struct PromotionStore {
    api: Arc<dyn CommerceApi>,
    state: watch::Sender<PromotionState>,
}

impl PromotionStore {
    #[must_use]
    pub fn new(api: Arc<dyn CommerceApi>) -> Self {
        Self {
            api,
            state: watch::Sender::new(PromotionState::default()),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> PromotionState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PromotionState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn selected(&self) -> Option<Promotion> {
        self.state.borrow().selected.clone()
    }

    /// Fetch eligible promotions.
    ///
    /// Unless the shopper has made a choice, the first promotion becomes the
    /// selection.
    ///
    /// # Errors
    ///
    /// Returns the API error when the fetch fails.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<(), ApiError> {
        self.state
            .send_modify(|state| state.status = LoadStatus::Loading);

        match self
            .api
            .fetch_my_promotions(PageRequest::first(PROMOTION_PAGE_SIZE))
            .await
        {
            Ok(page) => {
                debug!(count = page.items.len(), "Promotions loaded");
                self.state.send_modify(|state| {
                    let still_offered = state
                        .selected
                        .as_ref()
                        .is_some_and(|s| page.items.iter().any(|p| p.id == s.id));

                    if !state.user_chose || (state.selected.is_some() && !still_offered) {
                        state.selected = page.items.first().cloned();
                        state.user_chose = false;
                    }
                    state.promotions = page.items;
                    state.status = LoadStatus::Ready;
                    state.error = None;
                });
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch promotions");
                let message = e.user_message();
                self.state.send_modify(|state| {
                    state.status = LoadStatus::Error;
                    state.error = Some(message);
                });
                Err(e)
            }
        }
    }

    /// Pick a promotion, or clear the selection with `None`.
    ///
    /// # Errors
    ///
    /// Fails when `id` is not one of the eligible promotions.
    pub fn select(&self, id: Option<PromotionId>) -> Result<Option<Promotion>, SelectionError> {
        let mut outcome = Ok(None);
        self.state.send_if_modified(|state| {
            let next = match id {
                None => None,
                Some(id) => match state.promotions.iter().find(|p| p.id == id) {
                    Some(promotion) => Some(promotion.clone()),
                    None => {
                        outcome = Err(SelectionError::UnknownPromotion(id));
                        return false;
                    }
                },
            };
            outcome = Ok(next.clone());
            let changed = state.selected != next || !state.user_chose;
            state.selected = next;
            state.user_chose = true;
            changed
        });
        outcome
    }
}
