//! Address store.
//!
//! Holds the shipping address chosen for checkout. The first load picks the
//! customer's default address (or the first one); after that the choice only
//! changes through [`AddressStore::select`].

use std::sync::Arc;

use adam_store_core::{AddressId, LoadStatus};
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use super::SelectionError;
use crate::api::{Address, ApiError, CommerceApi};

/// Snapshot of the address selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressState {
    pub status: LoadStatus,
    pub addresses: Vec<Address>,
    pub current: Option<Address>,
    pub error: Option<String>,
}

/// The default address, or the first one when none is flagged.
fn preferred(addresses: &[Address]) -> Option<Address> {
    addresses
        .iter()
        .find(|address| address.is_default)
        .or_else(|| addresses.first())
        .cloned()
}

/// Current shipping address for one customer.
pub struct AddressStore {
    api: Arc<dyn CommerceApi>,
    state: watch::Sender<AddressState>,
}

impl AddressStore {
    #[must_use]
    pub fn new(api: Arc<dyn CommerceApi>) -> Self {
        Self {
            api,
            state: watch::Sender::new(AddressState::default()),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> AddressState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AddressState> {
        self.state.subscribe()
    }

    /// The address orders ship to.
    #[must_use]
    pub fn current(&self) -> Option<Address> {
        self.state.borrow().current.clone()
    }

    /// Load addresses and pick the current one.
    ///
    /// Once a current address is set this does nothing; use
    /// [`refresh`](Self::refresh) to pick up edits made elsewhere.
    ///
    /// # Errors
    ///
    /// Returns the API error when the fetch fails.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<(), ApiError> {
        let claimed = self.state.send_if_modified(|state| {
            if state.current.is_some() || state.status == LoadStatus::Loading {
                return false;
            }
            state.status = LoadStatus::Loading;
            true
        });
        if !claimed {
            return Ok(());
        }

        self.fetch().await
    }

    /// Re-fetch the address list, keeping the current choice if it still exists.
    ///
    /// # Errors
    ///
    /// Returns the API error when the fetch fails.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<(), ApiError> {
        self.state
            .send_modify(|state| state.status = LoadStatus::Loading);
        self.fetch().await
    }

    async fn fetch(&self) -> Result<(), ApiError> {
        match self.api.fetch_my_addresses().await {
            Ok(addresses) => {
                debug!(count = addresses.len(), "Addresses loaded");
                self.state.send_modify(|state| {
                    let kept = state
                        .current
                        .as_ref()
                        .and_then(|current| addresses.iter().find(|a| a.id == current.id))
                        .cloned();
                    state.current = kept.or_else(|| preferred(&addresses));
                    state.addresses = addresses;
                    state.status = LoadStatus::Ready;
                    state.error = None;
                });
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch addresses");
                let message = e.user_message();
                self.state.send_modify(|state| {
                    state.status = LoadStatus::Error;
                    state.error = Some(message);
                });
                Err(e)
            }
        }
    }

    /// Override the current address.
    ///
    /// # Errors
    ///
    /// Fails when `id` is not one of the loaded addresses.
    pub fn select(&self, id: AddressId) -> Result<Address, SelectionError> {
        let mut chosen = None;
        self.state.send_if_modified(|state| {
            let Some(address) = state.addresses.iter().find(|a| a.id == id).cloned() else {
                return false;
            };
            chosen = Some(address.clone());
            if state.current.as_ref() == Some(&address) {
                return false;
            }
            state.current = Some(address);
            true
        });

        chosen.ok_or(SelectionError::UnknownAddress(id))
    }
}
