//! Payment-method store.
//!
//! The method is chosen from a fixed set restricted to what is configured as
//! available. The choice is persisted in the HTTP session as a
//! [`PaymentSelection`] so it survives reloads, but not other devices.

use adam_store_core::PaymentMethod;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::SelectionError;

/// Session-persisted payment method choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSelection {
    pub method: PaymentMethod,
}

/// Snapshot of the payment method selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentMethodState {
    pub available: Vec<PaymentMethod>,
    pub selected: Option<PaymentMethod>,
}

/// Selected payment method for one customer.
pub struct PaymentMethodStore {
    state: watch::Sender<PaymentMethodState>,
}

impl PaymentMethodStore {
    /// A store offering the given methods, in [`PaymentMethod::ALL`] order.
    ///
    /// The first available method is selected initially.
    #[must_use]
    pub fn new(configured: &[PaymentMethod]) -> Self {
        let available: Vec<PaymentMethod> = PaymentMethod::ALL
            .into_iter()
            .filter(|method| configured.contains(method))
            .collect();
        let selected = available.first().copied();

        Self {
            state: watch::Sender::new(PaymentMethodState {
                available,
                selected,
            }),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PaymentMethodState> {
        self.state.subscribe()
    }

    /// Methods the shopper may choose from.
    #[must_use]
    pub fn available(&self) -> Vec<PaymentMethod> {
        self.state.borrow().available.clone()
    }

    #[must_use]
    pub fn selected(&self) -> Option<PaymentMethod> {
        self.state.borrow().selected
    }

    /// Choose a method.
    ///
    /// # Errors
    ///
    /// Fails when the method is not available.
    pub fn select(&self, method: PaymentMethod) -> Result<(), SelectionError> {
        let mut available = true;
        self.state.send_if_modified(|state| {
            if !state.available.contains(&method) {
                available = false;
                return false;
            }
            let changed = state.selected != Some(method);
            state.selected = Some(method);
            changed
        });

        if available {
            Ok(())
        } else {
            Err(SelectionError::MethodUnavailable(method))
        }
    }

    /// Value to write to the session.
    #[must_use]
    pub fn snapshot(&self) -> Option<PaymentSelection> {
        self.selected().map(|method| PaymentSelection { method })
    }

    /// Re-apply a choice read from the session.
    ///
    /// Returns `false` when the stored method is no longer available; the
    /// current selection is kept in that case.
    pub fn restore(&self, selection: PaymentSelection) -> bool {
        self.select(selection.method).is_ok()
    }
}
