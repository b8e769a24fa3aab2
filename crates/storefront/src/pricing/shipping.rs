//! Shipping fee derivation.
//!
//! The fee depends on the current address and the order lines. Input changes
//! are debounced so bursts of edits produce a single remote calculation, and
//! results for superseded inputs are discarded.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use adam_store_core::{AddressId, Price};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::debounce::Debouncer;
use crate::api::{Address, CommerceApi, OrderItemInput, ShippingFee, ShippingFeeRequest};

/// Current shipping fee and whether a calculation is pending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingFeeState {
    /// Fee total; zero when there is nothing to ship or the calculation failed.
    pub fee: Price,
    /// Breakdown of the last successful calculation.
    pub breakdown: Option<ShippingFee>,
    /// A calculation is scheduled or in flight.
    pub calculating: bool,
    /// Why the last calculation failed.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ShippingInput {
    address_id: AddressId,
    items: Vec<OrderItemInput>,
}

/// Derives the shipping fee from an address and a set of order lines.
pub struct ShippingFeeCalculator {
    api: Arc<dyn CommerceApi>,
    debouncer: Debouncer,
    state: Arc<watch::Sender<ShippingFeeState>>,
    last_input: Mutex<Option<ShippingInput>>,
}

impl ShippingFeeCalculator {
    #[must_use]
    pub fn new(api: Arc<dyn CommerceApi>, delay: Duration) -> Self {
        Self {
            api,
            debouncer: Debouncer::new(delay),
            state: Arc::new(watch::Sender::new(ShippingFeeState::default())),
            last_input: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> ShippingFeeState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ShippingFeeState> {
        self.state.subscribe()
    }

    /// Wait until no calculation is pending and return the settled state.
    pub async fn settled(&self) -> ShippingFeeState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|state| !state.calculating).await {
            Ok(state) => state.clone(),
            Err(_) => self.snapshot(),
        }
    }

    /// Feed the current address and order lines.
    ///
    /// With no address or no lines the fee is zero immediately and any
    /// pending calculation is dropped. Otherwise a calculation is scheduled
    /// after the quiet period, unless the input is unchanged since the last
    /// call. Must be called from within a Tokio runtime.
    pub fn update(&self, address: Option<&Address>, items: Vec<OrderItemInput>) {
        let mut last_input = self
            .last_input
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let Some(address) = address.filter(|_| !items.is_empty()) else {
            *last_input = None;
            self.state.send_if_modified(|state| {
                self.debouncer.cancel();
                let idle = ShippingFeeState::default();
                if *state == idle {
                    return false;
                }
                *state = idle;
                true
            });
            return;
        };

        let mut items = items;
        items.sort_unstable();
        let input = ShippingInput {
            address_id: address.id,
            items,
        };
        if last_input.as_ref() == Some(&input) {
            return;
        }
        *last_input = Some(input.clone());

        let api = Arc::clone(&self.api);
        let state = Arc::clone(&self.state);

        // The generation bump happens under the state lock, so a late result
        // can never clear `calculating` for a newer input.
        self.state.send_modify(|current| {
            current.calculating = true;
            self.debouncer.trigger(move |ticket| async move {
                let request = ShippingFeeRequest {
                    address_id: input.address_id,
                    order_items: input.items,
                };
                let result = api.calculate_shipping_fee(request).await;

                state.send_if_modified(|current| {
                    if !ticket.is_current() {
                        debug!(
                            generation = ticket.generation(),
                            "Discarding superseded shipping fee"
                        );
                        return false;
                    }
                    *current = match result {
                        Ok(fee) => ShippingFeeState {
                            fee: fee.total,
                            breakdown: Some(fee),
                            calculating: false,
                            error: None,
                        },
                        Err(e) => {
                            warn!(error = %e, "Shipping fee calculation failed");
                            ShippingFeeState {
                                error: Some(e.user_message()),
                                ..ShippingFeeState::default()
                            }
                        }
                    };
                    true
                });
            });
        });
    }
}
