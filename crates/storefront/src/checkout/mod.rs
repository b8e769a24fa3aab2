//! Checkout submission and payment callback reconciliation.
//!
//! [`CheckoutFlow`] validates a submission locally, creates the order and
//! reports whether the shopper is done (cash on delivery) or must be sent to
//! the payment gateway. Gateway returns are handled by
//! [`callback::PaymentCallback`]. [`session::CheckoutSession`] wires the
//! stores, the pricing pipeline and the flow together for one customer.

pub mod callback;
pub mod session;

pub use callback::{CallbackQuery, PaymentCallback, PaymentDialog, PaymentOutcome};
pub use session::{CheckoutSession, CheckoutSessions, CheckoutSummary};

use std::sync::Arc;

use adam_store_core::{AddressId, OrderId, PaymentMethod, PromotionId};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::api::{ApiError, CommerceApi, CreateOrderRequest, Order, OrderItemInput};
use crate::pricing::OrderTotals;

/// Errors from submitting an order.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// An order is already being submitted.
    #[error("Your order is already being submitted")]
    AlreadySubmitting,

    #[error("Please choose a shipping address")]
    MissingAddress,

    #[error("There are no items to order")]
    NoLines,

    /// The shipping fee has not settled yet.
    #[error("The order total is still being calculated")]
    StillCalculating,

    #[error("Please choose a payment method")]
    NoPaymentMethod,

    #[error("Payment method {0} is not available")]
    MethodUnavailable(PaymentMethod),

    /// A gateway order came back without a payment URL.
    #[error("Order {0} has no payment link, please contact support")]
    MissingPaymentUrl(OrderId),

    /// Order creation failed.
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl CheckoutError {
    /// Message suitable for showing to a shopper.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Api(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

/// Everything needed to create an order.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub address_id: Option<AddressId>,
    pub lines: Vec<OrderItemInput>,
    pub promotion_id: Option<PromotionId>,
    pub payment_method: Option<PaymentMethod>,
    pub totals: OrderTotals,
}

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum CheckoutOutcome {
    /// Cash on delivery: the order is placed, nothing more to do.
    Placed(Order),
    /// Gateway payment: send the shopper to `payment_url`.
    RedirectToGateway { order_id: OrderId, payment_url: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutPhase {
    #[default]
    Idle,
    Submitting,
}

/// Observable state of the flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutState {
    pub phase: CheckoutPhase,
    /// Message of the last failed submission.
    pub error: Option<String>,
    pub last_order: Option<OrderId>,
}

/// Order submission state machine: `Idle -> Submitting -> Idle`.
pub struct CheckoutFlow {
    api: Arc<dyn CommerceApi>,
    available: Vec<PaymentMethod>,
    state: watch::Sender<CheckoutState>,
}

impl CheckoutFlow {
    #[must_use]
    pub fn new(api: Arc<dyn CommerceApi>, available: Vec<PaymentMethod>) -> Self {
        Self {
            api,
            available,
            state: watch::Sender::new(CheckoutState::default()),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> CheckoutState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CheckoutState> {
        self.state.subscribe()
    }

    /// Submit an order.
    ///
    /// Failures are recorded in the state and the flow returns to `Idle`;
    /// nothing is retried.
    ///
    /// # Errors
    ///
    /// [`CheckoutError::AlreadySubmitting`] while another submission is in
    /// progress, a validation error when the request is incomplete, or the
    /// API error when order creation fails.
    #[instrument(skip_all, fields(lines = request.lines.len()))]
    pub async fn submit(&self, request: CheckoutRequest) -> Result<CheckoutOutcome, CheckoutError> {
        let claimed = self.state.send_if_modified(|state| {
            if state.phase == CheckoutPhase::Submitting {
                return false;
            }
            state.phase = CheckoutPhase::Submitting;
            state.error = None;
            true
        });
        if !claimed {
            return Err(CheckoutError::AlreadySubmitting);
        }

        let result = self.place(request).await;

        self.state.send_modify(|state| {
            state.phase = CheckoutPhase::Idle;
            match &result {
                Ok(outcome) => state.last_order = Some(outcome.order_id()),
                Err(e) => state.error = Some(e.user_message()),
            }
        });
        result
    }

    async fn place(&self, request: CheckoutRequest) -> Result<CheckoutOutcome, CheckoutError> {
        let (address_id, payment_method) = self.validate(&request)?;

        let order = self
            .api
            .create_order(CreateOrderRequest {
                address_id,
                order_items: request.lines,
                promotion_id: request.promotion_id,
                payment_method,
            })
            .await
            .inspect_err(|e| warn!(error = %e, "Order creation failed"))?;

        info!(order_id = %order.id, method = %payment_method, "Order created");

        if !payment_method.is_gateway() {
            return Ok(CheckoutOutcome::Placed(order));
        }
        match order.payment_url {
            Some(payment_url) => Ok(CheckoutOutcome::RedirectToGateway {
                order_id: order.id,
                payment_url,
            }),
            None => Err(CheckoutError::MissingPaymentUrl(order.id)),
        }
    }

    fn validate(
        &self,
        request: &CheckoutRequest,
    ) -> Result<(AddressId, PaymentMethod), CheckoutError> {
        let address_id = request.address_id.ok_or(CheckoutError::MissingAddress)?;
        if request.lines.is_empty() {
            return Err(CheckoutError::NoLines);
        }
        if !request.totals.is_final() {
            return Err(CheckoutError::StillCalculating);
        }
        let method = request
            .payment_method
            .ok_or(CheckoutError::NoPaymentMethod)?;
        if !self.available.contains(&method) {
            return Err(CheckoutError::MethodUnavailable(method));
        }
        Ok((address_id, method))
    }
}

impl CheckoutOutcome {
    #[must_use]
    pub const fn order_id(&self) -> OrderId {
        match self {
            Self::Placed(order) => order.id,
            Self::RedirectToGateway { order_id, .. } => *order_id,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use adam_store_core::{Price, VariantId};

    use super::*;
    use crate::pricing::ShippingFeeState;
    use crate::testing::FakeCommerceApi;

    fn flow(fake: &Arc<FakeCommerceApi>) -> CheckoutFlow {
        CheckoutFlow::new(
            Arc::clone(fake) as Arc<dyn CommerceApi>,
            PaymentMethod::ALL.to_vec(),
        )
    }

    fn request(method: PaymentMethod) -> CheckoutRequest {
        let shipping = ShippingFeeState {
            fee: Price::from_dong(30_000),
            ..ShippingFeeState::default()
        };
        CheckoutRequest {
            address_id: Some(AddressId::new(1)),
            lines: vec![OrderItemInput {
                product_variant_id: VariantId::new(300),
                quantity: 2,
            }],
            promotion_id: Some(PromotionId::new(4)),
            payment_method: Some(method),
            totals: OrderTotals::compute(Price::from_dong(500_000), &shipping, None, 1),
        }
    }

    #[tokio::test]
    async fn test_cash_order_is_placed() {
        let fake = Arc::new(FakeCommerceApi::new());
        let flow = flow(&fake);

        let outcome = flow.submit(request(PaymentMethod::Cash)).await.unwrap();

        assert!(matches!(outcome, CheckoutOutcome::Placed(_)));
        let sent = &fake.order_requests()[0];
        assert_eq!(sent.address_id, AddressId::new(1));
        assert_eq!(sent.promotion_id, Some(PromotionId::new(4)));
        assert_eq!(sent.payment_method, PaymentMethod::Cash);

        let state = flow.snapshot();
        assert_eq!(state.phase, CheckoutPhase::Idle);
        assert_eq!(state.last_order, Some(outcome.order_id()));
    }

    #[tokio::test]
    async fn test_vnpay_order_redirects_to_gateway() {
        let fake = Arc::new(FakeCommerceApi::new());
        let flow = flow(&fake);

        let outcome = flow.submit(request(PaymentMethod::Vnpay)).await.unwrap();

        match outcome {
            CheckoutOutcome::RedirectToGateway { payment_url, .. } => {
                assert!(payment_url.starts_with("https://sandbox.vnpayment.vn/"));
            }
            other => panic!("expected gateway redirect, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_validation_happens_before_any_call() {
        let fake = Arc::new(FakeCommerceApi::new());
        let flow = flow(&fake);

        let mut no_address = request(PaymentMethod::Cash);
        no_address.address_id = None;
        assert!(matches!(
            flow.submit(no_address).await,
            Err(CheckoutError::MissingAddress)
        ));

        let mut no_lines = request(PaymentMethod::Cash);
        no_lines.lines.clear();
        assert!(matches!(
            flow.submit(no_lines).await,
            Err(CheckoutError::NoLines)
        ));

        let mut calculating = request(PaymentMethod::Cash);
        calculating.totals.calculating = true;
        assert!(matches!(
            flow.submit(calculating).await,
            Err(CheckoutError::StillCalculating)
        ));

        assert_eq!(fake.calls("create_order"), 0);
        assert_eq!(flow.snapshot().phase, CheckoutPhase::Idle);
    }

    #[tokio::test]
    async fn test_unavailable_method_is_rejected() {
        let fake = Arc::new(FakeCommerceApi::new());
        let flow = CheckoutFlow::new(
            Arc::clone(&fake) as Arc<dyn CommerceApi>,
            vec![PaymentMethod::Cash],
        );

        let err = flow.submit(request(PaymentMethod::Vnpay)).await.unwrap_err();

        assert!(matches!(err, CheckoutError::MethodUnavailable(PaymentMethod::Vnpay)));
        assert_eq!(fake.calls("create_order"), 0);
    }

    #[tokio::test]
    async fn test_failure_surfaces_message_and_returns_to_idle() {
        let fake = Arc::new(FakeCommerceApi::new());
        fake.fail_orders(Some("Promotion has expired"));
        let flow = flow(&fake);

        let err = flow.submit(request(PaymentMethod::Cash)).await.unwrap_err();

        assert_eq!(err.user_message(), "Promotion has expired");
        let state = flow.snapshot();
        assert_eq!(state.phase, CheckoutPhase::Idle);
        assert_eq!(state.error.as_deref(), Some("Promotion has expired"));
        assert_eq!(fake.calls("create_order"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_submission_is_rejected_while_submitting() {
        let fake = Arc::new(FakeCommerceApi::new());
        fake.set_order_delay(Duration::from_secs(2));
        let flow = flow(&fake);

        let (first, second) = tokio::join!(
            flow.submit(request(PaymentMethod::Cash)),
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                flow.submit(request(PaymentMethod::Cash)).await
            }
        );

        assert!(first.is_ok());
        assert!(matches!(second, Err(CheckoutError::AlreadySubmitting)));
        assert_eq!(fake.calls("create_order"), 1);
    }
}
