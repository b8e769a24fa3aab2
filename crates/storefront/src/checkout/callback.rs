//! VNPay return reconciliation.
//!
//! After paying off-site the shopper lands back on the storefront with
//! `?orderId=...&vnp_ResponseCode=...`. The query is parsed once into a
//! [`PaymentCallback`], which is consumed by [`PaymentCallback::reconcile`]
//! to produce the dialog to show. The dialog is informational only; the
//! order's canonical payment state stays with the commerce API.

use axum::http::Uri;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::api::{CommerceApi, PaymentVerificationRequest};

/// Gateway response code for an approved payment.
pub const SUCCESS_CODE: &str = "00";

/// Raw query parameters of a gateway return.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackQuery {
    #[serde(rename = "orderId")]
    pub order_id: Option<String>,
    #[serde(rename = "vnp_ResponseCode")]
    pub response_code: Option<String>,
}

/// A gateway return waiting to be reconciled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentCallback {
    order_id: String,
    response_code: String,
}

impl PaymentCallback {
    /// Parse a callback from query parameters.
    ///
    /// Returns `None` when either parameter is missing or blank, which is a
    /// normal landing rather than a gateway return.
    #[must_use]
    pub fn from_query(query: &CallbackQuery) -> Option<Self> {
        let order_id = query.order_id.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let response_code = query
            .response_code
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())?;

        Some(Self {
            order_id: order_id.to_string(),
            response_code: response_code.to_string(),
        })
    }

    /// Parse a callback from a request URI.
    #[must_use]
    pub fn from_uri(uri: &Uri) -> Option<Self> {
        let query = uri.query()?;
        let mut parsed = CallbackQuery::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "orderId" => parsed.order_id = Some(value.into_owned()),
                "vnp_ResponseCode" => parsed.response_code = Some(value.into_owned()),
                _ => {}
            }
        }
        Self::from_query(&parsed)
    }

    #[must_use]
    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    #[must_use]
    pub fn response_code(&self) -> &str {
        &self.response_code
    }

    /// Verify the return with the commerce API and decide what to show.
    ///
    /// Success requires both a successful verification call and the
    /// [`SUCCESS_CODE`]. A failed verification call shows failure.
    #[instrument(skip(self, api), fields(order_id = %self.order_id, code = %self.response_code))]
    pub async fn reconcile(self, api: &dyn CommerceApi) -> PaymentDialog {
        let verification = api
            .verify_payment_callback(PaymentVerificationRequest {
                order_id: self.order_id.clone(),
                response_code: self.response_code.clone(),
            })
            .await;

        let outcome = match verification {
            Ok(_) if self.response_code == SUCCESS_CODE => PaymentOutcome::Success,
            Ok(_) => PaymentOutcome::Failure,
            Err(e) => {
                warn!(error = %e, "Payment verification failed, showing failure");
                PaymentOutcome::Failure
            }
        };
        info!(outcome = ?outcome, "Payment callback reconciled");

        PaymentDialog {
            order_id: self.order_id,
            outcome,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Success,
    Failure,
}

/// What the shopper sees after returning from the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDialog {
    pub order_id: String,
    pub outcome: PaymentOutcome,
}

impl PaymentDialog {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == PaymentOutcome::Success
    }

    /// Where closing the dialog leads: the same route without its query.
    #[must_use]
    pub fn dismiss_location(uri: &Uri) -> String {
        uri.path().to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::FakeCommerceApi;

    fn callback(uri: &str) -> Option<PaymentCallback> {
        PaymentCallback::from_uri(&uri.parse::<Uri>().unwrap())
    }

    #[test]
    fn test_parses_both_parameters() {
        let parsed = callback("/checkout/payment-callback?orderId=123&vnp_ResponseCode=00").unwrap();
        assert_eq!(parsed.order_id(), "123");
        assert_eq!(parsed.response_code(), "00");
    }

    #[test]
    fn test_missing_parameter_is_a_normal_landing() {
        assert!(callback("/checkout/payment-callback").is_none());
        assert!(callback("/checkout/payment-callback?orderId=123").is_none());
        assert!(callback("/checkout/payment-callback?vnp_ResponseCode=00").is_none());
        assert!(callback("/checkout/payment-callback?orderId=&vnp_ResponseCode=00").is_none());
    }

    #[test]
    fn test_from_query_struct() {
        let query: CallbackQuery =
            serde_json::from_str(r#"{"orderId": "77", "vnp_ResponseCode": "24"}"#).unwrap();
        let parsed = PaymentCallback::from_query(&query).unwrap();
        assert_eq!(parsed.order_id(), "77");
        assert_eq!(parsed.response_code(), "24");
    }

    #[tokio::test]
    async fn test_success_code_shows_success() {
        let fake = Arc::new(FakeCommerceApi::new());
        let parsed = callback("/?orderId=123&vnp_ResponseCode=00").unwrap();

        let dialog = parsed.reconcile(fake.as_ref()).await;

        assert!(dialog.is_success());
        assert_eq!(dialog.order_id, "123");
        let sent = &fake.verification_requests()[0];
        assert_eq!(sent.order_id, "123");
        assert_eq!(sent.response_code, "00");
    }

    #[tokio::test]
    async fn test_other_code_shows_failure() {
        let fake = Arc::new(FakeCommerceApi::new());
        let parsed = callback("/?orderId=123&vnp_ResponseCode=24").unwrap();

        let dialog = parsed.reconcile(fake.as_ref()).await;

        assert_eq!(dialog.outcome, PaymentOutcome::Failure);
        assert_eq!(dialog.order_id, "123");
    }

    #[tokio::test]
    async fn test_verification_error_fails_closed() {
        let fake = Arc::new(FakeCommerceApi::new());
        fake.fail_verification(true);
        let parsed = callback("/?orderId=123&vnp_ResponseCode=00").unwrap();

        let dialog = parsed.reconcile(fake.as_ref()).await;

        assert_eq!(dialog.outcome, PaymentOutcome::Failure);
        assert_eq!(dialog.order_id, "123");
    }

    #[test]
    fn test_dismiss_drops_query() {
        let uri: Uri = "/checkout/payment-callback?orderId=123&vnp_ResponseCode=00"
            .parse()
            .unwrap();
        assert_eq!(PaymentDialog::dismiss_location(&uri), "/checkout/payment-callback");
    }
}
