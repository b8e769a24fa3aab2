//! Order totals.

use adam_store_core::Price;
use serde::Serialize;

use super::shipping::ShippingFeeState;
use crate::api::Promotion;

/// Subtotal, shipping, discount and grand total for the checked lines.
///
/// `total = subtotal + shipping_fee - discount`. While the shipping fee is
/// still being calculated the totals are not final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTotals {
    pub subtotal: Price,
    pub shipping_fee: Price,
    pub discount: Price,
    pub total: Price,
    pub calculating: bool,
    pub item_count: usize,
}

impl OrderTotals {
    /// Combine the cart subtotal, the shipping state and the selected promotion.
    #[must_use]
    pub fn compute(
        subtotal: Price,
        shipping: &ShippingFeeState,
        promotion: Option<&Promotion>,
        item_count: usize,
    ) -> Self {
        let discount = promotion.map_or(Price::ZERO, |p| subtotal.percent(p.discount_percent));
        let total = subtotal + shipping.fee - discount;

        Self {
            subtotal,
            shipping_fee: shipping.fee,
            discount,
            total,
            calculating: shipping.calculating,
            item_count,
        }
    }

    /// No calculation that feeds the total is pending.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        !self.calculating
    }

    /// At least one line is checked for checkout.
    #[must_use]
    pub const fn can_checkout(&self) -> bool {
        self.item_count > 0
    }
}
