//! Derived pricing pipeline.
//!
//! - [`variants`] - checked cart lines to freshly priced order lines
//! - [`shipping`] - debounced shipping fee for the current address and lines
//! - [`totals`] - subtotal, shipping, discount and grand total
//! - [`debounce`] - quiet-period scheduling with stale-result tickets

pub mod debounce;
pub mod shipping;
pub mod totals;
pub mod variants;

pub use debounce::{Debouncer, Ticket};
pub use shipping::{ShippingFeeCalculator, ShippingFeeState};
pub use totals::OrderTotals;
pub use variants::{OrderLine, ResolvedLines, SelectionKey, UnavailableItem, VariantResolver};
