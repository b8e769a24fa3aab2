//! Per-customer checkout session.
//!
//! A [`CheckoutSession`] owns one customer's selection stores, the pricing
//! pipeline and the checkout flow. A background task re-runs the pipeline
//! whenever the cart or the address changes, so shipping fee calculations
//! start as soon as the selection does. [`CheckoutSessions`] keeps sessions
//! alive across requests.

use std::sync::Arc;
use std::time::Duration;

use adam_store_core::{PaymentMethod, UserId};
use moka::future::Cache;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, instrument};

use super::{CheckoutError, CheckoutFlow, CheckoutOutcome, CheckoutRequest};
use crate::api::{Address, CommerceApi, CommerceApiProvider, Promotion};
use crate::config::PricingConfig;
use crate::models::CurrentCustomer;
use crate::pricing::{
    OrderLine, OrderTotals, SelectionKey, ShippingFeeCalculator, UnavailableItem, VariantResolver,
};
use crate::stores::{AddressState, AddressStore, CartState, CartStore, PaymentMethodStore, PromotionStore};

/// Sessions idle for this long are dropped.
const SESSION_IDLE: Duration = Duration::from_secs(30 * 60);

/// Upper bound on live sessions.
const MAX_SESSIONS: u64 = 10_000;

/// Everything the checkout page shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSummary {
    pub lines: Vec<OrderLine>,
    pub unavailable: Vec<UnavailableItem>,
    pub address: Option<Address>,
    pub promotion: Option<Promotion>,
    pub payment_method: Option<PaymentMethod>,
    pub totals: OrderTotals,
    pub shipping_error: Option<String>,
}

/// One customer's stores, pricing pipeline and checkout flow.
pub struct CheckoutSession {
    user_id: UserId,
    api: Arc<dyn CommerceApi>,
    cart: CartStore,
    addresses: AddressStore,
    promotions: PromotionStore,
    payment: PaymentMethodStore,
    shipping: Arc<ShippingFeeCalculator>,
    variants: Arc<VariantResolver>,
    flow: CheckoutFlow,
    watcher: AbortHandle,
}

impl CheckoutSession {
    /// Create a session and start its pipeline task.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(api: Arc<dyn CommerceApi>, user_id: UserId, pricing: &PricingConfig) -> Self {
        let cart = CartStore::new(Arc::clone(&api));
        let addresses = AddressStore::new(Arc::clone(&api));
        let shipping = Arc::new(ShippingFeeCalculator::new(
            Arc::clone(&api),
            pricing.shipping_debounce,
        ));
        let variants = Arc::new(VariantResolver::new(
            Arc::clone(&api),
            pricing.variant_cache_ttl,
        ));

        let watcher = tokio::spawn(watch_selection(
            cart.subscribe(),
            addresses.subscribe(),
            Arc::clone(&variants),
            Arc::clone(&shipping),
        ))
        .abort_handle();

        Self {
            user_id,
            promotions: PromotionStore::new(Arc::clone(&api)),
            payment: PaymentMethodStore::new(&pricing.payment_methods),
            flow: CheckoutFlow::new(Arc::clone(&api), pricing.payment_methods.clone()),
            api,
            cart,
            addresses,
            shipping,
            variants,
            watcher,
        }
    }

    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.user_id
    }

    /// API handle authorized for this customer.
    #[must_use]
    pub fn api(&self) -> &dyn CommerceApi {
        self.api.as_ref()
    }

    #[must_use]
    pub const fn cart(&self) -> &CartStore {
        &self.cart
    }

    #[must_use]
    pub const fn addresses(&self) -> &AddressStore {
        &self.addresses
    }

    #[must_use]
    pub const fn promotions(&self) -> &PromotionStore {
        &self.promotions
    }

    #[must_use]
    pub const fn payment(&self) -> &PaymentMethodStore {
        &self.payment
    }

    #[must_use]
    pub fn shipping(&self) -> &ShippingFeeCalculator {
        &self.shipping
    }

    #[must_use]
    pub const fn flow(&self) -> &CheckoutFlow {
        &self.flow
    }

    /// Current lines, selections and totals.
    ///
    /// Resolves the checked lines and feeds the shipping calculator before
    /// reading totals, so the `calculating` flag reflects the current
    /// selection even if the background task has not caught up yet. Only a
    /// selection that is still current after the lookups reaches the
    /// calculator.
    #[instrument(skip(self), fields(user_id = %self.user_id))]
    pub async fn summary(&self) -> CheckoutSummary {
        let (cart, items, resolved) = loop {
            let cart = self.cart.snapshot();
            let items = cart.selected_items();
            let resolved = self.variants.resolve(&items).await;

            let latest = self.cart.snapshot().selected_items();
            if SelectionKey::from_items(&latest) == SelectionKey::from_items(&items) {
                break (cart, items, resolved);
            }
            debug!("Selection changed during variant lookup, resolving again");
        };
        let address = self.addresses.current();

        self.shipping
            .update(address.as_ref(), resolved.order_items());
        let shipping = self.shipping.snapshot();
        let promotion = self.promotions.selected();

        let totals = OrderTotals::compute(
            cart.selected_total_price(),
            &shipping,
            promotion.as_ref(),
            items.len(),
        );

        CheckoutSummary {
            lines: resolved.lines.clone(),
            unavailable: resolved.unavailable.clone(),
            address,
            promotion,
            payment_method: self.payment.selected(),
            totals,
            shipping_error: shipping.error,
        }
    }

    /// Summary once the shipping fee has settled.
    pub async fn settled_summary(&self) -> CheckoutSummary {
        let summary = self.summary().await;
        if summary.totals.is_final() {
            return summary;
        }
        self.shipping.settled().await;
        self.summary().await
    }

    /// Place an order for the current selection.
    ///
    /// On success the cart is invalidated so the next read re-fetches it.
    ///
    /// # Errors
    ///
    /// See [`CheckoutFlow::submit`].
    #[instrument(skip(self), fields(user_id = %self.user_id))]
    pub async fn submit(&self) -> Result<CheckoutOutcome, CheckoutError> {
        let summary = self.summary().await;
        let request = CheckoutRequest {
            address_id: summary.address.as_ref().map(|a| a.id),
            lines: summary.lines.iter().map(OrderLine::as_input).collect(),
            promotion_id: summary.promotion.as_ref().map(|p| p.id),
            payment_method: summary.payment_method,
            totals: summary.totals,
        };

        let outcome = self.flow.submit(request).await?;
        self.cart.invalidate();
        self.variants.invalidate_all();
        Ok(outcome)
    }
}

impl Drop for CheckoutSession {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

/// Re-run variant resolution and the shipping input whenever the cart or the
/// address changes. Ends when either store goes away.
async fn watch_selection(
    mut cart: watch::Receiver<CartState>,
    mut address: watch::Receiver<AddressState>,
    variants: Arc<VariantResolver>,
    shipping: Arc<ShippingFeeCalculator>,
) {
    loop {
        let items = cart.borrow_and_update().selected_items();
        let current = address.borrow_and_update().current.clone();

        let resolved = variants.resolve(&items).await;
        shipping.update(current.as_ref(), resolved.order_items());

        tokio::select! {
            changed = cart.changed() => if changed.is_err() { break },
            changed = address.changed() => if changed.is_err() { break },
        }
    }
    debug!("Selection watcher stopped");
}

// =============================================================================
// Registry
// =============================================================================

/// A session and the access token its API handle was built with.
#[derive(Clone)]
struct AuthorizedSession {
    access_token: SecretString,
    session: Arc<CheckoutSession>,
}

impl AuthorizedSession {
    fn is_for(&self, customer: &CurrentCustomer) -> bool {
        self.access_token.expose_secret() == customer.access_token
    }
}

/// Live checkout sessions keyed by customer.
///
/// A session is tied to the access token it was started with; a customer
/// arriving with a different token gets a fresh session.
pub struct CheckoutSessions {
    provider: Arc<dyn CommerceApiProvider>,
    pricing: PricingConfig,
    sessions: Cache<UserId, AuthorizedSession>,
}

impl CheckoutSessions {
    #[must_use]
    pub fn new(provider: Arc<dyn CommerceApiProvider>, pricing: PricingConfig) -> Self {
        Self {
            provider,
            pricing,
            sessions: Cache::builder()
                .max_capacity(MAX_SESSIONS)
                .time_to_idle(SESSION_IDLE)
                .build(),
        }
    }

    /// The customer's session, created on first use or when the customer's
    /// access token has changed.
    pub async fn for_customer(&self, customer: &CurrentCustomer) -> Arc<CheckoutSession> {
        let current = self
            .sessions
            .get_with(customer.id, async { self.start(customer) })
            .await;
        if current.is_for(customer) {
            return current.session;
        }

        debug!(user_id = %customer.id, "Access token changed, restarting checkout session");
        let fresh = self.start(customer);
        self.sessions.insert(customer.id, fresh.clone()).await;
        fresh.session
    }

    fn start(&self, customer: &CurrentCustomer) -> AuthorizedSession {
        debug!(user_id = %customer.id, "Starting checkout session");
        AuthorizedSession {
            access_token: SecretString::from(customer.access_token.clone()),
            session: Arc::new(CheckoutSession::new(
                self.provider.for_customer(customer),
                customer.id,
                &self.pricing,
            )),
        }
    }

    /// Drop the customer's session, e.g. on logout.
    pub async fn end(&self, user_id: UserId) {
        self.sessions.invalidate(&user_id).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use adam_store_core::{AddressId, Price};

    use super::*;
    use crate::testing::{FakeCommerceApi, FakeProvider, fixtures};

    const USER: i64 = 11;

    fn pricing() -> PricingConfig {
        PricingConfig {
            shipping_debounce: Duration::from_millis(500),
            variant_cache_ttl: Duration::from_secs(300),
            payment_methods: PaymentMethod::ALL.to_vec(),
        }
    }

    fn seeded() -> Arc<FakeCommerceApi> {
        let fake = Arc::new(FakeCommerceApi::new());
        fake.add_product(fixtures::product(3, "Linen Shirt", 250_000, &[(1, 2)]));
        fake.add_product(fixtures::product(4, "Chino Pants", 400_000, &[(2, 4)]));
        fake.add_to_cart(fixtures::cart_item(7, USER, (3, 1, 2), 2, 250_000));
        fake.add_to_cart(fixtures::cart_item(8, USER, (4, 2, 4), 1, 400_000));
        fake.add_address(fixtures::address(1, true));
        fake.add_promotion(fixtures::promotion(5, "WELCOME10", 10));
        fake.set_shipping_fee(AddressId::new(1), Price::from_dong(35_000));
        fake
    }

    async fn ready_session(fake: &Arc<FakeCommerceApi>) -> CheckoutSession {
        let session = CheckoutSession::new(
            Arc::clone(fake) as Arc<dyn CommerceApi>,
            UserId::new(USER),
            &pricing(),
        );
        session.cart().fetch_cart(UserId::new(USER)).await.unwrap();
        session.addresses().load().await.unwrap();
        session.promotions().load().await.unwrap();
        session
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_with_nothing_selected() {
        let fake = seeded();
        let session = ready_session(&fake).await;

        let summary = session.settled_summary().await;

        assert!(summary.lines.is_empty());
        assert_eq!(summary.totals.total, Price::ZERO);
        assert_eq!(summary.totals.shipping_fee, Price::ZERO);
        assert!(!summary.totals.can_checkout());
        assert_eq!(fake.calls("calculate_shipping_fee"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_change_triggers_one_shipping_call() {
        let fake = seeded();
        let session = ready_session(&fake).await;

        session.cart().select_all(true);
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.cart().set_selected(adam_store_core::CartItemId::new(8), false).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.cart().set_selected(adam_store_core::CartItemId::new(8), true).unwrap();

        let summary = session.settled_summary().await;

        assert_eq!(fake.calls("calculate_shipping_fee"), 1);
        assert_eq!(summary.totals.subtotal, Price::from_dong(900_000));
        assert_eq!(summary.totals.shipping_fee, Price::from_dong(35_000));
        assert_eq!(summary.totals.discount, Price::from_dong(90_000));
        assert_eq!(summary.totals.total, Price::from_dong(845_000));
        assert!(summary.totals.is_final());
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_ignores_selection_replaced_during_lookup() {
        let fake = seeded();
        fake.set_variant_delay(Duration::from_millis(200));
        let session = Arc::new(ready_session(&fake).await);
        session.cart().select_all(true);

        let pending = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.summary().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.cart().set_selected(adam_store_core::CartItemId::new(8), false).unwrap();

        let summary = pending.await.unwrap();
        let settled = session.settled_summary().await;

        assert_eq!(summary.lines.len(), 1);
        assert_eq!(settled.lines.len(), 1);
        assert_eq!(settled.totals.subtotal, Price::from_dong(500_000));
        let sent = fake.shipping_requests();
        assert_eq!(sent.last().unwrap().order_items.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_invalidates_cart() {
        let fake = seeded();
        let session = ready_session(&fake).await;
        session.cart().select_all(true);
        session.settled_summary().await;

        let outcome = session.submit().await.unwrap();

        assert!(matches!(outcome, CheckoutOutcome::Placed(_)));
        let sent = &fake.order_requests()[0];
        assert_eq!(sent.order_items.len(), 2);
        assert_eq!(sent.promotion_id.map(|p| p.as_i64()), Some(5));
        assert_eq!(session.cart().snapshot().status, adam_store_core::LoadStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_while_calculating_is_rejected() {
        let fake = seeded();
        let session = ready_session(&fake).await;
        session.cart().select_all(true);

        let err = session.submit().await.unwrap_err();

        assert!(matches!(err, CheckoutError::StillCalculating));
        assert_eq!(fake.calls("create_order"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_reuses_sessions() {
        let fake = seeded();
        let sessions = CheckoutSessions::new(Arc::new(FakeProvider(Arc::clone(&fake))), pricing());
        let customer = fixtures::customer(USER);

        let first = sessions.for_customer(&customer).await;
        let second = sessions.for_customer(&customer).await;
        assert!(Arc::ptr_eq(&first, &second));

        sessions.end(customer.id).await;
        let third = sessions.for_customer(&customer).await;
        assert!(!Arc::ptr_eq(&first, &third));
    }

    struct RecordingProvider {
        fake: Arc<FakeCommerceApi>,
        tokens: std::sync::Mutex<Vec<String>>,
    }

    impl CommerceApiProvider for RecordingProvider {
        fn for_customer(&self, customer: &CurrentCustomer) -> Arc<dyn CommerceApi> {
            self.tokens.lock().unwrap().push(customer.access_token.clone());
            Arc::clone(&self.fake) as Arc<dyn CommerceApi>
        }
    }

    #[tokio::test]
    async fn test_new_access_token_restarts_session() {
        let provider = Arc::new(RecordingProvider {
            fake: seeded(),
            tokens: std::sync::Mutex::new(Vec::new()),
        });
        let sessions = CheckoutSessions::new(
            Arc::clone(&provider) as Arc<dyn CommerceApiProvider>,
            pricing(),
        );
        let mut customer = fixtures::customer(USER);

        let first = sessions.for_customer(&customer).await;
        customer.access_token = "token-after-relogin".to_string();
        let second = sessions.for_customer(&customer).await;
        let third = sessions.for_customer(&customer).await;

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&second, &third));
        assert_eq!(
            *provider.tokens.lock().unwrap(),
            vec!["token-11".to_string(), "token-after-relogin".to_string()]
        );
    }
}
