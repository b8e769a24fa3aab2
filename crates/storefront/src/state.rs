//! Application state shared across handlers.

use std::sync::Arc;

use crate::api::{ApiError, CommerceApiProvider, CommerceClient};
use crate::checkout::CheckoutSessions;
use crate::config::StorefrontConfig;

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// configuration, the commerce API and the live checkout sessions.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    provider: Arc<dyn CommerceApiProvider>,
    sessions: CheckoutSessions,
}

impl AppState {
    /// Create a new application state backed by the HTTP commerce client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: StorefrontConfig) -> Result<Self, ApiError> {
        let client = CommerceClient::new(&config.api)?;
        Ok(Self::with_provider(config, Arc::new(client)))
    }

    /// Create application state over any API provider.
    #[must_use]
    pub fn with_provider(config: StorefrontConfig, provider: Arc<dyn CommerceApiProvider>) -> Self {
        let sessions = CheckoutSessions::new(Arc::clone(&provider), config.pricing.clone());

        Self {
            inner: Arc::new(AppStateInner {
                config,
                provider,
                sessions,
            }),
        }
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a reference to the commerce API provider.
    #[must_use]
    pub fn provider(&self) -> &dyn CommerceApiProvider {
        self.inner.provider.as_ref()
    }

    /// Get a reference to the live checkout sessions.
    #[must_use]
    pub fn sessions(&self) -> &CheckoutSessions {
        &self.inner.sessions
    }
}
