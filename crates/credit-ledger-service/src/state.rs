//! Application state.

use std::sync::Arc;
use std::time::Duration;

use credit_ledger_store::Store;

use crate::broadcast::{BroadcastHub, Broadcaster};
use crate::config::ServiceConfig;
use crate::ledger::CreditLedger;
use crate::payment::PaymentGateway;
use crate::stripe::StripeClient;
use crate::sync::SubscriptionSynchronizer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: ServiceConfig,

    /// Ledger engine.
    pub ledger: Arc<CreditLedger>,

    /// Stripe webhook synchronizer.
    pub synchronizer: Arc<SubscriptionSynchronizer>,

    /// Workspace event fan-out.
    pub hub: Arc<BroadcastHub>,
}

impl AppState {
    /// Create the application state, building a Stripe client if an API key
    /// is configured.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let timeout = Duration::from_secs(config.payment_timeout_seconds);
        let gateway = config.stripe_api_key.as_ref().and_then(|key| {
            match StripeClient::new(key.as_str(), timeout) {
                Ok(client) => {
                    tracing::info!("Stripe integration enabled");
                    Some(Arc::new(client) as Arc<dyn PaymentGateway>)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create Stripe client");
                    None
                }
            }
        });

        if gateway.is_none() {
            tracing::warn!("Stripe not configured - smart recharge and checkout sync disabled");
        }

        Self::with_gateway(store, config, gateway)
    }

    /// Create the application state around an explicit payment gateway.
    #[must_use]
    pub fn with_gateway(
        store: Arc<dyn Store>,
        config: ServiceConfig,
        gateway: Option<Arc<dyn PaymentGateway>>,
    ) -> Self {
        let hub = Arc::new(BroadcastHub::new());
        let broadcaster: Arc<dyn Broadcaster> = hub.clone();

        let mut ledger = CreditLedger::new(
            Arc::clone(&store),
            Arc::clone(&config.model_costs),
            Arc::clone(&broadcaster),
        )
        .with_policy(config.policy)
        .with_pricing(config.recharge_pricing.clone())
        .with_history_max_days(config.history_max_days);

        let mut synchronizer = SubscriptionSynchronizer::new(store, broadcaster);

        if let Some(gateway) = gateway {
            ledger = ledger.with_gateway(Arc::clone(&gateway));
            synchronizer = synchronizer.with_gateway(gateway);
        }

        Self {
            config,
            ledger: Arc::new(ledger),
            synchronizer: Arc::new(synchronizer),
            hub,
        }
    }
}
