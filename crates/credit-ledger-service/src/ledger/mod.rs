//! The credit ledger engine.
//!
//! [`CreditLedger`] owns the four ledger operations:
//!
//! - [`CreditLedger::get_remaining_credits`] - both pool balances
//! - [`CreditLedger::charge`] - charge one model invocation
//! - [`CreditLedger::get_daily_balances`] - per-day balance history
//! - [`CreditLedger::maybe_recharge`] - smart recharge evaluation
//!
//! Balances are always derived from the store's append-only logs. The engine
//! holds no ledger state of its own beyond the smart recharge in-flight set.

mod balance;
mod charge;
mod history;
mod recharge;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use credit_ledger_core::{LedgerPolicy, ModelCostTable, WorkspaceId};
use credit_ledger_store::Store;

use crate::broadcast::{Broadcaster, CreditsUpdate, WorkspaceEvent};
use crate::payment::PaymentGateway;

pub use charge::ChargeReceipt;
pub use recharge::{RechargeOutcome, RechargePricing};

/// Default cap on the number of days a history query may span.
pub const DEFAULT_HISTORY_MAX_DAYS: i64 = 180;

/// Ledger engine over a [`Store`].
pub struct CreditLedger {
    store: Arc<dyn Store>,
    costs: Arc<ModelCostTable>,
    policy: LedgerPolicy,
    gateway: Option<Arc<dyn PaymentGateway>>,
    broadcaster: Arc<dyn Broadcaster>,
    pricing: RechargePricing,
    history_max_days: i64,
    recharges_in_flight: Mutex<HashSet<WorkspaceId>>,
}

impl CreditLedger {
    /// Create an engine with default policies and no payment gateway.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        costs: Arc<ModelCostTable>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            store,
            costs,
            policy: LedgerPolicy::default(),
            gateway: None,
            broadcaster,
            pricing: RechargePricing::default(),
            history_max_days: DEFAULT_HISTORY_MAX_DAYS,
            recharges_in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Set the charge policies.
    #[must_use]
    pub fn with_policy(mut self, policy: LedgerPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the payment gateway used by smart recharge.
    #[must_use]
    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Set the per-credit price charged by smart recharge.
    #[must_use]
    pub fn with_pricing(mut self, pricing: RechargePricing) -> Self {
        self.pricing = pricing;
        self
    }

    /// Set the maximum span of a history query, in days.
    #[must_use]
    pub fn with_history_max_days(mut self, days: i64) -> Self {
        self.history_max_days = days;
        self
    }

    fn broadcast_credits(&self, workspace_id: WorkspaceId, update: CreditsUpdate) {
        self.broadcaster
            .send_to_workspace(workspace_id, WorkspaceEvent::CreditsUpdated(update));
    }
}
