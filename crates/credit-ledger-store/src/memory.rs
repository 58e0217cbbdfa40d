//! In-memory storage implementation.
//!
//! All state sits behind one mutex, which also serializes charges.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use credit_ledger_core::{
    Agent, AgentId, Allowance, CreditBalance, CreditPool, ExtraCreditPurchase, Plan, PlanId,
    SmartRechargeSetting, Subscription, UsageRecord, Workspace, WorkspaceId,
};

use crate::charge::{settle, ChargeDraft, ChargeOutcome, TimeRange};
use crate::error::{Result, StoreError};
use crate::Store;

#[derive(Default)]
struct MemoryState {
    workspaces: HashMap<WorkspaceId, Workspace>,
    agents: HashMap<AgentId, Agent>,
    plans: HashMap<PlanId, Plan>,
    subscriptions: HashMap<WorkspaceId, Subscription>,
    usage: HashMap<WorkspaceId, Vec<UsageRecord>>,
    purchases: HashMap<WorkspaceId, Vec<ExtraCreditPurchase>>,
    recharge_settings: HashMap<WorkspaceId, SmartRechargeSetting>,
}

impl MemoryState {
    fn usage_sum(&self, workspace_id: &WorkspaceId, pool: CreditPool, range: Option<TimeRange>) -> i64 {
        self.usage
            .get(workspace_id)
            .into_iter()
            .flatten()
            .filter(|r| r.used_from == pool)
            .filter(|r| range.map_or(true, |range| range.contains(r.created_at)))
            .map(|r| r.quantity)
            .sum()
    }

    fn purchase_sum(&self, workspace_id: &WorkspaceId) -> i64 {
        self.purchases
            .get(workspace_id)
            .into_iter()
            .flatten()
            .map(|p| p.quantity)
            .sum()
    }

    fn balance(
        &self,
        workspace_id: &WorkspaceId,
        allowance: Allowance,
        period: TimeRange,
    ) -> CreditBalance {
        let plan_used = if allowance.is_unlimited() {
            0
        } else {
            self.usage_sum(workspace_id, CreditPool::Plan, Some(period))
        };

        CreditBalance::from_aggregates(
            Some(allowance),
            plan_used,
            self.purchase_sum(workspace_id),
            self.usage_sum(workspace_id, CreditPool::Extra, None),
        )
    }

    fn has_dedup_key(&self, key: &str) -> bool {
        self.purchases
            .values()
            .flatten()
            .any(|p| p.dedup_key().as_deref() == Some(key))
    }
}

/// In-memory [`Store`] backend.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Database("memory store lock poisoned".into()))
    }
}

impl Store for MemoryStore {
    // =========================================================================
    // Workspace Operations
    // =========================================================================

    fn put_workspace(&self, workspace: &Workspace) -> Result<()> {
        self.state()?
            .workspaces
            .insert(workspace.id, workspace.clone());
        Ok(())
    }

    fn get_workspace(&self, workspace_id: &WorkspaceId) -> Result<Option<Workspace>> {
        Ok(self.state()?.workspaces.get(workspace_id).cloned())
    }

    fn find_workspace_by_customer(&self, customer_id: &str) -> Result<Option<Workspace>> {
        Ok(self
            .state()?
            .workspaces
            .values()
            .find(|w| w.stripe_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    // =========================================================================
    // Agent Operations
    // =========================================================================

    fn put_agent(&self, agent: &Agent) -> Result<()> {
        self.state()?.agents.insert(agent.id, agent.clone());
        Ok(())
    }

    fn get_agent(&self, agent_id: &AgentId) -> Result<Option<Agent>> {
        Ok(self.state()?.agents.get(agent_id).cloned())
    }

    // =========================================================================
    // Plan Operations
    // =========================================================================

    fn put_plan(&self, plan: &Plan) -> Result<()> {
        self.state()?.plans.insert(plan.id, plan.clone());
        Ok(())
    }

    fn get_plan(&self, plan_id: &PlanId) -> Result<Option<Plan>> {
        Ok(self.state()?.plans.get(plan_id).cloned())
    }

    fn find_plan_by_price_id(&self, price_id: &str) -> Result<Option<Plan>> {
        Ok(self
            .state()?
            .plans
            .values()
            .find(|p| p.stripe_price_id.as_deref() == Some(price_id))
            .cloned())
    }

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    fn put_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.state()?
            .subscriptions
            .insert(subscription.workspace_id, subscription.clone());
        Ok(())
    }

    fn get_subscription(&self, workspace_id: &WorkspaceId) -> Result<Option<Subscription>> {
        Ok(self.state()?.subscriptions.get(workspace_id).cloned())
    }

    fn find_subscription_by_stripe_id(&self, stripe_id: &str) -> Result<Option<Subscription>> {
        Ok(self
            .state()?
            .subscriptions
            .values()
            .find(|s| s.stripe_subscription_id.as_deref() == Some(stripe_id))
            .cloned())
    }

    // =========================================================================
    // Usage Operations
    // =========================================================================

    fn append_usage_records(&self, records: &[UsageRecord]) -> Result<()> {
        let mut state = self.state()?;
        for record in records {
            state
                .usage
                .entry(record.workspace_id)
                .or_default()
                .push(record.clone());
        }
        Ok(())
    }

    fn list_usage(
        &self,
        workspace_id: &WorkspaceId,
        range: Option<TimeRange>,
    ) -> Result<Vec<UsageRecord>> {
        let state = self.state()?;
        let mut records: Vec<UsageRecord> = state
            .usage
            .get(workspace_id)
            .into_iter()
            .flatten()
            .filter(|r| range.map_or(true, |range| range.contains(r.created_at)))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    fn sum_usage(
        &self,
        workspace_id: &WorkspaceId,
        pool: CreditPool,
        range: Option<TimeRange>,
    ) -> Result<i64> {
        Ok(self.state()?.usage_sum(workspace_id, pool, range))
    }

    // =========================================================================
    // Purchase Operations
    // =========================================================================

    fn put_purchase(&self, purchase: &ExtraCreditPurchase) -> Result<()> {
        self.state()?
            .purchases
            .entry(purchase.workspace_id)
            .or_default()
            .push(purchase.clone());
        Ok(())
    }

    fn insert_purchase_if_absent(&self, purchase: &ExtraCreditPurchase) -> Result<bool> {
        let mut state = self.state()?;
        if let Some(key) = purchase.dedup_key() {
            if state.has_dedup_key(&key) {
                return Ok(false);
            }
        }
        state
            .purchases
            .entry(purchase.workspace_id)
            .or_default()
            .push(purchase.clone());
        Ok(true)
    }

    fn list_purchases(&self, workspace_id: &WorkspaceId) -> Result<Vec<ExtraCreditPurchase>> {
        let mut purchases = self
            .state()?
            .purchases
            .get(workspace_id)
            .cloned()
            .unwrap_or_default();
        purchases.sort_by_key(|p| p.id);
        Ok(purchases)
    }

    fn sum_purchases(&self, workspace_id: &WorkspaceId) -> Result<i64> {
        Ok(self.state()?.purchase_sum(workspace_id))
    }

    // =========================================================================
    // Smart Recharge Settings
    // =========================================================================

    fn put_recharge_setting(&self, setting: &SmartRechargeSetting) -> Result<()> {
        self.state()?
            .recharge_settings
            .insert(setting.workspace_id, setting.clone());
        Ok(())
    }

    fn get_recharge_setting(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<SmartRechargeSetting>> {
        Ok(self.state()?.recharge_settings.get(workspace_id).cloned())
    }

    // =========================================================================
    // Compound Operations
    // =========================================================================

    fn record_charge(&self, draft: &ChargeDraft) -> Result<ChargeOutcome> {
        let mut state = self.state()?;
        let workspace_id = draft.context.workspace_id;

        let balance = state.balance(&workspace_id, draft.allowance, draft.period);
        let outcome = settle(draft, balance)?;

        state
            .usage
            .entry(workspace_id)
            .or_default()
            .extend(outcome.records.iter().cloned());

        Ok(outcome)
    }
}
