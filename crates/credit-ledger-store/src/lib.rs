//! Storage layer for the workspace credit ledger.
//!
//! This crate persists workspaces, agents, plans, subscriptions, the two
//! append-only ledger logs (usage records and extra credit purchases) and
//! smart recharge settings.
//!
//! Two backends implement [`Store`]:
//!
//! - [`RocksStore`] (feature `rocksdb-backend`): column families, CBOR
//!   values, ledger rows keyed by `workspace_id || ulid` for range scans.
//! - [`MemoryStore`]: a mutex-guarded in-memory map, for tests and embedders.
//!
//! # Charges
//!
//! [`Store::record_charge`] is the only write that depends on a read. Each
//! backend serializes it per workspace and writes the resulting one or two
//! usage records atomically.
//!
//! # Example
//!
//! ```no_run
//! use credit_ledger_store::{RocksStore, Store};
//! use credit_ledger_core::{Workspace, WorkspaceId};
//!
//! let store = RocksStore::open("/tmp/credit-ledger-db").unwrap();
//!
//! let workspace = Workspace::new(WorkspaceId::generate(), "Acme");
//! store.put_workspace(&workspace).unwrap();
//!
//! let retrieved = store.get_workspace(&workspace.id).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod charge;
pub mod error;
#[cfg(feature = "rocksdb-backend")]
pub mod keys;
pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use charge::{ChargeDraft, ChargeOutcome, TimeRange};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use credit_ledger_core::{
    total_from, total_purchased, Agent, AgentId, Allowance, CreditBalance, CreditPool,
    ExtraCreditPurchase, Plan, PlanId, SmartRechargeSetting, Subscription, UsageRecord,
    Workspace, WorkspaceId,
};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Workspace Operations
    // =========================================================================

    /// Insert or update a workspace, maintaining the customer index.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_workspace(&self, workspace: &Workspace) -> Result<()>;

    /// Get a workspace by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_workspace(&self, workspace_id: &WorkspaceId) -> Result<Option<Workspace>>;

    /// Find the workspace owning a Stripe customer.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_workspace_by_customer(&self, customer_id: &str) -> Result<Option<Workspace>>;

    // =========================================================================
    // Agent Operations
    // =========================================================================

    /// Insert or update an agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_agent(&self, agent: &Agent) -> Result<()>;

    /// Get an agent by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_agent(&self, agent_id: &AgentId) -> Result<Option<Agent>>;

    // =========================================================================
    // Plan Operations
    // =========================================================================

    /// Insert or update a catalog plan, maintaining the price index.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_plan(&self, plan: &Plan) -> Result<()>;

    /// Get a plan by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_plan(&self, plan_id: &PlanId) -> Result<Option<Plan>>;

    /// Find the plan sold under a Stripe price.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_plan_by_price_id(&self, price_id: &str) -> Result<Option<Plan>>;

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    /// Upsert the workspace's current subscription.
    ///
    /// There is at most one row per workspace; writing replaces it and
    /// re-points the Stripe subscription index.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_subscription(&self, subscription: &Subscription) -> Result<()>;

    /// Get the workspace's current subscription, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_subscription(&self, workspace_id: &WorkspaceId) -> Result<Option<Subscription>>;

    /// Find a subscription by its Stripe subscription ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_subscription_by_stripe_id(&self, stripe_id: &str) -> Result<Option<Subscription>>;

    // =========================================================================
    // Usage Operations
    // =========================================================================

    /// Append usage records in one atomic write.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn append_usage_records(&self, records: &[UsageRecord]) -> Result<()>;

    /// List a workspace's usage records in creation order, optionally
    /// restricted to `range`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_usage(
        &self,
        workspace_id: &WorkspaceId,
        range: Option<TimeRange>,
    ) -> Result<Vec<UsageRecord>>;

    /// Sum usage drawn from `pool`, optionally restricted to `range`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn sum_usage(
        &self,
        workspace_id: &WorkspaceId,
        pool: CreditPool,
        range: Option<TimeRange>,
    ) -> Result<i64> {
        Ok(total_from(&self.list_usage(workspace_id, range)?, pool))
    }

    // =========================================================================
    // Purchase Operations
    // =========================================================================

    /// Append a purchase unconditionally.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_purchase(&self, purchase: &ExtraCreditPurchase) -> Result<()>;

    /// Append a purchase unless one with the same dedup key exists.
    ///
    /// Returns `true` if the purchase was written. Purchases without a dedup
    /// key are always written.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn insert_purchase_if_absent(&self, purchase: &ExtraCreditPurchase) -> Result<bool>;

    /// List a workspace's purchases in creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_purchases(&self, workspace_id: &WorkspaceId) -> Result<Vec<ExtraCreditPurchase>>;

    /// Sum of all credits ever purchased by a workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn sum_purchases(&self, workspace_id: &WorkspaceId) -> Result<i64> {
        Ok(total_purchased(&self.list_purchases(workspace_id)?))
    }

    // =========================================================================
    // Smart Recharge Settings
    // =========================================================================

    /// Insert or update a workspace's recharge setting.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_recharge_setting(&self, setting: &SmartRechargeSetting) -> Result<()>;

    /// Get a workspace's recharge setting.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_recharge_setting(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<SmartRechargeSetting>>;

    // =========================================================================
    // Compound Operations
    // =========================================================================

    /// Derive both pool balances from the ledger.
    ///
    /// `plan` is the subscription's allowance and current billing period;
    /// `None` (no subscription) yields zero plan credits. Plan usage is summed
    /// over the period; extra usage and purchases are all-time.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn credit_balance(
        &self,
        workspace_id: &WorkspaceId,
        plan: Option<(Allowance, TimeRange)>,
    ) -> Result<CreditBalance> {
        let plan_used = match plan {
            Some((Allowance::Limited(_), period)) => {
                self.sum_usage(workspace_id, CreditPool::Plan, Some(period))?
            }
            _ => 0,
        };
        let extra_used = self.sum_usage(workspace_id, CreditPool::Extra, None)?;
        let purchased = self.sum_purchases(workspace_id)?;

        Ok(CreditBalance::from_aggregates(
            plan.map(|(allowance, _)| allowance),
            plan_used,
            purchased,
            extra_used,
        ))
    }

    /// Settle a charge: read both pools, split the cost, write the records.
    ///
    /// The read and the write happen under a per-workspace lock and the one
    /// or two records land in a single atomic write, so concurrent charges
    /// against one workspace never spend the same plan credits twice.
    ///
    /// # Errors
    ///
    /// - `StoreError::InsufficientCredits` if the draft's debit policy rejects
    ///   the extra-pool overdraft.
    /// - Any database error.
    fn record_charge(&self, draft: &ChargeDraft) -> Result<ChargeOutcome>;
}
