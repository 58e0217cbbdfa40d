//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Workspace records, keyed by `workspace_id`.
    pub const WORKSPACES: &str = "workspaces";

    /// Index: Stripe customer ID to `workspace_id`.
    pub const WORKSPACES_BY_CUSTOMER: &str = "workspaces_by_customer";

    /// Agent records, keyed by `agent_id`.
    pub const AGENTS: &str = "agents";

    /// Plan catalog, keyed by `plan_id`.
    pub const PLANS: &str = "plans";

    /// Index: Stripe price ID to `plan_id`.
    pub const PLANS_BY_PRICE: &str = "plans_by_price";

    /// The current subscription of each workspace, keyed by `workspace_id`.
    pub const SUBSCRIPTIONS: &str = "subscriptions";

    /// Index: Stripe subscription ID to `workspace_id`.
    pub const SUBSCRIPTIONS_BY_STRIPE_ID: &str = "subscriptions_by_stripe_id";

    /// Usage records, keyed by `workspace_id || record_id` (ULID, time-ordered).
    pub const USAGE_RECORDS: &str = "usage_records";

    /// Extra credit purchases, keyed by `workspace_id || purchase_id`.
    pub const PURCHASES: &str = "purchases";

    /// Index: purchase dedup key to the purchase's ledger key.
    pub const PURCHASES_BY_DEDUP_KEY: &str = "purchases_by_dedup_key";

    /// Smart recharge settings, keyed by `workspace_id`.
    pub const RECHARGE_SETTINGS: &str = "recharge_settings";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::WORKSPACES,
        cf::WORKSPACES_BY_CUSTOMER,
        cf::AGENTS,
        cf::PLANS,
        cf::PLANS_BY_PRICE,
        cf::SUBSCRIPTIONS,
        cf::SUBSCRIPTIONS_BY_STRIPE_ID,
        cf::USAGE_RECORDS,
        cf::PURCHASES,
        cf::PURCHASES_BY_DEDUP_KEY,
        cf::RECHARGE_SETTINGS,
    ]
}
