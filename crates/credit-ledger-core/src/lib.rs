//! Core types and ledger arithmetic for the workspace credit ledger.
//!
//! This crate provides the foundational types shared by the store and the
//! service:
//!
//! - **Identifiers**: `WorkspaceId`, `AgentId`, `PlanId`, `SubscriptionId`,
//!   `UsageRecordId`, `PurchaseId`, `CorrelationId`
//! - **Entities**: `Workspace`, `Agent`, `Plan`, `Subscription`
//! - **Ledger entries**: `UsageRecord`, `ExtraCreditPurchase`
//! - **Arithmetic**: `CreditBalance`, `ChargeSplit`, daily balance replay
//! - **Pricing**: `ModelCostTable`
//!
//! # Credit pools
//!
//! A workspace has two pools. The **plan** pool is the subscription
//! allowance for the current billing period. The **extra** pool is the sum
//! of purchased credits and never expires. Neither balance is stored; both
//! are derived from the append-only ledger of usage records and purchases.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod balance;
pub mod credits;
pub mod error;
pub mod history;
pub mod ids;
pub mod policy;
pub mod pricing;
pub mod subscription;
pub mod usage;
pub mod workspace;

pub use balance::{extra_remaining, plan_charge, ChargeSplit, CreditBalance, PlanCredits};
pub use credits::{
    total_purchased, ExtraCreditPurchase, PurchaseMetadata, PurchaseSource, SmartRechargeSetting,
    DEFAULT_RECHARGE_AMOUNT, DEFAULT_RECHARGE_THRESHOLD,
};
pub use error::{LedgerError, Result};
pub use history::{replay_daily_balances, start_of_day, DailyBalance, HistoryWindow};
pub use ids::{
    AgentId, CorrelationId, IdError, PlanId, PurchaseId, SubscriptionId, UsageRecordId,
    WorkspaceId,
};
pub use policy::{ChargeSubscriptionPolicy, ExtraDebitPolicy, LedgerPolicy};
pub use pricing::ModelCostTable;
pub use subscription::{
    Allowance, LimitOverride, LimitValue, Plan, Subscription, SubscriptionStatus,
    UNLIMITED_SENTINEL,
};
pub use usage::{total_from, ChargeContext, CreditPool, UsageRecord};
pub use workspace::{Agent, AgentSettings, Workspace};
