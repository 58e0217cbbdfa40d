//! Usage records: the append-only debit side of the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AgentId, CorrelationId, SubscriptionId, UsageRecordId, WorkspaceId};

/// The credit pool a usage record debits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreditPool {
    /// The period-bound subscription allowance.
    Plan,
    /// The never-expiring purchased pool.
    Extra,
}

impl CreditPool {
    /// Get the pool name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "PLAN",
            Self::Extra => "EXTRA",
        }
    }
}

/// An immutable ledger entry debiting one pool for one model invocation
/// (or one fragment of it, when the charge was split).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Record ID (ULID, ordered by `created_at`).
    pub id: UsageRecordId,

    /// The workspace being charged.
    pub workspace_id: WorkspaceId,

    /// The subscription the charge was resolved against.
    pub subscription_id: SubscriptionId,

    /// The agent that made the invocation.
    pub agent_id: AgentId,

    /// Model identifier that was priced.
    pub model: String,

    /// Credits debited.
    pub quantity: i64,

    /// Which pool was debited.
    pub used_from: CreditPool,

    /// Shared by the records of a single charge.
    pub correlation_id: CorrelationId,

    /// Caller-supplied context (conversation id, channel, ...).
    pub metadata: serde_json::Value,

    /// When the charge happened.
    pub created_at: DateTime<Utc>,
}

/// The identity of a charge, common to every record it produces.
#[derive(Debug, Clone)]
pub struct ChargeContext {
    /// The workspace being charged.
    pub workspace_id: WorkspaceId,
    /// The subscription resolved for the charge.
    pub subscription_id: SubscriptionId,
    /// The agent that made the invocation.
    pub agent_id: AgentId,
    /// Model identifier that was priced.
    pub model: String,
    /// Caller-supplied context.
    pub metadata: serde_json::Value,
}

impl UsageRecord {
    /// Build a record for one pool of a charge.
    #[must_use]
    pub fn for_charge(
        ctx: &ChargeContext,
        correlation_id: CorrelationId,
        used_from: CreditPool,
        quantity: i64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: UsageRecordId::generate_at(created_at),
            workspace_id: ctx.workspace_id,
            subscription_id: ctx.subscription_id,
            agent_id: ctx.agent_id,
            model: ctx.model.clone(),
            quantity,
            used_from,
            correlation_id,
            metadata: ctx.metadata.clone(),
            created_at,
        }
    }
}

/// Sum the quantities of `records` drawn from `pool`.
#[must_use]
pub fn total_from<'a>(records: impl IntoIterator<Item = &'a UsageRecord>, pool: CreditPool) -> i64 {
    records
        .into_iter()
        .filter(|r| r.used_from == pool)
        .map(|r| r.quantity)
        .sum()
}
