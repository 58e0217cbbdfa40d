//! Charge settlement shared by the storage backends.
//!
//! A backend reads the workspace's balance, hands it to [`settle`] and writes
//! the returned records in one batch, all while holding the workspace's
//! charge lock.

use chrono::{DateTime, Utc};

use credit_ledger_core::{
    plan_charge, Allowance, ChargeContext, ChargeSplit, CorrelationId, CreditBalance, CreditPool,
    ExtraDebitPolicy, LedgerError, UsageRecord,
};

use crate::error::{Result, StoreError};

/// Half-open time range `[from, until)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Inclusive lower bound.
    pub from: DateTime<Utc>,
    /// Exclusive upper bound.
    pub until: DateTime<Utc>,
}

impl TimeRange {
    /// Create a range.
    #[must_use]
    pub const fn new(from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self { from, until }
    }

    /// Whether `at` lies inside the range.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from <= at && at < self.until
    }
}

/// Everything the store needs to settle one model invocation.
#[derive(Debug, Clone)]
pub struct ChargeDraft {
    /// Who is charged, for what.
    pub context: ChargeContext,
    /// Credit cost of the invocation.
    pub cost: i64,
    /// Per-period allowance of the resolved subscription.
    pub allowance: Allowance,
    /// The subscription's current billing period.
    pub period: TimeRange,
    /// Overdraft handling for the extra pool.
    pub extra_debit: ExtraDebitPolicy,
    /// Timestamp stamped on the records.
    pub charged_at: DateTime<Utc>,
}

impl ChargeDraft {
    /// A draft charged now with the default debit policy.
    #[must_use]
    pub fn new(context: ChargeContext, cost: i64, allowance: Allowance, period: TimeRange) -> Self {
        Self {
            context,
            cost,
            allowance,
            period,
            extra_debit: ExtraDebitPolicy::default(),
            charged_at: Utc::now(),
        }
    }

    /// Set the extra debit policy.
    #[must_use]
    pub fn with_extra_debit(mut self, policy: ExtraDebitPolicy) -> Self {
        self.extra_debit = policy;
        self
    }

    /// Set the charge timestamp.
    #[must_use]
    pub fn charged_at(mut self, at: DateTime<Utc>) -> Self {
        self.charged_at = at;
        self
    }
}

/// The result of a settled charge.
#[derive(Debug, Clone)]
pub struct ChargeOutcome {
    /// Shared by every record below.
    pub correlation_id: CorrelationId,
    /// The one or two records written.
    pub records: Vec<UsageRecord>,
    /// How the cost was divided.
    pub split: ChargeSplit,
    /// Balance read under the charge lock.
    pub balance_before: CreditBalance,
    /// `balance_before` minus the split, clamped.
    pub balance_after: CreditBalance,
}

/// Split the draft against `balance_before` and build its records.
///
/// One PLAN record when the plan pool covers the cost; otherwise a PLAN
/// record for whatever the plan pool still holds (if anything) and an EXTRA
/// record for the shortfall.
pub(crate) fn settle(draft: &ChargeDraft, balance_before: CreditBalance) -> Result<ChargeOutcome> {
    let split = plan_charge(draft.cost, &balance_before, draft.extra_debit).map_err(|e| match e {
        LedgerError::InsufficientCredits {
            available,
            required,
        } => StoreError::InsufficientCredits {
            available,
            required,
        },
        other => StoreError::Database(other.to_string()),
    })?;

    let correlation_id = CorrelationId::generate_at(draft.charged_at);
    let mut records = Vec::with_capacity(2);

    if !split.is_split() || split.plan > 0 {
        records.push(UsageRecord::for_charge(
            &draft.context,
            correlation_id,
            CreditPool::Plan,
            split.plan,
            draft.charged_at,
        ));
    }
    if split.is_split() {
        records.push(UsageRecord::for_charge(
            &draft.context,
            correlation_id,
            CreditPool::Extra,
            split.extra,
            draft.charged_at,
        ));
    }

    Ok(ChargeOutcome {
        correlation_id,
        records,
        split,
        balance_before,
        balance_after: balance_before.after(split),
    })
}
