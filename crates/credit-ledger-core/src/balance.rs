//! Pool balance arithmetic.
//!
//! Balances are never stored. They are derived from the ledger:
//!
//! - plan pool: `max(0, allowance - plan usage inside the current period)`,
//!   or unbounded when the allowance is unlimited;
//! - extra pool: `max(0, all purchases - all extra usage)`, not time-boxed.
//!
//! A charge first drains the plan pool and spills the shortfall into the
//! extra pool.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::policy::ExtraDebitPolicy;
use crate::subscription::{AmountOrUnlimited, Allowance};

/// Remaining plan credits: a clamped count, or unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "AmountOrUnlimited", into = "AmountOrUnlimited")]
pub enum PlanCredits {
    /// The allowance is unlimited; usage never depletes it.
    Unlimited,
    /// Credits left in the current period (never negative).
    Remaining(i64),
}

impl PlanCredits {
    /// Derive the plan pool from an allowance and the plan usage in the period.
    #[must_use]
    pub fn from_usage(allowance: Allowance, plan_used: i64) -> Self {
        match allowance {
            Allowance::Unlimited => Self::Unlimited,
            Allowance::Limited(limit) => Self::Remaining((limit - plan_used).max(0)),
        }
    }

    /// Whether the pool is unbounded.
    #[must_use]
    pub const fn is_unlimited(self) -> bool {
        matches!(self, Self::Unlimited)
    }

    /// The finite remaining count, if any.
    #[must_use]
    pub const fn remaining(self) -> Option<i64> {
        match self {
            Self::Unlimited => None,
            Self::Remaining(n) => Some(n),
        }
    }

    fn debit(self, amount: i64) -> Self {
        match self {
            Self::Unlimited => Self::Unlimited,
            Self::Remaining(n) => Self::Remaining((n - amount).max(0)),
        }
    }
}

impl From<AmountOrUnlimited> for PlanCredits {
    fn from(value: AmountOrUnlimited) -> Self {
        value.0.map_or(Self::Unlimited, Self::Remaining)
    }
}

impl From<PlanCredits> for AmountOrUnlimited {
    fn from(value: PlanCredits) -> Self {
        Self(value.remaining())
    }
}

/// Extra credits left: purchases minus extra usage, clamped at zero.
#[must_use]
pub fn extra_remaining(purchased: i64, extra_used: i64) -> i64 {
    (purchased - extra_used).max(0)
}

/// Remaining credits in both pools of a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditBalance {
    /// Plan pool.
    pub plan_credits_remaining: PlanCredits,
    /// Extra pool.
    pub extra_credits_remaining: i64,
}

impl CreditBalance {
    /// Both pools empty (no subscription, no purchases).
    pub const ZERO: Self = Self {
        plan_credits_remaining: PlanCredits::Remaining(0),
        extra_credits_remaining: 0,
    };

    /// Derive a balance from ledger aggregates.
    #[must_use]
    pub fn from_aggregates(
        allowance: Option<Allowance>,
        plan_used: i64,
        purchased: i64,
        extra_used: i64,
    ) -> Self {
        Self {
            plan_credits_remaining: allowance
                .map_or(PlanCredits::Remaining(0), |a| PlanCredits::from_usage(a, plan_used)),
            extra_credits_remaining: extra_remaining(purchased, extra_used),
        }
    }

    /// Plan plus extra, or `None` when the plan pool is unbounded.
    #[must_use]
    pub fn combined(&self) -> Option<i64> {
        self.plan_credits_remaining
            .remaining()
            .map(|plan| plan + self.extra_credits_remaining)
    }

    /// Whether the combined balance is below `threshold`.
    #[must_use]
    pub fn is_below(&self, threshold: i64) -> bool {
        self.combined().is_some_and(|total| total < threshold)
    }

    /// The reported balance after applying `split`, without re-reading the ledger.
    #[must_use]
    pub fn after(&self, split: ChargeSplit) -> Self {
        Self {
            plan_credits_remaining: self.plan_credits_remaining.debit(split.plan),
            extra_credits_remaining: (self.extra_credits_remaining - split.extra).max(0),
        }
    }
}

/// How a charge divides between the two pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeSplit {
    /// Credits taken from the plan pool.
    pub plan: i64,
    /// Credits taken from the extra pool.
    pub extra: i64,
}

impl ChargeSplit {
    /// Split `cost` against the current plan pool.
    ///
    /// The plan pool covers as much as it can; the remainder goes to the
    /// extra pool regardless of how much extra credit exists.
    #[must_use]
    pub fn of(cost: i64, plan: PlanCredits) -> Self {
        match plan {
            PlanCredits::Remaining(remaining) if remaining < cost => {
                let from_plan = remaining.max(0);
                Self {
                    plan: from_plan,
                    extra: cost - from_plan,
                }
            }
            _ => Self {
                plan: cost,
                extra: 0,
            },
        }
    }

    /// Total credits charged.
    #[must_use]
    pub const fn total(&self) -> i64 {
        self.plan + self.extra
    }

    /// Whether the charge needs a separate PLAN fragment and EXTRA fragment.
    #[must_use]
    pub const fn is_split(&self) -> bool {
        self.extra > 0
    }
}

/// Split `cost` against `balance`, applying the extra-pool debit policy.
///
/// # Errors
///
/// Returns `LedgerError::InsufficientCredits` when the policy is
/// [`ExtraDebitPolicy::RejectWhenExhausted`] and the extra pool cannot cover
/// the plan shortfall.
pub fn plan_charge(
    cost: i64,
    balance: &CreditBalance,
    policy: ExtraDebitPolicy,
) -> Result<ChargeSplit> {
    let split = ChargeSplit::of(cost, balance.plan_credits_remaining);

    if policy == ExtraDebitPolicy::RejectWhenExhausted
        && split.extra > balance.extra_credits_remaining
    {
        return Err(LedgerError::InsufficientCredits {
            available: balance.extra_credits_remaining,
            required: split.extra,
        });
    }

    Ok(split)
}
