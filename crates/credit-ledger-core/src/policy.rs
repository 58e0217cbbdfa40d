//! Ledger policies.
//!
//! Two behaviours of the charge path are configuration choices rather than
//! fixed rules: which subscriptions a charge may be made against, and what
//! happens when a charge overdraws the extra pool.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LedgerError;
use crate::subscription::SubscriptionStatus;

/// Which subscription statuses the charge path accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeSubscriptionPolicy {
    /// Charge against the latest subscription whatever its status.
    #[default]
    AnyStatus,
    /// Charge only subscriptions the balance read path would count
    /// (active, trial, canceled).
    BalanceEligible,
}

impl ChargeSubscriptionPolicy {
    /// Whether a subscription in `status` may be charged.
    #[must_use]
    pub const fn admits(self, status: SubscriptionStatus) -> bool {
        match self {
            Self::AnyStatus => true,
            Self::BalanceEligible => status.counts_for_balance(),
        }
    }
}

/// What to do when a charge's extra-pool share exceeds the extra credits left.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtraDebitPolicy {
    /// Always record the debit; reported balances clamp at zero.
    #[default]
    AllowNegative,
    /// Refuse the charge with `InsufficientCredits`.
    RejectWhenExhausted,
}

/// Policies applied by the ledger engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerPolicy {
    /// Subscription statuses accepted by the charge path.
    pub charge_subscription: ChargeSubscriptionPolicy,
    /// Overdraft handling for the extra pool.
    pub extra_debit: ExtraDebitPolicy,
}

impl FromStr for ChargeSubscriptionPolicy {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any_status" => Ok(Self::AnyStatus),
            "balance_eligible" => Ok(Self::BalanceEligible),
            other => Err(LedgerError::Configuration(format!(
                "unknown charge subscription policy: {other}"
            ))),
        }
    }
}

impl FromStr for ExtraDebitPolicy {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow_negative" => Ok(Self::AllowNegative),
            "reject_when_exhausted" => Ok(Self::RejectWhenExhausted),
            other => Err(LedgerError::Configuration(format!(
                "unknown extra debit policy: {other}"
            ))),
        }
    }
}

impl fmt::Display for ChargeSubscriptionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnyStatus => write!(f, "any_status"),
            Self::BalanceEligible => write!(f, "balance_eligible"),
        }
    }
}

impl fmt::Display for ExtraDebitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllowNegative => write!(f, "allow_negative"),
            Self::RejectWhenExhausted => write!(f, "reject_when_exhausted"),
        }
    }
}
