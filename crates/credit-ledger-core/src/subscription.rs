//! Plans and subscriptions.
//!
//! A workspace has at most one current [`Subscription`] row. The row points
//! at a catalog [`Plan`] whose `credits_limit` is the per-period allowance,
//! unless the subscription carries an explicitly set [`LimitOverride`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{PlanId, SubscriptionId, WorkspaceId};

/// Wire sentinel for an unbounded credit amount.
pub const UNLIMITED_SENTINEL: &str = "UNLIMITED";

/// A catalog plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// The plan ID.
    pub id: PlanId,

    /// Display name.
    pub name: String,

    /// Stripe price ID used to resolve the plan from checkout events.
    pub stripe_price_id: Option<String>,

    /// Credits granted per billing period. `None` means unlimited.
    pub credits_limit: Option<i64>,

    /// When the plan was created.
    pub created_at: DateTime<Utc>,
}

impl Plan {
    /// Create a plan with the given per-period limit.
    #[must_use]
    pub fn new(name: impl Into<String>, credits_limit: Option<i64>) -> Self {
        Self {
            id: PlanId::generate(),
            name: name.into(),
            stripe_price_id: None,
            credits_limit,
            created_at: Utc::now(),
        }
    }

    /// Set the Stripe price ID.
    #[must_use]
    pub fn with_price_id(mut self, price_id: impl Into<String>) -> Self {
        self.stripe_price_id = Some(price_id.into());
        self
    }
}

/// Status of a subscription, mirrored from the payment provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    /// Trial period.
    Trial,
    /// Paid and current.
    Active,
    /// Latest invoice failed.
    PastDue,
    /// Canceled; still counts for balance until the period ends.
    Canceled,
    /// First payment not yet completed.
    Incomplete,
    /// First payment never completed.
    IncompleteExpired,
    /// Retries exhausted.
    Unpaid,
}

impl SubscriptionStatus {
    /// Map the provider status vocabulary to the local enum.
    ///
    /// Unrecognised values map to [`SubscriptionStatus::Canceled`].
    #[must_use]
    pub fn from_provider(status: &str) -> Self {
        match status {
            "active" => Self::Active,
            "trialing" => Self::Trial,
            "past_due" => Self::PastDue,
            "canceled" => Self::Canceled,
            "incomplete" => Self::Incomplete,
            "incomplete_expired" => Self::IncompleteExpired,
            "unpaid" => Self::Unpaid,
            _ => Self::Canceled,
        }
    }

    /// Whether the balance and history read paths consider this subscription.
    #[must_use]
    pub const fn counts_for_balance(self) -> bool {
        matches!(self, Self::Active | Self::Trial | Self::Canceled)
    }
}

/// A workspace subscription to a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Local subscription ID.
    pub id: SubscriptionId,

    /// Owning workspace.
    pub workspace_id: WorkspaceId,

    /// Subscribed plan.
    pub plan_id: PlanId,

    /// Current status.
    pub status: SubscriptionStatus,

    /// Start of the current billing period (inclusive).
    pub current_period_start: DateTime<Utc>,

    /// End of the current billing period (exclusive).
    pub current_period_end: DateTime<Utc>,

    /// Trial start, if any.
    pub trial_start: Option<DateTime<Utc>>,

    /// Trial end, if any.
    pub trial_end: Option<DateTime<Utc>>,

    /// Whether the subscription cancels at period end.
    pub cancel_at_period_end: bool,

    /// When the subscription was canceled.
    pub canceled_at: Option<DateTime<Utc>>,

    /// Stripe subscription ID.
    pub stripe_subscription_id: Option<String>,

    /// Optional override of the plan's credit limit.
    pub limit_override: Option<LimitOverride>,

    /// When the row was created.
    pub created_at: DateTime<Utc>,

    /// When the row was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Create a subscription with the given status and period bounds.
    #[must_use]
    pub fn new(
        workspace_id: WorkspaceId,
        plan_id: PlanId,
        status: SubscriptionStatus,
        current_period_start: DateTime<Utc>,
        current_period_end: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SubscriptionId::generate(),
            workspace_id,
            plan_id,
            status,
            current_period_start,
            current_period_end,
            trial_start: None,
            trial_end: None,
            cancel_at_period_end: false,
            canceled_at: None,
            stripe_subscription_id: None,
            limit_override: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the limit override.
    #[must_use]
    pub fn with_limit_override(mut self, limit_override: LimitOverride) -> Self {
        self.limit_override = Some(limit_override);
        self
    }

    /// Set the Stripe subscription ID.
    #[must_use]
    pub fn with_stripe_id(mut self, stripe_subscription_id: impl Into<String>) -> Self {
        self.stripe_subscription_id = Some(stripe_subscription_id.into());
        self
    }

    /// Per-period credit allowance: the explicit override if set, else the plan limit.
    #[must_use]
    pub fn credit_allowance(&self, plan: &Plan) -> Allowance {
        match &self.limit_override {
            Some(o) if o.explicitly_set => match o.value {
                LimitValue::Credits(n) => Allowance::Limited(n),
                LimitValue::Unlimited => Allowance::Unlimited,
            },
            _ => plan
                .credits_limit
                .map_or(Allowance::Unlimited, Allowance::Limited),
        }
    }
}

/// Per-period credit allowance after applying overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allowance {
    /// No per-period limit.
    Unlimited,
    /// At most this many plan credits per period.
    Limited(i64),
}

impl Allowance {
    /// Whether the allowance is unbounded.
    #[must_use]
    pub const fn is_unlimited(self) -> bool {
        matches!(self, Self::Unlimited)
    }
}

/// Administrative override of a plan's credit limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitOverride {
    /// The override value.
    pub value: LimitValue,
    /// Only an explicitly set override supersedes the plan.
    pub explicitly_set: bool,
}

impl LimitOverride {
    /// An explicitly set numeric override.
    #[must_use]
    pub const fn credits(n: i64) -> Self {
        Self {
            value: LimitValue::Credits(n),
            explicitly_set: true,
        }
    }

    /// An explicitly set unlimited override.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            value: LimitValue::Unlimited,
            explicitly_set: true,
        }
    }
}

/// Value of a [`LimitOverride`]: a number or the `"UNLIMITED"` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "AmountOrUnlimited", into = "AmountOrUnlimited")]
pub enum LimitValue {
    /// Numeric credit limit.
    Credits(i64),
    /// No limit.
    Unlimited,
}

impl From<AmountOrUnlimited> for LimitValue {
    fn from(value: AmountOrUnlimited) -> Self {
        value.0.map_or(Self::Unlimited, Self::Credits)
    }
}

impl From<LimitValue> for AmountOrUnlimited {
    fn from(value: LimitValue) -> Self {
        match value {
            LimitValue::Credits(n) => Self(Some(n)),
            LimitValue::Unlimited => Self(None),
        }
    }
}

/// Serde helper: an integer amount, or `None` written as [`UNLIMITED_SENTINEL`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct AmountOrUnlimited(pub(crate) Option<i64>);

impl Serialize for AmountOrUnlimited {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Some(n) => serializer.serialize_i64(n),
            None => serializer.serialize_str(UNLIMITED_SENTINEL),
        }
    }
}

impl<'de> Deserialize<'de> for AmountOrUnlimited {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl serde::de::Visitor<'_> for Visitor {
            type Value = AmountOrUnlimited;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "an integer or \"{UNLIMITED_SENTINEL}\"")
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(AmountOrUnlimited(Some(v)))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
                i64::try_from(v)
                    .map(|n| AmountOrUnlimited(Some(n)))
                    .map_err(|_| E::custom("amount out of range"))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                if v == UNLIMITED_SENTINEL {
                    Ok(AmountOrUnlimited(None))
                } else {
                    Err(E::invalid_value(serde::de::Unexpected::Str(v), &self))
                }
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}
