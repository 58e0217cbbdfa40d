//! Daily balance replay.
//!
//! Rebuilds a per-day balance curve from usage records and purchases. The
//! replay is a pure function of its inputs.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::credits::ExtraCreditPurchase;
use crate::usage::{CreditPool, UsageRecord};

/// Balance of both pools at the end of one UTC calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyBalance {
    /// The UTC day.
    pub date: NaiveDate,
    /// Plan credits left at end of day.
    pub plan_credits_remaining: i64,
    /// Extra credits left at end of day.
    pub extra_credits_remaining: i64,
}

/// A history query window, clipped to a billing period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryWindow {
    /// First reported day.
    pub first_day: NaiveDate,
    /// Last reported day (inclusive).
    pub last_day: NaiveDate,
    /// Lower bound for loading usage (inclusive).
    pub from: DateTime<Utc>,
    /// Upper bound for loading usage (exclusive).
    pub until: DateTime<Utc>,
}

impl HistoryWindow {
    /// Clip the requested days to `[period_start, period_end)`.
    ///
    /// Missing bounds default to the period. Returns `None` when nothing of
    /// the request overlaps the period.
    #[must_use]
    pub fn clip(
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Option<Self> {
        if period_end <= period_start {
            return None;
        }

        let period_first_day = period_start.date_naive();
        let period_last_day = (period_end - Duration::nanoseconds(1)).date_naive();

        let first_day = start.map_or(period_first_day, |d| d.max(period_first_day));
        let last_day = end.map_or(period_last_day, |d| d.min(period_last_day));
        if first_day > last_day {
            return None;
        }

        let from = start_of_day(first_day).max(period_start);
        let until = last_day
            .succ_opt()
            .map_or(period_end, start_of_day)
            .min(period_end);

        Some(Self {
            first_day,
            last_day,
            from,
            until,
        })
    }

    /// Number of days in the window.
    #[must_use]
    pub fn days(&self) -> i64 {
        (self.last_day - self.first_day).num_days() + 1
    }
}

/// Midnight UTC at the start of `date`.
#[must_use]
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
}

/// Replay usage and purchases into one balance per day of `window`.
///
/// `usage` should hold the records inside the window; `purchases` the
/// workspace's full purchase history. Extra credits available on a day are
/// all purchases made on or before it.
#[must_use]
pub fn replay_daily_balances(
    plan_limit: i64,
    window: &HistoryWindow,
    usage: &[UsageRecord],
    purchases: &[ExtraCreditPurchase],
) -> Vec<DailyBalance> {
    let mut per_day: BTreeMap<NaiveDate, (i64, i64)> = BTreeMap::new();
    for record in usage {
        let entry = per_day.entry(record.created_at.date_naive()).or_default();
        match record.used_from {
            CreditPool::Plan => entry.0 += record.quantity,
            CreditPool::Extra => entry.1 += record.quantity,
        }
    }

    let mut plan_used = 0;
    let mut extra_used = 0;
    let mut balances = Vec::new();

    for day in window.first_day.iter_days() {
        if day > window.last_day {
            break;
        }

        if let Some((plan, extra)) = per_day.get(&day) {
            plan_used += plan;
            extra_used += extra;
        }

        let extra_available: i64 = purchases
            .iter()
            .filter(|p| p.created_at.date_naive() <= day)
            .map(|p| p.quantity)
            .sum();

        balances.push(DailyBalance {
            date: day,
            plan_credits_remaining: (plan_limit - plan_used).max(0),
            extra_credits_remaining: (extra_available - extra_used).max(0),
        });
    }

    balances
}
