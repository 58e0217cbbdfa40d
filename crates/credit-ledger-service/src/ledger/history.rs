//! Historical balance reconstruction.

use chrono::NaiveDate;

use credit_ledger_core::{
    replay_daily_balances, Allowance, DailyBalance, HistoryWindow, LedgerError, Result,
    WorkspaceId,
};
use credit_ledger_store::TimeRange;

use super::CreditLedger;

impl CreditLedger {
    /// One balance per UTC day, ascending, for the current billing period.
    ///
    /// The requested days are clipped to the period; omitted bounds default
    /// to it. An unlimited plan, a missing subscription or a request entirely
    /// outside the period yields an empty series. Usage is loaded once for
    /// the clipped range and purchases once for the whole workspace.
    ///
    /// # Errors
    ///
    /// - `InvalidRange` if `start > end` or the request spans more than the
    ///   configured maximum number of days.
    /// - Storage errors.
    pub fn get_daily_balances(
        &self,
        workspace_id: &WorkspaceId,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<DailyBalance>> {
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(LedgerError::InvalidRange(format!(
                    "start {start} is after end {end}"
                )));
            }
            let days = (end - start).num_days() + 1;
            if days > self.history_max_days {
                return Err(LedgerError::InvalidRange(format!(
                    "{days} days requested, at most {} allowed",
                    self.history_max_days
                )));
            }
        }

        let Some((subscription, plan)) = self.balance_subscription(workspace_id)? else {
            return Ok(Vec::new());
        };
        let Allowance::Limited(limit) = subscription.credit_allowance(&plan) else {
            return Ok(Vec::new());
        };
        let Some(window) = HistoryWindow::clip(
            subscription.current_period_start,
            subscription.current_period_end,
            start,
            end,
        ) else {
            return Ok(Vec::new());
        };

        let usage = self
            .store
            .list_usage(workspace_id, Some(TimeRange::new(window.from, window.until)))?;
        let purchases = self.store.list_purchases(workspace_id)?;

        tracing::debug!(
            workspace_id = %workspace_id,
            first_day = %window.first_day,
            last_day = %window.last_day,
            days = window.days(),
            usage_records = usage.len(),
            purchases = purchases.len(),
            "Replaying daily balances"
        );

        Ok(replay_daily_balances(limit, &window, &usage, &purchases))
    }
}
