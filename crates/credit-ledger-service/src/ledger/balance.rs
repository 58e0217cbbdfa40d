//! Balance calculation.

use credit_ledger_core::{CreditBalance, LedgerError, Plan, Result, Subscription, WorkspaceId};
use credit_ledger_store::TimeRange;

use super::CreditLedger;

impl CreditLedger {
    /// Remaining plan and extra credits of a workspace.
    ///
    /// Only an active, trialing or canceled subscription contributes plan
    /// credits; without one the plan pool reads zero. Plan usage is counted
    /// inside the current billing period, extra usage and purchases over all
    /// time.
    ///
    /// # Errors
    ///
    /// Storage errors, or `NotFound` if the subscription's plan is missing.
    pub fn get_remaining_credits(&self, workspace_id: &WorkspaceId) -> Result<CreditBalance> {
        let plan = self
            .balance_subscription(workspace_id)?
            .map(|(subscription, plan)| {
                (
                    subscription.credit_allowance(&plan),
                    TimeRange::new(
                        subscription.current_period_start,
                        subscription.current_period_end,
                    ),
                )
            });

        Ok(self.store.credit_balance(workspace_id, plan)?)
    }

    /// The workspace's subscription and plan if the subscription counts for
    /// balance reads (active, trial, canceled).
    pub(super) fn balance_subscription(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<(Subscription, Plan)>> {
        let Some(subscription) = self
            .store
            .get_subscription(workspace_id)?
            .filter(|s| s.status.counts_for_balance())
        else {
            return Ok(None);
        };

        let plan = self.plan_of(&subscription)?;
        Ok(Some((subscription, plan)))
    }

    pub(super) fn plan_of(&self, subscription: &Subscription) -> Result<Plan> {
        self.store
            .get_plan(&subscription.plan_id)?
            .ok_or_else(|| LedgerError::not_found("plan", subscription.plan_id))
    }
}
