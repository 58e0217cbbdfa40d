//! Usage recording.

use serde::Serialize;

use credit_ledger_core::{
    AgentId, ChargeContext, CorrelationId, CreditBalance, LedgerError, Result, UsageRecord,
};
use credit_ledger_store::{ChargeDraft, TimeRange};

use super::{CreditLedger, RechargeOutcome};
use crate::broadcast::CreditsUpdate;

/// What a successful charge did.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeReceipt {
    /// Shared by every record written for this charge.
    pub correlation_id: CorrelationId,
    /// Credit cost of the invocation.
    pub cost: i64,
    /// The one or two usage records written.
    pub records: Vec<UsageRecord>,
    /// Balance after the charge, as broadcast.
    pub balance: CreditBalance,
    /// What smart recharge did afterwards.
    pub recharge: RechargeOutcome,
}

impl CreditLedger {
    /// Charge the agent's workspace for one invocation of its preferred model.
    ///
    /// The plan pool is drained first and the shortfall spills into the extra
    /// pool. The records are written atomically under the workspace's charge
    /// lock. Afterwards the post-charge balance is broadcast and smart
    /// recharge is evaluated; a recharge failure is logged and reported in
    /// the receipt, it never fails the charge.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the agent, its settings, the workspace, the
    ///   subscription or the plan is missing. Nothing is written.
    /// - `UnknownModel` if the preferred model has no cost.
    /// - `InsufficientCredits` if the debit policy rejects the overdraft.
    /// - Storage errors.
    pub async fn charge(
        &self,
        agent_id: &AgentId,
        metadata: Option<serde_json::Value>,
    ) -> Result<ChargeReceipt> {
        let agent = self
            .store
            .get_agent(agent_id)?
            .ok_or_else(|| LedgerError::not_found("agent", agent_id))?;
        let settings = agent
            .settings
            .ok_or_else(|| LedgerError::not_found("agent settings", agent_id))?;
        let workspace = self
            .store
            .get_workspace(&agent.workspace_id)?
            .ok_or_else(|| LedgerError::not_found("workspace", agent.workspace_id))?;
        let subscription = self
            .store
            .get_subscription(&workspace.id)?
            .filter(|s| self.policy.charge_subscription.admits(s.status))
            .ok_or_else(|| LedgerError::not_found("subscription", workspace.id))?;
        let plan = self.plan_of(&subscription)?;

        let cost = self.costs.cost_of(&settings.preferred_model)?;

        let draft = ChargeDraft::new(
            ChargeContext {
                workspace_id: workspace.id,
                subscription_id: subscription.id,
                agent_id: agent.id,
                model: settings.preferred_model,
                metadata: metadata.unwrap_or(serde_json::Value::Null),
            },
            cost,
            subscription.credit_allowance(&plan),
            TimeRange::new(
                subscription.current_period_start,
                subscription.current_period_end,
            ),
        )
        .with_extra_debit(self.policy.extra_debit);

        let outcome = self.store.record_charge(&draft)?;

        tracing::info!(
            workspace_id = %workspace.id,
            agent_id = %agent.id,
            model = %draft.context.model,
            cost,
            plan = outcome.split.plan,
            extra = outcome.split.extra,
            correlation_id = %outcome.correlation_id,
            "Charge recorded"
        );

        self.broadcast_credits(workspace.id, CreditsUpdate::from(outcome.balance_after));

        let recharge = match self.maybe_recharge(&workspace.id, outcome.balance_after).await {
            Ok(recharge) => recharge,
            Err(e) => {
                tracing::warn!(
                    workspace_id = %workspace.id,
                    error = %e,
                    "Smart recharge failed after charge"
                );
                RechargeOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        Ok(ChargeReceipt {
            correlation_id: outcome.correlation_id,
            cost,
            records: outcome.records,
            balance: outcome.balance_after,
            recharge,
        })
    }
}
