//! Smart recharge.
//!
//! When a workspace's combined balance drops below its configured threshold
//! the controller invoices and charges the Stripe customer for the configured
//! amount of extra credits. At most one recharge per workspace runs at a time.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use ulid::Ulid;

use credit_ledger_core::{CreditBalance, ExtraCreditPurchase, LedgerError, Result, WorkspaceId};

use super::CreditLedger;
use crate::broadcast::CreditsUpdate;
use crate::payment::InvoiceRequest;
use crate::stripe::smart_recharge_description;

/// Price charged per recharged credit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RechargePricing {
    /// Price per credit in the smallest currency unit.
    pub unit_amount: i64,
    /// Currency (e.g., "usd").
    pub currency: String,
}

impl Default for RechargePricing {
    fn default() -> Self {
        Self {
            unit_amount: 1,
            currency: "usd".into(),
        }
    }
}

/// Result of a smart recharge evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RechargeOutcome {
    /// No active setting, or the balance is at or above the threshold.
    NotNeeded,
    /// Another recharge for the workspace is still running.
    InProgress,
    /// Credits were bought.
    Purchased {
        /// Paid Stripe invoice.
        invoice_id: String,
        /// Credits added.
        quantity: i64,
    },
    /// The recharge was attempted and failed.
    Failed {
        /// Error description.
        reason: String,
    },
}

/// Membership of a workspace in the in-flight set, released on drop.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<WorkspaceId>>,
    workspace_id: WorkspaceId,
}

impl<'a> InFlight<'a> {
    /// Claim `workspace_id`, or `None` if a recharge already holds it.
    fn claim(set: &'a Mutex<HashSet<WorkspaceId>>, workspace_id: WorkspaceId) -> Result<Option<Self>> {
        let inserted = set
            .lock()
            .map_err(|_| LedgerError::Storage("recharge gate poisoned".into()))?
            .insert(workspace_id);

        Ok(inserted.then_some(Self { set, workspace_id }))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.workspace_id);
        }
    }
}

impl CreditLedger {
    /// Buy extra credits if `remaining` is below the workspace's threshold.
    ///
    /// On success the purchase is recorded under the invoice's dedup key (the
    /// `invoice.paid` webhook for the same invoice is then a no-op) and fresh
    /// balances are broadcast. On failure nothing is written locally.
    ///
    /// # Errors
    ///
    /// - `Configuration` if the workspace has no Stripe customer or no
    ///   payment gateway is configured.
    /// - `NotFound` if the workspace is missing.
    /// - `ExternalService` if invoicing or payment fails.
    /// - Storage errors.
    pub async fn maybe_recharge(
        &self,
        workspace_id: &WorkspaceId,
        remaining: CreditBalance,
    ) -> Result<RechargeOutcome> {
        let Some(setting) = self
            .store
            .get_recharge_setting(workspace_id)?
            .filter(|s| s.active)
        else {
            return Ok(RechargeOutcome::NotNeeded);
        };

        if !remaining.is_below(setting.threshold) {
            return Ok(RechargeOutcome::NotNeeded);
        }

        let Some(_in_flight) = InFlight::claim(&self.recharges_in_flight, *workspace_id)? else {
            tracing::info!(workspace_id = %workspace_id, "Smart recharge already in progress");
            return Ok(RechargeOutcome::InProgress);
        };

        let workspace = self
            .store
            .get_workspace(workspace_id)?
            .ok_or_else(|| LedgerError::not_found("workspace", workspace_id))?;
        let customer_id = workspace.stripe_customer_id.ok_or_else(|| {
            LedgerError::Configuration(format!("workspace {workspace_id} has no Stripe customer"))
        })?;
        let gateway = self
            .gateway
            .as_ref()
            .ok_or_else(|| LedgerError::Configuration("payment gateway not configured".into()))?;

        let triggered_at = Utc::now();
        let request = InvoiceRequest {
            workspace_id: *workspace_id,
            customer_id,
            credits: setting.recharge_amount,
            unit_amount: self.pricing.unit_amount,
            currency: self.pricing.currency.clone(),
            description: smart_recharge_description(setting.recharge_amount),
            idempotency_key: format!("recharge-{}", Ulid::new()),
        };

        tracing::info!(
            workspace_id = %workspace_id,
            combined = ?remaining.combined(),
            threshold = setting.threshold,
            amount = setting.recharge_amount,
            "Triggering smart recharge"
        );

        let invoice = gateway.create_and_pay_invoice(&request).await?;

        let purchase = ExtraCreditPurchase::automatic(
            *workspace_id,
            setting.recharge_amount,
            invoice.id.clone(),
            triggered_at,
        );
        if !self.store.insert_purchase_if_absent(&purchase)? {
            tracing::debug!(
                workspace_id = %workspace_id,
                invoice_id = %invoice.id,
                "Recharge already credited by webhook"
            );
        }

        let fresh = self.get_remaining_credits(workspace_id)?;
        self.broadcast_credits(*workspace_id, CreditsUpdate::from(fresh));

        Ok(RechargeOutcome::Purchased {
            invoice_id: invoice.id,
            quantity: setting.recharge_amount,
        })
    }
}
