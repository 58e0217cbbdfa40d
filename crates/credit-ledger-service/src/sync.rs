//! Subscription state synchronization from Stripe webhooks.
//!
//! Local subscription rows follow the provider: every transition is driven
//! by an inbound event, never by a local timer. Delivery is at-least-once,
//! so each handler is idempotent. Subscription writes are upserts by
//! workspace and purchase credits are keyed by invoice or checkout session.

use std::sync::Arc;

use chrono::Utc;

use credit_ledger_core::{
    ExtraCreditPurchase, LedgerError, Plan, Result, Subscription, SubscriptionStatus, Workspace,
    WorkspaceId,
};
use credit_ledger_store::Store;

use crate::broadcast::{Broadcaster, PlanDetails, SubscriptionUpdate, WorkspaceEvent};
use crate::payment::PaymentGateway;
use crate::stripe::{from_unix, CheckoutSession, Invoice, StripeSubscription, WebhookEvent};

/// Metadata key carrying our workspace ID on Stripe objects.
pub const WORKSPACE_METADATA_KEY: &str = "workspace_id";

/// Metadata key carrying a credit quantity on Stripe objects.
pub const CREDITS_METADATA_KEY: &str = "credits";

/// What handling one webhook event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A subscription row was created or updated.
    SubscriptionSynced {
        /// Owning workspace.
        workspace_id: WorkspaceId,
        /// Status after the transition.
        status: SubscriptionStatus,
    },
    /// Extra credits were recorded.
    PurchaseRecorded {
        /// Credited workspace.
        workspace_id: WorkspaceId,
        /// Credits added.
        quantity: i64,
    },
    /// The payment was already credited.
    DuplicatePurchase {
        /// Dedup key of the existing purchase.
        dedup_key: String,
    },
    /// A recognized event with nothing to apply.
    Skipped {
        /// Why nothing was written.
        reason: &'static str,
    },
    /// An event type this service does not handle.
    Ignored,
}

impl SyncOutcome {
    const fn skipped(reason: &'static str) -> Self {
        Self::Skipped { reason }
    }
}

/// Result of resolving the workspace a webhook refers to.
enum WorkspaceLookup {
    Found(Workspace),
    Skip(&'static str),
}

/// Applies Stripe webhook events to the store.
pub struct SubscriptionSynchronizer {
    store: Arc<dyn Store>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl SubscriptionSynchronizer {
    /// Create a synchronizer without a payment gateway.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            store,
            gateway: None,
            broadcaster,
        }
    }

    /// Set the payment gateway used to fetch subscriptions and prices.
    #[must_use]
    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Apply one webhook event.
    ///
    /// # Errors
    ///
    /// - `Serialization` if the event object does not parse.
    /// - `Configuration` if a subscription checkout arrives without a gateway.
    /// - `ExternalService` if the provider lookup fails.
    /// - Storage errors.
    pub async fn handle_event(&self, event: &WebhookEvent) -> Result<SyncOutcome> {
        let object = &event.data.object;

        let outcome = match event.event_type.as_str() {
            "checkout.session.completed" => self.checkout_completed(parse(object)?).await?,
            "customer.subscription.updated" | "customer.subscription.deleted" => {
                self.subscription_changed(parse(object)?).await?
            }
            "invoice.payment_failed" => self.payment_failed(parse(object)?).await?,
            "invoice.paid" | "invoice.payment_succeeded" => self.invoice_paid(&parse(object)?)?,
            _ => {
                tracing::debug!(event_type = %event.event_type, "Unhandled Stripe event");
                SyncOutcome::Ignored
            }
        };

        if let SyncOutcome::Skipped { reason } = &outcome {
            tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                reason = %reason,
                "Stripe event skipped"
            );
        }

        Ok(outcome)
    }

    // =========================================================================
    // Checkout
    // =========================================================================

    async fn checkout_completed(&self, session: CheckoutSession) -> Result<SyncOutcome> {
        match session.mode.as_str() {
            "subscription" => self.checkout_subscription(session).await,
            "payment" => self.checkout_payment(&session),
            _ => Ok(SyncOutcome::skipped("unsupported checkout mode")),
        }
    }

    async fn checkout_subscription(&self, session: CheckoutSession) -> Result<SyncOutcome> {
        let mut workspace = match self.resolve_workspace(
            session.client_reference_id.as_deref(),
            &session.metadata,
            session.customer.as_deref(),
        )? {
            WorkspaceLookup::Found(workspace) => workspace,
            WorkspaceLookup::Skip(reason) => return Ok(SyncOutcome::skipped(reason)),
        };
        let (Some(customer_id), Some(stripe_subscription_id)) =
            (session.customer, session.subscription)
        else {
            return Ok(SyncOutcome::skipped("checkout has no customer or subscription"));
        };

        let gateway = self.gateway()?;
        let Some(provider) = gateway
            .list_subscriptions(&customer_id)
            .await?
            .into_iter()
            .find(|s| s.id == stripe_subscription_id)
        else {
            return Ok(SyncOutcome::skipped("subscription not found at provider"));
        };

        let Some(price_id) = provider.price_id() else {
            return Ok(SyncOutcome::skipped("subscription has no price"));
        };
        let Some(plan) = self.store.find_plan_by_price_id(price_id)? else {
            tracing::warn!(
                workspace_id = %workspace.id,
                price_id = %price_id,
                "No plan for checkout price"
            );
            return Ok(SyncOutcome::skipped("unknown price"));
        };

        match workspace.stripe_customer_id.as_deref() {
            None => {
                workspace.stripe_customer_id = Some(customer_id.clone());
                workspace.updated_at = Utc::now();
                self.store.put_workspace(&workspace)?;
                tracing::info!(
                    workspace_id = %workspace.id,
                    customer_id = %customer_id,
                    "Recorded Stripe customer on workspace"
                );
            }
            Some(existing) if existing != customer_id => {
                tracing::warn!(
                    workspace_id = %workspace.id,
                    existing = %existing,
                    customer_id = %customer_id,
                    "Checkout customer differs from workspace customer"
                );
            }
            Some(_) => {}
        }

        let mut subscription = match self.store.get_subscription(&workspace.id)? {
            Some(mut existing) => {
                existing.plan_id = plan.id;
                existing
            }
            None => {
                let (start, end) = provider.period().ok_or_else(|| {
                    LedgerError::Serialization(format!(
                        "subscription {} has no valid period",
                        provider.id
                    ))
                })?;
                Subscription::new(
                    workspace.id,
                    plan.id,
                    SubscriptionStatus::from_provider(&provider.status),
                    start,
                    end,
                )
            }
        };
        apply_provider_state(&mut subscription, &provider);
        self.store.put_subscription(&subscription)?;

        tracing::info!(
            workspace_id = %workspace.id,
            subscription_id = %subscription.id,
            plan = %plan.name,
            status = ?subscription.status,
            "Subscription upserted from checkout"
        );

        if let Some(payment_method) = provider.default_payment_method.as_deref() {
            if let Err(e) = gateway
                .set_default_payment_method(&customer_id, payment_method)
                .await
            {
                tracing::warn!(
                    customer_id = %customer_id,
                    error = %e,
                    "Failed to set default payment method"
                );
            }
        }

        let outcome = SyncOutcome::SubscriptionSynced {
            workspace_id: workspace.id,
            status: subscription.status,
        };
        self.broadcast_subscription(subscription, plan).await;
        Ok(outcome)
    }

    fn checkout_payment(&self, session: &CheckoutSession) -> Result<SyncOutcome> {
        if session.payment_status.as_deref() != Some("paid") {
            return Ok(SyncOutcome::skipped("checkout not paid"));
        }
        let workspace = match self.resolve_workspace(
            session.client_reference_id.as_deref(),
            &session.metadata,
            session.customer.as_deref(),
        )? {
            WorkspaceLookup::Found(workspace) => workspace,
            WorkspaceLookup::Skip(reason) => return Ok(SyncOutcome::skipped(reason)),
        };
        let Some(quantity) = metadata_i64(&session.metadata, CREDITS_METADATA_KEY).filter(|q| *q > 0)
        else {
            return Ok(SyncOutcome::skipped("checkout has no credit quantity"));
        };

        self.record_purchase(&ExtraCreditPurchase::manual(
            workspace.id,
            quantity,
            Some(session.id.clone()),
        ))
    }

    // =========================================================================
    // Subscription lifecycle
    // =========================================================================

    async fn subscription_changed(&self, provider: StripeSubscription) -> Result<SyncOutcome> {
        let Some(mut subscription) = self.store.find_subscription_by_stripe_id(&provider.id)? else {
            return Ok(SyncOutcome::skipped("unknown subscription"));
        };

        if let Some(plan) = provider
            .price_id()
            .map(|price_id| self.store.find_plan_by_price_id(price_id))
            .transpose()?
            .flatten()
        {
            subscription.plan_id = plan.id;
        }
        apply_provider_state(&mut subscription, &provider);
        self.store.put_subscription(&subscription)?;

        tracing::info!(
            workspace_id = %subscription.workspace_id,
            stripe_subscription_id = %provider.id,
            status = ?subscription.status,
            cancel_at_period_end = subscription.cancel_at_period_end,
            "Subscription updated"
        );

        self.finish_transition(subscription).await
    }

    async fn payment_failed(&self, invoice: Invoice) -> Result<SyncOutcome> {
        let Some(stripe_subscription_id) = invoice.subscription.as_deref() else {
            return Ok(SyncOutcome::skipped("invoice has no subscription"));
        };
        let Some(mut subscription) = self
            .store
            .find_subscription_by_stripe_id(stripe_subscription_id)?
        else {
            return Ok(SyncOutcome::skipped("unknown subscription"));
        };

        subscription.status = SubscriptionStatus::PastDue;
        subscription.updated_at = Utc::now();
        self.store.put_subscription(&subscription)?;

        tracing::warn!(
            workspace_id = %subscription.workspace_id,
            invoice_id = %invoice.id,
            "Invoice payment failed, subscription past due"
        );

        self.finish_transition(subscription).await
    }

    async fn finish_transition(&self, subscription: Subscription) -> Result<SyncOutcome> {
        let plan = self
            .store
            .get_plan(&subscription.plan_id)?
            .ok_or_else(|| LedgerError::not_found("plan", subscription.plan_id))?;
        let outcome = SyncOutcome::SubscriptionSynced {
            workspace_id: subscription.workspace_id,
            status: subscription.status,
        };
        self.broadcast_subscription(subscription, plan).await;
        Ok(outcome)
    }

    // =========================================================================
    // Smart recharge invoices
    // =========================================================================

    fn invoice_paid(&self, invoice: &Invoice) -> Result<SyncOutcome> {
        let Some(line) = invoice.smart_recharge_line() else {
            return Ok(SyncOutcome::skipped("not a smart recharge invoice"));
        };
        let Some(quantity) = line
            .quantity
            .or_else(|| metadata_i64(&invoice.metadata, CREDITS_METADATA_KEY))
            .filter(|q| *q > 0)
        else {
            return Ok(SyncOutcome::skipped("recharge invoice has no credit quantity"));
        };
        let workspace =
            match self.resolve_workspace(None, &invoice.metadata, invoice.customer.as_deref())? {
                WorkspaceLookup::Found(workspace) => workspace,
                WorkspaceLookup::Skip(reason) => return Ok(SyncOutcome::skipped(reason)),
            };

        let triggered_at = from_unix(invoice.created).unwrap_or_else(Utc::now);
        self.record_purchase(&ExtraCreditPurchase::automatic(
            workspace.id,
            quantity,
            invoice.id.clone(),
            triggered_at,
        ))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn gateway(&self) -> Result<&Arc<dyn PaymentGateway>> {
        self.gateway
            .as_ref()
            .ok_or_else(|| LedgerError::Configuration("payment gateway not configured".into()))
    }

    /// Find the workspace by explicit reference, metadata, then customer.
    fn resolve_workspace(
        &self,
        reference: Option<&str>,
        metadata: &serde_json::Value,
        customer_id: Option<&str>,
    ) -> Result<WorkspaceLookup> {
        let explicit = reference.or_else(|| {
            metadata
                .get(WORKSPACE_METADATA_KEY)
                .and_then(|v| v.as_str())
        });

        let found = if let Some(id) = explicit {
            let Ok(workspace_id) = id.parse::<WorkspaceId>() else {
                tracing::warn!(reference = %id, "Webhook carries a malformed workspace reference");
                return Ok(WorkspaceLookup::Skip("invalid workspace reference"));
            };
            self.store.get_workspace(&workspace_id)?
        } else if let Some(customer_id) = customer_id {
            self.store.find_workspace_by_customer(customer_id)?
        } else {
            None
        };

        Ok(found.map_or(WorkspaceLookup::Skip("unknown workspace"), WorkspaceLookup::Found))
    }

    fn record_purchase(&self, purchase: &ExtraCreditPurchase) -> Result<SyncOutcome> {
        if self.store.insert_purchase_if_absent(purchase)? {
            tracing::info!(
                workspace_id = %purchase.workspace_id,
                quantity = purchase.quantity,
                source = ?purchase.source,
                "Extra credits purchased"
            );
            return Ok(SyncOutcome::PurchaseRecorded {
                workspace_id: purchase.workspace_id,
                quantity: purchase.quantity,
            });
        }

        let dedup_key = purchase.dedup_key().unwrap_or_default();
        tracing::info!(
            workspace_id = %purchase.workspace_id,
            dedup_key = %dedup_key,
            "Purchase already recorded"
        );
        Ok(SyncOutcome::DuplicatePurchase { dedup_key })
    }

    async fn broadcast_subscription(&self, subscription: Subscription, plan: Plan) {
        let price = match (&self.gateway, plan.stripe_price_id.as_deref()) {
            (Some(gateway), Some(price_id)) => match gateway.get_price(price_id).await {
                Ok(price) => Some(price),
                Err(e) => {
                    tracing::warn!(price_id = %price_id, error = %e, "Failed to fetch plan price");
                    None
                }
            },
            _ => None,
        };

        self.broadcaster.send_to_workspace(
            subscription.workspace_id,
            WorkspaceEvent::SubscriptionUpdated(Box::new(SubscriptionUpdate {
                subscription,
                plan: PlanDetails { plan, price },
            })),
        );
    }
}

/// Copy provider status, period, trial and cancellation fields onto a row.
fn apply_provider_state(subscription: &mut Subscription, provider: &StripeSubscription) {
    subscription.status = SubscriptionStatus::from_provider(&provider.status);
    if let Some((start, end)) = provider.period() {
        subscription.current_period_start = start;
        subscription.current_period_end = end;
    }
    subscription.trial_start = provider.trial_start.and_then(from_unix);
    subscription.trial_end = provider.trial_end.and_then(from_unix);
    subscription.cancel_at_period_end = provider.cancel_at_period_end;
    subscription.canceled_at = provider.canceled_at.and_then(from_unix);
    subscription.stripe_subscription_id = Some(provider.id.clone());
    subscription.updated_at = Utc::now();
}

fn parse<T: serde::de::DeserializeOwned>(object: &serde_json::Value) -> Result<T> {
    T::deserialize(object).map_err(|e| LedgerError::Serialization(e.to_string()))
}

/// Read an integer from Stripe metadata, where values are strings.
fn metadata_i64(metadata: &serde_json::Value, key: &str) -> Option<i64> {
    let value = metadata.get(key)?;
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}
