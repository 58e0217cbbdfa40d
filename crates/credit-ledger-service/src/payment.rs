//! The payment collaborator seam.
//!
//! The ledger only ever talks to the payment provider through
//! [`PaymentGateway`]. [`crate::stripe::StripeClient`] is the production
//! implementation; tests plug in a scripted fake.

use async_trait::async_trait;

use credit_ledger_core::WorkspaceId;

use crate::stripe::{Invoice, Price, StripeError, StripeSubscription};

/// A request to invoice and immediately charge a customer for credits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceRequest {
    /// Workspace being recharged (recorded as invoice metadata).
    pub workspace_id: WorkspaceId,
    /// Stripe customer charged.
    pub customer_id: String,
    /// Credits bought.
    pub credits: i64,
    /// Price per credit in the smallest currency unit.
    pub unit_amount: i64,
    /// Currency (e.g., "usd").
    pub currency: String,
    /// Line description; carries the smart recharge marker.
    pub description: String,
    /// Base idempotency key. Each provider call derives its own key from it.
    pub idempotency_key: String,
}

/// Calls the ledger makes into the payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// List a customer's subscriptions, newest first.
    async fn list_subscriptions(
        &self,
        customer_id: &str,
    ) -> Result<Vec<StripeSubscription>, StripeError>;

    /// Retrieve a price's amount, currency and interval.
    async fn get_price(&self, price_id: &str) -> Result<Price, StripeError>;

    /// Create an invoice item and invoice, finalize it and pay it.
    ///
    /// Selects a default payment method for the customer first if it has
    /// none. The pay step is never retried.
    async fn create_and_pay_invoice(&self, request: &InvoiceRequest)
        -> Result<Invoice, StripeError>;

    /// Make `payment_method_id` the customer's default for invoices.
    async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> Result<(), StripeError>;
}
