//! Stripe API types.
//!
//! Only the fields the ledger reads are modelled; everything else in Stripe's
//! payloads is ignored on deserialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marker prefix on invoice lines created by smart recharge.
///
/// `invoice.paid` webhooks are matched against it to credit the recharge
/// even when the synchronous path never recorded the purchase.
pub const SMART_RECHARGE_MARKER: &str = "Smart recharge";

/// Description put on a smart recharge invoice line.
#[must_use]
pub fn smart_recharge_description(credits: i64) -> String {
    format!("{SMART_RECHARGE_MARKER}: {credits} credits")
}

/// Convert a Stripe unix timestamp.
#[must_use]
pub fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

/// Stripe customer object.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Customer {
    /// Stripe customer ID.
    pub id: String,
    /// Invoice defaults, including the default payment method.
    #[serde(default)]
    pub invoice_settings: Option<InvoiceSettings>,
}

impl Customer {
    /// The customer's default payment method for invoices, if any.
    #[must_use]
    pub fn default_payment_method(&self) -> Option<&str> {
        self.invoice_settings
            .as_ref()
            .and_then(|s| s.default_payment_method.as_deref())
    }
}

/// Customer invoice defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceSettings {
    /// Payment method charged when an invoice is paid.
    #[serde(default)]
    pub default_payment_method: Option<String>,
}

/// Stripe payment method (only the ID is used).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentMethod {
    /// Payment method ID.
    pub id: String,
}

/// Stripe price object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Price ID.
    pub id: String,
    /// Amount in the smallest currency unit.
    #[serde(default)]
    pub unit_amount: Option<i64>,
    /// Currency (e.g., "usd").
    #[serde(default)]
    pub currency: String,
    /// Billing interval for recurring prices.
    #[serde(default)]
    pub recurring: Option<Recurring>,
}

/// Recurring component of a price.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurring {
    /// "day", "week", "month" or "year".
    pub interval: String,
    /// Number of intervals between billings.
    #[serde(default = "default_interval_count")]
    pub interval_count: i64,
}

const fn default_interval_count() -> i64 {
    1
}

/// Stripe subscription object.
///
/// Also the `data.object` of `customer.subscription.*` webhooks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StripeSubscription {
    /// Subscription ID.
    pub id: String,
    /// Customer ID.
    #[serde(default)]
    pub customer: String,
    /// Provider status vocabulary (`active`, `trialing`, ...).
    #[serde(default)]
    pub status: String,
    /// Start of the current period (unix).
    #[serde(default)]
    pub current_period_start: i64,
    /// End of the current period (unix).
    #[serde(default)]
    pub current_period_end: i64,
    /// Trial start (unix).
    #[serde(default)]
    pub trial_start: Option<i64>,
    /// Trial end (unix).
    #[serde(default)]
    pub trial_end: Option<i64>,
    /// Whether the subscription ends with the current period.
    #[serde(default)]
    pub cancel_at_period_end: bool,
    /// When cancellation was requested (unix).
    #[serde(default)]
    pub canceled_at: Option<i64>,
    /// Payment method collected by the checkout.
    #[serde(default)]
    pub default_payment_method: Option<String>,
    /// Subscription items; the first item's price identifies the plan.
    #[serde(default)]
    pub items: StripeList<SubscriptionItem>,
    /// Metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl StripeSubscription {
    /// Price of the first subscription item.
    #[must_use]
    pub fn price_id(&self) -> Option<&str> {
        self.items.data.first().map(|item| item.price.id.as_str())
    }

    /// Current period bounds, if present and well ordered.
    #[must_use]
    pub fn period(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        from_unix(self.current_period_start)
            .zip(from_unix(self.current_period_end))
            .filter(|(start, end)| start < end)
    }
}

/// One line of a subscription.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionItem {
    /// Item ID.
    #[serde(default)]
    pub id: String,
    /// The item's price.
    pub price: Price,
}

/// Stripe Checkout session object.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutSession {
    /// Session ID.
    pub id: String,
    /// `subscription`, `payment` or `setup`.
    #[serde(default)]
    pub mode: String,
    /// Payment status (`paid`, `unpaid`, `no_payment_required`).
    #[serde(default)]
    pub payment_status: Option<String>,
    /// Customer ID.
    #[serde(default)]
    pub customer: Option<String>,
    /// Subscription created by a subscription-mode checkout.
    #[serde(default)]
    pub subscription: Option<String>,
    /// Client reference ID (our workspace ID).
    #[serde(default)]
    pub client_reference_id: Option<String>,
    /// Metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Stripe invoice object.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Invoice {
    /// Invoice ID.
    pub id: String,
    /// Customer ID.
    #[serde(default)]
    pub customer: Option<String>,
    /// Subscription billed by this invoice, if any.
    #[serde(default)]
    pub subscription: Option<String>,
    /// `draft`, `open`, `paid`, `uncollectible` or `void`.
    #[serde(default)]
    pub status: Option<String>,
    /// Amount paid, in the smallest currency unit.
    #[serde(default)]
    pub amount_paid: i64,
    /// Created timestamp (unix).
    #[serde(default)]
    pub created: i64,
    /// Invoice lines.
    #[serde(default)]
    pub lines: StripeList<InvoiceLine>,
    /// Metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Invoice {
    /// The smart recharge line, if this invoice was created by one.
    #[must_use]
    pub fn smart_recharge_line(&self) -> Option<&InvoiceLine> {
        self.lines.data.iter().find(|line| {
            line.description
                .as_deref()
                .is_some_and(|d| d.starts_with(SMART_RECHARGE_MARKER))
        })
    }
}

/// One line of an invoice.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceLine {
    /// Line ID.
    #[serde(default)]
    pub id: String,
    /// Line description.
    #[serde(default)]
    pub description: Option<String>,
    /// Quantity (credits, for smart recharge lines).
    #[serde(default)]
    pub quantity: Option<i64>,
    /// Line amount.
    #[serde(default)]
    pub amount: i64,
}

/// Stripe list response wrapper.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeList<T> {
    /// Data items.
    pub data: Vec<T>,
    /// Whether there are more items.
    #[serde(default)]
    pub has_more: bool,
}

impl<T> Default for StripeList<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            has_more: false,
        }
    }
}

/// Stripe webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Event ID.
    pub id: String,
    /// Event type (e.g., "checkout.session.completed").
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event data.
    pub data: WebhookEventData,
    /// Created timestamp (unix).
    #[serde(default)]
    pub created: i64,
}

/// Webhook event data container.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    /// The event object.
    pub object: serde_json::Value,
}

/// Stripe API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorResponse {
    /// Error details.
    pub error: StripeErrorDetail,
}

/// Stripe error detail.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorDetail {
    /// Error type.
    #[serde(rename = "type")]
    pub error_type: String,
    /// Error message.
    #[serde(default)]
    pub message: String,
    /// Error code.
    #[serde(default)]
    pub code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscription_parses_webhook_object() {
        let sub: StripeSubscription = serde_json::from_value(json!({
            "id": "sub_123",
            "object": "subscription",
            "customer": "cus_1",
            "status": "trialing",
            "current_period_start": 1_704_067_200,
            "current_period_end": 1_706_745_600,
            "trial_end": 1_705_276_800,
            "cancel_at_period_end": false,
            "items": {
                "object": "list",
                "data": [{"id": "si_1", "price": {"id": "price_pro", "currency": "usd", "unit_amount": 2000}}],
                "has_more": false
            }
        }))
        .unwrap();

        assert_eq!(sub.price_id(), Some("price_pro"));
        let (start, end) = sub.period().unwrap();
        assert_eq!(start.to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2024-02-01T00:00:00+00:00");
        assert_eq!(sub.trial_end, Some(1_705_276_800));
    }

    #[test]
    fn recharge_line_is_found_by_marker() {
        let invoice: Invoice = serde_json::from_value(json!({
            "id": "in_1",
            "customer": "cus_1",
            "lines": {"data": [
                {"id": "il_0", "description": "Pro plan", "quantity": 1},
                {"id": "il_1", "description": smart_recharge_description(200), "quantity": 200}
            ]}
        }))
        .unwrap();

        let line = invoice.smart_recharge_line().unwrap();
        assert_eq!(line.id, "il_1");
        assert_eq!(line.quantity, Some(200));
    }

    #[test]
    fn plain_invoice_has_no_recharge_line() {
        let invoice: Invoice = serde_json::from_value(json!({"id": "in_2"})).unwrap();
        assert!(invoice.smart_recharge_line().is_none());
    }

    #[test]
    fn price_interval_count_defaults_to_one() {
        let price: Price = serde_json::from_value(json!({
            "id": "price_1",
            "currency": "usd",
            "unit_amount": 900,
            "recurring": {"interval": "month"}
        }))
        .unwrap();
        assert_eq!(price.recurring.unwrap().interval_count, 1);
    }
}
