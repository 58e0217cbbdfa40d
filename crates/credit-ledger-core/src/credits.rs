//! Extra credit purchases and smart recharge settings.
//!
//! Purchases are the append-only credit side of the extra pool. Extra
//! credits never expire, so balances over this pool are all-time sums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PurchaseId, WorkspaceId};

// ============================================================================
// Constants
// ============================================================================

/// Default smart recharge threshold, in credits.
pub const DEFAULT_RECHARGE_THRESHOLD: i64 = 100;

/// Default smart recharge amount, in credits.
pub const DEFAULT_RECHARGE_AMOUNT: i64 = 1000;

/// How an extra credit purchase was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseSource {
    /// One-time checkout initiated by a user.
    Manual,
    /// Smart recharge.
    Automatic,
}

/// Provider references attached to a purchase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseMetadata {
    /// When a smart recharge was triggered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_at: Option<DateTime<Utc>>,

    /// Stripe invoice that paid for an automatic purchase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_invoice_id: Option<String>,

    /// Stripe checkout session that paid for a manual purchase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout_session_id: Option<String>,
}

/// An immutable purchase of extra credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraCreditPurchase {
    /// Purchase ID (ULID, ordered by `created_at`).
    pub id: PurchaseId,

    /// The workspace credited.
    pub workspace_id: WorkspaceId,

    /// Credits purchased.
    pub quantity: i64,

    /// Manual or automatic.
    pub source: PurchaseSource,

    /// Provider references.
    pub metadata: PurchaseMetadata,

    /// When the purchase was recorded.
    pub created_at: DateTime<Utc>,
}

impl ExtraCreditPurchase {
    /// A manual purchase paid through a checkout session.
    #[must_use]
    pub fn manual(
        workspace_id: WorkspaceId,
        quantity: i64,
        checkout_session_id: Option<String>,
    ) -> Self {
        Self::at(
            workspace_id,
            quantity,
            PurchaseSource::Manual,
            PurchaseMetadata {
                checkout_session_id,
                ..PurchaseMetadata::default()
            },
            Utc::now(),
        )
    }

    /// An automatic purchase paid by a smart recharge invoice.
    #[must_use]
    pub fn automatic(
        workspace_id: WorkspaceId,
        quantity: i64,
        provider_invoice_id: impl Into<String>,
        triggered_at: DateTime<Utc>,
    ) -> Self {
        Self::at(
            workspace_id,
            quantity,
            PurchaseSource::Automatic,
            PurchaseMetadata {
                triggered_at: Some(triggered_at),
                provider_invoice_id: Some(provider_invoice_id.into()),
                checkout_session_id: None,
            },
            Utc::now(),
        )
    }

    /// A purchase recorded at an explicit time.
    #[must_use]
    pub fn at(
        workspace_id: WorkspaceId,
        quantity: i64,
        source: PurchaseSource,
        metadata: PurchaseMetadata,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PurchaseId::generate_at(created_at),
            workspace_id,
            quantity,
            source,
            metadata,
            created_at,
        }
    }

    /// Key used to credit a provider payment at most once.
    ///
    /// Invoice IDs and checkout session IDs come from disjoint provider
    /// namespaces, so they are prefixed rather than compared by source.
    #[must_use]
    pub fn dedup_key(&self) -> Option<String> {
        self.metadata
            .provider_invoice_id
            .as_ref()
            .map(|id| format!("invoice:{id}"))
            .or_else(|| {
                self.metadata
                    .checkout_session_id
                    .as_ref()
                    .map(|id| format!("checkout:{id}"))
            })
    }
}

/// Smart recharge configuration for a workspace.
///
/// When active, a charge that leaves the combined balance below `threshold`
/// buys `recharge_amount` extra credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartRechargeSetting {
    /// The workspace this setting belongs to.
    pub workspace_id: WorkspaceId,

    /// Recharge when plan + extra credits drop below this.
    pub threshold: i64,

    /// Credits to buy per recharge.
    pub recharge_amount: i64,

    /// Whether smart recharge is enabled.
    pub active: bool,

    /// When the setting was last changed.
    pub updated_at: DateTime<Utc>,
}

impl SmartRechargeSetting {
    /// Inactive setting with default threshold and amount.
    #[must_use]
    pub fn new(workspace_id: WorkspaceId) -> Self {
        Self {
            workspace_id,
            threshold: DEFAULT_RECHARGE_THRESHOLD,
            recharge_amount: DEFAULT_RECHARGE_AMOUNT,
            active: false,
            updated_at: Utc::now(),
        }
    }

    /// Active setting with the given threshold and amount.
    #[must_use]
    pub fn active(workspace_id: WorkspaceId, threshold: i64, recharge_amount: i64) -> Self {
        Self {
            threshold,
            recharge_amount,
            active: true,
            ..Self::new(workspace_id)
        }
    }
}

/// Sum all purchased quantities.
#[must_use]
pub fn total_purchased<'a>(purchases: impl IntoIterator<Item = &'a ExtraCreditPurchase>) -> i64 {
    purchases.into_iter().map(|p| p.quantity).sum()
}
