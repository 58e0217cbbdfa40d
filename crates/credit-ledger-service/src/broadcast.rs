//! Real-time workspace events.
//!
//! The engine publishes through the [`Broadcaster`] trait. Delivery is
//! fire-and-forget: a send never blocks, never retries and never fails the
//! operation that triggered it.

use serde::Serialize;
use tokio::sync::broadcast;

use credit_ledger_core::{CreditBalance, Plan, PlanCredits, Subscription, WorkspaceId};

use crate::stripe::Price;

/// Capacity of the in-process channel; slow receivers lag rather than block.
const HUB_CAPACITY: usize = 256;

/// Payload of a `workspaceCreditsUpdate` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditsUpdate {
    /// Plan credits left; `"UNLIMITED"` on the wire when unbounded.
    pub plan_credits: PlanCredits,
    /// Extra credits left.
    pub extra_credits: i64,
}

impl From<CreditBalance> for CreditsUpdate {
    fn from(balance: CreditBalance) -> Self {
        Self {
            plan_credits: balance.plan_credits_remaining,
            extra_credits: balance.extra_credits_remaining,
        }
    }
}

/// A plan enriched with its live Stripe price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanDetails {
    /// The catalog plan.
    #[serde(flatten)]
    pub plan: Plan,
    /// Live price, when the provider could be reached.
    pub price: Option<Price>,
}

/// Payload of a `subscriptionUpdated` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionUpdate {
    /// The subscription row after the transition.
    pub subscription: Subscription,
    /// Its plan.
    pub plan: PlanDetails,
}

/// An event pushed to a workspace's real-time channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum WorkspaceEvent {
    /// Balances changed after a charge or purchase.
    #[serde(rename = "workspaceCreditsUpdate")]
    CreditsUpdated(CreditsUpdate),
    /// The subscription row changed.
    #[serde(rename = "subscriptionUpdated")]
    SubscriptionUpdated(Box<SubscriptionUpdate>),
}

impl WorkspaceEvent {
    /// The wire event name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreditsUpdated(_) => "workspaceCreditsUpdate",
            Self::SubscriptionUpdated(_) => "subscriptionUpdated",
        }
    }
}

/// Sends events to the clients watching a workspace.
pub trait Broadcaster: Send + Sync {
    /// Publish `event` to `workspace_id`'s channel. Must not block.
    fn send_to_workspace(&self, workspace_id: WorkspaceId, event: WorkspaceEvent);
}

/// An event addressed to one workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceMessage {
    /// Target workspace.
    pub workspace_id: WorkspaceId,
    /// The event.
    pub event: WorkspaceEvent,
}

/// In-process [`Broadcaster`] backed by a `tokio::sync::broadcast` channel.
///
/// Transports (websocket gateways, SSE) subscribe and filter by workspace.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    sender: broadcast::Sender<WorkspaceMessage>,
}

impl BroadcastHub {
    /// Create a hub with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(HUB_CAPACITY);
        Self { sender }
    }

    /// Subscribe to every workspace's events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WorkspaceMessage> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster for BroadcastHub {
    fn send_to_workspace(&self, workspace_id: WorkspaceId, event: WorkspaceEvent) {
        let name = event.name();
        if self
            .sender
            .send(WorkspaceMessage {
                workspace_id,
                event,
            })
            .is_err()
        {
            tracing::trace!(workspace_id = %workspace_id, event = name, "No subscribers for event");
        }
    }
}
