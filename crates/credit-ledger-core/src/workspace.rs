//! Workspace and agent types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AgentId, WorkspaceId};

/// A workspace: the owner of subscriptions, purchases and usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    /// The workspace ID.
    pub id: WorkspaceId,

    /// Display name.
    pub name: String,

    /// Stripe customer ID for payments.
    pub stripe_customer_id: Option<String>,

    /// When the workspace was created.
    pub created_at: DateTime<Utc>,

    /// When the workspace was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    /// Create a new workspace without a payment customer.
    #[must_use]
    pub fn new(id: WorkspaceId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            stripe_customer_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a Stripe customer ID.
    #[must_use]
    pub fn with_stripe_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.stripe_customer_id = Some(customer_id.into());
        self
    }
}

/// An AI agent belonging to a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// The agent ID.
    pub id: AgentId,

    /// Owning workspace.
    pub workspace_id: WorkspaceId,

    /// Agent settings. An agent without settings cannot be charged.
    pub settings: Option<AgentSettings>,

    /// When the agent was created.
    pub created_at: DateTime<Utc>,
}

impl Agent {
    /// Create an agent using `model` as its preferred model.
    #[must_use]
    pub fn new(id: AgentId, workspace_id: WorkspaceId, model: impl Into<String>) -> Self {
        Self {
            id,
            workspace_id,
            settings: Some(AgentSettings {
                preferred_model: model.into(),
            }),
            created_at: Utc::now(),
        }
    }
}

/// Per-agent settings relevant to billing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Model identifier looked up in the cost table on every charge.
    pub preferred_model: String,
}
