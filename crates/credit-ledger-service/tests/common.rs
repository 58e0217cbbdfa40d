//! Common test utilities for credit ledger integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum_test::TestServer;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{broadcast, Notify};

use credit_ledger_core::{
    Agent, AgentId, ChargeContext, CorrelationId, CreditPool, LedgerPolicy, ModelCostTable, Plan,
    SmartRechargeSetting, Subscription, SubscriptionStatus, UsageRecord, Workspace, WorkspaceId,
};
use credit_ledger_service::broadcast::WorkspaceMessage;
use credit_ledger_service::stripe::{Invoice, InvoiceLine, Price, StripeList, StripeSubscription};
use credit_ledger_service::{
    create_router, AppState, BroadcastHub, CreditLedger, InvoiceRequest, PaymentGateway,
    ServiceConfig, StripeError, SubscriptionSynchronizer,
};
use credit_ledger_store::{MemoryStore, Store};

/// Model priced by the test cost table.
pub const TEST_MODEL: &str = "test-model";

/// Cost of one `TEST_MODEL` invocation.
pub const TEST_MODEL_COST: i64 = 20;

/// Stripe customer attached to seeded workspaces.
pub const TEST_CUSTOMER: &str = "cus_test";

// ============================================================================
// Fake payment gateway
// ============================================================================

/// Scripted [`PaymentGateway`] that records every call.
#[derive(Default)]
pub struct FakeGateway {
    /// Invoice requests received, in order.
    pub invoices: Mutex<Vec<InvoiceRequest>>,
    /// When set, `create_and_pay_invoice` fails with a card decline.
    pub decline_payments: AtomicBool,
    /// When set, `create_and_pay_invoice` waits for [`FakeGateway::release`].
    pub hold_payments: AtomicBool,
    /// Signalled when a held payment starts waiting.
    pub payment_started: Notify,
    payment_released: Notify,
    /// Subscriptions returned by `list_subscriptions`.
    pub subscriptions: Mutex<Vec<StripeSubscription>>,
    /// Prices returned by `get_price`.
    pub prices: Mutex<HashMap<String, Price>>,
    /// `(customer, payment method)` pairs passed to `set_default_payment_method`.
    pub default_payment_methods: Mutex<Vec<(String, String)>>,
}

impl FakeGateway {
    /// Make subsequent invoice payments fail.
    pub fn decline(&self) {
        self.decline_payments.store(true, Ordering::SeqCst);
    }

    /// Make subsequent invoice payments wait until released.
    pub fn hold(&self) {
        self.hold_payments.store(true, Ordering::SeqCst);
    }

    /// Let one held payment continue.
    pub fn release(&self) {
        self.payment_released.notify_one();
    }

    /// Number of invoices paid so far.
    pub fn invoice_count(&self) -> usize {
        self.invoices.lock().unwrap().len()
    }

    /// Register a subscription the provider will report.
    pub fn add_subscription(&self, subscription: StripeSubscription) {
        self.subscriptions.lock().unwrap().push(subscription);
    }

    /// Register a price the provider will report.
    pub fn add_price(&self, price: Price) {
        self.prices.lock().unwrap().insert(price.id.clone(), price);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn list_subscriptions(
        &self,
        customer_id: &str,
    ) -> Result<Vec<StripeSubscription>, StripeError> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.customer == customer_id)
            .cloned()
            .collect())
    }

    async fn get_price(&self, price_id: &str) -> Result<Price, StripeError> {
        self.prices
            .lock()
            .unwrap()
            .get(price_id)
            .cloned()
            .ok_or_else(|| StripeError::Api {
                error_type: "invalid_request_error".into(),
                message: format!("No such price: '{price_id}'"),
                code: Some("resource_missing".into()),
            })
    }

    async fn create_and_pay_invoice(
        &self,
        request: &InvoiceRequest,
    ) -> Result<Invoice, StripeError> {
        if self.hold_payments.load(Ordering::SeqCst) {
            self.payment_started.notify_one();
            self.payment_released.notified().await;
        }

        if self.decline_payments.load(Ordering::SeqCst) {
            return Err(StripeError::Api {
                error_type: "card_error".into(),
                message: "Your card was declined.".into(),
                code: Some("card_declined".into()),
            });
        }

        let mut invoices = self.invoices.lock().unwrap();
        invoices.push(request.clone());

        Ok(Invoice {
            id: format!("in_fake_{}", invoices.len()),
            customer: Some(request.customer_id.clone()),
            status: Some("paid".into()),
            amount_paid: request.credits * request.unit_amount,
            created: Utc::now().timestamp(),
            lines: StripeList {
                data: vec![InvoiceLine {
                    id: format!("il_fake_{}", invoices.len()),
                    description: Some(request.description.clone()),
                    quantity: Some(request.credits),
                    amount: request.credits * request.unit_amount,
                }],
                has_more: false,
            },
            ..Invoice::default()
        })
    }

    async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> Result<(), StripeError> {
        self.default_payment_methods
            .lock()
            .unwrap()
            .push((customer_id.to_string(), payment_method_id.to_string()));
        Ok(())
    }
}

// ============================================================================
// Ledger fixture
// ============================================================================

/// A seeded workspace.
pub struct SeededWorkspace {
    /// Workspace ID.
    pub workspace_id: WorkspaceId,
    /// Agent configured with `TEST_MODEL`.
    pub agent_id: AgentId,
    /// The workspace's plan.
    pub plan: Plan,
    /// The workspace's subscription.
    pub subscription: Subscription,
}

/// In-memory ledger with a fake gateway and a hub subscriber.
pub struct LedgerFixture {
    /// Backing store.
    pub store: Arc<MemoryStore>,
    /// Payment gateway fake.
    pub gateway: Arc<FakeGateway>,
    /// Event hub.
    pub hub: Arc<BroadcastHub>,
    /// Receiver subscribed before any event was sent.
    pub events: broadcast::Receiver<WorkspaceMessage>,
    /// The engine under test.
    pub ledger: CreditLedger,
    /// The synchronizer under test.
    pub synchronizer: SubscriptionSynchronizer,
}

impl LedgerFixture {
    /// Fixture with default policies.
    pub fn new() -> Self {
        Self::with_policy(LedgerPolicy::default())
    }

    /// Fixture with the given charge policies.
    pub fn with_policy(policy: LedgerPolicy) -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let hub = Arc::new(BroadcastHub::new());
        let events = hub.subscribe();

        let ledger = CreditLedger::new(
            store.clone(),
            Arc::new(test_costs()),
            hub.clone(),
        )
        .with_policy(policy)
        .with_gateway(gateway.clone());

        let synchronizer =
            SubscriptionSynchronizer::new(store.clone(), hub.clone()).with_gateway(gateway.clone());

        Self {
            store,
            gateway,
            hub,
            events,
            ledger,
            synchronizer,
        }
    }

    /// Seed a workspace with a Stripe customer, an agent and an active
    /// subscription whose period started yesterday.
    pub fn seed(&self, credits_limit: Option<i64>) -> SeededWorkspace {
        let now = Utc::now();
        self.seed_with(
            credits_limit,
            SubscriptionStatus::Active,
            now - Duration::days(1),
            now + Duration::days(29),
        )
    }

    /// Seed a workspace with explicit subscription status and period.
    pub fn seed_with(
        &self,
        credits_limit: Option<i64>,
        status: SubscriptionStatus,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> SeededWorkspace {
        let workspace_id = WorkspaceId::generate();
        self.store
            .put_workspace(&Workspace::new(workspace_id, "Acme").with_stripe_customer(TEST_CUSTOMER))
            .unwrap();

        let agent_id = AgentId::generate();
        self.store
            .put_agent(&Agent::new(agent_id, workspace_id, TEST_MODEL))
            .unwrap();

        let plan = Plan::new("Pro", credits_limit).with_price_id(format!("price_{}", plan_suffix()));
        self.store.put_plan(&plan).unwrap();

        let subscription = Subscription::new(workspace_id, plan.id, status, period_start, period_end);
        self.store.put_subscription(&subscription).unwrap();

        SeededWorkspace {
            workspace_id,
            agent_id,
            plan,
            subscription,
        }
    }

    /// Enable smart recharge for a workspace.
    pub fn enable_recharge(&self, workspace_id: WorkspaceId, threshold: i64, amount: i64) {
        self.store
            .put_recharge_setting(&SmartRechargeSetting::active(workspace_id, threshold, amount))
            .unwrap();
    }

    /// Write a usage record directly, bypassing the charge path.
    pub fn record_usage(
        &self,
        seeded: &SeededWorkspace,
        pool: CreditPool,
        quantity: i64,
        at: DateTime<Utc>,
    ) {
        let ctx = ChargeContext {
            workspace_id: seeded.workspace_id,
            subscription_id: seeded.subscription.id,
            agent_id: seeded.agent_id,
            model: TEST_MODEL.into(),
            metadata: serde_json::Value::Null,
        };
        let record = UsageRecord::for_charge(&ctx, CorrelationId::generate_at(at), pool, quantity, at);
        self.store.append_usage_records(&[record]).unwrap();
    }

    /// Drain every event sent so far.
    pub fn drain_events(&mut self) -> Vec<WorkspaceMessage> {
        let mut drained = Vec::new();
        while let Ok(message) = self.events.try_recv() {
            drained.push(message);
        }
        drained
    }
}

impl Default for LedgerFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Cost table pricing only `TEST_MODEL`.
pub fn test_costs() -> ModelCostTable {
    ModelCostTable::from_entries([(TEST_MODEL, TEST_MODEL_COST)]).unwrap()
}

fn plan_suffix() -> String {
    ulid::Ulid::new().to_string().to_lowercase()
}

// ============================================================================
// HTTP harness
// ============================================================================

/// Webhook secret configured on the HTTP harness.
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Test harness containing everything needed for HTTP tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Backing store.
    pub store: Arc<MemoryStore>,
    /// Payment gateway fake.
    pub gateway: Arc<FakeGateway>,
}

impl TestHarness {
    /// Harness with webhook signature verification enabled.
    pub fn new() -> Self {
        Self::with_webhook_secret(Some(TEST_WEBHOOK_SECRET.into()))
    }

    /// Harness with an explicit webhook secret (or none).
    pub fn with_webhook_secret(webhook_secret: Option<String>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::default());

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            stripe_webhook_secret: webhook_secret,
            model_costs: Arc::new(test_costs()),
            ..ServiceConfig::default()
        };

        let state = AppState::with_gateway(
            store.clone(),
            config,
            Some(gateway.clone() as Arc<dyn PaymentGateway>),
        );
        let server = TestServer::new(create_router(state)).expect("Failed to create test server");

        Self {
            server,
            store,
            gateway,
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
