//! Ledger engine integration tests: balances, charging, history and smart
//! recharge against the in-memory store.

mod common;

use chrono::{Duration, Utc};

use common::{LedgerFixture, TEST_CUSTOMER, TEST_MODEL_COST};
use credit_ledger_core::{
    start_of_day, Agent, AgentId, ChargeSubscriptionPolicy, CreditBalance, CreditPool,
    ExtraCreditPurchase, ExtraDebitPolicy, LedgerError, LedgerPolicy, LimitOverride, PlanCredits,
    PurchaseMetadata, PurchaseSource, SubscriptionStatus, Workspace, WorkspaceId,
};
use credit_ledger_service::broadcast::CreditsUpdate;
use credit_ledger_service::stripe::SMART_RECHARGE_MARKER;
use credit_ledger_service::{RechargeOutcome, WorkspaceEvent};
use credit_ledger_store::Store;

// ============================================================================
// Balances
// ============================================================================

#[tokio::test]
async fn sequential_charges_drain_the_plan_pool() {
    let fixture = LedgerFixture::new();
    let ws = fixture.seed(Some(100));

    for _ in 0..3 {
        let receipt = fixture.ledger.charge(&ws.agent_id, None).await.unwrap();
        assert_eq!(receipt.cost, TEST_MODEL_COST);
        assert_eq!(receipt.records.len(), 1);
        assert_eq!(receipt.records[0].used_from, CreditPool::Plan);
    }

    let balance = fixture.ledger.get_remaining_credits(&ws.workspace_id).unwrap();
    assert_eq!(balance.plan_credits_remaining, PlanCredits::Remaining(40));
    assert_eq!(balance.extra_credits_remaining, 0);

    let usage = fixture.store.list_usage(&ws.workspace_id, None).unwrap();
    assert_eq!(usage.len(), 3);
    assert!(usage.iter().all(|r| r.used_from == CreditPool::Plan));
}

#[tokio::test]
async fn shortfall_spills_into_the_extra_pool() {
    let fixture = LedgerFixture::new();
    let ws = fixture.seed(Some(100));
    fixture.record_usage(&ws, CreditPool::Plan, 90, Utc::now() - Duration::hours(1));

    let receipt = fixture.ledger.charge(&ws.agent_id, None).await.unwrap();

    assert_eq!(receipt.records.len(), 2);
    let plan = receipt
        .records
        .iter()
        .find(|r| r.used_from == CreditPool::Plan)
        .unwrap();
    let extra = receipt
        .records
        .iter()
        .find(|r| r.used_from == CreditPool::Extra)
        .unwrap();
    assert_eq!(plan.quantity, 10);
    assert_eq!(extra.quantity, 10);
    assert_eq!(plan.correlation_id, extra.correlation_id);
    assert_eq!(plan.correlation_id, receipt.correlation_id);

    // The extra pool is overdrawn internally but never reported negative.
    let balance = fixture.ledger.get_remaining_credits(&ws.workspace_id).unwrap();
    assert_eq!(balance.plan_credits_remaining, PlanCredits::Remaining(0));
    assert_eq!(balance.extra_credits_remaining, 0);
}

#[tokio::test]
async fn split_draws_remaining_plan_credits_then_purchases() {
    let fixture = LedgerFixture::new();
    let ws = fixture.seed(Some(15));
    fixture
        .store
        .put_purchase(&ExtraCreditPurchase::manual(ws.workspace_id, 100, None))
        .unwrap();

    let receipt = fixture.ledger.charge(&ws.agent_id, None).await.unwrap();

    let total: i64 = receipt.records.iter().map(|r| r.quantity).sum();
    assert_eq!(total, TEST_MODEL_COST);
    assert_eq!(receipt.balance.plan_credits_remaining, PlanCredits::Remaining(0));
    assert_eq!(receipt.balance.extra_credits_remaining, 95);
    assert_eq!(
        fixture.ledger.get_remaining_credits(&ws.workspace_id).unwrap(),
        receipt.balance
    );
}

#[tokio::test]
async fn missing_subscription_fails_charge_but_reads_zero() {
    let fixture = LedgerFixture::new();
    let workspace_id = WorkspaceId::generate();
    let agent_id = AgentId::generate();
    fixture
        .store
        .put_workspace(&Workspace::new(workspace_id, "Empty"))
        .unwrap();
    fixture
        .store
        .put_agent(&Agent::new(agent_id, workspace_id, common::TEST_MODEL))
        .unwrap();

    let err = fixture.ledger.charge(&agent_id, None).await.unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { entity: "subscription", .. }));

    assert_eq!(
        fixture.ledger.get_remaining_credits(&workspace_id).unwrap(),
        CreditBalance::ZERO
    );
    assert!(fixture.store.list_usage(&workspace_id, None).unwrap().is_empty());
}

#[tokio::test]
async fn unknown_agent_and_missing_settings_are_not_found() {
    let fixture = LedgerFixture::new();
    let ws = fixture.seed(Some(100));

    let err = fixture
        .ledger
        .charge(&AgentId::generate(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { entity: "agent", .. }));

    let mut agent = Agent::new(AgentId::generate(), ws.workspace_id, common::TEST_MODEL);
    agent.settings = None;
    fixture.store.put_agent(&agent).unwrap();

    let err = fixture.ledger.charge(&agent.id, None).await.unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { entity: "agent settings", .. }));
}

#[tokio::test]
async fn unpriced_model_writes_nothing() {
    let fixture = LedgerFixture::new();
    let ws = fixture.seed(Some(100));
    let agent_id = AgentId::generate();
    fixture
        .store
        .put_agent(&Agent::new(agent_id, ws.workspace_id, "mystery-model"))
        .unwrap();

    let err = fixture.ledger.charge(&agent_id, None).await.unwrap_err();

    assert!(matches!(err, LedgerError::UnknownModel { ref model } if model == "mystery-model"));
    assert!(fixture.store.list_usage(&ws.workspace_id, None).unwrap().is_empty());
}

#[tokio::test]
async fn charge_metadata_is_stored_on_every_record() {
    let fixture = LedgerFixture::new();
    let ws = fixture.seed(Some(100));
    let metadata = serde_json::json!({"conversationId": "conv_1", "channel": "slack"});

    let receipt = fixture
        .ledger
        .charge(&ws.agent_id, Some(metadata.clone()))
        .await
        .unwrap();

    assert_eq!(receipt.records[0].metadata, metadata);
    assert_eq!(receipt.records[0].subscription_id, ws.subscription.id);
}

#[tokio::test]
async fn unlimited_plan_is_never_depleted() {
    let fixture = LedgerFixture::new();
    let ws = fixture.seed(None);

    for _ in 0..10 {
        fixture.ledger.charge(&ws.agent_id, None).await.unwrap();
    }

    let balance = fixture.ledger.get_remaining_credits(&ws.workspace_id).unwrap();
    assert_eq!(balance.plan_credits_remaining, PlanCredits::Unlimited);
    assert_eq!(
        serde_json::to_value(balance).unwrap()["planCreditsRemaining"],
        "UNLIMITED"
    );
    assert!(fixture
        .ledger
        .get_daily_balances(&ws.workspace_id, None, None)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn explicit_override_replaces_plan_limit() {
    let fixture = LedgerFixture::new();
    let ws = fixture.seed(Some(100));
    let subscription = ws
        .subscription
        .clone()
        .with_limit_override(LimitOverride::unlimited());
    fixture.store.put_subscription(&subscription).unwrap();

    let balance = fixture.ledger.get_remaining_credits(&ws.workspace_id).unwrap();
    assert_eq!(balance.plan_credits_remaining, PlanCredits::Unlimited);

    fixture
        .store
        .put_subscription(&ws.subscription.clone().with_limit_override(LimitOverride::credits(500)))
        .unwrap();
    let balance = fixture.ledger.get_remaining_credits(&ws.workspace_id).unwrap();
    assert_eq!(balance.plan_credits_remaining, PlanCredits::Remaining(500));
}

#[tokio::test]
async fn plan_usage_outside_the_period_is_ignored() {
    let fixture = LedgerFixture::new();
    let ws = fixture.seed(Some(100));
    fixture.record_usage(&ws, CreditPool::Plan, 70, Utc::now() - Duration::days(10));
    fixture.record_usage(&ws, CreditPool::Plan, 25, Utc::now());

    let balance = fixture.ledger.get_remaining_credits(&ws.workspace_id).unwrap();
    assert_eq!(balance.plan_credits_remaining, PlanCredits::Remaining(75));
}

#[tokio::test]
async fn past_due_subscription_reads_zero_plan_credits() {
    let fixture = LedgerFixture::new();
    let now = Utc::now();
    let ws = fixture.seed_with(
        Some(100),
        SubscriptionStatus::PastDue,
        now - Duration::days(1),
        now + Duration::days(29),
    );
    fixture
        .store
        .put_purchase(&ExtraCreditPurchase::manual(ws.workspace_id, 40, None))
        .unwrap();

    let balance = fixture.ledger.get_remaining_credits(&ws.workspace_id).unwrap();
    assert_eq!(balance.plan_credits_remaining, PlanCredits::Remaining(0));
    assert_eq!(balance.extra_credits_remaining, 40);
}

#[tokio::test]
async fn charge_broadcasts_post_charge_balance() {
    let mut fixture = LedgerFixture::new();
    let ws = fixture.seed(Some(100));

    fixture.ledger.charge(&ws.agent_id, None).await.unwrap();

    let events = fixture.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].workspace_id, ws.workspace_id);
    assert_eq!(
        events[0].event,
        WorkspaceEvent::CreditsUpdated(CreditsUpdate {
            plan_credits: PlanCredits::Remaining(80),
            extra_credits: 0,
        })
    );
}

// ============================================================================
// Policies
// ============================================================================

#[tokio::test]
async fn any_status_policy_charges_past_due_subscriptions() {
    let fixture = LedgerFixture::new();
    let now = Utc::now();
    let ws = fixture.seed_with(
        Some(100),
        SubscriptionStatus::PastDue,
        now - Duration::days(1),
        now + Duration::days(29),
    );

    let receipt = fixture.ledger.charge(&ws.agent_id, None).await.unwrap();
    assert_eq!(receipt.records.len(), 1);
}

#[tokio::test]
async fn balance_eligible_policy_refuses_past_due_subscriptions() {
    let fixture = LedgerFixture::with_policy(LedgerPolicy {
        charge_subscription: ChargeSubscriptionPolicy::BalanceEligible,
        ..LedgerPolicy::default()
    });
    let now = Utc::now();
    let ws = fixture.seed_with(
        Some(100),
        SubscriptionStatus::PastDue,
        now - Duration::days(1),
        now + Duration::days(29),
    );

    let err = fixture.ledger.charge(&ws.agent_id, None).await.unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { entity: "subscription", .. }));
    assert!(fixture.store.list_usage(&ws.workspace_id, None).unwrap().is_empty());
}

#[tokio::test]
async fn reject_policy_refuses_overdraft() {
    let fixture = LedgerFixture::with_policy(LedgerPolicy {
        extra_debit: ExtraDebitPolicy::RejectWhenExhausted,
        ..LedgerPolicy::default()
    });
    let ws = fixture.seed(Some(5));
    fixture
        .store
        .put_purchase(&ExtraCreditPurchase::manual(ws.workspace_id, 10, None))
        .unwrap();

    let err = fixture.ledger.charge(&ws.agent_id, None).await.unwrap_err();

    assert!(matches!(
        err,
        LedgerError::InsufficientCredits {
            available: 10,
            required: 15
        }
    ));
    assert!(fixture.store.list_usage(&ws.workspace_id, None).unwrap().is_empty());
}

// ============================================================================
// Smart Recharge
// ============================================================================

#[tokio::test]
async fn recharge_fires_below_threshold() {
    let mut fixture = LedgerFixture::new();
    let ws = fixture.seed(Some(50));
    fixture.enable_recharge(ws.workspace_id, 50, 200);

    let receipt = fixture.ledger.charge(&ws.agent_id, None).await.unwrap();

    assert_eq!(receipt.balance.combined(), Some(30));
    assert_eq!(
        receipt.recharge,
        RechargeOutcome::Purchased {
            invoice_id: "in_fake_1".into(),
            quantity: 200
        }
    );

    let requests = fixture.gateway.invoices.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].customer_id, TEST_CUSTOMER);
    assert_eq!(requests[0].credits, 200);
    assert_eq!(requests[0].workspace_id, ws.workspace_id);
    assert!(requests[0].description.starts_with(SMART_RECHARGE_MARKER));
    assert!(requests[0].idempotency_key.starts_with("recharge-"));

    let purchases = fixture.store.list_purchases(&ws.workspace_id).unwrap();
    assert_eq!(purchases.len(), 1);
    assert_eq!(purchases[0].source, PurchaseSource::Automatic);
    assert_eq!(purchases[0].quantity, 200);
    assert_eq!(purchases[0].metadata.provider_invoice_id.as_deref(), Some("in_fake_1"));
    assert!(purchases[0].metadata.triggered_at.is_some());

    let balance = fixture.ledger.get_remaining_credits(&ws.workspace_id).unwrap();
    assert_eq!(balance.plan_credits_remaining, PlanCredits::Remaining(30));
    assert_eq!(balance.extra_credits_remaining, 200);

    // One update after the charge, one after the purchase.
    let events = fixture.drain_events();
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[1].event,
        WorkspaceEvent::CreditsUpdated(CreditsUpdate {
            plan_credits: PlanCredits::Remaining(30),
            extra_credits: 200,
        })
    );
}

#[tokio::test]
async fn recharge_not_needed_at_or_above_threshold() {
    let fixture = LedgerFixture::new();
    let ws = fixture.seed(Some(100));
    fixture.enable_recharge(ws.workspace_id, 80, 200);

    // 100 - 20 = 80, not below 80.
    let receipt = fixture.ledger.charge(&ws.agent_id, None).await.unwrap();

    assert_eq!(receipt.recharge, RechargeOutcome::NotNeeded);
    assert_eq!(fixture.gateway.invoice_count(), 0);
}

#[tokio::test]
async fn inactive_or_missing_setting_never_recharges() {
    let fixture = LedgerFixture::new();
    let ws = fixture.seed(Some(20));

    let receipt = fixture.ledger.charge(&ws.agent_id, None).await.unwrap();
    assert_eq!(receipt.recharge, RechargeOutcome::NotNeeded);

    let mut setting = credit_ledger_core::SmartRechargeSetting::active(ws.workspace_id, 1000, 200);
    setting.active = false;
    fixture.store.put_recharge_setting(&setting).unwrap();

    let outcome = fixture
        .ledger
        .maybe_recharge(&ws.workspace_id, CreditBalance::ZERO)
        .await
        .unwrap();
    assert_eq!(outcome, RechargeOutcome::NotNeeded);
    assert_eq!(fixture.gateway.invoice_count(), 0);
}

#[tokio::test]
async fn unlimited_balance_never_recharges() {
    let fixture = LedgerFixture::new();
    let ws = fixture.seed(None);
    fixture.enable_recharge(ws.workspace_id, 1_000_000, 200);

    let receipt = fixture.ledger.charge(&ws.agent_id, None).await.unwrap();

    assert_eq!(receipt.recharge, RechargeOutcome::NotNeeded);
    assert_eq!(fixture.gateway.invoice_count(), 0);
}

#[tokio::test]
async fn declined_recharge_does_not_fail_the_charge() {
    let fixture = LedgerFixture::new();
    let ws = fixture.seed(Some(50));
    fixture.enable_recharge(ws.workspace_id, 50, 200);
    fixture.gateway.decline();

    let receipt = fixture.ledger.charge(&ws.agent_id, None).await.unwrap();

    assert!(matches!(receipt.recharge, RechargeOutcome::Failed { ref reason } if reason.contains("declined")));
    assert_eq!(receipt.records.len(), 1);
    assert!(fixture.store.list_purchases(&ws.workspace_id).unwrap().is_empty());

    // The gate is released after a failure.
    let err = fixture
        .ledger
        .maybe_recharge(&ws.workspace_id, receipt.balance)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ExternalService { .. }));
}

#[tokio::test]
async fn second_recharge_while_one_is_running_reports_in_progress() {
    let fixture = LedgerFixture::new();
    let ws = fixture.seed(Some(20));
    fixture.enable_recharge(ws.workspace_id, 50, 200);
    fixture.gateway.hold();

    let balance = fixture.ledger.get_remaining_credits(&ws.workspace_id).unwrap();
    let first = fixture.ledger.maybe_recharge(&ws.workspace_id, balance);
    let second = async {
        fixture.gateway.payment_started.notified().await;
        let outcome = fixture
            .ledger
            .maybe_recharge(&ws.workspace_id, balance)
            .await
            .unwrap();
        fixture.gateway.release();
        outcome
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(second, RechargeOutcome::InProgress);
    assert!(matches!(
        first.unwrap(),
        RechargeOutcome::Purchased { quantity: 200, .. }
    ));
    assert_eq!(fixture.gateway.invoice_count(), 1);
    assert_eq!(fixture.store.sum_purchases(&ws.workspace_id).unwrap(), 200);
}

#[tokio::test]
async fn recharge_without_customer_is_a_configuration_error() {
    let fixture = LedgerFixture::new();
    let ws = fixture.seed(Some(50));
    fixture
        .store
        .put_workspace(&Workspace::new(ws.workspace_id, "No customer"))
        .unwrap();
    fixture.enable_recharge(ws.workspace_id, 50, 200);

    let err = fixture
        .ledger
        .maybe_recharge(&ws.workspace_id, CreditBalance::ZERO)
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::Configuration(_)));
    assert_eq!(fixture.gateway.invoice_count(), 0);
}

// ============================================================================
// Daily Balances
// ============================================================================

#[tokio::test]
async fn daily_balances_replay_usage_and_purchases() {
    let fixture = LedgerFixture::new();
    let today = Utc::now().date_naive();
    let first = today - Duration::days(3);
    let period_start = start_of_day(first);
    let ws = fixture.seed_with(
        Some(100),
        SubscriptionStatus::Active,
        period_start,
        period_start + Duration::days(30),
    );

    let at = |days: i64, hour: i64| start_of_day(first + Duration::days(days)) + Duration::hours(hour);
    fixture.record_usage(&ws, CreditPool::Plan, 10, at(0, 10));
    fixture
        .store
        .put_purchase(&ExtraCreditPurchase::at(
            ws.workspace_id,
            50,
            PurchaseSource::Manual,
            PurchaseMetadata::default(),
            at(1, 12),
        ))
        .unwrap();
    fixture.record_usage(&ws, CreditPool::Plan, 5, at(2, 9));
    fixture.record_usage(&ws, CreditPool::Extra, 2, at(2, 9));

    let days = fixture
        .ledger
        .get_daily_balances(&ws.workspace_id, Some(first), Some(today))
        .unwrap();

    let series: Vec<_> = days
        .iter()
        .map(|d| (d.date, d.plan_credits_remaining, d.extra_credits_remaining))
        .collect();
    assert_eq!(
        series,
        vec![
            (first, 90, 0),
            (first + Duration::days(1), 90, 50),
            (first + Duration::days(2), 85, 48),
            (today, 85, 48),
        ]
    );

    // Extra credits only rise on purchase days, and by at most the purchase.
    for pair in days.windows(2) {
        let rise = pair[1].extra_credits_remaining - pair[0].extra_credits_remaining;
        if pair[1].date == first + Duration::days(1) {
            assert!(rise <= 50);
        } else {
            assert!(rise <= 0);
        }
    }
}

#[tokio::test]
async fn daily_balances_clip_to_the_period() {
    let fixture = LedgerFixture::new();
    let today = Utc::now().date_naive();
    let period_start = start_of_day(today - Duration::days(2));
    let ws = fixture.seed_with(
        Some(100),
        SubscriptionStatus::Active,
        period_start,
        period_start + Duration::days(30),
    );

    let days = fixture
        .ledger
        .get_daily_balances(
            &ws.workspace_id,
            Some(today - Duration::days(10)),
            Some(today),
        )
        .unwrap();
    assert_eq!(days.len(), 3);
    assert_eq!(days[0].date, today - Duration::days(2));

    let whole_period = fixture
        .ledger
        .get_daily_balances(&ws.workspace_id, None, None)
        .unwrap();
    assert_eq!(whole_period.len(), 30);
    assert!(whole_period.iter().all(|d| d.plan_credits_remaining == 100));

    let before_period = fixture
        .ledger
        .get_daily_balances(
            &ws.workspace_id,
            Some(today - Duration::days(20)),
            Some(today - Duration::days(10)),
        )
        .unwrap();
    assert!(before_period.is_empty());
}

#[tokio::test]
async fn daily_balances_reject_bad_ranges() {
    let fixture = LedgerFixture::new();
    let ws = fixture.seed(Some(100));
    let today = Utc::now().date_naive();

    let err = fixture
        .ledger
        .get_daily_balances(&ws.workspace_id, Some(today), Some(today - Duration::days(1)))
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidRange(_)));

    let err = fixture
        .ledger
        .get_daily_balances(&ws.workspace_id, Some(today - Duration::days(400)), Some(today))
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidRange(_)));
}

#[tokio::test]
async fn daily_balances_without_subscription_are_empty() {
    let fixture = LedgerFixture::new();
    let workspace_id = WorkspaceId::generate();
    fixture
        .store
        .put_workspace(&Workspace::new(workspace_id, "Empty"))
        .unwrap();

    assert!(fixture
        .ledger
        .get_daily_balances(&workspace_id, None, None)
        .unwrap()
        .is_empty());
}
