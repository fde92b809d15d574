use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;
use veris_channel::{CardChannel, ChannelRouter, WalletChannel};
use veris_core::{CallbackOutcome, ChannelAdapter, ChannelRefundStatus, PaymentMethod};
use veris_order::models::{
    ClientContext, CreateOrderRequest, CreateRefundRequest, PaymentOrder, RefundStatus,
};
use veris_order::payment::{CallbackAck, InitiateOutcome, PaymentConfig, PaymentOrchestrator};
use veris_order::reconcile::{ReconcileConfig, ReconciliationScheduler};
use veris_order::refund::{RefundConfig, RefundError, RefundOrchestrator};
use veris_order::RefundOrderRepository;
use veris_risk::{default_rules, RiskEngine, RiskThresholds};
use veris_store::{
    InMemoryLockService, InMemoryPaymentOrderRepository, InMemoryRefundOrderRepository,
    InMemoryRiskRecordRepository, InMemoryRiskRuleRepository,
};

struct Harness {
    orders: Arc<InMemoryPaymentOrderRepository>,
    refunds: Arc<InMemoryRefundOrderRepository>,
    card: Arc<CardChannel>,
    wallet: Arc<WalletChannel>,
    payments: Arc<PaymentOrchestrator>,
    refund_orch: Arc<RefundOrchestrator>,
}

fn harness() -> Harness {
    let orders = Arc::new(InMemoryPaymentOrderRepository::new());
    let refunds = Arc::new(InMemoryRefundOrderRepository::new());
    let card = Arc::new(CardChannel::new(
        "https://sandbox.card",
        "card-secret",
        dec!(0.006),
    ));
    let wallet = Arc::new(WalletChannel::wallet_a("wa-secret", dec!(0.002)));
    let router = Arc::new(
        ChannelRouter::new()
            .register(card.clone())
            .register(wallet.clone()),
    );
    let risk = Arc::new(RiskEngine::new(
        Arc::new(InMemoryRiskRuleRepository::new(default_rules())),
        Arc::new(InMemoryRiskRecordRepository::new()),
        RiskThresholds::default(),
    ));
    let locks = Arc::new(InMemoryLockService::new());
    let payments = Arc::new(PaymentOrchestrator::new(
        orders.clone(),
        risk,
        router.clone(),
        locks.clone(),
        PaymentConfig::default(),
    ));
    let refund_orch = Arc::new(RefundOrchestrator::new(
        refunds.clone(),
        orders.clone(),
        router,
        locks,
        RefundConfig::default(),
    ));
    Harness {
        orders,
        refunds,
        card,
        wallet,
        payments,
        refund_orch,
    }
}

fn ctx() -> ClientContext {
    ClientContext {
        client_ip: "203.0.113.7".to_string().into(),
        device_fingerprint: Some("fp-abc".to_string().into()),
    }
}

/// Drive a payment to Success through the given method's channel and return
/// the settled order.
async fn paid_order(
    h: &Harness,
    business_order_id: &str,
    amount: rust_decimal::Decimal,
    method: PaymentMethod,
) -> PaymentOrder {
    let order = h
        .payments
        .create_order(&CreateOrderRequest {
            business_order_id: business_order_id.to_string(),
            user_id: "user-1".to_string(),
            amount,
            method,
            subject: "test purchase".to_string(),
        })
        .await
        .unwrap();
    let outcome = h.payments.initiate(order.id, &ctx()).await.unwrap();
    let InitiateOutcome::Initiated {
        third_party_order_no,
        ..
    } = outcome
    else {
        panic!("expected channel initiation");
    };

    let (payload, sig) = match method {
        PaymentMethod::Card => h
            .card
            .settle(&third_party_order_no, CallbackOutcome::Success)
            .await
            .unwrap(),
        PaymentMethod::WalletA => h
            .wallet
            .settle(&third_party_order_no, CallbackOutcome::Success)
            .await
            .unwrap(),
        other => panic!("no sandbox settle for {:?}", other),
    };
    assert_eq!(
        h.payments
            .handle_callback(method, &payload, &sig)
            .await
            .unwrap(),
        CallbackAck::Applied
    );
    order
}

async fn approved_refund(
    h: &Harness,
    payment_order_id: Uuid,
    amount: rust_decimal::Decimal,
) -> Uuid {
    let refund = h
        .refund_orch
        .create_refund_order(&CreateRefundRequest {
            payment_order_id,
            amount,
            reason: "buyer request".to_string(),
        })
        .await
        .unwrap();
    h.refund_orch
        .audit(refund.id, true, None, "auditor-1")
        .await
        .unwrap();
    refund.id
}

#[tokio::test]
async fn card_refund_settles_synchronously() {
    let h = harness();
    let order = paid_order(&h, "biz-200", dec!(100.00), PaymentMethod::Card).await;

    let refund_id = approved_refund(&h, order.id, dec!(40.00)).await;
    let processed = h.refund_orch.process(refund_id).await.unwrap();

    assert_eq!(processed.status, RefundStatus::Success);
    assert!(processed.third_party_refund_no.is_some());
    assert!(processed.completed_at.is_some());
}

#[tokio::test]
async fn refund_cannot_exceed_paid_amount() {
    let h = harness();
    let order = paid_order(&h, "biz-201", dec!(100.00), PaymentMethod::Card).await;

    let err = h
        .refund_orch
        .create_refund_order(&CreateRefundRequest {
            payment_order_id: order.id,
            amount: dec!(150.00),
            reason: "buyer request".to_string(),
        })
        .await;
    assert!(matches!(
        err,
        Err(RefundError::InsufficientRefundable { remaining, .. }) if remaining == dec!(100.00)
    ));

    // A settled partial refund shrinks what is left.
    let refund_id = approved_refund(&h, order.id, dec!(40.00)).await;
    h.refund_orch.process(refund_id).await.unwrap();

    let err = h
        .refund_orch
        .create_refund_order(&CreateRefundRequest {
            payment_order_id: order.id,
            amount: dec!(70.00),
            reason: "buyer request".to_string(),
        })
        .await;
    assert!(matches!(
        err,
        Err(RefundError::InsufficientRefundable { remaining, .. }) if remaining == dec!(60.00)
    ));
}

#[tokio::test]
async fn approval_rechecks_remaining_balance() {
    let h = harness();
    let order = paid_order(&h, "biz-202", dec!(100.00), PaymentMethod::Card).await;

    // Pending refunds do not reserve balance, so both requests are accepted.
    let first = h
        .refund_orch
        .create_refund_order(&CreateRefundRequest {
            payment_order_id: order.id,
            amount: dec!(60.00),
            reason: "buyer request".to_string(),
        })
        .await
        .unwrap();
    let second = h
        .refund_orch
        .create_refund_order(&CreateRefundRequest {
            payment_order_id: order.id,
            amount: dec!(60.00),
            reason: "buyer request".to_string(),
        })
        .await
        .unwrap();

    h.refund_orch
        .audit(first.id, true, None, "auditor-1")
        .await
        .unwrap();

    // Approving the second would over-commit the parent.
    let err = h.refund_orch.audit(second.id, true, None, "auditor-1").await;
    assert!(matches!(
        err,
        Err(RefundError::InsufficientRefundable { remaining, .. }) if remaining == dec!(40.00)
    ));
    assert_eq!(
        h.refunds.get(second.id).await.unwrap().unwrap().status,
        RefundStatus::Pending
    );
}

#[tokio::test]
async fn wallet_refund_completes_by_callback() {
    let h = harness();
    let order = paid_order(&h, "biz-203", dec!(50.00), PaymentMethod::WalletA).await;

    let refund_id = approved_refund(&h, order.id, dec!(20.00)).await;
    let processing = h.refund_orch.process(refund_id).await.unwrap();
    assert_eq!(processing.status, RefundStatus::Processing);
    let refund_no = processing.third_party_refund_no.unwrap();

    let (payload, sig) = h
        .wallet
        .complete_refund(&refund_no, CallbackOutcome::Success)
        .await
        .unwrap();
    let ack = h
        .refund_orch
        .handle_refund_callback(PaymentMethod::WalletA, &payload, &sig)
        .await
        .unwrap();
    assert_eq!(ack, CallbackAck::Applied);
    assert_eq!(
        h.refunds.get(refund_id).await.unwrap().unwrap().status,
        RefundStatus::Success
    );

    // Redelivery is a no-op.
    let replay = h
        .refund_orch
        .handle_refund_callback(PaymentMethod::WalletA, &payload, &sig)
        .await
        .unwrap();
    assert_eq!(replay, CallbackAck::Duplicate);
}

#[tokio::test]
async fn refund_requires_a_successful_parent() {
    let h = harness();
    let order = h
        .payments
        .create_order(&CreateOrderRequest {
            business_order_id: "biz-204".to_string(),
            user_id: "user-1".to_string(),
            amount: dec!(30.00),
            method: PaymentMethod::Card,
            subject: "test purchase".to_string(),
        })
        .await
        .unwrap();

    let err = h
        .refund_orch
        .create_refund_order(&CreateRefundRequest {
            payment_order_id: order.id,
            amount: dec!(10.00),
            reason: "buyer request".to_string(),
        })
        .await;
    assert!(matches!(err, Err(RefundError::ParentNotRefundable(_))));
}

#[tokio::test]
async fn rejected_refund_cannot_be_processed() {
    let h = harness();
    let order = paid_order(&h, "biz-205", dec!(25.00), PaymentMethod::Card).await;

    let refund = h
        .refund_orch
        .create_refund_order(&CreateRefundRequest {
            payment_order_id: order.id,
            amount: dec!(25.00),
            reason: "buyer request".to_string(),
        })
        .await
        .unwrap();
    let rejected = h
        .refund_orch
        .audit(refund.id, false, Some("suspected abuse".to_string()), "auditor-1")
        .await
        .unwrap();
    assert_eq!(rejected.status, RefundStatus::Rejected);

    let err = h.refund_orch.process(refund.id).await;
    assert!(matches!(err, Err(RefundError::StateConflict { .. })));
}

#[tokio::test]
async fn refund_sync_recovers_a_lost_callback() {
    let h = harness();
    let order = paid_order(&h, "biz-206", dec!(50.00), PaymentMethod::WalletA).await;

    let refund_id = approved_refund(&h, order.id, dec!(15.00)).await;
    let processing = h.refund_orch.process(refund_id).await.unwrap();
    let refund_no = processing.third_party_refund_no.unwrap();

    // Wallet completes the refund but the notification is lost.
    h.wallet
        .complete_refund(&refund_no, CallbackOutcome::Success)
        .await
        .unwrap();

    let ack = h.refund_orch.sync_status(refund_id).await.unwrap();
    assert_eq!(ack, CallbackAck::Applied);
    assert_eq!(
        h.refunds.get(refund_id).await.unwrap().unwrap().status,
        RefundStatus::Success
    );
}

#[tokio::test]
async fn sweep_round_retries_cooled_refund_failures() {
    let h = harness();
    let order = paid_order(&h, "biz-208", dec!(50.00), PaymentMethod::WalletA).await;

    let refund_id = approved_refund(&h, order.id, dec!(20.00)).await;
    let processing = h.refund_orch.process(refund_id).await.unwrap();
    let refund_no = processing.third_party_refund_no.clone().unwrap();

    let (payload, sig) = h
        .wallet
        .complete_refund(&refund_no, CallbackOutcome::Failure)
        .await
        .unwrap();
    h.refund_orch
        .handle_refund_callback(PaymentMethod::WalletA, &payload, &sig)
        .await
        .unwrap();

    // Age the failure past the retry backoff so the sweep picks it up.
    let mut failed = h.refunds.get(refund_id).await.unwrap().unwrap();
    assert_eq!(failed.status, RefundStatus::Failed);
    failed.updated_at = Utc::now() - Duration::seconds(400);
    h.refunds.insert(&failed).await.unwrap();

    let scheduler = ReconciliationScheduler::new(
        h.orders.clone(),
        h.refunds.clone(),
        h.payments.clone(),
        h.refund_orch.clone(),
        ReconcileConfig::default(),
    );
    let report = scheduler.run_once().await.unwrap();
    assert_eq!(report.refunds_retried, 1);

    let retried = h.refunds.get(refund_id).await.unwrap().unwrap();
    assert_eq!(retried.status, RefundStatus::Processing);
    assert_eq!(retried.retry_count, 1);
    // The channel reference is derived from the refund id, so the retry
    // reuses it rather than minting a second in-flight refund.
    assert_eq!(retried.third_party_refund_no, Some(refund_no.clone()));
    assert_eq!(
        h.wallet.query_refund_status(&refund_no).await.unwrap(),
        ChannelRefundStatus::Processing
    );
}

#[tokio::test]
async fn pending_refund_can_be_cancelled() {
    let h = harness();
    let order = paid_order(&h, "biz-207", dec!(25.00), PaymentMethod::Card).await;

    let refund = h
        .refund_orch
        .create_refund_order(&CreateRefundRequest {
            payment_order_id: order.id,
            amount: dec!(5.00),
            reason: "buyer request".to_string(),
        })
        .await
        .unwrap();
    h.refund_orch
        .cancel(refund.id, "withdrawn by buyer")
        .await
        .unwrap();
    assert_eq!(
        h.refunds.get(refund.id).await.unwrap().unwrap().status,
        RefundStatus::Cancelled
    );

    // Cancelled no longer reserves anything; the full amount is refundable.
    let full = h
        .refund_orch
        .create_refund_order(&CreateRefundRequest {
            payment_order_id: order.id,
            amount: dec!(25.00),
            reason: "buyer request".to_string(),
        })
        .await;
    assert!(full.is_ok());
}
