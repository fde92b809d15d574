use crate::locking::{acquire_with_retry, payment_lock_key, release_quietly, LockPolicy};
use crate::models::{ClientContext, CreateOrderRequest, PaymentOrder, PaymentStatus};
use crate::repository::PaymentOrderRepository;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;
use veris_channel::ChannelRouter;
use veris_core::{
    CallbackKind, CallbackOutcome, CancelOutcome, ChannelError, ChannelOrder,
    ChannelPaymentStatus, ChannelReference, LockError, LockService, PaymentMethod, StoreError,
};
use veris_risk::{RiskAction, RiskEngine, RiskError, RiskRequest};

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    /// Maximum re-initiations of a Failed order before it is left for
    /// manual handling.
    pub max_retries: u32,
    /// How long a fresh order stays payable.
    pub expiry_minutes: i64,
    /// Upper bound on any single channel call.
    pub channel_timeout: Duration,
    /// Window for the user-velocity risk input.
    pub velocity_window_minutes: i64,
    pub lock: LockPolicy,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            expiry_minutes: 30,
            channel_timeout: Duration::from_secs(10),
            velocity_window_minutes: 60,
            lock: LockPolicy::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Active payment order already exists for business order {0}")]
    DuplicateOrder(String),

    #[error("Payment order not found: {0}")]
    NotFound(Uuid),

    #[error("Operation {operation} not valid from status {current:?}")]
    StateConflict {
        current: PaymentStatus,
        operation: &'static str,
    },

    #[error("Payment blocked by risk control: {0}")]
    RiskBlocked(String),

    #[error("Retry budget exhausted for order {0}")]
    RetryExhausted(Uuid),

    #[error("Order is busy, try again: {0}")]
    Busy(String),

    #[error("Lock backend error: {0}")]
    LockBackend(String),

    #[error("Callback signature verification failed")]
    SignatureInvalid,

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Risk(#[from] RiskError),
}

fn map_lock(e: LockError) -> PaymentError {
    match e {
        LockError::Contended(key) => PaymentError::Busy(key),
        LockError::Backend(msg) => PaymentError::LockBackend(msg),
    }
}

/// What `initiate` hands back when it does not fail outright.
#[derive(Debug, Clone)]
pub enum InitiateOutcome {
    Initiated {
        reference: ChannelReference,
        third_party_order_no: String,
    },
    /// The order is parked behind an unresolved manual review; no channel
    /// call was made and the order stays Pending.
    PendingReview { record_id: Uuid },
}

/// Acknowledgement for a callback delivery. Duplicate and Ignored are
/// successes from the channel's point of view; only Applied changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAck {
    Applied,
    Duplicate,
    Ignored,
}

enum RiskGate {
    Pass,
    PendingReview(Uuid),
}

/// Drives a payment order through its state machine: risk gate, channel
/// initiation, idempotent callback application, cancellation, bounded retry.
pub struct PaymentOrchestrator {
    orders: Arc<dyn PaymentOrderRepository>,
    risk: Arc<RiskEngine>,
    channels: Arc<ChannelRouter>,
    locks: Arc<dyn LockService>,
    config: PaymentConfig,
}

impl PaymentOrchestrator {
    pub fn new(
        orders: Arc<dyn PaymentOrderRepository>,
        risk: Arc<RiskEngine>,
        channels: Arc<ChannelRouter>,
        locks: Arc<dyn LockService>,
        config: PaymentConfig,
    ) -> Self {
        Self {
            orders,
            risk,
            channels,
            locks,
            config,
        }
    }

    pub fn config(&self) -> &PaymentConfig {
        &self.config
    }

    /// Create a new order in Pending. Rejects bad input before any state
    /// change and guards against a second active order for the same
    /// business order id.
    pub async fn create_order(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<PaymentOrder, PaymentError> {
        if request.amount <= Decimal::ZERO {
            return Err(PaymentError::Validation(
                "amount must be positive".to_string(),
            ));
        }
        if request.business_order_id.trim().is_empty() {
            return Err(PaymentError::Validation(
                "business order id must not be empty".to_string(),
            ));
        }
        if !self.channels.supports(request.method) {
            return Err(PaymentError::Validation(format!(
                "unsupported payment method {}",
                request.method.as_str()
            )));
        }
        if let Some(existing) = self
            .orders
            .find_active_by_business_id(&request.business_order_id)
            .await?
        {
            return Err(PaymentError::DuplicateOrder(format!(
                "{} (active order {})",
                request.business_order_id, existing.id
            )));
        }

        let order = PaymentOrder::new(request, ChronoDuration::minutes(self.config.expiry_minutes));
        self.orders.insert(&order).await?;
        info!(order_id = %order.id, business_order_id = %order.business_order_id, amount = %order.amount, "Payment order created");
        Ok(order)
    }

    /// Risk-gate and initiate the channel payment. A channel failure or
    /// timeout leaves the order Pending so the caller can retry safely.
    pub async fn initiate(
        &self,
        order_id: Uuid,
        ctx: &ClientContext,
    ) -> Result<InitiateOutcome, PaymentError> {
        let key = payment_lock_key(order_id);
        let token = acquire_with_retry(&self.locks, &key, &self.config.lock)
            .await
            .map_err(map_lock)?;
        let result = self.initiate_locked(order_id, ctx).await;
        release_quietly(&self.locks, &key, &token).await;
        result
    }

    async fn initiate_locked(
        &self,
        order_id: Uuid,
        ctx: &ClientContext,
    ) -> Result<InitiateOutcome, PaymentError> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or(PaymentError::NotFound(order_id))?;
        if order.status != PaymentStatus::Pending {
            return Err(PaymentError::StateConflict {
                current: order.status,
                operation: "initiate",
            });
        }

        match self.risk_gate(&order, ctx).await? {
            RiskGate::PendingReview(record_id) => {
                info!(order_id = %order.id, record_id = %record_id, "Order parked behind manual review");
                Ok(InitiateOutcome::PendingReview { record_id })
            }
            RiskGate::Pass => self.call_channel_initiate(order, PaymentStatus::Pending).await,
        }
    }

    /// Resolve the risk decision for an order. A previous record is re-used:
    /// a parked order keeps its one active record, and a resolved review is
    /// honored without re-scoring.
    async fn risk_gate(
        &self,
        order: &PaymentOrder,
        ctx: &ClientContext,
    ) -> Result<RiskGate, PaymentError> {
        let record = match self.risk.latest_record(order.id).await? {
            Some(existing) => existing,
            None => {
                let since =
                    Utc::now() - ChronoDuration::minutes(self.config.velocity_window_minutes);
                let recent = self.orders.count_created_since(&order.user_id, since).await?;
                let request = RiskRequest {
                    payment_order_id: order.id,
                    business_order_id: order.business_order_id.clone(),
                    user_id: order.user_id.clone(),
                    amount: order.amount,
                    method: order.method,
                    client_ip: ctx.client_ip.clone(),
                    device_fingerprint: ctx.device_fingerprint.clone(),
                    recent_order_count: recent,
                };
                self.risk.perform_risk_check(&request).await?
            }
        };

        if record.is_open() {
            return Ok(RiskGate::PendingReview(record.id));
        }
        match record.effective_result() {
            RiskAction::Pass => Ok(RiskGate::Pass),
            RiskAction::ManualReview => Ok(RiskGate::PendingReview(record.id)),
            RiskAction::Block => {
                let mut blocked = order.clone();
                blocked.update_status(PaymentStatus::RiskBlocked);
                self.orders
                    .update_if_status(&blocked, PaymentStatus::Pending)
                    .await?;
                Err(PaymentError::RiskBlocked(format!(
                    "score {} level {:?}",
                    record.score, record.level
                )))
            }
        }
    }

    /// Shared by first initiation (expected Pending) and retry (expected
    /// Failed). The order row is only committed to Initiated after the
    /// channel call returns, so failures leave the prior status intact.
    async fn call_channel_initiate(
        &self,
        mut order: PaymentOrder,
        expected: PaymentStatus,
    ) -> Result<InitiateOutcome, PaymentError> {
        let channel = self.channels.resolve(order.method)?;
        let channel_order = ChannelOrder {
            order_id: order.id,
            business_order_id: order.business_order_id.clone(),
            user_id: order.user_id.clone(),
            method: order.method,
            amount: order.amount,
            subject: order.subject.clone(),
            expires_at: order.expires_at,
        };
        let init = self
            .with_timeout(channel.initiate(&channel_order))
            .await?;

        order.third_party_order_no = Some(init.third_party_order_no.clone());
        order.initiated_at = Some(Utc::now());
        if expected == PaymentStatus::Failed {
            order.retry_count += 1;
        }
        order.update_status(PaymentStatus::Initiated);
        if !self.orders.update_if_status(&order, expected).await? {
            let current = self
                .orders
                .get(order.id)
                .await?
                .map(|o| o.status)
                .unwrap_or(expected);
            return Err(PaymentError::StateConflict {
                current,
                operation: "initiate",
            });
        }
        info!(
            order_id = %order.id,
            third_party_order_no = %init.third_party_order_no,
            retry_count = order.retry_count,
            "Payment initiated"
        );

        // Balance-style channels settle synchronously; feed the immediate
        // result through the same transition path a callback would take.
        if let ChannelReference::Immediate(status) = init.reference {
            let outcome = match status {
                ChannelPaymentStatus::Succeeded => CallbackOutcome::Success,
                _ => CallbackOutcome::Failure,
            };
            let amount = order.amount;
            self.apply_outcome(order, outcome, Some(amount), None, None)
                .await?;
        }

        Ok(InitiateOutcome::Initiated {
            reference: init.reference,
            third_party_order_no: init.third_party_order_no,
        })
    }

    /// Apply an asynchronous payment notification. Signature is verified
    /// before anything else; unverifiable callbacks are rejected with no
    /// state change. Replays of an already-applied outcome are no-ops.
    pub async fn handle_callback(
        &self,
        method: PaymentMethod,
        raw_payload: &str,
        signature: &str,
    ) -> Result<CallbackAck, PaymentError> {
        let channel = self.channels.resolve(method)?;
        if !channel.verify_signature(raw_payload, signature) {
            warn!(method = method.as_str(), "Callback rejected: signature verification failed");
            return Err(PaymentError::SignatureInvalid);
        }
        let info = channel.parse_callback(raw_payload)?;
        if info.kind != CallbackKind::Payment {
            return Err(PaymentError::Validation(
                "refund callback delivered to the payment handler".to_string(),
            ));
        }

        let Some(order) = self
            .orders
            .find_by_third_party_no(&info.reference_no)
            .await?
        else {
            warn!(
                third_party_order_no = %info.reference_no,
                outcome = ?info.outcome,
                "Callback references no known order; logged for reconciliation"
            );
            return Ok(CallbackAck::Ignored);
        };

        let key = payment_lock_key(order.id);
        let token = acquire_with_retry(&self.locks, &key, &self.config.lock)
            .await
            .map_err(map_lock)?;
        let result = self
            .handle_callback_locked(order.id, &info.outcome, info.actual_amount, info.fee, info.third_party_txn_no.clone())
            .await;
        release_quietly(&self.locks, &key, &token).await;
        result
    }

    async fn handle_callback_locked(
        &self,
        order_id: Uuid,
        outcome: &CallbackOutcome,
        actual_amount: Option<Decimal>,
        fee: Option<Decimal>,
        txn_no: Option<String>,
    ) -> Result<CallbackAck, PaymentError> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or(PaymentError::NotFound(order_id))?;
        self.apply_outcome(order, outcome.clone(), actual_amount, fee, txn_no)
            .await
    }

    /// The single place a payment order moves to Success/Failed. Callers
    /// hold the per-order lock; the CAS write is the final arbiter.
    async fn apply_outcome(
        &self,
        mut order: PaymentOrder,
        outcome: CallbackOutcome,
        actual_amount: Option<Decimal>,
        fee: Option<Decimal>,
        txn_no: Option<String>,
    ) -> Result<CallbackAck, PaymentError> {
        let target = match outcome {
            CallbackOutcome::Success => PaymentStatus::Success,
            CallbackOutcome::Failure => PaymentStatus::Failed,
        };

        if order.status == target {
            info!(
                order_id = %order.id,
                status = ?order.status,
                "Duplicate callback outcome; no-op"
            );
            return Ok(CallbackAck::Duplicate);
        }
        if order.status != PaymentStatus::Initiated {
            warn!(
                order_id = %order.id,
                third_party_order_no = order.third_party_order_no.as_deref().unwrap_or("-"),
                current = ?order.status,
                attempted = ?target,
                "Late or irrelevant callback; no transition"
            );
            return Ok(CallbackAck::Ignored);
        }

        if target == PaymentStatus::Success {
            order.actual_amount = Some(actual_amount.unwrap_or(order.amount));
            order.fee = fee;
            if txn_no.is_some() {
                order.third_party_txn_no = txn_no;
            }
        }
        order.completed_at = Some(Utc::now());
        order.update_status(target);

        if self
            .orders
            .update_if_status(&order, PaymentStatus::Initiated)
            .await?
        {
            info!(order_id = %order.id, status = ?target, actual_amount = ?order.actual_amount, "Payment outcome applied");
            Ok(CallbackAck::Applied)
        } else {
            warn!(order_id = %order.id, "Concurrent writer won the status race; outcome dropped");
            Ok(CallbackAck::Ignored)
        }
    }

    /// Cancel from Pending or Initiated. If the channel reports the payment
    /// already completed, the cancel is rejected and the order is left for
    /// callback reconciliation.
    pub async fn cancel(&self, order_id: Uuid, reason: &str) -> Result<(), PaymentError> {
        let key = payment_lock_key(order_id);
        let token = acquire_with_retry(&self.locks, &key, &self.config.lock)
            .await
            .map_err(map_lock)?;
        let result = self.cancel_locked(order_id, reason).await;
        release_quietly(&self.locks, &key, &token).await;
        result
    }

    async fn cancel_locked(&self, order_id: Uuid, reason: &str) -> Result<(), PaymentError> {
        let mut order = self
            .orders
            .get(order_id)
            .await?
            .ok_or(PaymentError::NotFound(order_id))?;

        match order.status {
            PaymentStatus::Pending => {
                order.update_status(PaymentStatus::Cancelled);
                if !self
                    .orders
                    .update_if_status(&order, PaymentStatus::Pending)
                    .await?
                {
                    return Err(PaymentError::StateConflict {
                        current: order.status,
                        operation: "cancel",
                    });
                }
                info!(order_id = %order.id, reason, "Payment order cancelled");
                Ok(())
            }
            PaymentStatus::Initiated => {
                let channel = self.channels.resolve(order.method)?;
                let no = order.third_party_order_no.clone().ok_or_else(|| {
                    PaymentError::Validation(
                        "initiated order has no channel reference".to_string(),
                    )
                })?;
                match self.with_timeout(channel.cancel(&no)).await? {
                    CancelOutcome::AlreadyCompleted => {
                        info!(
                            order_id = %order.id,
                            third_party_order_no = %no,
                            "Channel reports completion; leaving order for callback reconciliation"
                        );
                        Err(PaymentError::StateConflict {
                            current: PaymentStatus::Initiated,
                            operation: "cancel",
                        })
                    }
                    CancelOutcome::Cancelled => {
                        order.update_status(PaymentStatus::Cancelled);
                        if !self
                            .orders
                            .update_if_status(&order, PaymentStatus::Initiated)
                            .await?
                        {
                            return Err(PaymentError::StateConflict {
                                current: order.status,
                                operation: "cancel",
                            });
                        }
                        info!(order_id = %order.id, reason, "Initiated payment cancelled at channel");
                        Ok(())
                    }
                }
            }
            current => Err(PaymentError::StateConflict {
                current,
                operation: "cancel",
            }),
        }
    }

    /// Re-enter the initiate flow for a Failed order, bounded by the retry
    /// budget. Exhaustion leaves the order Failed for manual handling.
    pub async fn retry_failed(&self, order_id: Uuid) -> Result<InitiateOutcome, PaymentError> {
        let key = payment_lock_key(order_id);
        let token = acquire_with_retry(&self.locks, &key, &self.config.lock)
            .await
            .map_err(map_lock)?;
        let result = self.retry_locked(order_id).await;
        release_quietly(&self.locks, &key, &token).await;
        result
    }

    async fn retry_locked(&self, order_id: Uuid) -> Result<InitiateOutcome, PaymentError> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or(PaymentError::NotFound(order_id))?;
        if order.status != PaymentStatus::Failed {
            return Err(PaymentError::StateConflict {
                current: order.status,
                operation: "retry",
            });
        }
        if order.retry_count >= self.config.max_retries {
            return Err(PaymentError::RetryExhausted(order_id));
        }
        self.call_channel_initiate(order, PaymentStatus::Failed).await
    }

    /// Active re-query for an Initiated order whose callback never arrived.
    /// The channel's answer flows through the same idempotent transition
    /// path as a callback; a locally newer terminal state always wins.
    pub async fn sync_status(&self, order_id: Uuid) -> Result<CallbackAck, PaymentError> {
        let key = payment_lock_key(order_id);
        let token = acquire_with_retry(&self.locks, &key, &self.config.lock)
            .await
            .map_err(map_lock)?;
        let result = self.sync_status_locked(order_id).await;
        release_quietly(&self.locks, &key, &token).await;
        result
    }

    async fn sync_status_locked(&self, order_id: Uuid) -> Result<CallbackAck, PaymentError> {
        let mut order = self
            .orders
            .get(order_id)
            .await?
            .ok_or(PaymentError::NotFound(order_id))?;
        if order.status != PaymentStatus::Initiated {
            return Ok(CallbackAck::Ignored);
        }
        let Some(no) = order.third_party_order_no.clone() else {
            return Ok(CallbackAck::Ignored);
        };
        let channel = self.channels.resolve(order.method)?;
        let status = self.with_timeout(channel.query_status(&no)).await?;

        match status {
            ChannelPaymentStatus::Succeeded => {
                let amount = order.amount;
                self.apply_outcome(order, CallbackOutcome::Success, Some(amount), None, None)
                    .await
            }
            ChannelPaymentStatus::Failed => {
                self.apply_outcome(order, CallbackOutcome::Failure, None, None, None)
                    .await
            }
            ChannelPaymentStatus::Cancelled => {
                order.update_status(PaymentStatus::Cancelled);
                if self
                    .orders
                    .update_if_status(&order, PaymentStatus::Initiated)
                    .await?
                {
                    info!(order_id = %order.id, "Status sync: channel cancelled the payment");
                    Ok(CallbackAck::Applied)
                } else {
                    Ok(CallbackAck::Ignored)
                }
            }
            ChannelPaymentStatus::Pending | ChannelPaymentStatus::NotFound => {
                Ok(CallbackAck::Ignored)
            }
        }
    }

    /// Close out an order the expiry sweep selected: Pending/Initiated past
    /// expiry, or Failed with the retry budget spent. Returns whether a
    /// transition happened.
    pub async fn expire(&self, order_id: Uuid) -> Result<bool, PaymentError> {
        let key = payment_lock_key(order_id);
        let token = acquire_with_retry(&self.locks, &key, &self.config.lock)
            .await
            .map_err(map_lock)?;
        let result = self.expire_locked(order_id).await;
        release_quietly(&self.locks, &key, &token).await;
        result
    }

    async fn expire_locked(&self, order_id: Uuid) -> Result<bool, PaymentError> {
        let mut order = self
            .orders
            .get(order_id)
            .await?
            .ok_or(PaymentError::NotFound(order_id))?;

        let eligible = match order.status {
            PaymentStatus::Pending | PaymentStatus::Initiated => order.expires_at <= Utc::now(),
            PaymentStatus::Failed => order.retry_count >= self.config.max_retries,
            _ => false,
        };
        if !eligible {
            return Ok(false);
        }

        let expected = order.status;
        order.update_status(PaymentStatus::Expired);
        let applied = self.orders.update_if_status(&order, expected).await?;
        if applied {
            info!(order_id = %order.id, from = ?expected, "Payment order expired");
        }
        Ok(applied)
    }

    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = Result<T, ChannelError>>,
    ) -> Result<T, ChannelError> {
        match timeout(self.config.channel_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout(self.config.channel_timeout.as_secs())),
        }
    }
}
