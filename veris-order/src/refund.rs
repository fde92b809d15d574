use crate::locking::{
    acquire_with_retry, payment_lock_key, refund_lock_key, release_quietly, LockPolicy,
};
use crate::models::{AuditDecision, CreateRefundRequest, PaymentStatus, RefundOrder, RefundStatus};
use crate::repository::{PaymentOrderRepository, RefundOrderRepository};
use chrono::Utc;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;
use veris_channel::ChannelRouter;
use veris_core::{
    CallbackKind, CallbackOutcome, ChannelError, ChannelRefundStatus, LockError, LockService,
    PaymentMethod, StoreError,
};

use crate::payment::CallbackAck;

#[derive(Debug, Clone)]
pub struct RefundConfig {
    pub max_retries: u32,
    pub channel_timeout: Duration,
    pub lock: LockPolicy,
}

impl Default for RefundConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            channel_timeout: Duration::from_secs(10),
            lock: LockPolicy::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RefundError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Refund order not found: {0}")]
    NotFound(Uuid),

    #[error("Parent payment order not found: {0}")]
    ParentNotFound(Uuid),

    #[error("Parent payment order is not refundable from status {0:?}")]
    ParentNotRefundable(PaymentStatus),

    #[error("Requested {requested} exceeds remaining refundable {remaining}")]
    InsufficientRefundable {
        requested: Decimal,
        remaining: Decimal,
    },

    #[error("Operation {operation} not valid from status {current:?}")]
    StateConflict {
        current: RefundStatus,
        operation: &'static str,
    },

    #[error("Retry budget exhausted for refund {0}")]
    RetryExhausted(Uuid),

    #[error("Refund is busy, try again: {0}")]
    Busy(String),

    #[error("Lock backend error: {0}")]
    LockBackend(String),

    #[error("Callback signature verification failed")]
    SignatureInvalid,

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn map_lock(e: LockError) -> RefundError {
    match e {
        LockError::Contended(key) => RefundError::Busy(key),
        LockError::Backend(msg) => RefundError::LockBackend(msg),
    }
}

/// Drives refund orders: creation bounded by the parent's refundable
/// balance, audit, channel processing, idempotent completion.
pub struct RefundOrchestrator {
    refunds: Arc<dyn RefundOrderRepository>,
    orders: Arc<dyn PaymentOrderRepository>,
    channels: Arc<ChannelRouter>,
    locks: Arc<dyn LockService>,
    config: RefundConfig,
}

impl RefundOrchestrator {
    pub fn new(
        refunds: Arc<dyn RefundOrderRepository>,
        orders: Arc<dyn PaymentOrderRepository>,
        channels: Arc<ChannelRouter>,
        locks: Arc<dyn LockService>,
        config: RefundConfig,
    ) -> Self {
        Self {
            refunds,
            orders,
            channels,
            locks,
            config,
        }
    }

    pub fn config(&self) -> &RefundConfig {
        &self.config
    }

    /// Create a refund request against a paid order. Serialized on the
    /// parent's lock so concurrent requests cannot both pass the balance
    /// check.
    pub async fn create_refund_order(
        &self,
        request: &CreateRefundRequest,
    ) -> Result<RefundOrder, RefundError> {
        if request.amount <= Decimal::ZERO {
            return Err(RefundError::Validation(
                "refund amount must be positive".to_string(),
            ));
        }

        let key = payment_lock_key(request.payment_order_id);
        let token = acquire_with_retry(&self.locks, &key, &self.config.lock)
            .await
            .map_err(map_lock)?;
        let result = self.create_locked(request).await;
        release_quietly(&self.locks, &key, &token).await;
        result
    }

    async fn create_locked(
        &self,
        request: &CreateRefundRequest,
    ) -> Result<RefundOrder, RefundError> {
        let parent = self
            .orders
            .get(request.payment_order_id)
            .await?
            .ok_or(RefundError::ParentNotFound(request.payment_order_id))?;
        if parent.status != PaymentStatus::Success {
            return Err(RefundError::ParentNotRefundable(parent.status));
        }

        let remaining = self.remaining_refundable(&parent.id, &parent).await?;
        if request.amount > remaining {
            return Err(RefundError::InsufficientRefundable {
                requested: request.amount,
                remaining,
            });
        }

        let refund = RefundOrder::new(request);
        self.refunds.insert(&refund).await?;
        info!(refund_id = %refund.id, payment_order_id = %parent.id, amount = %refund.amount, "Refund order created");
        Ok(refund)
    }

    async fn remaining_refundable(
        &self,
        parent_id: &Uuid,
        parent: &crate::models::PaymentOrder,
    ) -> Result<Decimal, RefundError> {
        let paid = parent.actual_amount.unwrap_or(parent.amount);
        let reserved = self.refunds.sum_reserved_for_payment(*parent_id).await?;
        Ok(paid - reserved)
    }

    /// Approve or reject a pending refund. Approval re-checks the remaining
    /// balance: two Pending refunds may each have passed the create check.
    pub async fn audit(
        &self,
        refund_id: Uuid,
        approved: bool,
        comment: Option<String>,
        auditor_id: &str,
    ) -> Result<RefundOrder, RefundError> {
        let refund = self
            .refunds
            .get(refund_id)
            .await?
            .ok_or(RefundError::NotFound(refund_id))?;

        // Audit mutates the parent's reserved sum, so serialize on the parent.
        let key = payment_lock_key(refund.payment_order_id);
        let token = acquire_with_retry(&self.locks, &key, &self.config.lock)
            .await
            .map_err(map_lock)?;
        let result = self
            .audit_locked(refund_id, approved, comment, auditor_id)
            .await;
        release_quietly(&self.locks, &key, &token).await;
        result
    }

    async fn audit_locked(
        &self,
        refund_id: Uuid,
        approved: bool,
        comment: Option<String>,
        auditor_id: &str,
    ) -> Result<RefundOrder, RefundError> {
        let mut refund = self
            .refunds
            .get(refund_id)
            .await?
            .ok_or(RefundError::NotFound(refund_id))?;
        if refund.status != RefundStatus::Pending {
            return Err(RefundError::StateConflict {
                current: refund.status,
                operation: "audit",
            });
        }

        if approved {
            let parent = self
                .orders
                .get(refund.payment_order_id)
                .await?
                .ok_or(RefundError::ParentNotFound(refund.payment_order_id))?;
            let remaining = self
                .remaining_refundable(&refund.payment_order_id, &parent)
                .await?;
            if refund.amount > remaining {
                return Err(RefundError::InsufficientRefundable {
                    requested: refund.amount,
                    remaining,
                });
            }
        }

        refund.audit = Some(AuditDecision {
            auditor_id: auditor_id.to_string(),
            approved,
            comment,
            decided_at: Utc::now(),
        });
        refund.update_status(if approved {
            RefundStatus::Approved
        } else {
            RefundStatus::Rejected
        });
        if !self
            .refunds
            .update_if_status(&refund, RefundStatus::Pending)
            .await?
        {
            return Err(RefundError::StateConflict {
                current: refund.status,
                operation: "audit",
            });
        }
        info!(refund_id = %refund.id, approved, auditor_id, "Refund audited");
        Ok(refund)
    }

    /// Push an approved refund to the channel. A timeout leaves the refund
    /// Approved for the reconciliation sweep; the refund id doubles as the
    /// channel-side idempotency key so a re-send cannot double-pay.
    pub async fn process(&self, refund_id: Uuid) -> Result<RefundOrder, RefundError> {
        let key = refund_lock_key(refund_id);
        let token = acquire_with_retry(&self.locks, &key, &self.config.lock)
            .await
            .map_err(map_lock)?;
        let result = self.process_locked(refund_id, RefundStatus::Approved).await;
        release_quietly(&self.locks, &key, &token).await;
        result
    }

    async fn process_locked(
        &self,
        refund_id: Uuid,
        expected: RefundStatus,
    ) -> Result<RefundOrder, RefundError> {
        let mut refund = self
            .refunds
            .get(refund_id)
            .await?
            .ok_or(RefundError::NotFound(refund_id))?;
        if refund.status != expected {
            return Err(RefundError::StateConflict {
                current: refund.status,
                operation: "process",
            });
        }

        let parent = self
            .orders
            .get(refund.payment_order_id)
            .await?
            .ok_or(RefundError::ParentNotFound(refund.payment_order_id))?;
        let third_party_order_no = parent.third_party_order_no.clone().ok_or_else(|| {
            RefundError::Validation("parent order has no channel reference".to_string())
        })?;
        let channel = self.channels.resolve(parent.method)?;

        let result = self
            .with_timeout(channel.refund(
                &third_party_order_no,
                &refund.id.to_string(),
                refund.amount,
            ))
            .await?;

        refund.third_party_refund_no = Some(result.third_party_refund_no.clone());
        if expected == RefundStatus::Failed {
            refund.retry_count += 1;
        }
        refund.update_status(RefundStatus::Processing);
        if !self.refunds.update_if_status(&refund, expected).await? {
            return Err(RefundError::StateConflict {
                current: refund.status,
                operation: "process",
            });
        }
        info!(refund_id = %refund.id, third_party_refund_no = %result.third_party_refund_no, "Refund processing");

        // Synchronous channels settle in the same call; run the result
        // through the shared completion path.
        match result.status {
            ChannelRefundStatus::Succeeded => {
                self.apply_outcome(refund, CallbackOutcome::Success).await
            }
            ChannelRefundStatus::Failed => {
                self.apply_outcome(refund, CallbackOutcome::Failure).await
            }
            ChannelRefundStatus::Processing | ChannelRefundStatus::NotFound => Ok(refund),
        }
    }

    /// Apply an asynchronous refund notification, mirroring the payment
    /// callback discipline: verify first, then lock, then CAS; same-outcome
    /// replays are no-ops.
    pub async fn handle_refund_callback(
        &self,
        method: PaymentMethod,
        raw_payload: &str,
        signature: &str,
    ) -> Result<CallbackAck, RefundError> {
        let channel = self.channels.resolve(method)?;
        if !channel.verify_signature(raw_payload, signature) {
            warn!(method = method.as_str(), "Refund callback rejected: signature verification failed");
            return Err(RefundError::SignatureInvalid);
        }
        let info = channel.parse_callback(raw_payload)?;
        if info.kind != CallbackKind::Refund {
            return Err(RefundError::Validation(
                "payment callback delivered to the refund handler".to_string(),
            ));
        }

        let Some(refund) = self
            .refunds
            .find_by_third_party_refund_no(&info.reference_no)
            .await?
        else {
            warn!(
                third_party_refund_no = %info.reference_no,
                outcome = ?info.outcome,
                "Refund callback references no known refund; logged for reconciliation"
            );
            return Ok(CallbackAck::Ignored);
        };

        let key = refund_lock_key(refund.id);
        let token = acquire_with_retry(&self.locks, &key, &self.config.lock)
            .await
            .map_err(map_lock)?;
        let result = self.callback_locked(refund.id, info.outcome.clone()).await;
        release_quietly(&self.locks, &key, &token).await;
        result
    }

    async fn callback_locked(
        &self,
        refund_id: Uuid,
        outcome: CallbackOutcome,
    ) -> Result<CallbackAck, RefundError> {
        let refund = self
            .refunds
            .get(refund_id)
            .await?
            .ok_or(RefundError::NotFound(refund_id))?;

        let target = match outcome {
            CallbackOutcome::Success => RefundStatus::Success,
            CallbackOutcome::Failure => RefundStatus::Failed,
        };
        if refund.status == target {
            info!(refund_id = %refund.id, status = ?refund.status, "Duplicate refund callback; no-op");
            return Ok(CallbackAck::Duplicate);
        }
        if refund.status != RefundStatus::Processing {
            warn!(
                refund_id = %refund.id,
                current = ?refund.status,
                attempted = ?target,
                "Late or irrelevant refund callback; no transition"
            );
            return Ok(CallbackAck::Ignored);
        }

        match self.apply_outcome(refund, outcome).await {
            Ok(_) => Ok(CallbackAck::Applied),
            Err(e) => Err(e),
        }
    }

    /// The single place a refund moves to Success/Failed. Caller holds the
    /// refund lock; refund must be Processing.
    async fn apply_outcome(
        &self,
        mut refund: RefundOrder,
        outcome: CallbackOutcome,
    ) -> Result<RefundOrder, RefundError> {
        let target = match outcome {
            CallbackOutcome::Success => RefundStatus::Success,
            CallbackOutcome::Failure => RefundStatus::Failed,
        };
        if target == RefundStatus::Success {
            refund.completed_at = Some(Utc::now());
        }
        refund.update_status(target);
        if !self
            .refunds
            .update_if_status(&refund, RefundStatus::Processing)
            .await?
        {
            warn!(refund_id = %refund.id, "Concurrent writer won the refund status race");
            return Ok(refund);
        }
        info!(refund_id = %refund.id, status = ?target, "Refund outcome applied");
        Ok(refund)
    }

    /// Re-send a Failed refund to the channel, bounded by the retry budget.
    pub async fn retry_failed(&self, refund_id: Uuid) -> Result<RefundOrder, RefundError> {
        let key = refund_lock_key(refund_id);
        let token = acquire_with_retry(&self.locks, &key, &self.config.lock)
            .await
            .map_err(map_lock)?;
        let result = self.retry_locked(refund_id).await;
        release_quietly(&self.locks, &key, &token).await;
        result
    }

    async fn retry_locked(&self, refund_id: Uuid) -> Result<RefundOrder, RefundError> {
        let refund = self
            .refunds
            .get(refund_id)
            .await?
            .ok_or(RefundError::NotFound(refund_id))?;
        if refund.status != RefundStatus::Failed {
            return Err(RefundError::StateConflict {
                current: refund.status,
                operation: "retry",
            });
        }
        if refund.retry_count >= self.config.max_retries {
            return Err(RefundError::RetryExhausted(refund_id));
        }
        self.process_locked(refund_id, RefundStatus::Failed).await
    }

    /// Cancel from any non-terminal status.
    pub async fn cancel(&self, refund_id: Uuid, reason: &str) -> Result<(), RefundError> {
        let key = refund_lock_key(refund_id);
        let token = acquire_with_retry(&self.locks, &key, &self.config.lock)
            .await
            .map_err(map_lock)?;
        let result = self.cancel_locked(refund_id, reason).await;
        release_quietly(&self.locks, &key, &token).await;
        result
    }

    async fn cancel_locked(&self, refund_id: Uuid, reason: &str) -> Result<(), RefundError> {
        let mut refund = self
            .refunds
            .get(refund_id)
            .await?
            .ok_or(RefundError::NotFound(refund_id))?;
        if refund.status.is_terminal() {
            return Err(RefundError::StateConflict {
                current: refund.status,
                operation: "cancel",
            });
        }
        let expected = refund.status;
        refund.update_status(RefundStatus::Cancelled);
        if !self.refunds.update_if_status(&refund, expected).await? {
            return Err(RefundError::StateConflict {
                current: refund.status,
                operation: "cancel",
            });
        }
        info!(refund_id = %refund.id, reason, "Refund cancelled");
        Ok(())
    }

    /// Active re-query for a Processing refund whose callback never arrived.
    pub async fn sync_status(&self, refund_id: Uuid) -> Result<CallbackAck, RefundError> {
        let key = refund_lock_key(refund_id);
        let token = acquire_with_retry(&self.locks, &key, &self.config.lock)
            .await
            .map_err(map_lock)?;
        let result = self.sync_locked(refund_id).await;
        release_quietly(&self.locks, &key, &token).await;
        result
    }

    async fn sync_locked(&self, refund_id: Uuid) -> Result<CallbackAck, RefundError> {
        let refund = self
            .refunds
            .get(refund_id)
            .await?
            .ok_or(RefundError::NotFound(refund_id))?;
        if refund.status != RefundStatus::Processing {
            return Ok(CallbackAck::Ignored);
        }
        let Some(no) = refund.third_party_refund_no.clone() else {
            return Ok(CallbackAck::Ignored);
        };
        let parent = self
            .orders
            .get(refund.payment_order_id)
            .await?
            .ok_or(RefundError::ParentNotFound(refund.payment_order_id))?;
        let channel = self.channels.resolve(parent.method)?;
        let status = self.with_timeout(channel.query_refund_status(&no)).await?;

        match status {
            ChannelRefundStatus::Succeeded => {
                self.apply_outcome(refund, CallbackOutcome::Success).await?;
                Ok(CallbackAck::Applied)
            }
            ChannelRefundStatus::Failed => {
                self.apply_outcome(refund, CallbackOutcome::Failure).await?;
                Ok(CallbackAck::Applied)
            }
            ChannelRefundStatus::Processing | ChannelRefundStatus::NotFound => {
                Ok(CallbackAck::Ignored)
            }
        }
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
