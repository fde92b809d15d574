use crate::payment::{PaymentError, PaymentOrchestrator};
use crate::refund::{RefundError, RefundOrchestrator};
use crate::repository::{PaymentOrderRepository, RefundOrderRepository};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Pause between sweep rounds.
    pub interval: Duration,
    /// Max rows pulled per sweep per round.
    pub batch_size: usize,
    /// Concurrent status-sync queries per round.
    pub sync_workers: usize,
    /// An Initiated order older than this with no callback gets re-queried.
    pub callback_overdue_secs: i64,
    /// Minimum age of a Failed order/refund before automatic retry.
    pub retry_backoff_secs: i64,
    /// Terminal orders untouched this long get soft-archived.
    pub archive_after_days: i64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_size: 100,
            sync_workers: 8,
            callback_overdue_secs: 120,
            retry_backoff_secs: 300,
            archive_after_days: 90,
        }
    }
}

/// What one sweep round touched.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub retried: usize,
    pub payments_synced: usize,
    pub refunds_synced: usize,
    pub refunds_retried: usize,
    pub archived: usize,
}

/// Periodic repair loop: closes out overdue orders, re-sends failed work,
/// reconciles silent channels, and archives settled history. Every mutation
/// goes through the orchestrators so the lock/CAS discipline holds here too.
pub struct ReconciliationScheduler {
    orders: Arc<dyn PaymentOrderRepository>,
    refunds: Arc<dyn RefundOrderRepository>,
    payments: Arc<PaymentOrchestrator>,
    refund_orch: Arc<RefundOrchestrator>,
    config: ReconcileConfig,
}

impl ReconciliationScheduler {
    pub fn new(
        orders: Arc<dyn PaymentOrderRepository>,
        refunds: Arc<dyn RefundOrderRepository>,
        payments: Arc<PaymentOrchestrator>,
        refund_orch: Arc<RefundOrchestrator>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            orders,
            refunds,
            payments,
            refund_orch,
            config,
        }
    }

    /// Run sweep rounds forever. Spawn this on the runtime; it never returns.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = self.config.interval.as_secs(), "Reconciliation scheduler started");
        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(report) => {
                    if report != SweepReport::default() {
                        info!(?report, "Sweep round complete");
                    } else {
                        debug!("Sweep round complete; nothing to do");
                    }
                }
                Err(e) => error!(error = %e, "Sweep round aborted"),
            }
        }
    }

    /// One full round of all sweeps. Individual item failures are logged and
    /// skipped; only a store failure listing candidates aborts the round.
    pub async fn run_once(&self) -> Result<SweepReport, veris_core::StoreError> {
        let mut report = SweepReport::default();
        report.expired = self.sweep_expiry().await?;
        report.retried = self.sweep_payment_retry().await?;
        report.payments_synced = self.sweep_payment_sync().await?;
        report.refunds_synced = self.sweep_refund_sync().await?;
        report.refunds_retried = self.sweep_refund_retry().await?;
        report.archived = self.sweep_archive().await?;
        Ok(report)
    }

    /// Close out Pending/Initiated orders past their deadline and Failed
    /// orders with no retries left.
    async fn sweep_expiry(&self) -> Result<usize, veris_core::StoreError> {
        let candidates = self
            .orders
            .list_expirable(
                Utc::now(),
                self.payments.config().max_retries,
                self.config.batch_size,
            )
            .await?;
        let mut expired = 0;
        for order in candidates {
            match self.payments.expire(order.id).await {
                Ok(true) => expired += 1,
                // Validated under the lock and no longer eligible; a callback
                // or operator beat us to it.
                Ok(false) => {}
                Err(PaymentError::Busy(_)) => {
                    debug!(order_id = %order.id, "Order locked elsewhere; will expire next round");
                }
                Err(e) => warn!(order_id = %order.id, error = %e, "Expiry failed"),
            }
        }
        Ok(expired)
    }

    /// Re-initiate Failed orders that have cooled past the backoff window.
    async fn sweep_payment_retry(&self) -> Result<usize, veris_core::StoreError> {
        let cutoff = Utc::now() - ChronoDuration::seconds(self.config.retry_backoff_secs);
        let candidates = self
            .orders
            .list_retryable(
                cutoff,
                self.payments.config().max_retries,
                self.config.batch_size,
            )
            .await?;
        let mut retried = 0;
        for order in candidates {
            match self.payments.retry_failed(order.id).await {
                Ok(_) => retried += 1,
                Err(PaymentError::StateConflict { .. } | PaymentError::RetryExhausted(_)) => {}
                Err(e) => warn!(order_id = %order.id, error = %e, "Automatic payment retry failed"),
            }
        }
        Ok(retried)
    }

    /// Actively query the channel for Initiated orders whose callback is
    /// overdue. Queries fan out under a worker cap.
    async fn sweep_payment_sync(&self) -> Result<usize, veris_core::StoreError> {
        let cutoff = Utc::now() - ChronoDuration::seconds(self.config.callback_overdue_secs);
        let candidates = self
            .orders
            .list_callback_overdue(cutoff, self.config.batch_size)
            .await?;

        let limit = Arc::new(Semaphore::new(self.config.sync_workers));
        let mut tasks = JoinSet::new();
        for order in candidates {
            let payments = Arc::clone(&self.payments);
            let limit = Arc::clone(&limit);
            tasks.spawn(async move {
                let Ok(_permit) = limit.acquire().await else {
                    return false;
                };
                match payments.sync_status(order.id).await {
                    Ok(crate::payment::CallbackAck::Applied) => true,
                    Ok(_) => false,
                    Err(e) => {
                        warn!(order_id = %order.id, error = %e, "Payment status sync failed");
                        false
                    }
                }
            });
        }

        let mut synced = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => synced += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Status sync task panicked"),
            }
        }
        Ok(synced)
    }

    /// Same as the payment sync, for Processing refunds the channel went
    /// quiet on.
    async fn sweep_refund_sync(&self) -> Result<usize, veris_core::StoreError> {
        let cutoff = Utc::now() - ChronoDuration::seconds(self.config.callback_overdue_secs);
        let candidates = self
            .refunds
            .list_processing_overdue(cutoff, self.config.batch_size)
            .await?;
        let mut synced = 0;
        for refund in candidates {
            match self.refund_orch.sync_status(refund.id).await {
                Ok(crate::payment::CallbackAck::Applied) => synced += 1,
                Ok(_) => {}
                Err(e) => warn!(refund_id = %refund.id, error = %e, "Refund status sync failed"),
            }
        }
        Ok(synced)
    }

    async fn sweep_refund_retry(&self) -> Result<usize, veris_core::StoreError> {
        let cutoff = Utc::now() - ChronoDuration::seconds(self.config.retry_backoff_secs);
        let candidates = self
            .refunds
            .list_retryable(
                cutoff,
                self.refund_orch.config().max_retries,
                self.config.batch_size,
            )
            .await?;
        let mut retried = 0;
        for refund in candidates {
            match self.refund_orch.retry_failed(refund.id).await {
                Ok(_) => retried += 1,
                Err(RefundError::StateConflict { .. } | RefundError::RetryExhausted(_)) => {}
                Err(e) => warn!(refund_id = %refund.id, error = %e, "Automatic refund retry failed"),
            }
        }
        Ok(retried)
    }

    /// Soft-archive terminal orders past the retention window. Rows are
    /// flagged, never deleted.
    async fn sweep_archive(&self) -> Result<usize, veris_core::StoreError> {
        let cutoff = Utc::now() - ChronoDuration::days(self.config.archive_after_days);
        let candidates = self
            .orders
            .list_archivable(cutoff, self.config.batch_size)
            .await?;
        let mut archived = 0;
        for order in candidates {
            match self.orders.mark_archived(order.id).await {
                Ok(()) => archived += 1,
                Err(e) => warn!(order_id = %order.id, error = %e, "Archival failed"),
            }
        }
        Ok(archived)
    }
}
