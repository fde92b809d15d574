use crate::models::{PaymentOrder, PaymentStatus, RefundOrder, RefundStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;
use veris_core::StoreError;

/// Repository trait for payment order access.
///
/// `update_if_status` is the optimistic status-matching write ("update where
/// id = X and status = expected"): the final arbiter against double
/// processing when a lock lease expires under a long channel call.
#[async_trait]
pub trait PaymentOrderRepository: Send + Sync {
    async fn insert(&self, order: &PaymentOrder) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<PaymentOrder>, StoreError>;

    async fn find_by_third_party_no(
        &self,
        third_party_order_no: &str,
    ) -> Result<Option<PaymentOrder>, StoreError>;

    /// The non-terminal order bound to a business order id, if any
    /// (duplicate-create guard).
    async fn find_active_by_business_id(
        &self,
        business_order_id: &str,
    ) -> Result<Option<PaymentOrder>, StoreError>;

    /// Persist `order` only if the stored row still has `expected` status.
    /// Returns false when a concurrent writer got there first.
    async fn update_if_status(
        &self,
        order: &PaymentOrder,
        expected: PaymentStatus,
    ) -> Result<bool, StoreError>;

    /// Orders created by the user since the cutoff (velocity input).
    async fn count_created_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u32, StoreError>;

    /// Pending/Initiated orders past expiry, plus Failed orders out of
    /// retries: everything the expiry sweep should close out.
    async fn list_expirable(
        &self,
        now: DateTime<Utc>,
        max_retries: u32,
        limit: usize,
    ) -> Result<Vec<PaymentOrder>, StoreError>;

    /// Failed orders with retries left whose last attempt is older than the
    /// backoff cutoff.
    async fn list_retryable(
        &self,
        attempted_before: DateTime<Utc>,
        max_retries: u32,
        limit: usize,
    ) -> Result<Vec<PaymentOrder>, StoreError>;

    /// Initiated orders whose callback is overdue.
    async fn list_callback_overdue(
        &self,
        initiated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PaymentOrder>, StoreError>;

    /// Terminal, unarchived orders last touched before the retention cutoff.
    async fn list_archivable(
        &self,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PaymentOrder>, StoreError>;

    async fn mark_archived(&self, id: Uuid) -> Result<(), StoreError>;
}

/// Repository trait for refund order access.
#[async_trait]
pub trait RefundOrderRepository: Send + Sync {
    async fn insert(&self, refund: &RefundOrder) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<RefundOrder>, StoreError>;

    async fn find_by_third_party_refund_no(
        &self,
        third_party_refund_no: &str,
    ) -> Result<Option<RefundOrder>, StoreError>;

    async fn update_if_status(
        &self,
        refund: &RefundOrder,
        expected: RefundStatus,
    ) -> Result<bool, StoreError>;

    /// Sum of refund amounts in balance-reserving statuses
    /// (Approved/Processing/Success) for a parent payment order.
    async fn sum_reserved_for_payment(
        &self,
        payment_order_id: Uuid,
    ) -> Result<Decimal, StoreError>;

    /// Processing refunds whose completion callback is overdue.
    async fn list_processing_overdue(
        &self,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RefundOrder>, StoreError>;

    /// Failed refunds with retries left, past the backoff cutoff.
    async fn list_retryable(
        &self,
        attempted_before: DateTime<Utc>,
        max_retries: u32,
        limit: usize,
    ) -> Result<Vec<RefundOrder>, StoreError>;
}
