use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;
use veris_core::StoreError;
use veris_order::models::{PaymentOrder, PaymentStatus, RefundOrder, RefundStatus};
use veris_order::repository::{PaymentOrderRepository, RefundOrderRepository};
use veris_risk::models::{RiskRecord, RiskRule};
use veris_risk::repository::{RiskRecordRepository, RiskRuleRepository};

/// In-memory payment order store. Backs tests and single-node deployments;
/// the compare-and-set write runs under the map's write lock so it is atomic
/// the same way a conditional UPDATE is.
#[derive(Default)]
pub struct InMemoryPaymentOrderRepository {
    orders: RwLock<HashMap<Uuid, PaymentOrder>>,
}

impl InMemoryPaymentOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentOrderRepository for InMemoryPaymentOrderRepository {
    async fn insert(&self, order: &PaymentOrder) -> Result<(), StoreError> {
        self.orders.write().await.insert(order.id, order.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PaymentOrder>, StoreError> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn find_by_third_party_no(
        &self,
        third_party_order_no: &str,
    ) -> Result<Option<PaymentOrder>, StoreError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|o| o.third_party_order_no.as_deref() == Some(third_party_order_no))
            .cloned())
    }

    async fn find_active_by_business_id(
        &self,
        business_order_id: &str,
    ) -> Result<Option<PaymentOrder>, StoreError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|o| o.business_order_id == business_order_id && !o.status.is_terminal())
            .cloned())
    }

    async fn update_if_status(
        &self,
        order: &PaymentOrder,
        expected: PaymentStatus,
    ) -> Result<bool, StoreError> {
        let mut orders = self.orders.write().await;
        match orders.get(&order.id) {
            Some(stored) if stored.status == expected => {
                orders.insert(order.id, order.clone());
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::Backend(format!(
                "payment order {} missing on update",
                order.id
            ))),
        }
    }

    async fn count_created_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.user_id == user_id && o.created_at >= since)
            .count() as u32)
    }

    async fn list_expirable(
        &self,
        now: DateTime<Utc>,
        max_retries: u32,
        limit: usize,
    ) -> Result<Vec<PaymentOrder>, StoreError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .filter(|o| match o.status {
                PaymentStatus::Pending | PaymentStatus::Initiated => o.expires_at <= now,
                PaymentStatus::Failed => o.retry_count >= max_retries,
                _ => false,
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_retryable(
        &self,
        attempted_before: DateTime<Utc>,
        max_retries: u32,
        limit: usize,
    ) -> Result<Vec<PaymentOrder>, StoreError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .filter(|o| {
                o.status == PaymentStatus::Failed
                    && o.retry_count < max_retries
                    && o.updated_at <= attempted_before
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_callback_overdue(
        &self,
        initiated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PaymentOrder>, StoreError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .filter(|o| {
                o.status == PaymentStatus::Initiated
                    && o.initiated_at.is_some_and(|at| at <= initiated_before)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_archivable(
        &self,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PaymentOrder>, StoreError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.status.is_terminal() && !o.archived && o.updated_at <= updated_before)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_archived(&self, id: Uuid) -> Result<(), StoreError> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::Backend(format!("payment order {} missing on archive", id)))?;
        order.archived = true;
        order.updated_at = Utc::now();
        Ok(())
    }
}

/// In-memory refund order store.
#[derive(Default)]
pub struct InMemoryRefundOrderRepository {
    refunds: RwLock<HashMap<Uuid, RefundOrder>>,
}

impl InMemoryRefundOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefundOrderRepository for InMemoryRefundOrderRepository {
    async fn insert(&self, refund: &RefundOrder) -> Result<(), StoreError> {
        self.refunds.write().await.insert(refund.id, refund.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<RefundOrder>, StoreError> {
        Ok(self.refunds.read().await.get(&id).cloned())
    }

    async fn find_by_third_party_refund_no(
        &self,
        third_party_refund_no: &str,
    ) -> Result<Option<RefundOrder>, StoreError> {
        Ok(self
            .refunds
            .read()
            .await
            .values()
            .find(|r| r.third_party_refund_no.as_deref() == Some(third_party_refund_no))
            .cloned())
    }

    async fn update_if_status(
        &self,
        refund: &RefundOrder,
        expected: RefundStatus,
    ) -> Result<bool, StoreError> {
        let mut refunds = self.refunds.write().await;
        match refunds.get(&refund.id) {
            Some(stored) if stored.status == expected => {
                refunds.insert(refund.id, refund.clone());
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::Backend(format!(
                "refund order {} missing on update",
                refund.id
            ))),
        }
    }

    async fn sum_reserved_for_payment(
        &self,
        payment_order_id: Uuid,
    ) -> Result<Decimal, StoreError> {
        Ok(self
            .refunds
            .read()
            .await
            .values()
            .filter(|r| r.payment_order_id == payment_order_id && r.status.reserves_balance())
            .map(|r| r.amount)
            .sum())
    }

    async fn list_processing_overdue(
        &self,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RefundOrder>, StoreError> {
        Ok(self
            .refunds
            .read()
            .await
            .values()
            .filter(|r| r.status == RefundStatus::Processing && r.updated_at <= updated_before)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_retryable(
        &self,
        attempted_before: DateTime<Utc>,
        max_retries: u32,
        limit: usize,
    ) -> Result<Vec<RefundOrder>, StoreError> {
        Ok(self
            .refunds
            .read()
            .await
            .values()
            .filter(|r| {
                r.status == RefundStatus::Failed
                    && r.retry_count < max_retries
                    && r.updated_at <= attempted_before
            })
            .take(limit)
            .cloned()
            .collect())
    }
}

/// In-memory risk record store.
#[derive(Default)]
pub struct InMemoryRiskRecordRepository {
    records: RwLock<HashMap<Uuid, RiskRecord>>,
}

impl InMemoryRiskRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RiskRecordRepository for InMemoryRiskRecordRepository {
    async fn insert(&self, record: &RiskRecord) -> Result<(), StoreError> {
        self.records.write().await.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<RiskRecord>, StoreError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn find_open_for_order(
        &self,
        payment_order_id: Uuid,
    ) -> Result<Option<RiskRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|r| r.payment_order_id == payment_order_id && r.is_open())
            .cloned())
    }

    async fn find_latest_for_order(
        &self,
        payment_order_id: Uuid,
    ) -> Result<Option<RiskRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.payment_order_id == payment_order_id)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn update(&self, record: &RiskRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if !records.contains_key(&record.id) {
            return Err(StoreError::Backend(format!(
                "risk record {} missing on update",
                record.id
            )));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }
}

/// Fixed in-memory rule set, seeded at construction.
pub struct InMemoryRiskRuleRepository {
    rules: Vec<RiskRule>,
}

impl InMemoryRiskRuleRepository {
    pub fn new(rules: Vec<RiskRule>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl RiskRuleRepository for InMemoryRiskRuleRepository {
    async fn list_enabled(&self) -> Result<Vec<RiskRule>, StoreError> {
        Ok(self.rules.iter().filter(|r| r.enabled).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use veris_core::PaymentMethod;
    use veris_order::models::{CreateOrderRequest, CreateRefundRequest};

    fn order(business_order_id: &str) -> PaymentOrder {
        PaymentOrder::new(
            &CreateOrderRequest {
                business_order_id: business_order_id.to_string(),
                user_id: "user-1".to_string(),
                amount: dec!(50.00),
                method: PaymentMethod::Card,
                subject: "order".to_string(),
            },
            Duration::minutes(30),
        )
    }

    #[tokio::test]
    async fn update_if_status_rejects_stale_writes() {
        let repo = InMemoryPaymentOrderRepository::new();
        let mut order = order("biz-1");
        repo.insert(&order).await.unwrap();

        order.update_status(PaymentStatus::Initiated);
        assert!(repo
            .update_if_status(&order, PaymentStatus::Pending)
            .await
            .unwrap());

        // Second writer still thinks the order is Pending.
        let mut stale = order.clone();
        stale.update_status(PaymentStatus::Cancelled);
        assert!(!repo
            .update_if_status(&stale, PaymentStatus::Pending)
            .await
            .unwrap());
        assert_eq!(
            repo.get(order.id).await.unwrap().unwrap().status,
            PaymentStatus::Initiated
        );
    }

    #[tokio::test]
    async fn active_lookup_ignores_terminal_orders() {
        let repo = InMemoryPaymentOrderRepository::new();
        let mut done = order("biz-2");
        repo.insert(&done).await.unwrap();
        done.update_status(PaymentStatus::Cancelled);
        repo.update_if_status(&done, PaymentStatus::Pending)
            .await
            .unwrap();

        assert!(repo
            .find_active_by_business_id("biz-2")
            .await
            .unwrap()
            .is_none());

        let live = order("biz-2");
        repo.insert(&live).await.unwrap();
        assert_eq!(
            repo.find_active_by_business_id("biz-2")
                .await
                .unwrap()
                .unwrap()
                .id,
            live.id
        );
    }

    #[tokio::test]
    async fn expirable_includes_overdue_and_exhausted() {
        let repo = InMemoryPaymentOrderRepository::new();
        let mut overdue = order("biz-3");
        overdue.expires_at = Utc::now() - Duration::minutes(1);
        repo.insert(&overdue).await.unwrap();

        let mut exhausted = order("biz-4");
        repo.insert(&exhausted).await.unwrap();
        exhausted.retry_count = 3;
        exhausted.update_status(PaymentStatus::Failed);
        repo.update_if_status(&exhausted, PaymentStatus::Pending)
            .await
            .unwrap();

        let fresh = order("biz-5");
        repo.insert(&fresh).await.unwrap();

        let expirable = repo.list_expirable(Utc::now(), 3, 10).await.unwrap();
        let ids: Vec<Uuid> = expirable.iter().map(|o| o.id).collect();
        assert!(ids.contains(&overdue.id));
        assert!(ids.contains(&exhausted.id));
        assert!(!ids.contains(&fresh.id));
    }

    #[tokio::test]
    async fn reserved_sum_skips_pending_and_rejected() {
        let repo = InMemoryRefundOrderRepository::new();
        let parent = Uuid::new_v4();
        let make = |amount| {
            RefundOrder::new(&CreateRefundRequest {
                payment_order_id: parent,
                amount,
                reason: "test".to_string(),
            })
        };

        let pending = make(dec!(10.00));
        repo.insert(&pending).await.unwrap();

        let mut approved = make(dec!(20.00));
        repo.insert(&approved).await.unwrap();
        approved.update_status(RefundStatus::Approved);
        repo.update_if_status(&approved, RefundStatus::Pending)
            .await
            .unwrap();

        let mut rejected = make(dec!(40.00));
        repo.insert(&rejected).await.unwrap();
        rejected.update_status(RefundStatus::Rejected);
        repo.update_if_status(&rejected, RefundStatus::Pending)
            .await
            .unwrap();

        assert_eq!(
            repo.sum_reserved_for_payment(parent).await.unwrap(),
            dec!(20.00)
        );
    }
}
