use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use veris_core::PaymentMethod;
use veris_shared::Masked;

/// Payment order status in the lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    RiskBlocked,
    Initiated,
    Success,
    Failed,
    Cancelled,
    Expired,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::RiskBlocked
                | PaymentStatus::Success
                | PaymentStatus::Cancelled
                | PaymentStatus::Expired
        )
    }
}

/// The single source of truth for one payment attempt against a business order.
/// Mutated only through defined transitions; soft-archived, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentOrder {
    pub id: Uuid,
    pub business_order_id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub actual_amount: Option<Decimal>,
    pub fee: Option<Decimal>,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub subject: String,
    pub third_party_order_no: Option<String>,
    pub third_party_txn_no: Option<String>,
    pub retry_count: u32,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub initiated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl PaymentOrder {
    pub fn new(request: &CreateOrderRequest, expiry: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            business_order_id: request.business_order_id.clone(),
            user_id: request.user_id.clone(),
            amount: request.amount,
            actual_amount: None,
            fee: None,
            method: request.method,
            status: PaymentStatus::Pending,
            subject: request.subject.clone(),
            third_party_order_no: None,
            third_party_txn_no: None,
            retry_count: 0,
            archived: false,
            created_at: now,
            updated_at: now,
            initiated_at: None,
            completed_at: None,
            expires_at: now + expiry,
        }
    }

    /// Update status and bump the audit timestamp.
    pub fn update_status(&mut self, new_status: PaymentStatus) {
        self.status = new_status;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub business_order_id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub subject: String,
}

/// Caller-side attributes fed into the risk check at initiate time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientContext {
    pub client_ip: Masked<String>,
    pub device_fingerprint: Option<Masked<String>>,
}

/// Refund order status in the lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Pending,
    Approved,
    Rejected,
    Processing,
    Success,
    Failed,
    Cancelled,
}

impl RefundStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RefundStatus::Rejected | RefundStatus::Success | RefundStatus::Cancelled
        )
    }

    /// Statuses that count against the parent order's refundable balance.
    pub fn reserves_balance(&self) -> bool {
        matches!(
            self,
            RefundStatus::Approved | RefundStatus::Processing | RefundStatus::Success
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditDecision {
    pub auditor_id: String,
    pub approved: bool,
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundOrder {
    pub id: Uuid,
    pub payment_order_id: Uuid,
    pub amount: Decimal,
    pub reason: String,
    pub status: RefundStatus,
    pub third_party_refund_no: Option<String>,
    pub audit: Option<AuditDecision>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RefundOrder {
    pub fn new(request: &CreateRefundRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            payment_order_id: request.payment_order_id,
            amount: request.amount,
            reason: request.reason.clone(),
            status: RefundStatus::Pending,
            third_party_refund_no: None,
            audit: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn update_status(&mut self, new_status: RefundStatus) {
        self.status = new_status;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRefundRequest {
    pub payment_order_id: Uuid,
    pub amount: Decimal,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> CreateOrderRequest {
        CreateOrderRequest {
            business_order_id: "biz-1".to_string(),
            user_id: "user-1".to_string(),
            amount: dec!(100.00),
            method: PaymentMethod::Card,
            subject: "order".to_string(),
        }
    }

    #[test]
    fn new_order_starts_pending_with_expiry() {
        let order = PaymentOrder::new(&request(), Duration::minutes(30));
        assert_eq!(order.status, PaymentStatus::Pending);
        assert!(order.actual_amount.is_none());
        assert!(order.expires_at > order.created_at);
    }

    #[test]
    fn terminal_statuses() {
        assert!(PaymentStatus::Success.is_terminal());
        assert!(PaymentStatus::RiskBlocked.is_terminal());
        assert!(!PaymentStatus::Failed.is_terminal());
        assert!(!PaymentStatus::Initiated.is_terminal());

        assert!(RefundStatus::Rejected.is_terminal());
        assert!(!RefundStatus::Failed.is_terminal());
        assert!(RefundStatus::Approved.reserves_balance());
        assert!(!RefundStatus::Pending.reserves_balance());
    }
}
