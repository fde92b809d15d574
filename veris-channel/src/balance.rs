use crate::signature;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;
use veris_core::{
    CallbackInfo, CancelOutcome, ChannelAdapter, ChannelError, ChannelOrder, ChannelPaymentStatus,
    ChannelReference, ChannelRefundStatus, InitiateResult, PaymentMethod, RefundResult,
};

struct BalanceTxn {
    user_id: String,
    amount: Decimal,
    status: ChannelPaymentStatus,
}

/// Internal stored-value account channel. Settles synchronously at initiate
/// time: `initiate` returns an Immediate reference, no callback follows.
pub struct BalanceChannel {
    secret: String,
    accounts: RwLock<HashMap<String, Decimal>>,
    txns: RwLock<HashMap<String, BalanceTxn>>,
}

impl BalanceChannel {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            accounts: RwLock::new(HashMap::new()),
            txns: RwLock::new(HashMap::new()),
        }
    }

    pub async fn credit(&self, user_id: &str, amount: Decimal) {
        let mut accounts = self.accounts.write().await;
        let balance = accounts.entry(user_id.to_string()).or_insert(Decimal::ZERO);
        *balance += amount;
    }

    pub async fn balance_of(&self, user_id: &str) -> Decimal {
        let accounts = self.accounts.read().await;
        accounts.get(user_id).copied().unwrap_or(Decimal::ZERO)
    }
}

#[async_trait]
impl ChannelAdapter for BalanceChannel {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Balance
    }

    async fn initiate(&self, order: &ChannelOrder) -> Result<InitiateResult, ChannelError> {
        let no = format!("BAL-{}", Uuid::new_v4().simple());
        let mut accounts = self.accounts.write().await;
        let balance = accounts
            .entry(order.user_id.clone())
            .or_insert(Decimal::ZERO);

        let status = if *balance >= order.amount {
            *balance -= order.amount;
            ChannelPaymentStatus::Succeeded
        } else {
            ChannelPaymentStatus::Failed
        };
        drop(accounts);

        self.txns.write().await.insert(
            no.clone(),
            BalanceTxn {
                user_id: order.user_id.clone(),
                amount: order.amount,
                status,
            },
        );
        info!(order_id = %order.order_id, third_party_order_no = %no, ?status, "Balance payment settled");
        Ok(InitiateResult {
            reference: ChannelReference::Immediate(status),
            third_party_order_no: no,
        })
    }

    async fn query_status(
        &self,
        third_party_order_no: &str,
    ) -> Result<ChannelPaymentStatus, ChannelError> {
        let txns = self.txns.read().await;
        Ok(txns
            .get(third_party_order_no)
            .map(|t| t.status)
            .unwrap_or(ChannelPaymentStatus::NotFound))
    }

    async fn cancel(&self, third_party_order_no: &str) -> Result<CancelOutcome, ChannelError> {
        let txns = self.txns.read().await;
        let txn = txns
            .get(third_party_order_no)
            .ok_or_else(|| ChannelError::UnknownReference(third_party_order_no.to_string()))?;
        // Balance settles at initiate; a settled debit can only be refunded.
        match txn.status {
            ChannelPaymentStatus::Succeeded => Ok(CancelOutcome::AlreadyCompleted),
            _ => Ok(CancelOutcome::Cancelled),
        }
    }

    fn verify_signature(&self, payload: &str, sig: &str) -> bool {
        signature::verify(&self.secret, payload, sig)
    }

    fn parse_callback(&self, payload: &str) -> Result<CallbackInfo, ChannelError> {
        serde_json::from_str(payload).map_err(|e| ChannelError::ParseFailure(e.to_string()))
    }

    async fn refund(
        &self,
        third_party_order_no: &str,
        refund_no: &str,
        amount: Decimal,
    ) -> Result<RefundResult, ChannelError> {
        let txns = self.txns.read().await;
        let txn = txns
            .get(third_party_order_no)
            .ok_or_else(|| ChannelError::UnknownReference(third_party_order_no.to_string()))?;
        if txn.status != ChannelPaymentStatus::Succeeded {
            return Err(ChannelError::Rejected(
                "refund against a non-settled payment".to_string(),
            ));
        }
        if amount > txn.amount {
            return Err(ChannelError::Rejected("refund exceeds debit".to_string()));
        }
        let user_id = txn.user_id.clone();
        drop(txns);

        self.credit(&user_id, amount).await;
        Ok(RefundResult {
            third_party_refund_no: format!("BRF-{}-{}", third_party_order_no, refund_no),
            status: ChannelRefundStatus::Succeeded,
        })
    }

    async fn query_refund_status(
        &self,
        _third_party_refund_no: &str,
    ) -> Result<ChannelRefundStatus, ChannelError> {
        // Balance refunds settle synchronously; anything we issued succeeded.
        Ok(ChannelRefundStatus::Succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn order(user: &str, amount: Decimal) -> ChannelOrder {
        ChannelOrder {
            order_id: Uuid::new_v4(),
            business_order_id: "biz-1".to_string(),
            user_id: user.to_string(),
            method: PaymentMethod::Balance,
            amount,
            subject: "test order".to_string(),
            expires_at: Utc::now() + chrono::Duration::minutes(30),
        }
    }

    #[tokio::test]
    async fn sufficient_balance_settles_immediately() {
        let channel = BalanceChannel::new("bal-secret");
        channel.credit("user-1", dec!(100.00)).await;

        let result = channel.initiate(&order("user-1", dec!(40.00))).await.unwrap();
        assert_eq!(
            result.reference,
            ChannelReference::Immediate(ChannelPaymentStatus::Succeeded)
        );
        assert_eq!(channel.balance_of("user-1").await, dec!(60.00));
    }

    #[tokio::test]
    async fn insufficient_balance_fails_immediately() {
        let channel = BalanceChannel::new("bal-secret");
        let result = channel.initiate(&order("user-2", dec!(40.00))).await.unwrap();
        assert_eq!(
            result.reference,
            ChannelReference::Immediate(ChannelPaymentStatus::Failed)
        );
    }

    #[tokio::test]
    async fn refund_restores_balance() {
        let channel = BalanceChannel::new("bal-secret");
        channel.credit("user-3", dec!(50.00)).await;
        let result = channel.initiate(&order("user-3", dec!(50.00))).await.unwrap();

        let refund = channel
            .refund(&result.third_party_order_no, "rf-1", dec!(20.00))
            .await
            .unwrap();
        assert_eq!(refund.status, ChannelRefundStatus::Succeeded);
        assert_eq!(channel.balance_of("user-3").await, dec!(20.00));
    }
}
