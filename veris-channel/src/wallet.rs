use crate::signature;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;
use veris_core::{
    CallbackInfo, CallbackKind, CallbackOutcome, CancelOutcome, ChannelAdapter, ChannelError,
    ChannelOrder, ChannelPaymentStatus, ChannelReference, ChannelRefundStatus, InitiateResult,
    PaymentMethod, RefundResult,
};

struct WalletTxn {
    status: ChannelPaymentStatus,
    amount: Decimal,
}

/// Digital wallet adapter: QR-payload initiation, HMAC-signed callbacks,
/// asynchronous refunds (accepted as Processing, completed by callback).
/// One instance per wallet platform, distinguished by `method`.
pub struct WalletChannel {
    method: PaymentMethod,
    prefix: &'static str,
    secret: String,
    fee_rate: Decimal,
    txns: RwLock<HashMap<String, WalletTxn>>,
    refunds: RwLock<HashMap<String, (String, Decimal, ChannelRefundStatus)>>,
}

impl WalletChannel {
    pub fn wallet_a(secret: impl Into<String>, fee_rate: Decimal) -> Self {
        Self::new(PaymentMethod::WalletA, "WA", secret, fee_rate)
    }

    pub fn wallet_b(secret: impl Into<String>, fee_rate: Decimal) -> Self {
        Self::new(PaymentMethod::WalletB, "WB", secret, fee_rate)
    }

    fn new(
        method: PaymentMethod,
        prefix: &'static str,
        secret: impl Into<String>,
        fee_rate: Decimal,
    ) -> Self {
        Self {
            method,
            prefix,
            secret: secret.into(),
            fee_rate,
            txns: RwLock::new(HashMap::new()),
            refunds: RwLock::new(HashMap::new()),
        }
    }

    /// Sandbox control: settle a pending payment and produce the signed
    /// callback the wallet platform would deliver.
    pub async fn settle(
        &self,
        third_party_order_no: &str,
        outcome: CallbackOutcome,
    ) -> Result<(String, String), ChannelError> {
        let mut txns = self.txns.write().await;
        let txn = txns
            .get_mut(third_party_order_no)
            .ok_or_else(|| ChannelError::UnknownReference(third_party_order_no.to_string()))?;

        txn.status = match outcome {
            CallbackOutcome::Success => ChannelPaymentStatus::Succeeded,
            CallbackOutcome::Failure => ChannelPaymentStatus::Failed,
        };
        let info = CallbackInfo {
            kind: CallbackKind::Payment,
            reference_no: third_party_order_no.to_string(),
            outcome,
            actual_amount: matches!(outcome, CallbackOutcome::Success).then_some(txn.amount),
            fee: matches!(outcome, CallbackOutcome::Success)
                .then(|| (txn.amount * self.fee_rate).round_dp(2)),
            third_party_txn_no: Some(format!("{}TX-{}", self.prefix, Uuid::new_v4().simple())),
            reason: matches!(outcome, CallbackOutcome::Failure)
                .then(|| "wallet payment failed".to_string()),
        };
        let payload = serde_json::to_string(&info)
            .map_err(|e| ChannelError::ParseFailure(e.to_string()))?;
        let sig = signature::sign(&self.secret, &payload);
        Ok((payload, sig))
    }

    /// Sandbox control: complete a processing refund and produce its signed
    /// callback.
    pub async fn complete_refund(
        &self,
        third_party_refund_no: &str,
        outcome: CallbackOutcome,
    ) -> Result<(String, String), ChannelError> {
        let mut refunds = self.refunds.write().await;
        let (_, amount, status) = refunds
            .get_mut(third_party_refund_no)
            .ok_or_else(|| ChannelError::UnknownReference(third_party_refund_no.to_string()))?;

        *status = match outcome {
            CallbackOutcome::Success => ChannelRefundStatus::Succeeded,
            CallbackOutcome::Failure => ChannelRefundStatus::Failed,
        };
        let info = CallbackInfo {
            kind: CallbackKind::Refund,
            reference_no: third_party_refund_no.to_string(),
            outcome,
            actual_amount: matches!(outcome, CallbackOutcome::Success).then_some(*amount),
            fee: None,
            third_party_txn_no: None,
            reason: matches!(outcome, CallbackOutcome::Failure)
                .then(|| "wallet refund failed".to_string()),
        };
        let payload = serde_json::to_string(&info)
            .map_err(|e| ChannelError::ParseFailure(e.to_string()))?;
        let sig = signature::sign(&self.secret, &payload);
        Ok((payload, sig))
    }
}

#[async_trait]
impl ChannelAdapter for WalletChannel {
    fn method(&self) -> PaymentMethod {
        self.method
    }

    async fn initiate(&self, order: &ChannelOrder) -> Result<InitiateResult, ChannelError> {
        let no = format!("{}-{}", self.prefix, Uuid::new_v4().simple());
        self.txns.write().await.insert(
            no.clone(),
            WalletTxn {
                status: ChannelPaymentStatus::Pending,
                amount: order.amount,
            },
        );
        info!(order_id = %order.order_id, third_party_order_no = %no, method = ?self.method, "Wallet payment initiated");
        Ok(InitiateResult {
            reference: ChannelReference::QrPayload(format!(
                "wallet://{}/{}?amount={}",
                self.prefix, no, order.amount
            )),
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
        let mut txns = self.txns.write().await;
        let txn = txns
            .get_mut(third_party_order_no)
            .ok_or_else(|| ChannelError::UnknownReference(third_party_order_no.to_string()))?;

        match txn.status {
            ChannelPaymentStatus::Succeeded => Ok(CancelOutcome::AlreadyCompleted),
            _ => {
                txn.status = ChannelPaymentStatus::Cancelled;
                Ok(CancelOutcome::Cancelled)
            }
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
        drop(txns);

        // Wallet refunds are asynchronous: accepted now, completed by callback.
        let no = format!("{}RF-{}", self.prefix, refund_no);
        self.refunds.write().await.insert(
            no.clone(),
            (
                third_party_order_no.to_string(),
                amount,
                ChannelRefundStatus::Processing,
            ),
        );
        Ok(RefundResult {
            third_party_refund_no: no,
            status: ChannelRefundStatus::Processing,
        })
    }

    async fn query_refund_status(
        &self,
        third_party_refund_no: &str,
    ) -> Result<ChannelRefundStatus, ChannelError> {
        let refunds = self.refunds.read().await;
        Ok(refunds
            .get(third_party_refund_no)
            .map(|(_, _, status)| *status)
            .unwrap_or(ChannelRefundStatus::NotFound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn order(amount: Decimal) -> ChannelOrder {
        ChannelOrder {
            order_id: Uuid::new_v4(),
            business_order_id: "biz-1".to_string(),
            user_id: "user-1".to_string(),
            method: PaymentMethod::WalletA,
            amount,
            subject: "test order".to_string(),
            expires_at: Utc::now() + chrono::Duration::minutes(30),
        }
    }

    #[tokio::test]
    async fn refund_is_asynchronous() {
        let channel = WalletChannel::wallet_a("wa-secret", dec!(0.002));
        let init = channel.initiate(&order(dec!(25.00))).await.unwrap();
        channel
            .settle(&init.third_party_order_no, CallbackOutcome::Success)
            .await
            .unwrap();

        let refund = channel
            .refund(&init.third_party_order_no, "rf-1", dec!(10.00))
            .await
            .unwrap();
        assert_eq!(refund.status, ChannelRefundStatus::Processing);

        let (payload, sig) = channel
            .complete_refund(&refund.third_party_refund_no, CallbackOutcome::Success)
            .await
            .unwrap();
        assert!(channel.verify_signature(&payload, &sig));
        assert_eq!(
            channel
                .query_refund_status(&refund.third_party_refund_no)
                .await
                .unwrap(),
            ChannelRefundStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn tampered_callback_fails_verification() {
        let channel = WalletChannel::wallet_b("wb-secret", dec!(0.002));
        let init = channel.initiate(&order(dec!(25.00))).await.unwrap();
        let (payload, sig) = channel
            .settle(&init.third_party_order_no, CallbackOutcome::Success)
            .await
            .unwrap();

        let tampered = payload.replace("25.00", "2500.00");
        assert!(!channel.verify_signature(&tampered, &sig));
    }
}
