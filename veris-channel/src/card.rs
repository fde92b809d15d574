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

struct CardTxn {
    status: ChannelPaymentStatus,
    amount: Decimal,
    refunds: HashMap<String, ChannelRefundStatus>,
}

/// Card processor adapter: redirect-URL initiation, HMAC-signed callbacks,
/// synchronous refunds. Runs against an in-process sandbox ledger; the HTTP
/// transport sits outside the transaction core.
pub struct CardChannel {
    gateway_url: String,
    secret: String,
    fee_rate: Decimal,
    txns: RwLock<HashMap<String, CardTxn>>,
}

impl CardChannel {
    pub fn new(gateway_url: impl Into<String>, secret: impl Into<String>, fee_rate: Decimal) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            secret: secret.into(),
            fee_rate,
            txns: RwLock::new(HashMap::new()),
        }
    }

    fn fee_for(&self, amount: Decimal) -> Decimal {
        (amount * self.fee_rate).round_dp(2)
    }

    /// Sandbox control: settle a pending transaction and produce the signed
    /// callback the real gateway would deliver.
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
            fee: matches!(outcome, CallbackOutcome::Success).then(|| self.fee_for(txn.amount)),
            third_party_txn_no: Some(format!("CTX-{}", Uuid::new_v4().simple())),
            reason: matches!(outcome, CallbackOutcome::Failure)
                .then(|| "card declined".to_string()),
        };
        let payload = serde_json::to_string(&info)
            .map_err(|e| ChannelError::ParseFailure(e.to_string()))?;
        let sig = signature::sign(&self.secret, &payload);
        Ok((payload, sig))
    }
}

#[async_trait]
impl ChannelAdapter for CardChannel {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Card
    }

    async fn initiate(&self, order: &ChannelOrder) -> Result<InitiateResult, ChannelError> {
        let no = format!("CARD-{}", Uuid::new_v4().simple());
        self.txns.write().await.insert(
            no.clone(),
            CardTxn {
                status: ChannelPaymentStatus::Pending,
                amount: order.amount,
                refunds: HashMap::new(),
            },
        );
        info!(order_id = %order.order_id, third_party_order_no = %no, "Card payment initiated");
        Ok(InitiateResult {
            reference: ChannelReference::RedirectUrl(format!("{}/pay/{}", self.gateway_url, no)),
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
            ChannelPaymentStatus::Cancelled => Ok(CancelOutcome::Cancelled),
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
        let mut txns = self.txns.write().await;
        let txn = txns
            .get_mut(third_party_order_no)
            .ok_or_else(|| ChannelError::UnknownReference(third_party_order_no.to_string()))?;

        if txn.status != ChannelPaymentStatus::Succeeded {
            return Err(ChannelError::Rejected(
                "refund against a non-settled payment".to_string(),
            ));
        }
        if amount > txn.amount {
            return Err(ChannelError::Rejected("refund exceeds capture".to_string()));
        }

        // Card refunds settle synchronously.
        let no = format!("CRF-{}-{}", third_party_order_no, refund_no);
        txn.refunds.insert(no.clone(), ChannelRefundStatus::Succeeded);
        Ok(RefundResult {
            third_party_refund_no: no,
            status: ChannelRefundStatus::Succeeded,
        })
    }

    async fn query_refund_status(
        &self,
        third_party_refund_no: &str,
    ) -> Result<ChannelRefundStatus, ChannelError> {
        let txns = self.txns.read().await;
        for txn in txns.values() {
            if let Some(status) = txn.refunds.get(third_party_refund_no) {
                return Ok(*status);
            }
        }
        Ok(ChannelRefundStatus::NotFound)
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
            method: PaymentMethod::Card,
            amount,
            subject: "test order".to_string(),
            expires_at: Utc::now() + chrono::Duration::minutes(30),
        }
    }

    #[tokio::test]
    async fn initiate_then_settle_produces_verifiable_callback() {
        let channel = CardChannel::new("https://sandbox.card", "s3cret", dec!(0.006));
        let result = channel.initiate(&order(dec!(100.00))).await.unwrap();
        assert!(matches!(result.reference, ChannelReference::RedirectUrl(_)));

        let (payload, sig) = channel
            .settle(&result.third_party_order_no, CallbackOutcome::Success)
            .await
            .unwrap();
        assert!(channel.verify_signature(&payload, &sig));

        let info = channel.parse_callback(&payload).unwrap();
        assert_eq!(info.actual_amount, Some(dec!(100.00)));
        assert_eq!(info.fee, Some(dec!(0.60)));
        assert_eq!(
            channel
                .query_status(&result.third_party_order_no)
                .await
                .unwrap(),
            ChannelPaymentStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn cancel_after_settlement_reports_already_completed() {
        let channel = CardChannel::new("https://sandbox.card", "s3cret", dec!(0.006));
        let result = channel.initiate(&order(dec!(50.00))).await.unwrap();
        channel
            .settle(&result.third_party_order_no, CallbackOutcome::Success)
            .await
            .unwrap();

        assert_eq!(
            channel.cancel(&result.third_party_order_no).await.unwrap(),
            CancelOutcome::AlreadyCompleted
        );
    }

    #[tokio::test]
    async fn refund_is_bounded_by_capture() {
        let channel = CardChannel::new("https://sandbox.card", "s3cret", dec!(0.006));
        let result = channel.initiate(&order(dec!(80.00))).await.unwrap();
        channel
            .settle(&result.third_party_order_no, CallbackOutcome::Success)
            .await
            .unwrap();

        let refund = channel
            .refund(&result.third_party_order_no, "rf-1", dec!(30.00))
            .await
            .unwrap();
        assert_eq!(refund.status, ChannelRefundStatus::Succeeded);

        let err = channel
            .refund(&result.third_party_order_no, "rf-2", dec!(90.00))
            .await;
        assert!(matches!(err, Err(ChannelError::Rejected(_))));
    }
}
