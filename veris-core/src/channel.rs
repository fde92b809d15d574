use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Supported payment methods. Each maps to exactly one channel adapter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Card,
    WalletA,
    WalletB,
    Balance,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "CARD",
            PaymentMethod::WalletA => "WALLET_A",
            PaymentMethod::WalletB => "WALLET_B",
            PaymentMethod::Balance => "BALANCE",
        }
    }
}

/// Status as reported by the third-party platform. Eventually consistent;
/// never authoritative over a more recent locally recorded terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelPaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
    NotFound,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelRefundStatus {
    Processing,
    Succeeded,
    Failed,
    NotFound,
}

/// What the channel hands back from `initiate`: something the caller can act on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChannelReference {
    /// Redirect the payer to this URL (card-style flows).
    RedirectUrl(String),
    /// Render this payload as a QR code (wallet flows).
    QrPayload(String),
    /// The channel settled synchronously (balance payments).
    Immediate(ChannelPaymentStatus),
}

/// Order projection handed to a channel when initiating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelOrder {
    pub order_id: Uuid,
    pub business_order_id: String,
    pub user_id: String,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub subject: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateResult {
    pub reference: ChannelReference,
    pub third_party_order_no: String,
}

/// Outcome of a `cancel` call against the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// The channel already completed the payment; leave the order for
    /// callback reconciliation instead.
    AlreadyCompleted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallbackKind {
    Payment,
    Refund,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallbackOutcome {
    Success,
    Failure,
}

/// Parsed, signature-verified callback notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackInfo {
    pub kind: CallbackKind,
    /// Third-party order number for payments, third-party refund number for refunds.
    pub reference_no: String,
    pub outcome: CallbackOutcome,
    pub actual_amount: Option<Decimal>,
    pub fee: Option<Decimal>,
    pub third_party_txn_no: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResult {
    pub third_party_refund_no: String,
    pub status: ChannelRefundStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel call timed out after {0}s")]
    Timeout(u64),

    #[error("Channel unavailable: {0}")]
    Unavailable(String),

    #[error("Channel rejected the request: {0}")]
    Rejected(String),

    #[error("Callback signature verification failed")]
    SignatureInvalid,

    #[error("Callback payload could not be parsed: {0}")]
    ParseFailure(String),

    #[error("Unknown third-party reference: {0}")]
    UnknownReference(String),
}

/// Uniform interface over third-party payment/refund platforms.
///
/// `verify_signature` must pass before `parse_callback` output is trusted;
/// a failed verification is a distinct error from a parse failure.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn method(&self) -> PaymentMethod;

    async fn initiate(&self, order: &ChannelOrder) -> Result<InitiateResult, ChannelError>;

    async fn query_status(
        &self,
        third_party_order_no: &str,
    ) -> Result<ChannelPaymentStatus, ChannelError>;

    async fn cancel(&self, third_party_order_no: &str) -> Result<CancelOutcome, ChannelError>;

    fn verify_signature(&self, payload: &str, signature: &str) -> bool;

    fn parse_callback(&self, payload: &str) -> Result<CallbackInfo, ChannelError>;

    async fn refund(
        &self,
        third_party_order_no: &str,
        refund_no: &str,
        amount: Decimal,
    ) -> Result<RefundResult, ChannelError>;

    async fn query_refund_status(
        &self,
        third_party_refund_no: &str,
    ) -> Result<ChannelRefundStatus, ChannelError>;
}
