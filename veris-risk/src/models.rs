use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use veris_core::PaymentMethod;
use veris_shared::Masked;

/// Ordinal risk level derived from the capped score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// What happens to the payment: ordered by severity so a rule-forced action
/// and the score-mapped action combine with `max`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskAction {
    Pass,
    ManualReview,
    Block,
}

/// Single predicate of a rule: field, operator, threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RuleCondition {
    AmountAbove(Decimal),
    MethodIs(PaymentMethod),
    /// More than this many orders created by the user inside the velocity window.
    VelocityAbove(u32),
    MissingDeviceFingerprint,
    IpPrefixIn(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskRule {
    pub id: Uuid,
    pub name: String,
    pub condition: RuleCondition,
    pub weight: u32,
    /// Floor applied on trigger regardless of total score (a single rule can
    /// force manual review or a block).
    pub action_on_trigger: RiskAction,
    pub enabled: bool,
    pub priority: i32,
}

/// Attributes a payment request exposes to rule evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskRequest {
    pub payment_order_id: Uuid,
    pub business_order_id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub client_ip: Masked<String>,
    pub device_fingerprint: Option<Masked<String>>,
    /// Orders this user created inside the configured velocity window,
    /// computed by the caller from the order store.
    pub recent_order_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResolution {
    pub reviewer_id: String,
    pub final_result: RiskAction,
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// One record per risk check. Immutable after creation except for the
/// manual-review resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskRecord {
    pub id: Uuid,
    pub payment_order_id: Uuid,
    pub business_order_id: String,
    pub user_id: String,
    pub score: u32,
    pub level: RiskLevel,
    pub result: RiskAction,
    pub triggered_rule_ids: Vec<Uuid>,
    pub elapsed_ms: u64,
    pub review: Option<ReviewResolution>,
    pub created_at: DateTime<Utc>,
}

impl RiskRecord {
    /// An open record parks the order: manual review requested, not yet decided.
    pub fn is_open(&self) -> bool {
        self.result == RiskAction::ManualReview && self.review.is_none()
    }

    /// The effective outcome once any resolution is folded in.
    pub fn effective_result(&self) -> RiskAction {
        match &self.review {
            Some(resolution) => resolution.final_result,
            None => self.result,
        }
    }
}
