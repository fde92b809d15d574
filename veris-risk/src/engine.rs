use crate::models::{
    ReviewResolution, RiskAction, RiskLevel, RiskRecord, RiskRequest, RiskRule, RuleCondition,
};
use crate::repository::{RiskRecordRepository, RiskRuleRepository};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;
use veris_core::StoreError;

/// Score boundaries, inclusive lower bound. A score of exactly `high_floor`
/// maps to High (manual review), never Pass or Block.
#[derive(Debug, Clone)]
pub struct RiskThresholds {
    pub medium_floor: u32,
    pub high_floor: u32,
    pub critical_floor: u32,
    pub score_cap: u32,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            medium_floor: 30,
            high_floor: 60,
            critical_floor: 86,
            score_cap: 100,
        }
    }
}

impl RiskThresholds {
    pub fn level_for(&self, score: u32) -> RiskLevel {
        if score >= self.critical_floor {
            RiskLevel::Critical
        } else if score >= self.high_floor {
            RiskLevel::High
        } else if score >= self.medium_floor {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn action_for(&self, level: RiskLevel) -> RiskAction {
        match level {
            RiskLevel::Low | RiskLevel::Medium => RiskAction::Pass,
            RiskLevel::High => RiskAction::ManualReview,
            RiskLevel::Critical => RiskAction::Block,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RiskError {
    #[error("Risk record not found: {0}")]
    RecordNotFound(Uuid),

    #[error("Risk record {0} is not awaiting manual review")]
    NotUnderReview(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Evaluates enabled rules against a payment request, producing exactly one
/// persisted RiskRecord per check.
pub struct RiskEngine {
    rules: Arc<dyn RiskRuleRepository>,
    records: Arc<dyn RiskRecordRepository>,
    thresholds: RiskThresholds,
}

impl RiskEngine {
    pub fn new(
        rules: Arc<dyn RiskRuleRepository>,
        records: Arc<dyn RiskRecordRepository>,
        thresholds: RiskThresholds,
    ) -> Self {
        Self {
            rules,
            records,
            thresholds,
        }
    }

    /// Run the rule set for a payment order and persist the resulting record.
    ///
    /// If an open manual-review record already exists for the order it is
    /// returned as-is: a parked order gets one active record, not a new one
    /// per initiate attempt.
    pub async fn perform_risk_check(
        &self,
        request: &RiskRequest,
    ) -> Result<RiskRecord, RiskError> {
        if let Some(open) = self
            .records
            .find_open_for_order(request.payment_order_id)
            .await?
        {
            return Ok(open);
        }

        let started = Instant::now();
        let mut rules = self.rules.list_enabled().await?;
        rules.sort_by_key(|r| -r.priority);

        let (score, triggered, forced) = evaluate(&rules, request, self.thresholds.score_cap);
        let level = self.thresholds.level_for(score);
        let result = self.thresholds.action_for(level).max(forced);

        let record = RiskRecord {
            id: Uuid::new_v4(),
            payment_order_id: request.payment_order_id,
            business_order_id: request.business_order_id.clone(),
            user_id: request.user_id.clone(),
            score,
            level,
            result,
            triggered_rule_ids: triggered,
            elapsed_ms: started.elapsed().as_millis() as u64,
            review: None,
            created_at: Utc::now(),
        };

        self.records.insert(&record).await?;
        info!(
            order_id = %request.payment_order_id,
            score,
            ?level,
            ?result,
            "Risk check completed"
        );
        Ok(record)
    }

    /// Resolve a parked manual-review record. Approval maps to Pass, denial
    /// to Block; the record is immutable afterwards.
    pub async fn resolve_manual_review(
        &self,
        record_id: Uuid,
        reviewer_id: &str,
        approved: bool,
        comment: Option<String>,
    ) -> Result<RiskRecord, RiskError> {
        let mut record = self
            .records
            .get(record_id)
            .await?
            .ok_or(RiskError::RecordNotFound(record_id))?;

        if !record.is_open() {
            return Err(RiskError::NotUnderReview(record_id));
        }

        record.review = Some(ReviewResolution {
            reviewer_id: reviewer_id.to_string(),
            final_result: if approved {
                RiskAction::Pass
            } else {
                RiskAction::Block
            },
            comment,
            decided_at: Utc::now(),
        });
        self.records.update(&record).await?;
        info!(record_id = %record_id, approved, "Manual review resolved");
        Ok(record)
    }

    /// Latest record for an order, used by the orchestrator to re-check a
    /// parked order before letting initiate proceed.
    pub async fn latest_record(
        &self,
        payment_order_id: Uuid,
    ) -> Result<Option<RiskRecord>, RiskError> {
        Ok(self.records.find_latest_for_order(payment_order_id).await?)
    }
}

/// Pure evaluation: sum of triggered weights capped, triggered rule ids, and
/// the strongest rule-forced action.
fn evaluate(
    rules: &[RiskRule],
    request: &RiskRequest,
    score_cap: u32,
) -> (u32, Vec<Uuid>, RiskAction) {
    let mut score: u32 = 0;
    let mut triggered = Vec::new();
    let mut forced = RiskAction::Pass;

    for rule in rules {
        if !rule.enabled {
            continue;
        }
        if matches(&rule.condition, request) {
            score = score.saturating_add(rule.weight);
            triggered.push(rule.id);
            forced = forced.max(rule.action_on_trigger);
        }
    }

    (score.min(score_cap), triggered, forced)
}

fn matches(condition: &RuleCondition, request: &RiskRequest) -> bool {
    match condition {
        RuleCondition::AmountAbove(threshold) => request.amount > *threshold,
        RuleCondition::MethodIs(method) => request.method == *method,
        RuleCondition::VelocityAbove(max) => request.recent_order_count > *max,
        RuleCondition::MissingDeviceFingerprint => request.device_fingerprint.is_none(),
        RuleCondition::IpPrefixIn(prefixes) => prefixes
            .iter()
            .any(|p| request.client_ip.inner().starts_with(p.as_str())),
    }
}

/// Starter rule set. Production deployments replace these through rule
/// administration; weights and thresholds are tunable, not contracts.
pub fn default_rules() -> Vec<RiskRule> {
    vec![
        RiskRule {
            id: Uuid::new_v4(),
            name: "Large amount".to_string(),
            condition: RuleCondition::AmountAbove(Decimal::from(10_000)),
            weight: 35,
            action_on_trigger: RiskAction::Pass,
            enabled: true,
            priority: 100,
        },
        RiskRule {
            id: Uuid::new_v4(),
            name: "Very large amount".to_string(),
            condition: RuleCondition::AmountAbove(Decimal::from(50_000)),
            weight: 55,
            action_on_trigger: RiskAction::Pass,
            enabled: true,
            priority: 95,
        },
        RiskRule {
            id: Uuid::new_v4(),
            name: "High order velocity".to_string(),
            condition: RuleCondition::VelocityAbove(5),
            weight: 30,
            action_on_trigger: RiskAction::Pass,
            enabled: true,
            priority: 90,
        },
        RiskRule {
            id: Uuid::new_v4(),
            name: "Missing device fingerprint".to_string(),
            condition: RuleCondition::MissingDeviceFingerprint,
            weight: 15,
            action_on_trigger: RiskAction::Pass,
            enabled: true,
            priority: 80,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use veris_core::PaymentMethod;
    use veris_shared::Masked;

    fn request(amount: Decimal, velocity: u32, fingerprint: bool) -> RiskRequest {
        RiskRequest {
            payment_order_id: Uuid::new_v4(),
            business_order_id: "biz-1".to_string(),
            user_id: "user-1".to_string(),
            amount,
            method: PaymentMethod::Card,
            client_ip: Masked("10.0.0.1".to_string()),
            device_fingerprint: fingerprint.then(|| Masked("fp".to_string())),
            recent_order_count: velocity,
        }
    }

    fn weighted_rule(weight: u32, condition: RuleCondition) -> RiskRule {
        RiskRule {
            id: Uuid::new_v4(),
            name: format!("w{}", weight),
            condition,
            weight,
            action_on_trigger: RiskAction::Pass,
            enabled: true,
            priority: 0,
        }
    }

    #[test]
    fn score_is_sum_of_triggered_weights() {
        let rules = default_rules();
        let req = request(dec!(12000.00), 0, false);

        // Large amount (35) + missing fingerprint (15)
        let (score, triggered, _) = evaluate(&rules, &req, 100);
        assert_eq!(score, 50);
        assert_eq!(triggered.len(), 2);
    }

    #[test]
    fn score_is_capped() {
        let rules = vec![
            weighted_rule(80, RuleCondition::MissingDeviceFingerprint),
            weighted_rule(80, RuleCondition::VelocityAbove(0)),
        ];
        let (score, _, _) = evaluate(&rules, &request(dec!(1.00), 3, false), 100);
        assert_eq!(score, 100);
    }

    #[test]
    fn disabled_rules_do_not_trigger() {
        let mut rule = weighted_rule(40, RuleCondition::MissingDeviceFingerprint);
        rule.enabled = false;
        let (score, triggered, _) = evaluate(&[rule], &request(dec!(1.00), 0, false), 100);
        assert_eq!(score, 0);
        assert!(triggered.is_empty());
    }

    #[test]
    fn boundary_scores_round_down_into_lower_action() {
        let thresholds = RiskThresholds::default();

        assert_eq!(thresholds.level_for(29), RiskLevel::Low);
        assert_eq!(thresholds.level_for(30), RiskLevel::Medium);
        assert_eq!(thresholds.level_for(59), RiskLevel::Medium);
        // Exactly 60 is always manual review, never pass or block.
        assert_eq!(thresholds.level_for(60), RiskLevel::High);
        assert_eq!(
            thresholds.action_for(thresholds.level_for(60)),
            RiskAction::ManualReview
        );
        assert_eq!(thresholds.level_for(85), RiskLevel::High);
        assert_eq!(thresholds.level_for(86), RiskLevel::Critical);
        assert_eq!(
            thresholds.action_for(RiskLevel::Critical),
            RiskAction::Block
        );
    }

    #[test]
    fn rule_forced_action_overrides_weaker_score_mapping() {
        let mut rule = weighted_rule(5, RuleCondition::IpPrefixIn(vec!["10.".to_string()]));
        rule.action_on_trigger = RiskAction::Block;
        let (score, _, forced) = evaluate(&[rule], &request(dec!(1.00), 0, true), 100);
        assert_eq!(score, 5);
        assert_eq!(forced, RiskAction::Block);
    }
}
