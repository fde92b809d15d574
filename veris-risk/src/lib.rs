pub mod engine;
pub mod models;
pub mod repository;

pub use engine::{default_rules, RiskEngine, RiskError, RiskThresholds};
pub use models::{
    ReviewResolution, RiskAction, RiskLevel, RiskRecord, RiskRequest, RiskRule, RuleCondition,
};
pub use repository::{RiskRecordRepository, RiskRuleRepository};
