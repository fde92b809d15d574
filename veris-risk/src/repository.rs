use crate::models::{RiskRecord, RiskRule};
use async_trait::async_trait;
use uuid::Uuid;
use veris_core::StoreError;

/// Repository trait for risk record access.
#[async_trait]
pub trait RiskRecordRepository: Send + Sync {
    async fn insert(&self, record: &RiskRecord) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<RiskRecord>, StoreError>;

    /// The open (unresolved manual-review) record for a payment order, if any.
    async fn find_open_for_order(
        &self,
        payment_order_id: Uuid,
    ) -> Result<Option<RiskRecord>, StoreError>;

    /// Most recent record for a payment order regardless of state.
    async fn find_latest_for_order(
        &self,
        payment_order_id: Uuid,
    ) -> Result<Option<RiskRecord>, StoreError>;

    async fn update(&self, record: &RiskRecord) -> Result<(), StoreError>;
}

/// Repository trait for rule administration. Read-only to the engine; rule
/// CRUD itself lives outside the transaction core.
#[async_trait]
pub trait RiskRuleRepository: Send + Sync {
    async fn list_enabled(&self) -> Result<Vec<RiskRule>, StoreError>;
}
