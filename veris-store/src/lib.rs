pub mod app_config;
pub mod lock;
pub mod memory;
pub mod redis_lock;

pub use app_config::Config;
pub use lock::InMemoryLockService;
pub use memory::{
    InMemoryPaymentOrderRepository, InMemoryRefundOrderRepository, InMemoryRiskRecordRepository,
    InMemoryRiskRuleRepository,
};
pub use redis_lock::RedisLockService;
