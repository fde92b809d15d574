use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::time::Duration;
use veris_order::locking::LockPolicy;
use veris_order::payment::PaymentConfig;
use veris_order::reconcile::ReconcileConfig;
use veris_order::refund::RefundConfig;
use veris_risk::engine::RiskThresholds;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub redis: RedisConfig,
    pub payment: PaymentSettings,
    pub refund: RefundSettings,
    pub risk: RiskSettings,
    pub reconcile: ReconcileSettings,
    pub lock: LockSettings,
    pub channels: ChannelSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentSettings {
    pub max_retries: u32,
    pub expiry_minutes: i64,
    pub channel_timeout_secs: u64,
    pub velocity_window_minutes: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RefundSettings {
    pub max_retries: u32,
    pub channel_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RiskSettings {
    pub medium_floor: u32,
    pub high_floor: u32,
    pub critical_floor: u32,
    pub score_cap: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconcileSettings {
    pub interval_secs: u64,
    pub batch_size: usize,
    pub sync_workers: usize,
    pub callback_overdue_secs: i64,
    pub retry_backoff_secs: i64,
    pub archive_after_days: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LockSettings {
    pub ttl_secs: u64,
    pub acquire_attempts: u32,
    pub retry_base_ms: u64,
}

/// Channel credentials and fee rates. Fee rates are decimal strings
/// ("0.029") so they survive the trip through the config layer exactly.
#[derive(Debug, Deserialize, Clone)]
pub struct ChannelSettings {
    pub card_gateway_url: String,
    pub card_secret: String,
    pub card_fee_rate: Decimal,
    pub wallet_a_secret: String,
    pub wallet_a_fee_rate: Decimal,
    pub wallet_b_secret: String,
    pub wallet_b_fee_rate: Decimal,
    pub balance_secret: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .set_default("redis.url", "redis://127.0.0.1:6379")?
            .set_default("payment.max_retries", 3)?
            .set_default("payment.expiry_minutes", 30)?
            .set_default("payment.channel_timeout_secs", 10)?
            .set_default("payment.velocity_window_minutes", 60)?
            .set_default("refund.max_retries", 3)?
            .set_default("refund.channel_timeout_secs", 10)?
            .set_default("risk.medium_floor", 30)?
            .set_default("risk.high_floor", 60)?
            .set_default("risk.critical_floor", 86)?
            .set_default("risk.score_cap", 100)?
            .set_default("reconcile.interval_secs", 60)?
            .set_default("reconcile.batch_size", 100)?
            .set_default("reconcile.sync_workers", 8)?
            .set_default("reconcile.callback_overdue_secs", 120)?
            .set_default("reconcile.retry_backoff_secs", 300)?
            .set_default("reconcile.archive_after_days", 90)?
            .set_default("lock.ttl_secs", 30)?
            .set_default("lock.acquire_attempts", 3)?
            .set_default("lock.retry_base_ms", 50)?
            .set_default("channels.card_gateway_url", "https://card-gw.example.com")?
            .set_default("channels.card_secret", "card-sandbox-secret")?
            .set_default("channels.card_fee_rate", "0.029")?
            .set_default("channels.wallet_a_secret", "wallet-a-sandbox-secret")?
            .set_default("channels.wallet_a_fee_rate", "0.015")?
            .set_default("channels.wallet_b_secret", "wallet-b-sandbox-secret")?
            .set_default("channels.wallet_b_fee_rate", "0.012")?
            .set_default("channels.balance_secret", "balance-sandbox-secret")?
            // Optional file layers: defaults, run-mode, local overrides
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(config::File::with_name("config/local").required(false))
            // Eg. `VERIS_REDIS__URL=redis://prod:6379`
            .add_source(config::Environment::with_prefix("VERIS").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            ttl: Duration::from_secs(self.lock.ttl_secs),
            acquire_attempts: self.lock.acquire_attempts,
            retry_base_ms: self.lock.retry_base_ms,
        }
    }

    pub fn payment_config(&self) -> PaymentConfig {
        PaymentConfig {
            max_retries: self.payment.max_retries,
            expiry_minutes: self.payment.expiry_minutes,
            channel_timeout: Duration::from_secs(self.payment.channel_timeout_secs),
            velocity_window_minutes: self.payment.velocity_window_minutes,
            lock: self.lock_policy(),
        }
    }

    pub fn refund_config(&self) -> RefundConfig {
        RefundConfig {
            max_retries: self.refund.max_retries,
            channel_timeout: Duration::from_secs(self.refund.channel_timeout_secs),
            lock: self.lock_policy(),
        }
    }

    pub fn risk_thresholds(&self) -> RiskThresholds {
        RiskThresholds {
            medium_floor: self.risk.medium_floor,
            high_floor: self.risk.high_floor,
            critical_floor: self.risk.critical_floor,
            score_cap: self.risk.score_cap,
        }
    }

    pub fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            interval: Duration::from_secs(self.reconcile.interval_secs),
            batch_size: self.reconcile.batch_size,
            sync_workers: self.reconcile.sync_workers,
            callback_overdue_secs: self.reconcile.callback_overdue_secs,
            retry_backoff_secs: self.reconcile.retry_backoff_secs,
            archive_after_days: self.reconcile.archive_after_days,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn defaults_load_without_files() {
        let config = Config::load().unwrap();
        assert_eq!(config.payment.max_retries, 3);
        assert_eq!(config.risk.high_floor, 60);
        assert_eq!(config.channels.card_fee_rate, dec!(0.029));
        assert_eq!(
            config.payment_config().channel_timeout,
            Duration::from_secs(10)
        );
    }
}
