use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub business_rules: BusinessRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: i64,
}

fn default_rate_limit() -> i64 {
    30
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Stripe,
    Mock,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentsConfig {
    pub provider: PaymentProvider,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub secret_key: String,
    pub webhook_secret: String,
    #[serde(default = "default_tolerance")]
    pub signature_tolerance_seconds: i64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    pub success_url: String,
    pub cancel_url: String,
}

fn default_api_base() -> String {
    "https://api.stripe.com".into()
}

fn default_tolerance() -> i64 {
    300
}

fn default_timeout_ms() -> u64 {
    5_000
}

impl PaymentsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    #[serde(default = "default_hold_minutes")]
    pub hold_minutes: i64,
    #[serde(default = "default_cache_ttl")]
    pub catalog_cache_ttl_seconds: u64,
    #[serde(default = "default_stale")]
    pub catalog_stale_seconds: u64,
    #[serde(default = "default_catalog_timeout")]
    pub catalog_timeout_ms: u64,
    #[serde(default = "default_sweep_batch")]
    pub expiry_sweep_batch: usize,
}

fn default_hold_minutes() -> i64 {
    15
}

fn default_cache_ttl() -> u64 {
    60
}

fn default_stale() -> u64 {
    300
}

fn default_catalog_timeout() -> u64 {
    2_000
}

fn default_sweep_batch() -> usize {
    500
}

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            hold_minutes: default_hold_minutes(),
            catalog_cache_ttl_seconds: default_cache_ttl(),
            catalog_stale_seconds: default_stale(),
            catalog_timeout_ms: default_catalog_timeout(),
            expiry_sweep_batch: default_sweep_batch(),
        }
    }
}

/// Stripe refuses checkout sessions that expire sooner than this.
pub const STRIPE_MIN_SESSION_MINUTES: i64 = 30;

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer overrides, never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `CHARTER__PAYMENTS__SECRET_KEY=sk_live_...`
            .add_source(config::Environment::with_prefix("CHARTER").separator("__"))
            .build()?;

        let cfg: Config = s.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Cross-field checks serde cannot express.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let hold_minutes = self.business_rules.hold_minutes;
        if hold_minutes <= 0 {
            return Err(config::ConfigError::Message(format!(
                "business_rules.hold_minutes must be positive, got {hold_minutes}"
            )));
        }
        // Checkout sessions expire with the hold.
        if self.payments.provider == PaymentProvider::Stripe && hold_minutes < STRIPE_MIN_SESSION_MINUTES {
            return Err(config::ConfigError::Message(format!(
                "business_rules.hold_minutes = {hold_minutes} is below Stripe's \
                 {STRIPE_MIN_SESSION_MINUTES}-minute session minimum"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(provider: &str, extra: &str) -> Config {
        let raw = format!(
            r#"
            [server]
            port = 8080

            [database]
            url = "postgres://localhost/charter"

            [payments]
            provider = "{provider}"
            webhook_secret = "whsec_test"
            success_url = "https://example.test/ok"
            cancel_url = "https://example.test/cancel"
            {extra}
        "#
        );
        config::Config::builder()
            .add_source(config::File::from_str(&raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults_fill_optional_sections() {
        let cfg = parse("mock", "");

        assert!(cfg.redis.is_none());
        assert_eq!(cfg.payments.provider, PaymentProvider::Mock);
        assert_eq!(cfg.business_rules.hold_minutes, 15);
        assert_eq!(cfg.database.max_connections, 10);
        assert_eq!(cfg.payments.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_stripe_needs_holds_of_at_least_thirty_minutes() {
        let short = parse("stripe", "");
        assert_eq!(short.business_rules.hold_minutes, 15);
        assert!(short.validate().is_err());

        let long = parse("stripe", "[business_rules]\nhold_minutes = 30");
        assert!(long.validate().is_ok());

        assert!(parse("mock", "").validate().is_ok());
        assert!(parse("mock", "[business_rules]\nhold_minutes = 0").validate().is_err());
    }
}
