//! Environment-variable configuration.
//!
//! Every tunable is an environment variable; `.env` loading happens in the
//! binary shell. Missing credentials and out-of-range numerics are fatal at
//! startup. Numeric knobs default to conservative values so a dry run needs
//! nothing beyond credentials.

use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

/// Fatal configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("environment variable {name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("configuration out of range: {0}")]
    OutOfRange(String),
}

/// Complete engine configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    // Venue endpoints and on-chain addresses.
    pub rpc_url: String,
    pub wss_url: String,
    pub wss_user_url: String,
    pub exchange_address: String,
    pub usdc_address: String,
    pub poly_proxy_address: String,

    // Credentials (required).
    pub private_key: String,
    pub clob_api_key: String,
    pub clob_api_secret: String,
    pub clob_passphrase: String,

    pub log_level: String,
    /// When set, no venue writes happen; synthetic order ids are issued.
    pub dry_run: bool,

    // Market selection.
    pub max_markets: usize,
    pub min_spread_cents: Decimal,
    pub max_spread_cents: Decimal,
    pub min_volume_24h_usd: Decimal,
    pub min_depth_top2_usd: Decimal,
    pub hours_to_close_min: Decimal,
    pub max_markets_per_event: usize,

    // Order sizing floors.
    pub min_notional_per_order_usdc: Decimal,
    pub min_expected_profit_usdc: Decimal,
    pub min_size_shares: Decimal,

    // Risk caps.
    pub max_shares_per_market: Decimal,
    pub max_usdc_per_market: Decimal,
    pub max_notional_at_risk_usdc: Decimal,

    // Order dynamics.
    pub order_ttl_ms: i64,
    pub replace_price_ticks: Decimal,
    pub ask_chase_window_sec: u64,
    pub ask_chase_max_replaces: u32,

    // Periodic task cadences.
    pub reconcile_interval_ms: u64,
    pub metrics_log_interval_ms: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://polygon-rpc.com".to_string(),
            wss_url: "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string(),
            wss_user_url: "wss://ws-subscriptions-clob.polymarket.com/ws/user".to_string(),
            exchange_address: String::new(),
            usdc_address: String::new(),
            poly_proxy_address: String::new(),
            private_key: String::new(),
            clob_api_key: String::new(),
            clob_api_secret: String::new(),
            clob_passphrase: String::new(),
            log_level: "info".to_string(),
            dry_run: false,
            max_markets: 10,
            min_spread_cents: Decimal::from(3),
            max_spread_cents: Decimal::from(20),
            min_volume_24h_usd: Decimal::from(10_000),
            min_depth_top2_usd: Decimal::from(100),
            hours_to_close_min: Decimal::from(6),
            max_markets_per_event: 1,
            min_notional_per_order_usdc: Decimal::from(2),
            min_expected_profit_usdc: Decimal::new(5, 2), // 0.05
            min_size_shares: Decimal::from(2),
            max_shares_per_market: Decimal::from(100),
            max_usdc_per_market: Decimal::from(25),
            max_notional_at_risk_usdc: Decimal::from(100),
            order_ttl_ms: 45_000,
            replace_price_ticks: Decimal::ONE,
            ask_chase_window_sec: 30,
            ask_chase_max_replaces: 5,
            reconcile_interval_ms: 60_000,
            metrics_log_interval_ms: 60_000,
        }
    }
}

impl BotConfig {
    /// Load configuration from the environment, falling back to defaults
    /// for optional knobs. Credentials are required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            rpc_url: var_or("RPC_URL", defaults.rpc_url),
            wss_url: var_or("WSS_URL", defaults.wss_url),
            wss_user_url: var_or("WSS_USER_URL", defaults.wss_user_url),
            exchange_address: var_or("EXCHANGE_ADDRESS", defaults.exchange_address),
            usdc_address: var_or("USDC_ADDRESS", defaults.usdc_address),
            poly_proxy_address: var_or("POLY_PROXY_ADDRESS", defaults.poly_proxy_address),

            private_key: required("PRIVATE_KEY")?,
            clob_api_key: required("CLOB_API_KEY")?,
            clob_api_secret: required("CLOB_API_SECRET")?,
            clob_passphrase: required("CLOB_PASSPHRASE")?,

            log_level: var_or("LOG_LEVEL", defaults.log_level),
            dry_run: bool_var("DRY_RUN")?,

            max_markets: usize_var("MAX_MARKETS", defaults.max_markets)?,
            min_spread_cents: decimal_var("MIN_SPREAD_CENTS", defaults.min_spread_cents)?,
            max_spread_cents: decimal_var("MAX_SPREAD_CENTS", defaults.max_spread_cents)?,
            min_volume_24h_usd: decimal_var("MIN_VOLUME_24H_USD", defaults.min_volume_24h_usd)?,
            min_depth_top2_usd: decimal_var("MIN_DEPTH_TOP2_USD", defaults.min_depth_top2_usd)?,
            hours_to_close_min: decimal_var("HOURS_TO_CLOSE_MIN", defaults.hours_to_close_min)?,
            max_markets_per_event: usize_var(
                "MAX_MARKETS_PER_EVENT",
                defaults.max_markets_per_event,
            )?,

            min_notional_per_order_usdc: decimal_var(
                "MIN_NOTIONAL_PER_ORDER_USDC",
                defaults.min_notional_per_order_usdc,
            )?,
            min_expected_profit_usdc: decimal_var(
                "MIN_EXPECTED_PROFIT_USDC",
                defaults.min_expected_profit_usdc,
            )?,
            min_size_shares: decimal_var("MIN_SIZE_SHARES", defaults.min_size_shares)?,

            max_shares_per_market: decimal_var(
                "MAX_SHARES_PER_MARKET",
                defaults.max_shares_per_market,
            )?,
            max_usdc_per_market: decimal_var("MAX_USDC_PER_MARKET", defaults.max_usdc_per_market)?,
            max_notional_at_risk_usdc: decimal_var(
                "MAX_NOTIONAL_AT_RISK_USDC",
                defaults.max_notional_at_risk_usdc,
            )?,

            order_ttl_ms: i64_var("ORDER_TTL_MS", defaults.order_ttl_ms)?,
            replace_price_ticks: decimal_var(
                "REPLACE_PRICE_TICKS",
                defaults.replace_price_ticks,
            )?,
            ask_chase_window_sec: u64_var("ASK_CHASE_WINDOW_SEC", defaults.ask_chase_window_sec)?,
            ask_chase_max_replaces: u32_var(
                "ASK_CHASE_MAX_REPLACES",
                defaults.ask_chase_max_replaces,
            )?,

            reconcile_interval_ms: u64_var(
                "RECONCILE_INTERVAL_MS",
                defaults.reconcile_interval_ms,
            )?,
            metrics_log_interval_ms: u64_var(
                "METRICS_LOG_INTERVAL_MS",
                defaults.metrics_log_interval_ms,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Range checks; violations are fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_markets == 0 {
            return Err(ConfigError::OutOfRange("MAX_MARKETS must be at least 1".into()));
        }
        if self.min_spread_cents <= Decimal::ZERO {
            return Err(ConfigError::OutOfRange(
                "MIN_SPREAD_CENTS must be positive".into(),
            ));
        }
        if self.max_spread_cents < self.min_spread_cents {
            return Err(ConfigError::OutOfRange(
                "MAX_SPREAD_CENTS must not be below MIN_SPREAD_CENTS".into(),
            ));
        }
        if self.min_notional_per_order_usdc <= Decimal::ZERO {
            return Err(ConfigError::OutOfRange(
                "MIN_NOTIONAL_PER_ORDER_USDC must be positive".into(),
            ));
        }
        if self.max_shares_per_market <= Decimal::ZERO
            || self.max_usdc_per_market <= Decimal::ZERO
            || self.max_notional_at_risk_usdc <= Decimal::ZERO
        {
            return Err(ConfigError::OutOfRange("risk caps must be positive".into()));
        }
        if self.max_usdc_per_market > self.max_notional_at_risk_usdc {
            return Err(ConfigError::OutOfRange(
                "MAX_USDC_PER_MARKET cannot exceed MAX_NOTIONAL_AT_RISK_USDC".into(),
            ));
        }
        if self.order_ttl_ms <= 0 {
            return Err(ConfigError::OutOfRange("ORDER_TTL_MS must be positive".into()));
        }
        if self.replace_price_ticks <= Decimal::ZERO {
            return Err(ConfigError::OutOfRange(
                "REPLACE_PRICE_TICKS must be positive".into(),
            ));
        }
        if self.max_markets_per_event == 0 {
            return Err(ConfigError::OutOfRange(
                "MAX_MARKETS_PER_EVENT must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn order_ttl(&self) -> Duration {
        Duration::from_millis(self.order_ttl_ms as u64)
    }

    pub fn ask_chase_window(&self) -> Duration {
        Duration::from_secs(self.ask_chase_window_sec)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_log_interval_ms)
    }
}

fn var_or(name: &'static str, default: String) -> String {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => default,
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn bool_var(name: &'static str) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(false),
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "" | "0" | "false" | "no" => Ok(false),
            "1" | "true" | "yes" => Ok(true),
            _ => Err(ConfigError::Invalid { name, value: v }),
        },
    }
}

fn decimal_var(name: &'static str, default: Decimal) -> Result<Decimal, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: v }),
    }
}

fn usize_var(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: v }),
    }
}

fn u64_var(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: v }),
    }
}

fn u32_var(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: v }),
    }
}

fn i64_var(name: &'static str, default: i64) -> Result<i64, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: v }),
    }
}
