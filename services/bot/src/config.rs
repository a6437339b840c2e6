//! Bot settings read from the environment
//!
//! Variables map to fields by lowercasing their names, so `BOT_TOKEN` fills
//! `bot_token`. Everything except the token has a default.

use chrono::Duration;
use config::{Config, ConfigError, Environment};
use dispatch::{
    accounts::AdminPolicy,
    config::{DispatchConfig, MatcherConfig},
    fare::FareTable,
};
use serde::Deserialize;

/// Where rides, users and drivers are kept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Postgres,
    /// Process memory, lost on restart
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Telegram bot API token
    pub bot_token: String,
    /// Externally reachable base URL used when registering the webhook
    #[serde(default)]
    pub public_url: Option<String>,
    /// Expected in `X-Telegram-Bot-Api-Secret-Token` when set
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Comma separated user ids allowed to take the admin role
    #[serde(default)]
    pub admin_ids: String,
    #[serde(default)]
    pub store_backend: StoreBackend,

    #[serde(default = "default_pending_sweep_schedule")]
    pub pending_sweep_schedule: String,
    #[serde(default = "default_driver_sweep_schedule")]
    pub driver_sweep_schedule: String,
    #[serde(default = "default_retention_schedule")]
    pub retention_schedule: String,

    #[serde(default = "default_driver_freshness_secs")]
    pub driver_freshness_secs: i64,
    #[serde(default = "default_max_radius_km")]
    pub max_radius_km: f64,
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    #[serde(default = "default_pending_timeout_minutes")]
    pub pending_timeout_minutes: i64,
    #[serde(default = "default_driver_stale_minutes")]
    pub driver_stale_minutes: i64,
    #[serde(default = "default_ride_retention_days")]
    pub ride_retention_days: i64,
    #[serde(default = "default_user_inactivity_days")]
    pub user_inactivity_days: i64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    #[serde(default = "default_fare_economy_base")]
    pub fare_economy_base: f64,
    #[serde(default = "default_fare_comfort_base")]
    pub fare_comfort_base: f64,
    #[serde(default = "default_fare_premium_base")]
    pub fare_premium_base: f64,
    #[serde(default = "default_fare_per_km")]
    pub fare_per_km: f64,
    #[serde(default = "default_fare_per_minute")]
    pub fare_per_minute: f64,
    #[serde(default = "default_average_speed_kmh")]
    pub average_speed_kmh: f64,
}

fn default_port() -> u16 {
    10000
}

fn default_pending_sweep_schedule() -> String {
    "0 * * * * *".to_string()
}

fn default_driver_sweep_schedule() -> String {
    "30 */5 * * * *".to_string()
}

fn default_retention_schedule() -> String {
    "0 15 3 * * *".to_string()
}

fn default_driver_freshness_secs() -> i64 {
    300
}

fn default_max_radius_km() -> f64 {
    10.0
}

fn default_max_candidates() -> usize {
    50
}

fn default_pending_timeout_minutes() -> i64 {
    30
}

fn default_driver_stale_minutes() -> i64 {
    60
}

fn default_ride_retention_days() -> i64 {
    30
}

fn default_user_inactivity_days() -> i64 {
    90
}

fn default_history_limit() -> usize {
    10
}

fn default_fare_economy_base() -> f64 {
    FareTable::default().economy_base
}

fn default_fare_comfort_base() -> f64 {
    FareTable::default().comfort_base
}

fn default_fare_premium_base() -> f64 {
    FareTable::default().premium_base
}

fn default_fare_per_km() -> f64 {
    FareTable::default().per_km
}

fn default_fare_per_minute() -> f64 {
    FareTable::default().per_minute
}

fn default_average_speed_kmh() -> f64 {
    FareTable::default().average_speed_kmh
}

impl AppConfig {
    /// Load the configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn admin_policy(&self) -> AdminPolicy {
        AdminPolicy::new(
            self.admin_ids
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty()),
        )
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            matcher: MatcherConfig {
                freshness: Duration::seconds(self.driver_freshness_secs),
                max_radius_km: self.max_radius_km,
                max_candidates: self.max_candidates,
            },
            fares: FareTable {
                economy_base: self.fare_economy_base,
                comfort_base: self.fare_comfort_base,
                premium_base: self.fare_premium_base,
                per_km: self.fare_per_km,
                per_minute: self.fare_per_minute,
                average_speed_kmh: self.average_speed_kmh,
            },
            pending_timeout: Duration::minutes(self.pending_timeout_minutes),
            driver_stale_after: Duration::minutes(self.driver_stale_minutes),
            ride_retention: Duration::days(self.ride_retention_days),
            user_inactivity: Duration::days(self.user_inactivity_days),
            history_limit: self.history_limit,
        }
    }

    /// Full webhook URL, if a public URL is configured
    pub fn webhook_url(&self) -> Option<String> {
        self.public_url
            .as_deref()
            .map(|base| format!("{}/webhook", base.trim_end_matches('/')))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: [&str; 7] = [
        "BOT_TOKEN",
        "PUBLIC_URL",
        "PORT",
        "ADMIN_IDS",
        "STORE_BACKEND",
        "MAX_RADIUS_KM",
        "PENDING_TIMEOUT_MINUTES",
    ];

    fn reset() {
        for key in KEYS {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    #[serial]
    fn defaults_apply_with_only_a_token() {
        reset();
        unsafe { std::env::set_var("BOT_TOKEN", "123456:abc-DEF") };

        let config = AppConfig::from_env().expect("config loads");
        assert_eq!(config.bot_token, "123456:abc-DEF");
        assert_eq!(config.port, 10000);
        assert_eq!(config.store_backend, StoreBackend::Postgres);
        assert_eq!(config.webhook_url(), None);
        assert_eq!(config.dispatch_config(), DispatchConfig::default());
        reset();
    }

    #[test]
    #[serial]
    fn overrides_are_parsed() {
        reset();
        unsafe {
            std::env::set_var("BOT_TOKEN", "123456:abc-DEF");
            std::env::set_var("PUBLIC_URL", "https://rides.example.com/");
            std::env::set_var("PORT", "8080");
            std::env::set_var("ADMIN_IDS", "111, 222,,333");
            std::env::set_var("STORE_BACKEND", "memory");
            std::env::set_var("MAX_RADIUS_KM", "7.5");
            std::env::set_var("PENDING_TIMEOUT_MINUTES", "15");
        }

        let config = AppConfig::from_env().expect("config loads");
        assert_eq!(config.port, 8080);
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(
            config.webhook_url().as_deref(),
            Some("https://rides.example.com/webhook")
        );

        let policy = config.admin_policy();
        assert!(policy.allows("222"));
        assert!(policy.allows("333"));
        assert!(!policy.allows(""));

        let dispatch = config.dispatch_config();
        assert_eq!(dispatch.matcher.max_radius_km, 7.5);
        assert_eq!(dispatch.pending_timeout, Duration::minutes(15));
        reset();
    }

    #[test]
    #[serial]
    fn single_admin_id_is_read_as_text() {
        reset();
        unsafe {
            std::env::set_var("BOT_TOKEN", "123456:abc-DEF");
            std::env::set_var("ADMIN_IDS", "987654321");
        }

        let config = AppConfig::from_env().expect("config loads");
        assert!(config.admin_policy().allows("987654321"));
        reset();
    }

    #[test]
    #[serial]
    fn missing_token_is_an_error() {
        reset();
        assert!(AppConfig::from_env().is_err());
    }
}
