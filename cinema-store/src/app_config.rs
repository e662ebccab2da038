use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub booking: BookingRules,
    #[serde(default)]
    pub warmup: WarmupConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    /// Namespace prepended to every shared-store key.
    #[serde(default)]
    pub key_prefix: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BookingRules {
    pub lock_ttl_seconds: u64,
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_max_seats")]
    pub max_seats_per_booking: usize,
}

fn default_max_seats() -> usize {
    10
}

impl BookingRules {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_seconds)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    /// Zero TTLs cannot be stored and zero seats cannot be booked.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.lock_ttl_seconds == 0 {
            return Err(config::ConfigError::Message(
                "booking.lock_ttl_seconds must be at least 1".to_string(),
            ));
        }
        if self.cache_ttl_seconds == 0 {
            return Err(config::ConfigError::Message(
                "booking.cache_ttl_seconds must be at least 1".to_string(),
            ));
        }
        if self.max_seats_per_booking == 0 {
            return Err(config::ConfigError::Message(
                "booking.max_seats_per_booking must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            lock_ttl_seconds: 10,
            cache_ttl_seconds: 3600,
            max_seats_per_booking: default_max_seats(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WarmupConfig {
    pub horizon_hours: i64,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self { horizon_hours: 24 }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides are optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(config::File::with_name("config/local").required(false))
            // Eg.. `CINEMA_BOOKING__LOCK_TTL_SECONDS=5`
            .add_source(config::Environment::with_prefix("CINEMA").separator("__"))
            .build()?;

        let cfg: Config = s.try_deserialize()?;
        cfg.booking.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_deserialize_with_defaults() {
        let s = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [database]
                url = "postgres://localhost/cinema"

                [redis]
                url = "redis://127.0.0.1/"

                [booking]
                lock_ttl_seconds = 4
                cache_ttl_seconds = 600
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();

        let cfg: Config = s.try_deserialize().unwrap();
        assert_eq!(cfg.booking.lock_ttl(), Duration::from_secs(4));
        assert_eq!(cfg.booking.max_seats_per_booking, 10);
        assert_eq!(cfg.database.max_connections, 5);
        assert_eq!(cfg.warmup.horizon_hours, 24);
        assert!(cfg.redis.key_prefix.is_empty());
    }

    #[test]
    fn test_zero_lock_ttl_rejected() {
        let rules = BookingRules {
            lock_ttl_seconds: 0,
            ..BookingRules::default()
        };
        assert!(rules.validate().is_err());
        assert!(BookingRules::default().validate().is_ok());
    }
}
