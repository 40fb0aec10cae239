//! Shop configuration from the environment.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use autoshop_budget::TaxRate;

pub const TAX_RATE_BPS: &str = "AUTOSHOP_TAX_RATE_BPS";
pub const CONFLICT_RETRIES: &str = "AUTOSHOP_CONFLICT_RETRIES";
pub const STORAGE_TIMEOUT_MS: &str = "AUTOSHOP_STORAGE_TIMEOUT_MS";
pub const MAINTENANCE_INTERVAL_DAYS: &str = "AUTOSHOP_MAINTENANCE_INTERVAL_DAYS";
pub const SEED_MECHANICS: &str = "AUTOSHOP_SEED_MECHANICS";
pub const HTTP_ADDR: &str = "AUTOSHOP_HTTP_ADDR";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShopConfig {
    /// Snapshotted into each order when its budget is generated.
    pub tax_rate: TaxRate,
    /// How many times a station re-reads and retries after a `Conflict`.
    pub conflict_retries: u32,
    pub storage_timeout: Duration,
    pub maintenance_interval_days: u32,
    /// Register MEC-001..MEC-003 when the registry starts empty.
    pub seed_mechanics: bool,
    pub http_addr: String,
}

impl Default for ShopConfig {
    fn default() -> Self {
        Self {
            tax_rate: TaxRate::from_bps(1800),
            conflict_retries: 1,
            storage_timeout: Duration::from_millis(2000),
            maintenance_interval_days: 150,
            seed_mechanics: true,
            http_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl ShopConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source; unset keys fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let tax_bps: u32 = read(&lookup, TAX_RATE_BPS, defaults.tax_rate.bps())?;
        if tax_bps > 10_000 {
            return Err(ConfigError::Invalid {
                key: TAX_RATE_BPS,
                value: tax_bps.to_string(),
                reason: "tax rate cannot exceed 10000 basis points".to_string(),
            });
        }
        let timeout_ms: u64 = read(
            &lookup,
            STORAGE_TIMEOUT_MS,
            defaults.storage_timeout.as_millis() as u64,
        )?;
        if timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: STORAGE_TIMEOUT_MS,
                value: "0".to_string(),
                reason: "timeout must be positive".to_string(),
            });
        }

        Ok(Self {
            tax_rate: TaxRate::from_bps(tax_bps),
            conflict_retries: read(&lookup, CONFLICT_RETRIES, defaults.conflict_retries)?,
            storage_timeout: Duration::from_millis(timeout_ms),
            maintenance_interval_days: read(
                &lookup,
                MAINTENANCE_INTERVAL_DAYS,
                defaults.maintenance_interval_days,
            )?,
            seed_mechanics: read_bool(&lookup, SEED_MECHANICS, defaults.seed_mechanics)?,
            http_addr: lookup(HTTP_ADDR)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.http_addr),
        })
    }

    pub fn maintenance_interval(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.maintenance_interval_days))
    }
}

fn read<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: core::str::FromStr + core::fmt::Display,
    T::Err: core::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => {
            warn!(key, %default, "empty configuration value; using default");
            Ok(default)
        }
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn read_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        "" => {
            warn!(key, default, "empty configuration value; using default");
            Ok(default)
        }
        _ => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "expected true or false".to_string(),
        }),
    }
}
