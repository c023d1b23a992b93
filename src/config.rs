use std::path::PathBuf;
use std::time::Duration;

use crate::model::Ms;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Unparseable { var: &'static str, value: String },
    #[error("{var}: must be at least {min}, got {value}")]
    BelowMinimum { var: &'static str, min: u64, value: u64 },
    #[error("{var}: must be at most {max}, got {value}")]
    AboveMaximum { var: &'static str, max: u64, value: u64 },
}

/// Settings consumed by the hold service itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldConfig {
    pub hold_ttl_minutes: u64,
    pub expire_sweep_interval_ms: u64,
}

impl Default for HoldConfig {
    fn default() -> Self {
        Self {
            hold_ttl_minutes: 15,
            expire_sweep_interval_ms: 60_000,
        }
    }
}

impl HoldConfig {
    pub const MIN_TTL_MINUTES: u64 = 1;
    /// 366 days.
    pub const MAX_TTL_MINUTES: u64 = 366 * 24 * 60;
    pub const MIN_SWEEP_INTERVAL_MS: u64 = 1_000;

    pub fn new(hold_ttl_minutes: u64, expire_sweep_interval_ms: u64) -> Result<Self, ConfigError> {
        at_least("ROOMHOLD_HOLD_TTL_MINUTES", hold_ttl_minutes, Self::MIN_TTL_MINUTES)?;
        at_most("ROOMHOLD_HOLD_TTL_MINUTES", hold_ttl_minutes, Self::MAX_TTL_MINUTES)?;
        at_least(
            "ROOMHOLD_EXPIRE_SWEEP_INTERVAL_MS",
            expire_sweep_interval_ms,
            Self::MIN_SWEEP_INTERVAL_MS,
        )?;
        Ok(Self {
            hold_ttl_minutes,
            expire_sweep_interval_ms,
        })
    }

    pub fn ttl_ms(&self) -> Ms {
        Ms::try_from(self.hold_ttl_minutes)
            .unwrap_or(Ms::MAX)
            .saturating_mul(60_000)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.expire_sweep_interval_ms)
    }
}

/// Process configuration, read from `ROOMHOLD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub hold: HoldConfig,
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub rooms_file: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let hold = HoldConfig::new(
            parse_or(&lookup, "ROOMHOLD_HOLD_TTL_MINUTES", 15)?,
            parse_or(&lookup, "ROOMHOLD_EXPIRE_SWEEP_INTERVAL_MS", 60_000)?,
        )?;

        let max_connections: u64 = parse_or(&lookup, "ROOMHOLD_MAX_CONNECTIONS", 256)?;
        at_least("ROOMHOLD_MAX_CONNECTIONS", max_connections, 1)?;
        let compact_threshold: u64 = parse_or(&lookup, "ROOMHOLD_COMPACT_THRESHOLD", 1000)?;
        at_least("ROOMHOLD_COMPACT_THRESHOLD", compact_threshold, 1)?;

        let metrics_port = match lookup("ROOMHOLD_METRICS_PORT") {
            Some(raw) => Some(parse("ROOMHOLD_METRICS_PORT", &raw)?),
            None => None,
        };

        Ok(Self {
            hold,
            bind: lookup("ROOMHOLD_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "ROOMHOLD_PORT", 5433)?,
            data_dir: PathBuf::from(lookup("ROOMHOLD_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: lookup("ROOMHOLD_PASSWORD").unwrap_or_else(|| "roomhold".into()),
            max_connections: max_connections as usize,
            compact_threshold,
            metrics_port,
            rooms_file: lookup("ROOMHOLD_ROOMS_FILE").map(PathBuf::from),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("holds.wal")
    }
}

fn parse<T: std::str::FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Unparseable {
        var,
        value: raw.to_string(),
    })
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        Some(raw) => parse(var, &raw),
        None => Ok(default),
    }
}

fn at_least(var: &'static str, value: u64, min: u64) -> Result<(), ConfigError> {
    if value < min {
        return Err(ConfigError::BelowMinimum { var, min, value });
    }
    Ok(())
}

fn at_most(var: &'static str, value: u64, max: u64) -> Result<(), ConfigError> {
    if value > max {
        return Err(ConfigError::AboveMaximum { var, max, value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.hold, HoldConfig::default());
        assert_eq!(cfg.hold.ttl_ms(), 15 * 60_000);
        assert_eq!(cfg.hold.sweep_interval(), Duration::from_secs(60));
        assert_eq!(cfg.port, 5433);
        assert_eq!(cfg.bind, "0.0.0.0");
        assert_eq!(cfg.password, "roomhold");
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.compact_threshold, 1000);
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.rooms_file, None);
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/holds.wal"));
    }

    #[test]
    fn overrides() {
        let cfg = ServerConfig::from_lookup(lookup(&[
            ("ROOMHOLD_HOLD_TTL_MINUTES", "1"),
            ("ROOMHOLD_EXPIRE_SWEEP_INTERVAL_MS", "1000"),
            ("ROOMHOLD_PORT", "6000"),
            ("ROOMHOLD_DATA_DIR", "/var/lib/roomhold"),
            ("ROOMHOLD_METRICS_PORT", "9100"),
            ("ROOMHOLD_ROOMS_FILE", "rooms.json"),
        ]))
        .unwrap();
        assert_eq!(cfg.hold.hold_ttl_minutes, 1);
        assert_eq!(cfg.hold.expire_sweep_interval_ms, 1000);
        assert_eq!(cfg.port, 6000);
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.rooms_file, Some(PathBuf::from("rooms.json")));
        assert_eq!(cfg.wal_path(), PathBuf::from("/var/lib/roomhold/holds.wal"));
    }

    #[test]
    fn minimums_enforced() {
        assert_eq!(
            ServerConfig::from_lookup(lookup(&[("ROOMHOLD_HOLD_TTL_MINUTES", "0")])).unwrap_err(),
            ConfigError::BelowMinimum {
                var: "ROOMHOLD_HOLD_TTL_MINUTES",
                min: 1,
                value: 0
            }
        );
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[("ROOMHOLD_EXPIRE_SWEEP_INTERVAL_MS", "999")])),
            Err(ConfigError::BelowMinimum { min: 1000, .. })
        ));
        assert!(HoldConfig::new(1, 1000).is_ok());
        assert!(HoldConfig::new(1, 999).is_err());
    }

    #[test]
    fn ttl_upper_bound() {
        assert!(HoldConfig::new(HoldConfig::MAX_TTL_MINUTES, 1000).is_ok());
        assert_eq!(
            ServerConfig::from_lookup(lookup(&[(
                "ROOMHOLD_HOLD_TTL_MINUTES",
                "18446744073709551615"
            )]))
            .unwrap_err(),
            ConfigError::AboveMaximum {
                var: "ROOMHOLD_HOLD_TTL_MINUTES",
                max: HoldConfig::MAX_TTL_MINUTES,
                value: u64::MAX
            }
        );

        // Out-of-range values set directly saturate instead of wrapping negative.
        let cfg = HoldConfig {
            hold_ttl_minutes: u64::MAX,
            ..HoldConfig::default()
        };
        assert_eq!(cfg.ttl_ms(), Ms::MAX);
    }

    #[test]
    fn garbage_rejected() {
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[("ROOMHOLD_PORT", "eighty")])),
            Err(ConfigError::Unparseable { var: "ROOMHOLD_PORT", .. })
        ));
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[("ROOMHOLD_HOLD_TTL_MINUTES", "-5")])),
            Err(ConfigError::Unparseable { .. })
        ));
    }
}
