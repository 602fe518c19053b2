//! Process-level configuration read from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::VoxmineError;

/// Settings for the `voxmine-server` binary.
///
/// | Variable | Default |
/// |---|---|
/// | `VOXMINE_BIND` | `0.0.0.0:8080` |
/// | `VOXMINE_DATA_DIR` | `data/rooms` |
/// | `VOXMINE_SWEEP_SECS` | `300` |
/// | `VOXMINE_DEFAULT_ROOMS` | `1` |
/// | `VOXMINE_DEV_STAKE` | `0` |
/// | `VOXMINE_IDLE_TIMEOUT_SECS` | `60` |
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Where room world deltas are stored.
    pub data_dir: PathBuf,
    /// How often idle rooms are swept.
    pub sweep_interval: Duration,
    pub default_rooms_per_tier: usize,
    /// Stake reported for every wallet by the built-in balance lookup.
    pub dev_stake: f64,
    /// A connection that sends nothing for this long is dropped.
    pub idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            data_dir: PathBuf::from("data/rooms"),
            sweep_interval: Duration::from_secs(300),
            default_rooms_per_tier: 1,
            dev_stake: 0.0,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, VoxmineError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `var`, falling back to defaults for
    /// anything unset.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, VoxmineError> {
        let defaults = Self::default();
        Ok(Self {
            bind_addr: var("VOXMINE_BIND").unwrap_or(defaults.bind_addr),
            data_dir: var("VOXMINE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            sweep_interval: parse(&var, "VOXMINE_SWEEP_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            default_rooms_per_tier: parse(&var, "VOXMINE_DEFAULT_ROOMS")?
                .unwrap_or(defaults.default_rooms_per_tier),
            dev_stake: parse(&var, "VOXMINE_DEV_STAKE")?.unwrap_or(defaults.dev_stake),
            idle_timeout: parse(&var, "VOXMINE_IDLE_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
        })
    }
}

fn parse<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, VoxmineError> {
    match var(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| VoxmineError::Config(format!("{name}={raw:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_from_lookup_empty_uses_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("VOXMINE_BIND", "127.0.0.1:9000"),
            ("VOXMINE_SWEEP_SECS", "60"),
            ("VOXMINE_DEFAULT_ROOMS", "2"),
            ("VOXMINE_DEV_STAKE", "150.5"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.default_rooms_per_tier, 2);
        assert_eq!(config.dev_stake, 150.5);
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_from_lookup_bad_number_errors() {
        let err = ServerConfig::from_lookup(lookup(&[("VOXMINE_SWEEP_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, VoxmineError::Config(_)));
        assert!(err.to_string().contains("VOXMINE_SWEEP_SECS"));
    }
}
