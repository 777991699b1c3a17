//! Client configuration.
//!
//! Loaded from YAML:
//!
//! ```yaml
//! serial:
//!   port: /dev/ttyUSB0
//!   baud_rate: 115200
//! update_interval_ms: 60000
//! entities: [state, enable, charging_current]
//! multipliers:
//!   charging_current: 10
//! subscriptions:
//!   emeter_power: 500
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use evse_at_protocol::{Catalog, Direction, ValueKind};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::scheduler::{DEFAULT_UPDATE_INTERVAL, MAX_UPDATE_INTERVAL, MIN_UPDATE_INTERVAL};

/// Default serial baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

const MIN_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Serial port settings (used by the runner).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SerialConfig {
    /// Device path (e.g. `/dev/ttyUSB0`, `COM3`).
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_update_interval_ms() -> u64 {
    DEFAULT_UPDATE_INTERVAL.as_millis() as u64
}

/// Client configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(default)]
    pub serial: Option<SerialConfig>,
    /// Polling base interval.
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    /// Response window per command. Derived from the update interval if absent.
    #[serde(default)]
    pub response_timeout_ms: Option<u64>,
    /// Silence after which the link is considered reset.
    #[serde(default)]
    pub liveness_timeout_ms: Option<u64>,
    /// Enabled entity keys. `None` enables the whole catalog.
    #[serde(default)]
    pub entities: Option<Vec<String>>,
    /// Per-entity scale overrides.
    #[serde(default)]
    pub multipliers: BTreeMap<String, f64>,
    /// Push subscriptions issued at startup (key → period in ms).
    #[serde(default)]
    pub subscriptions: BTreeMap<String, u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            serial: None,
            update_interval_ms: default_update_interval_ms(),
            response_timeout_ms: None,
            liveness_timeout_ms: None,
            entities: None,
            multipliers: BTreeMap::new(),
            subscriptions: BTreeMap::new(),
        }
    }
}

impl ClientConfig {
    /// Parse configuration from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Effective timing, validated.
    pub fn timing(&self) -> Result<Timing, ConfigError> {
        let update_interval = Duration::from_millis(self.update_interval_ms);
        if update_interval < MIN_UPDATE_INTERVAL || update_interval > MAX_UPDATE_INTERVAL {
            return Err(ConfigError::UpdateIntervalOutOfRange {
                value_ms: self.update_interval_ms,
                min_ms: MIN_UPDATE_INTERVAL.as_millis() as u64,
                max_ms: MAX_UPDATE_INTERVAL.as_millis() as u64,
            });
        }

        let mut timing = Timing::from_update_interval(update_interval);
        if let Some(ms) = self.response_timeout_ms {
            if ms == 0 {
                return Err(ConfigError::ZeroTimeout { name: "response_timeout_ms" });
            }
            timing.response_timeout = Duration::from_millis(ms);
            timing.liveness_timeout = 2 * update_interval + timing.response_timeout;
        }
        if let Some(ms) = self.liveness_timeout_ms {
            if ms == 0 {
                return Err(ConfigError::ZeroTimeout { name: "liveness_timeout_ms" });
            }
            timing.liveness_timeout = Duration::from_millis(ms);
        }
        Ok(timing)
    }

    /// Canonical catalog with the configured multipliers applied.
    ///
    /// Only scaled decimal entities accept a multiplier.
    pub fn build_catalog(&self) -> Result<Catalog, ConfigError> {
        let mut catalog = Catalog::evse();
        for (key, &value) in &self.multipliers {
            let descriptor = catalog.lookup(key).map_err(|_| ConfigError::UnknownEntity {
                key: key.clone(),
                section: "multipliers",
            })?;
            let invalid = || ConfigError::InvalidMultiplier { key: key.clone(), value };
            if !matches!(descriptor.value_kind, ValueKind::Float { .. }) {
                return Err(invalid());
            }
            catalog.set_scale(key, value).map_err(|_| invalid())?;
        }
        Ok(catalog)
    }

    /// Which catalog entities are enabled, indexed by entity id.
    pub fn enabled_mask(&self, catalog: &Catalog) -> Result<Vec<bool>, ConfigError> {
        let Some(keys) = &self.entities else {
            return Ok(vec![true; catalog.len()]);
        };
        let mut mask = vec![false; catalog.len()];
        for key in keys {
            let id = catalog.id_of(key).map_err(|_| ConfigError::UnknownEntity {
                key: key.clone(),
                section: "entities",
            })?;
            mask[id.0] = true;
        }
        Ok(mask)
    }

    /// Check every entity reference and the timing against `catalog`.
    pub fn validate(&self, catalog: &Catalog) -> Result<(), ConfigError> {
        self.timing()?;
        let mask = self.enabled_mask(catalog)?;
        for key in self.subscriptions.keys() {
            let unknown = || ConfigError::UnknownEntity {
                key: key.clone(),
                section: "subscriptions",
            };
            let id = catalog.id_of(key).map_err(|_| unknown())?;
            if !mask[id.0] || catalog.get(id).direction == Direction::Action {
                return Err(ConfigError::NotSubscribable { key: key.clone() });
            }
        }
        Ok(())
    }
}

/// Effective timing parameters of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Polling base interval.
    pub update_interval: Duration,
    /// Per-command response window.
    pub response_timeout: Duration,
    /// Silence after which subscriptions are re-issued.
    pub liveness_timeout: Duration,
}

impl Timing {
    /// Derive the timeouts from the update interval.
    ///
    /// The response timeout is a twelfth of the interval within [1 s, 5 s];
    /// the link is declared dead after two missed polls plus one response window.
    pub fn from_update_interval(update_interval: Duration) -> Self {
        let response_timeout =
            (update_interval / 12).clamp(MIN_RESPONSE_TIMEOUT, MAX_RESPONSE_TIMEOUT);
        Timing {
            update_interval,
            response_timeout,
            liveness_timeout: 2 * update_interval + response_timeout,
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::from_update_interval(DEFAULT_UPDATE_INTERVAL)
    }
}
