//! Configuration types for Courier

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default maximum channel name (and pattern) length in bytes
pub const DEFAULT_MAX_CHANNEL_LENGTH: usize = 32;

/// Default maximum payload size in bytes
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Default inbound queue capacity in messages
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Main configuration for Courier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierConfig {
    /// Bus configuration
    #[serde(default)]
    pub bus: BusConfig,

    /// Log filter used by binaries when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            log_level: default_log_level(),
        }
    }
}

/// Bus configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Maximum channel name and subscription pattern length (bytes)
    pub max_channel_length: usize,

    /// Maximum payload size (bytes)
    pub max_payload_size: usize,

    /// Inbound queue capacity (messages)
    pub inbound_queue_capacity: usize,

    /// What to do when the inbound queue is full
    pub backpressure_policy: BackpressurePolicy,

    /// Upper bound on a single transport send
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_channel_length: DEFAULT_MAX_CHANNEL_LENGTH,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            inbound_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            backpressure_policy: BackpressurePolicy::DropNewest,
            send_timeout: Duration::from_secs(1),
        }
    }
}

impl BusConfig {
    /// Builder: set maximum channel length
    pub fn with_max_channel_length(mut self, len: usize) -> Self {
        self.max_channel_length = len;
        self
    }

    /// Builder: set maximum payload size
    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Builder: set inbound queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.inbound_queue_capacity = capacity;
        self
    }

    /// Builder: set backpressure policy
    pub fn with_backpressure(mut self, policy: BackpressurePolicy) -> Self {
        self.backpressure_policy = policy;
        self
    }

    /// Builder: set transport send timeout
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any limit or capacity is zero.
    pub fn validate(&self) -> crate::error::Result<()> {
        let checks = [
            ("max_channel_length", self.max_channel_length),
            ("max_payload_size", self.max_payload_size),
            ("inbound_queue_capacity", self.inbound_queue_capacity),
        ];

        for (name, value) in checks {
            if value == 0 {
                return Err(crate::error::CourierError::Configuration(format!(
                    "bus.{} must be greater than zero",
                    name
                )));
            }
        }

        if self.send_timeout.is_zero() {
            return Err(crate::error::CourierError::Configuration(
                "bus.send_timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Inbound queue policy when full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Reject the incoming message (default)
    #[default]
    DropNewest,

    /// Evict the oldest queued message to make room
    DropOldest,

    /// Make async producers wait for free space
    Block,
}

impl fmt::Display for BackpressurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackpressurePolicy::DropNewest => f.write_str("drop_newest"),
            BackpressurePolicy::DropOldest => f.write_str("drop_oldest"),
            BackpressurePolicy::Block => f.write_str("block"),
        }
    }
}

impl CourierConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. Configuration file (courier.toml, then the path in COURIER_CONFIG_PATH)
    /// 3. Environment variable overrides (`COURIER_BUS__INBOUND_QUEUE_CAPACITY=64`)
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is invalid.
    pub fn load() -> crate::error::Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(CourierConfig::default()))
            .merge(Toml::file("courier.toml"));

        if let Ok(path) = std::env::var("COURIER_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: CourierConfig = figment
            .merge(Env::prefixed("COURIER_").ignore(&["CONFIG_PATH"]).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::error::Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let path = path.as_ref();
        if !path.exists() {
            return Err(crate::error::CourierError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let config: CourierConfig = Figment::from(Serialized::defaults(CourierConfig::default()))
            .merge(Toml::file(path))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> crate::error::Result<()> {
        self.bus.validate()
    }
}
