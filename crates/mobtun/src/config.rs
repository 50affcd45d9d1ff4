//! Core Configuration
//!
//! Tunables for the session manager and relay, loaded from TOML. Every
//! field has a default, so an empty file is a valid configuration.
//!
//! ```toml
//! log_level = "info"
//!
//! [tun]
//! stack = "gvisor"
//! address = "172.19.0.1/30"
//! dns = "1.1.1.1,8.8.8.8"
//! mtu = 9000
//! strict_stack = false
//!
//! [relay]
//! queue_capacity = 1000
//! probe_timeout_ms = 2000
//! udp_idle_timeout_secs = 30
//! log_interval = 1000
//! ```

use anyhow::Context;
use mobtun_relay::RelayConfig;
use mobtun_tun::{PlanError, StackKind, StackPolicy, TunSettings};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Smallest MTU an IPv4 host must accept
const MIN_MTU: u32 = 576;
const MAX_MTU: u32 = 65535;

/// Default TUN parameters for start calls that only pass a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunSection {
    pub stack: String,
    pub address: String,
    pub dns: String,
    pub mtu: u32,
    /// Reject unknown stack names instead of falling back to `mixed`
    pub strict_stack: bool,
}

impl Default for TunSection {
    fn default() -> Self {
        let settings = TunSettings::default();
        Self {
            stack: settings.stack,
            address: settings.address,
            dns: settings.dns,
            mtu: settings.mtu,
            strict_stack: false,
        }
    }
}

/// Packet relay tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySection {
    pub queue_capacity: usize,
    pub probe_timeout_ms: u64,
    pub udp_idle_timeout_secs: u64,
    pub log_interval: u64,
}

impl Default for RelaySection {
    fn default() -> Self {
        let relay = RelayConfig::default();
        Self {
            queue_capacity: relay.queue_capacity,
            probe_timeout_ms: relay.probe_timeout.as_millis() as u64,
            udp_idle_timeout_secs: relay.udp_idle_timeout.as_secs(),
            log_interval: relay.log_interval,
        }
    }
}

/// Complete core configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Log filter installed by `Core::init_logging` (overridden by `RUST_LOG`)
    pub log_level: String,
    pub tun: TunSection,
    pub relay: RelaySection,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            tun: TunSection::default(),
            relay: RelaySection::default(),
        }
    }
}

impl CoreConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read core config {}", path.display()))?;

        Self::from_toml_str(&contents)
            .with_context(|| format!("invalid core config {}", path.display()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay.queue_capacity == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        if !(MIN_MTU..=MAX_MTU).contains(&self.tun.mtu) {
            return Err(ConfigError::InvalidMtu(self.tun.mtu));
        }

        let settings = self.tun_settings();
        mobtun_tun::plan(&settings.stack, &settings.address, &settings.dns, settings.policy)?;

        Ok(())
    }

    /// Stack name policy
    pub fn stack_policy(&self) -> StackPolicy {
        if self.tun.strict_stack {
            StackPolicy::Strict
        } else {
            StackPolicy::Fallback(StackKind::Mixed)
        }
    }

    /// Session manager TUN defaults
    pub fn tun_settings(&self) -> TunSettings {
        TunSettings {
            stack: self.tun.stack.clone(),
            address: self.tun.address.clone(),
            dns: self.tun.dns.clone(),
            mtu: self.tun.mtu,
            policy: self.stack_policy(),
        }
    }

    /// Relay configuration
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            queue_capacity: self.relay.queue_capacity,
            probe_timeout: Duration::from_millis(self.relay.probe_timeout_ms),
            udp_idle_timeout: Duration::from_secs(self.relay.udp_idle_timeout_secs),
            log_interval: self.relay.log_interval,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid core config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Relay queue capacity must be at least 1")]
    InvalidCapacity,

    #[error("MTU {0} out of range ({MIN_MTU}-{MAX_MTU})")]
    InvalidMtu(u32),

    #[error("Invalid default TUN parameters: {0}")]
    InvalidTunDefaults(#[from] PlanError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = CoreConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.tun.stack, "gvisor");
        assert_eq!(config.tun.mtu, 9000);
        assert_eq!(config.relay.queue_capacity, 1000);
        assert_eq!(config.relay_config(), RelayConfig::default());
    }

    #[test]
    fn test_empty_document() {
        let config = CoreConfig::from_toml_str("").unwrap();
        assert_eq!(config, CoreConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = CoreConfig::from_toml_str(
            r#"
            log_level = "debug"

            [tun]
            mtu = 1500
            strict_stack = true

            [relay]
            queue_capacity = 256
            probe_timeout_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.tun.mtu, 1500);
        assert_eq!(config.tun.address, "172.19.0.1/30");
        assert_eq!(config.stack_policy(), StackPolicy::Strict);

        let relay = config.relay_config();
        assert_eq!(relay.queue_capacity, 256);
        assert_eq!(relay.probe_timeout, Duration::from_millis(500));
        assert_eq!(relay.udp_idle_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            CoreConfig::from_toml_str("[relay]\nqueue_capacity = 0"),
            Err(ConfigError::InvalidCapacity)
        ));
        assert!(matches!(
            CoreConfig::from_toml_str("[tun]\nmtu = 100"),
            Err(ConfigError::InvalidMtu(100))
        ));
        assert!(matches!(
            CoreConfig::from_toml_str("[tun]\naddress = \"bogus\""),
            Err(ConfigError::InvalidTunDefaults(PlanError::InvalidAddress(_)))
        ));
        assert!(matches!(
            CoreConfig::from_toml_str("[tun]\nstack = \"lwip\"\nstrict_stack = true"),
            Err(ConfigError::InvalidTunDefaults(PlanError::InvalidStack(_)))
        ));
        assert!(matches!(
            CoreConfig::from_toml_str("log_level = ["),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.toml");
        std::fs::write(&path, "[tun]\ndns = \"9.9.9.9\"\n").unwrap();

        let config = CoreConfig::load(&path).unwrap();
        assert_eq!(config.tun_settings().dns, "9.9.9.9");

        let err = CoreConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read core config"));
    }
}
