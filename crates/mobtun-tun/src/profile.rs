//! YAML Profile Engine
//!
//! Built-in [`ProxyEngine`] that understands the header of a Clash-style
//! YAML profile: listener ports, mode, log level and DNS settings.
//! Proxies, groups and rules are only counted; evaluating them belongs to
//! a full routing engine.
//!
//! ```yaml
//! mixed-port: 7890
//! mode: rule
//! log-level: info
//! dns:
//!   enable: true
//!   nameserver: [1.1.1.1]
//! rules:
//!   - MATCH,DIRECT
//! ```

use crate::engine::{EngineError, Mode, ProxyEngine};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info};

/// DNS section of a profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DnsSection {
    pub enable: bool,
    pub listen: Option<String>,
    pub nameserver: Vec<String>,
}

/// Parsed profile header
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Profile {
    /// Routing mode as written in the profile (case-insensitive)
    pub mode: Option<String>,
    /// HTTP listener port
    pub port: Option<u16>,
    /// SOCKS5 listener port
    pub socks_port: Option<u16>,
    /// Combined HTTP/SOCKS listener port
    pub mixed_port: Option<u16>,
    pub allow_lan: bool,
    pub log_level: Option<String>,
    pub ipv6: bool,
    pub dns: DnsSection,
    pub proxies: Vec<serde_yaml::Value>,
    pub proxy_groups: Vec<serde_yaml::Value>,
    pub rules: Vec<String>,
}

impl Profile {
    /// Parse a profile from raw bytes
    pub fn from_slice(config: &[u8]) -> Result<Self, EngineError> {
        let value: serde_yaml::Value =
            serde_yaml::from_slice(config).map_err(|e| EngineError::Parse(e.to_string()))?;

        if !value.is_mapping() {
            return Err(EngineError::Parse("profile must be a YAML mapping".into()));
        }

        serde_yaml::from_value(value).map_err(|e| EngineError::Parse(e.to_string()))
    }

    /// Mode declared by the profile, if any. An unknown mode name is an error.
    pub fn routing_mode(&self) -> Result<Option<Mode>, EngineError> {
        match &self.mode {
            Some(m) => Ok(Some(m.parse()?)),
            None => Ok(None),
        }
    }

    /// Port a SOCKS5 client should use to reach the local listener
    pub fn socks_listener_port(&self) -> Option<u16> {
        self.mixed_port.or(self.socks_port)
    }
}

/// Proxy engine backed by a parsed YAML profile
#[derive(Default)]
pub struct ProfileEngine {
    profile: RwLock<Option<Profile>>,
    mode: RwLock<Mode>,
}

impl ProfileEngine {
    /// Create an engine with no profile loaded
    pub fn new() -> Self {
        Self::default()
    }

    /// Last successfully parsed profile
    pub fn profile(&self) -> Option<Profile> {
        self.profile.read().clone()
    }
}

impl ProxyEngine for ProfileEngine {
    fn parse_config(&self, config: &[u8]) -> Result<(), EngineError> {
        let profile = Profile::from_slice(config)?;

        if let Some(mode) = profile.routing_mode()? {
            *self.mode.write() = mode;
        }

        info!(
            "Profile loaded: {} proxies, {} groups, {} rules, mode={}",
            profile.proxies.len(),
            profile.proxy_groups.len(),
            profile.rules.len(),
            self.mode()
        );
        if let Some(port) = profile.socks_listener_port() {
            debug!("Profile SOCKS listener on port {}", port);
        }

        *self.profile.write() = Some(profile);
        Ok(())
    }

    fn set_mode(&self, mode: Mode) {
        *self.mode.write() = mode;
    }

    fn mode(&self) -> Mode {
        *self.mode.read()
    }
}
