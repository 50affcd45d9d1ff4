//! Proxy Engine Collaborators
//!
//! The session manager drives two external collaborators:
//!
//! - a [`ProxyEngine`] that owns routing/rule state and the active [`Mode`]
//! - a [`TunFactory`] that binds an OS tunnel descriptor into a [`TunHandle`]
//!
//! Both are trait objects so the host (or tests) can swap them out.

use crate::planner::TunOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Traffic-routing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Route per rule set
    #[default]
    Rule,
    /// Force all traffic through the proxy
    Global,
    /// Bypass the proxy entirely
    Direct,
}

impl Mode {
    /// Lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Rule => "rule",
            Mode::Global => "global",
            Mode::Direct => "direct",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mode {
    type Err = ModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rule" => Ok(Mode::Rule),
            "global" => Ok(Mode::Global),
            "direct" => Ok(Mode::Direct),
            _ => Err(ModeError::InvalidMode(s.to_string())),
        }
    }
}

/// Mode parsing error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModeError {
    #[error("Invalid mode: {0}. Must be rule, global, or direct.")]
    InvalidMode(String),
}

/// Errors reported by the proxy engine or the TUN constructor
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Config parse error: {0}")]
    Parse(String),

    #[error("Invalid mode in config: {0}")]
    Mode(#[from] ModeError),

    #[error("TUN creation error: {0}")]
    Tun(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Routing/rule engine consuming the raw profile text
pub trait ProxyEngine: Send + Sync {
    /// Parse the raw config and rebuild internal routing state
    fn parse_config(&self, config: &[u8]) -> Result<(), EngineError>;

    /// Switch the active routing mode
    fn set_mode(&self, mode: Mode);

    /// Currently active routing mode
    fn mode(&self) -> Mode;
}

/// OS tunnel-interface constructor
pub trait TunFactory: Send + Sync {
    /// Bind a tunnel interface with the given options
    fn create(&self, options: &TunOptions) -> Result<Box<dyn TunHandle>, EngineError>;
}

/// An open tunnel interface
///
/// `close` must be safe to call more than once.
pub trait TunHandle: Send {
    /// Descriptor this handle was created for
    fn descriptor(&self) -> i32;

    /// Release the interface
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!("Global".parse::<Mode>().unwrap(), Mode::Global);
        assert_eq!("RULE".parse::<Mode>().unwrap(), Mode::Rule);
        assert_eq!("direct".parse::<Mode>().unwrap(), Mode::Direct);
    }

    #[test]
    fn test_mode_parse_invalid() {
        let err = "bogus".parse::<Mode>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid mode: bogus. Must be rule, global, or direct.");
    }

    #[test]
    fn test_mode_display_lowercase() {
        assert_eq!(Mode::Global.to_string(), "global");
        assert_eq!(Mode::default(), Mode::Rule);
    }
}
