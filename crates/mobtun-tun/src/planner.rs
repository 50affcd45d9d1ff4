//! TUN Config Planner
//!
//! Turns the raw textual parameters handed over by the host (comma-separated
//! address and DNS lists, a stack name) into typed tunnel options.
//!
//! # Input Format
//!
//! ```text
//! addresses: "172.19.0.1/30, fd00::1/126"
//! dns:       "1.1.1.1,8.8.8.8"
//! stack:     "gvisor" | "system" | "mixed"
//! ```
//!
//! Everything here is pure: no locks, no I/O.

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Port appended to every DNS hijack target
pub const DNS_PORT: u16 = 53;

/// Userspace network stack flavour backing the TUN interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackKind {
    /// Full userspace TCP/IP stack
    Gvisor,
    /// Kernel-assisted stack
    System,
    /// System stack for TCP, userspace stack for UDP
    Mixed,
}

impl StackKind {
    /// Lowercase name as accepted by the planner
    pub fn name(&self) -> &'static str {
        match self {
            StackKind::Gvisor => "gvisor",
            StackKind::System => "system",
            StackKind::Mixed => "mixed",
        }
    }

    /// Resolve a host-supplied stack name under the given policy.
    ///
    /// Lookup is case-insensitive. An empty name always resolves to the
    /// policy's default; an unknown name falls back or fails depending on
    /// the policy.
    pub fn resolve(name: &str, policy: StackPolicy) -> Result<Self, PlanError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Ok(policy.default_kind());
        }

        match trimmed.parse::<StackKind>() {
            Ok(kind) => Ok(kind),
            Err(e) => match policy {
                StackPolicy::Strict => Err(e),
                StackPolicy::Fallback(kind) => {
                    warn!("Unknown TUN stack '{}', falling back to {}", trimmed, kind);
                    Ok(kind)
                }
            },
        }
    }
}

impl fmt::Display for StackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StackKind {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gvisor" => Ok(StackKind::Gvisor),
            "system" => Ok(StackKind::System),
            "mixed" => Ok(StackKind::Mixed),
            _ => Err(PlanError::InvalidStack(s.to_string())),
        }
    }
}

/// What to do with a stack name that is not in the known set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPolicy {
    /// Log a warning and use the given kind
    Fallback(StackKind),
    /// Reject with `PlanError::InvalidStack`
    Strict,
}

impl StackPolicy {
    /// Kind used for empty names (and unknown ones under `Fallback`)
    pub fn default_kind(&self) -> StackKind {
        match self {
            StackPolicy::Fallback(kind) => *kind,
            StackPolicy::Strict => StackKind::Mixed,
        }
    }
}

impl Default for StackPolicy {
    fn default() -> Self {
        StackPolicy::Fallback(StackKind::Mixed)
    }
}

/// Validated TUN parameters, before a descriptor is attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunPlan {
    pub stack: StackKind,
    pub inet4_prefixes: Vec<Ipv4Net>,
    pub inet6_prefixes: Vec<Ipv6Net>,
    pub dns_hijack: Vec<String>,
}

impl TunPlan {
    /// Bind the plan to a concrete descriptor and MTU
    pub fn into_options(self, descriptor: i32, mtu: u32) -> TunOptions {
        TunOptions {
            descriptor,
            stack: self.stack,
            inet4_prefixes: self.inet4_prefixes,
            inet6_prefixes: self.inet6_prefixes,
            dns_hijack: self.dns_hijack,
            mtu,
        }
    }

    /// Whether DNS hijacking is enabled
    pub fn hijacks_dns(&self) -> bool {
        !self.dns_hijack.is_empty()
    }
}

/// Options handed to the OS tunnel-interface constructor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunOptions {
    /// OS-provided tunnel file descriptor
    pub descriptor: i32,
    /// Stack flavour
    pub stack: StackKind,
    /// IPv4 interface prefixes, in input order
    pub inet4_prefixes: Vec<Ipv4Net>,
    /// IPv6 interface prefixes, in input order
    pub inet6_prefixes: Vec<Ipv6Net>,
    /// DNS hijack targets (`host:53`), in input order
    pub dns_hijack: Vec<String>,
    /// Interface MTU
    pub mtu: u32,
}

impl fmt::Display for TunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefixes: Vec<String> = self
            .inet4_prefixes
            .iter()
            .map(|p| p.to_string())
            .chain(self.inet6_prefixes.iter().map(|p| p.to_string()))
            .collect();

        write!(
            f,
            "FD={}, Stack={}, Addr={}, DNS={}, MTU={}",
            self.descriptor,
            self.stack,
            prefixes.join(","),
            self.dns_hijack.join(","),
            self.mtu
        )
    }
}

/// Parse a comma-separated prefix list, split by address family.
///
/// A single malformed entry fails the whole call.
pub fn parse_prefixes(list: &str) -> Result<(Vec<Ipv4Net>, Vec<Ipv6Net>), PlanError> {
    let mut inet4 = Vec::new();
    let mut inet6 = Vec::new();

    for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let prefix: IpNet = entry
            .parse()
            .map_err(|_| PlanError::InvalidAddress(entry.to_string()))?;

        match prefix {
            IpNet::V4(p) if !inet4.contains(&p) => inet4.push(p),
            IpNet::V6(p) if !inet6.contains(&p) => inet6.push(p),
            _ => {}
        }
    }

    Ok((inet4, inet6))
}

/// Parse a comma-separated DNS server list into hijack targets.
///
/// An empty result disables hijacking.
pub fn parse_dns(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| join_host_port(d, DNS_PORT))
        .collect()
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Build a TUN plan from the raw host parameters
pub fn plan(
    stack: &str,
    addresses: &str,
    dns: &str,
    policy: StackPolicy,
) -> Result<TunPlan, PlanError> {
    let stack = StackKind::resolve(stack, policy)?;
    let (inet4_prefixes, inet6_prefixes) = parse_prefixes(addresses)?;

    Ok(TunPlan {
        stack,
        inet4_prefixes,
        inet6_prefixes,
        dns_hijack: parse_dns(dns),
    })
}

/// Planner errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid stack: {0}")]
    InvalidStack(String),
}
