//! mobtun TUN - Session Lifecycle and Tunnel Binding
//!
//! Manages the single active proxy session of a mobile VPN client and the
//! OS tunnel interface bound to it.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐   raw params   ┌──────────────┐
//! │    Host    │───────────────▶│   Planner    │  (pure)
//! └─────┬──────┘                └──────┬───────┘
//!       │ start/stop                   │ TunOptions
//!       ▼                              ▼
//! ┌────────────────┐  config  ┌──────────────┐  fd  ┌────────────┐
//! │ SessionManager │─────────▶│ ProxyEngine  │      │ TunFactory │
//! │  session lock  │          └──────────────┘      └─────▲──────┘
//! │  binding lock  │──────────────────────────────────────┘
//! └────────────────┘
//! ```
//!
//! # Features
//!
//! - **Single session**: a second start while running is rejected
//! - **Reversible start**: any failure leaves the manager not running
//! - **Atomic rebind**: the old interface is closed before the new one opens

mod engine;
mod planner;
mod profile;
mod session;

pub use engine::{EngineError, Mode, ModeError, ProxyEngine, TunFactory, TunHandle};
pub use planner::{
    parse_dns, parse_prefixes, plan, PlanError, StackKind, StackPolicy, TunOptions, TunPlan,
    DNS_PORT,
};
pub use profile::{DnsSection, Profile, ProfileEngine};
pub use session::{
    SessionError, SessionManager, SessionTicket, TunSettings, TunnelBinding, CONFIG_FILE_NAME,
};
