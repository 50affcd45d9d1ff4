//! mobtun - Embeddable Mobile VPN Core
//!
//! Control surface handed to a host application (iOS/Android). The host
//! passes in a tunnel descriptor and a SOCKS5 proxy endpoint; the core
//! runs a single proxy session bound to that tunnel and relays raw IP
//! packets between the tunnel and a userspace TCP/IP stack.
//!
//! # Example
//!
//! ```ignore
//! let core = Core::with_profile_engine(CoreConfig::default(), tun_factory, stack_factory)?;
//!
//! let err = core.start(home_dir, &profile_text, Some(tun_fd));
//! if !err.is_empty() {
//!     // surface to the user
//! }
//!
//! core.relay_start("127.0.0.1", 7890, 1500);
//! ```

pub mod config;
pub mod facade;
pub mod logging;

pub use config::{ConfigError, CoreConfig, RelaySection, TunSection};
pub use facade::{Core, CoreError, VERSION};

pub use mobtun_relay as relay;
pub use mobtun_tun as tun;
