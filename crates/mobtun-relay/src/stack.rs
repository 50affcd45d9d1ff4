//! Userspace Network Stack Interface
//!
//! The relay does not implement TCP/IP itself. It drives an in-process
//! stack through [`NetStack`]: raw packets go in via `write`, connections
//! the stack terminates are forwarded to the proxy by the registered
//! handlers, and packets the stack emits come back through the output
//! callback.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Output callback invoked by the stack for every packet bound for the TUN.
///
/// The slice is only valid for the duration of the call.
pub type OutputFn = Box<dyn Fn(&[u8]) + Send + Sync>;

/// SOCKS5 proxy endpoint connections are forwarded to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyTarget {
    /// Proxy host (name or IP literal)
    pub host: String,
    /// Proxy port
    pub port: u16,
}

impl ProxyTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ProxyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// An in-process TCP/IP stack
pub trait NetStack: Send + Sync {
    /// Forward stream (TCP) connections to the proxy
    fn register_stream_handler(&self, proxy: &ProxyTarget) -> io::Result<()>;

    /// Forward datagram (UDP) flows to the proxy; idle flows expire
    fn register_datagram_handler(&self, proxy: &ProxyTarget, idle_timeout: Duration) -> io::Result<()>;

    /// Install the callback receiving packets destined for the TUN
    fn register_output(&self, output: OutputFn);

    /// Feed one raw IP packet into the stack's input path
    fn write(&self, packet: &[u8]) -> io::Result<usize>;

    /// Tear down the stack and release its handlers
    fn close(&self);
}

/// Creates a fresh stack for each relay start
pub trait StackFactory: Send + Sync {
    fn create(&self, mtu: u32) -> io::Result<Arc<dyn NetStack>>;
}
