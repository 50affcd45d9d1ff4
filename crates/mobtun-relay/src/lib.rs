//! mobtun Relay - TUN Packet Relay over a Userspace Stack
//!
//! Bridges raw IP packets from the host's tunnel descriptor into an
//! in-process TCP/IP stack that forwards connections to a SOCKS5 proxy,
//! and hands the stack's output back to the host by polling.
//!
//! # Features
//!
//! - **Pull-based egress**: the host polls; the relay runs no event loop
//! - **Bounded memory**: output queue never exceeds its capacity
//! - **Lossy under load**: a full queue drops packets instead of stalling the stack
//! - **Fault tolerant**: a malformed inbound packet never stops the relay

mod probe;
mod queue;
mod relay;
mod stack;
mod stats;

pub use probe::{probe, probe_proxy, ProbeOutcome};
pub use queue::{output_queue, PushOutcome, QueueConsumer, QueueProducer};
pub use relay::{PacketRelay, RelayConfig, RelayError};
pub use stack::{NetStack, OutputFn, ProxyTarget, StackFactory};
pub use stats::RelayStats;
