//! Packet Relay Engine
//!
//! Pumps raw IP packets between the host's TUN descriptor and a userspace
//! network stack whose connections are forwarded to a SOCKS5 proxy.
//!
//! # Data Flow
//!
//! ```text
//! host ──feed_inbound──▶ NetStack.write ──▶ stream/datagram handlers ──▶ proxy
//!                            │
//!                            ▼ output callback (stack worker thread)
//! host ◀──poll_outbound── OutputQueue (bounded, drop when full)
//! ```
//!
//! The relay never blocks the stack: a full output queue drops packets.

use crate::probe::probe_proxy;
use crate::queue::{output_queue, PushOutcome, QueueConsumer};
use crate::stack::{NetStack, ProxyTarget, StackFactory};
use crate::stats::{RelayCounters, RelayStats};
use parking_lot::RwLock;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Packets logged individually at the start of each direction
const SAMPLE_PACKETS: u64 = 5;

/// Relay configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Output queue capacity (packets)
    pub queue_capacity: usize,
    /// Proxy reachability probe timeout
    pub probe_timeout: Duration,
    /// Idle expiry for datagram flows
    pub udp_idle_timeout: Duration,
    /// Every n-th packet (and n-th drop) is logged
    pub log_interval: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            probe_timeout: Duration::from_secs(2),
            udp_idle_timeout: Duration::from_secs(30),
            log_interval: 1000,
        }
    }
}

struct ActiveRelay {
    stack: Arc<dyn NetStack>,
    output: QueueConsumer,
    target: ProxyTarget,
}

/// Packet relay between the TUN descriptor and a userspace stack
///
/// `feed_inbound` and `poll_outbound` may be called from different threads
/// concurrently; `start`/`stop` take the lifecycle write lock and wait for
/// in-flight packet calls to finish.
///
/// A `stop` that lands while `start` is still probing makes that start fail
/// with `RelayError::Interrupted`, so the relay is never left running after
/// `stop` returns.
pub struct PacketRelay {
    factory: Arc<dyn StackFactory>,
    config: RelayConfig,
    active: RwLock<Option<ActiveRelay>>,
    counters: Arc<RelayCounters>,
    /// Bumped by every `stop`, under the write lock
    stop_epoch: AtomicU64,
}

impl PacketRelay {
    /// Create a stopped relay
    pub fn new(factory: Arc<dyn StackFactory>, config: RelayConfig) -> Self {
        Self {
            factory,
            config,
            active: RwLock::new(None),
            counters: Arc::new(RelayCounters::default()),
            stop_epoch: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Start relaying to the proxy at `host:port`
    pub fn start(&self, host: &str, port: u16, mtu: u32) -> Result<(), RelayError> {
        if self.is_running() {
            return Err(RelayError::AlreadyRunning);
        }

        let epoch = self.stop_epoch.load(Ordering::SeqCst);
        let target = ProxyTarget::new(host, port);
        info!("Starting tun2socks: SOCKS={}, MTU={}", target, mtu);

        // Probe but don't gate
        probe_proxy(&target, self.config.probe_timeout);

        let mut active = self.active.write();
        if active.is_some() {
            return Err(RelayError::AlreadyRunning);
        }
        if self.stop_epoch.load(Ordering::SeqCst) != epoch {
            info!("tun2socks start for {} cancelled by stop", target);
            return Err(RelayError::Interrupted);
        }

        self.counters.reset();

        let stack = self.factory.create(mtu).map_err(RelayError::StackSetup)?;
        if let Err(e) = self.register_handlers(stack.as_ref(), &target) {
            stack.close();
            return Err(RelayError::StackSetup(e));
        }

        let (producer, consumer) = output_queue(self.config.queue_capacity);
        let counters = self.counters.clone();
        let log_interval = self.config.log_interval.max(1);

        stack.register_output(Box::new(move |packet: &[u8]| match producer.push(packet) {
            PushOutcome::Queued => {}
            PushOutcome::Full => {
                let dropped = counters.record_drop();
                if dropped == 1 || dropped % log_interval == 0 {
                    warn!(
                        "tun2socks output buffer full, dropping packet ({} dropped so far)",
                        dropped
                    );
                }
            }
            PushOutcome::Closed => {}
        }));

        *active = Some(ActiveRelay {
            stack,
            output: consumer,
            target,
        });

        info!(
            "tun2socks started (queue capacity {})",
            self.config.queue_capacity
        );
        Ok(())
    }

    fn register_handlers(&self, stack: &dyn NetStack, target: &ProxyTarget) -> io::Result<()> {
        stack.register_stream_handler(target)?;
        stack.register_datagram_handler(target, self.config.udp_idle_timeout)?;
        debug!("tun2socks: TCP and UDP handlers registered");
        Ok(())
    }

    /// Hand one inbound packet to the stack.
    ///
    /// A write error is counted and returned but leaves the relay running.
    pub fn feed_inbound(&self, packet: &[u8]) -> Result<(), RelayError> {
        let active = self.active.read();
        let relay = active.as_ref().ok_or(RelayError::NotRunning)?;

        if let Err(e) = relay.stack.write(packet) {
            self.counters.record_write_error();
            warn!("tun2socks write error: {}", e);
            return Err(RelayError::StackWrite(e));
        }

        let count = self.counters.record_inbound(packet.len());
        if self.should_log(count) {
            debug!("tun2socks input packet #{}, size: {} bytes", count, packet.len());
        }
        Ok(())
    }

    /// Move the oldest queued output packet into `buf`.
    ///
    /// Returns `Ok(None)` when the queue is empty. A packet larger than
    /// `buf` is discarded and reported as `PacketTooLarge`; the next call
    /// returns the packet after it.
    pub fn poll_outbound(&self, buf: &mut [u8]) -> Result<Option<usize>, RelayError> {
        let active = self.active.read();
        let relay = active.as_ref().ok_or(RelayError::NotRunning)?;

        let Some(packet) = relay.output.pop() else {
            return Ok(None);
        };

        if packet.len() > buf.len() {
            self.counters.record_oversized();
            debug!(
                "Discarding {} byte packet, poll buffer holds {}",
                packet.len(),
                buf.len()
            );
            return Err(RelayError::PacketTooLarge {
                size: packet.len(),
                capacity: buf.len(),
            });
        }

        buf[..packet.len()].copy_from_slice(&packet);

        let count = self.counters.record_outbound(packet.len());
        if self.should_log(count) {
            debug!("tun2socks output packet #{}, size: {} bytes", count, packet.len());
        }
        Ok(Some(packet.len()))
    }

    /// Stop the relay, discarding queued output. Idempotent.
    ///
    /// Also cancels a `start` that has not yet installed its stack.
    pub fn stop(&self) {
        let mut active = self.active.write();
        self.stop_epoch.fetch_add(1, Ordering::SeqCst);

        let Some(relay) = active.take() else {
            return;
        };
        drop(active);

        relay.stack.close();
        let stats = self.counters.snapshot(relay.output.len());
        drop(relay);

        info!("tun2socks stopped: {}", stats.format());
    }

    /// Whether the relay is running
    pub fn is_running(&self) -> bool {
        self.active.read().is_some()
    }

    /// Proxy the running relay forwards to
    pub fn target(&self) -> Option<ProxyTarget> {
        self.active.read().as_ref().map(|r| r.target.clone())
    }

    /// Counter snapshot
    pub fn stats(&self) -> RelayStats {
        let queued = self.active.read().as_ref().map_or(0, |r| r.output.len());
        self.counters.snapshot(queued)
    }

    fn should_log(&self, count: u64) -> bool {
        count <= SAMPLE_PACKETS || count % self.config.log_interval.max(1) == 0
    }
}

impl Drop for PacketRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Relay errors
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("tun2socks already running")]
    AlreadyRunning,

    #[error("tun2socks not running")]
    NotRunning,

    #[error("tun2socks start interrupted by stop")]
    Interrupted,

    #[error("Packet too large: {size} bytes for {capacity} byte buffer")]
    PacketTooLarge { size: usize, capacity: usize },

    #[error("tun2socks write error: {0}")]
    StackWrite(#[source] io::Error),

    #[error("Stack setup error: {0}")]
    StackSetup(#[source] io::Error),
}
