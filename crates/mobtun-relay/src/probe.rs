//! Proxy reachability probe
//!
//! Diagnostic only: the relay starts whatever the outcome, since the
//! proxy may come up after the tunnel does.

use crate::stack::ProxyTarget;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{info, warn};

/// Result of probing the proxy endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// TCP connect succeeded after the given delay
    Reachable(Duration),
    /// Connect failed
    Unreachable(String),
    /// No answer within the timeout
    TimedOut,
    /// Probe handed to the caller's runtime; outcome is only logged
    Deferred,
}

impl ProbeOutcome {
    pub fn is_reachable(&self) -> bool {
        matches!(self, ProbeOutcome::Reachable(_))
    }
}

/// Probe `target`, blocking for at most `timeout`.
///
/// Inside a tokio runtime the probe is spawned onto it instead and
/// `Deferred` is returned immediately.
pub fn probe_proxy(target: &ProxyTarget, timeout: Duration) -> ProbeOutcome {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        let target = target.clone();
        handle.spawn(async move {
            let outcome = probe(&target, timeout).await;
            log_outcome(&target, &outcome);
        });
        return ProbeOutcome::Deferred;
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            warn!("Cannot run proxy probe: {}", e);
            return ProbeOutcome::Unreachable(e.to_string());
        }
    };

    let outcome = runtime.block_on(probe(target, timeout));
    log_outcome(target, &outcome);
    outcome
}

/// Single TCP connect attempt against the proxy
pub async fn probe(target: &ProxyTarget, timeout: Duration) -> ProbeOutcome {
    let started = Instant::now();
    let connect = TcpStream::connect((target.host.as_str(), target.port));

    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(_stream)) => ProbeOutcome::Reachable(started.elapsed()),
        Ok(Err(e)) => ProbeOutcome::Unreachable(e.to_string()),
        Err(_) => ProbeOutcome::TimedOut,
    }
}

fn log_outcome(target: &ProxyTarget, outcome: &ProbeOutcome) {
    match outcome {
        ProbeOutcome::Reachable(rtt) => {
            info!("SOCKS proxy {} reachable ({}ms)", target, rtt.as_millis())
        }
        ProbeOutcome::Unreachable(e) => {
            warn!("SOCKS proxy {} unreachable: {} (continuing anyway)", target, e)
        }
        ProbeOutcome::TimedOut => {
            warn!("SOCKS proxy {} probe timed out (continuing anyway)", target)
        }
        ProbeOutcome::Deferred => {}
    }
}
