//! Host-facing control surface
//!
//! Every host call lands here. `Core` holds no state of its own beyond the
//! two managers; each method forwards and flattens the result into the
//! string convention the host bindings expect (empty string = success).

use crate::config::{ConfigError, CoreConfig};
use mobtun_relay::{PacketRelay, RelayError, RelayStats, StackFactory};
use mobtun_tun::{Mode, ModeError, ProfileEngine, ProxyEngine, SessionError, SessionManager, TunFactory};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Version string reported to the host
pub const VERSION: &str = concat!("mobtun/", env!("CARGO_PKG_VERSION"));

/// Errors surfaced by the facade
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The engine is up but the interface could not be bound
    #[error("TUN Error: {0}")]
    Tunnel(#[source] SessionError),

    #[error(transparent)]
    Mode(#[from] ModeError),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

/// Lifecycle facade over the session manager and the packet relay
pub struct Core {
    config: CoreConfig,
    session: SessionManager,
    relay: PacketRelay,
}

impl Core {
    /// Build a core over the given collaborators
    pub fn new(
        config: CoreConfig,
        engine: Arc<dyn ProxyEngine>,
        tun_factory: Arc<dyn TunFactory>,
        stack_factory: Arc<dyn StackFactory>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let session = SessionManager::new(engine, tun_factory, config.tun_settings());
        let relay = PacketRelay::new(stack_factory, config.relay_config());

        Ok(Self {
            config,
            session,
            relay,
        })
    }

    /// Build a core driven by the built-in YAML profile engine
    pub fn with_profile_engine(
        config: CoreConfig,
        tun_factory: Arc<dyn TunFactory>,
        stack_factory: Arc<dyn StackFactory>,
    ) -> Result<Self, ConfigError> {
        Self::new(config, Arc::new(ProfileEngine::new()), tun_factory, stack_factory)
    }

    /// Install the global log subscriber at the configured `log_level`.
    ///
    /// Returns `false` if the host already installed one.
    pub fn init_logging(&self) -> bool {
        crate::logging::init(&self.config.log_level)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn relay(&self) -> &PacketRelay {
        &self.relay
    }

    /// Start the session and, if a descriptor is given, bind the tunnel.
    ///
    /// Descriptors `<= 0` mean the host has no interface yet. A bind
    /// failure is reported as `CoreError::Tunnel` but the session stays
    /// running so the host can retry with [`Core::try_attach_tunnel`].
    pub fn try_start(
        &self,
        home_dir: impl AsRef<Path>,
        config_text: &str,
        tun_fd: Option<i32>,
    ) -> Result<(), CoreError> {
        let ticket = self.session.start_session(home_dir, config_text)?;

        match tun_fd.filter(|fd| *fd > 0) {
            Some(fd) => {
                self.session
                    .attach_default_tunnel(ticket, fd)
                    .map_err(CoreError::Tunnel)?;
                info!("Core fully started (TUN fd {})", fd);
            }
            None => info!("Core started without TUN"),
        }

        Ok(())
    }

    /// String form of [`Core::try_start`]
    pub fn start(&self, home_dir: impl AsRef<Path>, config_text: &str, tun_fd: Option<i32>) -> String {
        flatten(self.try_start(home_dir, config_text, tun_fd))
    }

    /// Stop the session and release the tunnel. Always succeeds.
    pub fn stop(&self) -> String {
        self.session.stop_session();
        String::new()
    }

    /// Whether a session is running
    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    /// Bind (or rebind) the tunnel of the running session
    pub fn try_attach_tunnel(
        &self,
        tun_fd: i32,
        stack: &str,
        addresses: &str,
        dns: &str,
    ) -> Result<(), CoreError> {
        self.session
            .attach_tunnel(tun_fd, stack, addresses, dns)
            .map_err(CoreError::Tunnel)
    }

    /// String form of [`Core::try_attach_tunnel`]
    pub fn attach_tunnel(&self, tun_fd: i32, stack: &str, addresses: &str, dns: &str) -> String {
        flatten(self.try_attach_tunnel(tun_fd, stack, addresses, dns))
    }

    /// Descriptor of the bound tunnel, if any
    pub fn tunnel_descriptor(&self) -> Option<i32> {
        self.session.binding_descriptor()
    }

    /// Switch routing mode; an unknown name leaves the mode unchanged
    pub fn try_set_mode(&self, mode: &str) -> Result<Mode, CoreError> {
        let mode = mode.parse::<Mode>().inspect_err(|e| error!("{}", e))?;
        self.session.set_mode(mode);
        Ok(mode)
    }

    /// String form of [`Core::try_set_mode`]
    pub fn set_mode(&self, mode: &str) -> String {
        flatten(self.try_set_mode(mode).map(|_| ()))
    }

    /// Current routing mode, lowercase
    pub fn get_mode(&self) -> String {
        self.session.mode().name().to_string()
    }

    pub fn version(&self) -> String {
        VERSION.to_string()
    }

    /// Start relaying packets through the SOCKS5 proxy at `host:port`
    pub fn relay_start(&self, host: &str, port: u16, mtu: u32) -> String {
        flatten(self.relay.start(host, port, mtu).map_err(|e| {
            error!("Failed to start tun2socks: {}", e);
            CoreError::from(e)
        }))
    }

    /// Stop the relay. Always succeeds.
    pub fn relay_stop(&self) -> String {
        self.relay.stop();
        String::new()
    }

    pub fn relay_is_running(&self) -> bool {
        self.relay.is_running()
    }

    /// Hand one packet read from the tunnel to the relay
    pub fn feed_inbound_packet(&self, packet: &[u8]) -> bool {
        self.relay.feed_inbound(packet).is_ok()
    }

    /// Copy the next packet for the tunnel into `buf`.
    ///
    /// Returns the packet length, or 0 when nothing was delivered.
    pub fn poll_outbound_packet(&self, buf: &mut [u8]) -> usize {
        match self.relay.poll_outbound(buf) {
            Ok(Some(len)) => len,
            Ok(None) | Err(RelayError::NotRunning) => 0,
            Err(e) => {
                warn!("{}", e);
                0
            }
        }
    }

    pub fn relay_stats(&self) -> RelayStats {
        self.relay.stats()
    }

    /// Relay counters as a JSON object
    pub fn relay_stats_json(&self) -> String {
        serde_json::to_string(&self.relay.stats()).unwrap_or_else(|e| {
            warn!("Failed to encode relay stats: {}", e);
            "{}".to_string()
        })
    }
}

/// Host convention: empty string on success, message otherwise
fn flatten<T>(result: Result<(), T>) -> String
where
    T: std::fmt::Display,
{
    match result {
        Ok(()) => String::new(),
        Err(e) => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mobtun_relay::{NetStack, OutputFn, ProxyTarget};
    use mobtun_tun::{EngineError, TunHandle, TunOptions};
    use parking_lot::Mutex;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const PROFILE: &str = "mode: rule\nmixed-port: 7890\nproxies: []\nrules:\n  - MATCH,DIRECT\n";

    #[derive(Default)]
    struct FakeTun {
        opened: Mutex<Vec<TunOptions>>,
        fail: AtomicBool,
    }

    struct FakeHandle(i32);

    impl TunHandle for FakeHandle {
        fn descriptor(&self) -> i32 {
            self.0
        }

        fn close(&mut self) {}
    }

    impl TunFactory for FakeTun {
        fn create(&self, options: &TunOptions) -> Result<Box<dyn TunHandle>, EngineError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(EngineError::Tun("descriptor rejected".into()));
            }
            self.opened.lock().push(options.clone());
            Ok(Box::new(FakeHandle(options.descriptor)))
        }
    }

    /// Reflects every inbound packet straight back out
    #[derive(Default)]
    struct LoopbackStack {
        output: Mutex<Option<OutputFn>>,
    }

    impl NetStack for LoopbackStack {
        fn register_stream_handler(&self, _proxy: &ProxyTarget) -> io::Result<()> {
            Ok(())
        }

        fn register_datagram_handler(&self, _proxy: &ProxyTarget, _idle: Duration) -> io::Result<()> {
            Ok(())
        }

        fn register_output(&self, output: OutputFn) {
            *self.output.lock() = Some(output);
        }

        fn write(&self, packet: &[u8]) -> io::Result<usize> {
            if let Some(output) = self.output.lock().as_ref() {
                output(packet);
            }
            Ok(packet.len())
        }

        fn close(&self) {
            self.output.lock().take();
        }
    }

    struct LoopbackFactory;

    impl StackFactory for LoopbackFactory {
        fn create(&self, _mtu: u32) -> io::Result<Arc<dyn NetStack>> {
            Ok(Arc::new(LoopbackStack::default()))
        }
    }

    fn test_config() -> CoreConfig {
        let mut config = CoreConfig::default();
        config.relay.queue_capacity = 4;
        config.relay.probe_timeout_ms = 200;
        config
    }

    fn core() -> (Core, Arc<FakeTun>) {
        let tun = Arc::new(FakeTun::default());
        let core = Core::with_profile_engine(test_config(), tun.clone(), Arc::new(LoopbackFactory)).unwrap();
        (core, tun)
    }

    #[test]
    fn test_start_without_tun() {
        let home = tempfile::tempdir().unwrap();
        let (core, tun) = core();

        assert_eq!(core.start(home.path(), PROFILE, None), "");
        assert!(core.is_running());
        assert_eq!(core.get_mode(), "rule");
        assert!(tun.opened.lock().is_empty());
        assert!(home.path().join(mobtun_tun::CONFIG_FILE_NAME).exists());
    }

    #[test]
    fn test_start_with_tun_uses_defaults() {
        let home = tempfile::tempdir().unwrap();
        let (core, tun) = core();

        assert_eq!(core.start(home.path(), PROFILE, Some(42)), "");
        assert_eq!(core.tunnel_descriptor(), Some(42));

        let opened = tun.opened.lock();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].mtu, 9000);
        assert_eq!(opened[0].dns_hijack, vec!["1.1.1.1:53", "8.8.8.8:53"]);
    }

    #[test]
    fn test_non_positive_descriptor_means_no_tun() {
        let home = tempfile::tempdir().unwrap();
        let (core, tun) = core();

        assert_eq!(core.start(home.path(), PROFILE, Some(0)), "");
        assert_eq!(core.tunnel_descriptor(), None);
        core.stop();

        assert_eq!(core.start(home.path(), PROFILE, Some(-1)), "");
        assert!(tun.opened.lock().is_empty());
    }

    #[test]
    fn test_second_start_rejected() {
        let home = tempfile::tempdir().unwrap();
        let (core, _) = core();

        assert_eq!(core.start(home.path(), PROFILE, None), "");
        assert_eq!(core.start(home.path(), PROFILE, None), "Core already running");
        assert!(core.is_running());
    }

    #[test]
    fn test_failed_parse_can_be_retried() {
        let home = tempfile::tempdir().unwrap();
        let (core, _) = core();

        let message = core.start(home.path(), "- not\n- a mapping\n", None);
        assert!(message.starts_with("Hub Parse Error: "), "{}", message);
        assert!(!core.is_running());

        assert_eq!(core.start(home.path(), PROFILE, None), "");
        assert!(core.is_running());
    }

    #[test]
    fn test_unwritable_home_reported() {
        let home = tempfile::tempdir().unwrap();
        let (core, _) = core();

        let message = core.start(home.path().join("missing"), PROFILE, None);
        assert!(message.starts_with("Write Config Error: "), "{}", message);
        assert!(!core.is_running());
    }

    #[test]
    fn test_tun_failure_keeps_session() {
        let home = tempfile::tempdir().unwrap();
        let (core, tun) = core();
        tun.fail.store(true, Ordering::SeqCst);

        let message = core.start(home.path(), PROFILE, Some(7));
        assert!(message.starts_with("TUN Error: "), "{}", message);
        assert!(core.is_running());
        assert_eq!(core.tunnel_descriptor(), None);

        tun.fail.store(false, Ordering::SeqCst);
        assert_eq!(core.attach_tunnel(7, "system", "10.0.0.1/24", "9.9.9.9"), "");
        assert_eq!(core.tunnel_descriptor(), Some(7));
    }

    #[test]
    fn test_attach_requires_session() {
        let (core, _) = core();

        let message = core.attach_tunnel(7, "gvisor", "10.0.0.1/24", "");
        assert!(message.starts_with("TUN Error: "), "{}", message);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let home = tempfile::tempdir().unwrap();
        let (core, _) = core();

        assert_eq!(core.stop(), "");
        assert_eq!(core.start(home.path(), PROFILE, Some(3)), "");
        assert_eq!(core.stop(), "");
        assert_eq!(core.stop(), "");
        assert!(!core.is_running());
        assert_eq!(core.tunnel_descriptor(), None);
    }

    #[test]
    fn test_mode_round_trip() {
        let (core, _) = core();

        assert_eq!(core.set_mode("Global"), "");
        assert_eq!(core.get_mode(), "global");

        let message = core.set_mode("bogus");
        assert!(message.starts_with("Invalid mode: bogus"), "{}", message);
        assert_eq!(core.get_mode(), "global");
    }

    #[test]
    fn test_init_logging_uses_config_level() {
        let mut config = test_config();
        config.log_level = "debug".into();
        let core = Core::with_profile_engine(config, Arc::new(FakeTun::default()), Arc::new(LoopbackFactory)).unwrap();

        core.init_logging();
        assert!(!core.init_logging());
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(tracing::enabled!(tracing::Level::DEBUG));
        }
    }

    #[test]
    fn test_version() {
        let (core, _) = core();
        assert!(core.version().starts_with("mobtun/"));
    }

    #[test]
    fn test_relay_roundtrip() {
        let (core, _) = core();

        assert!(!core.feed_inbound_packet(&[1, 2, 3]));
        assert_eq!(core.relay_start("127.0.0.1", 1, 1500), "");
        assert_eq!(core.relay_start("127.0.0.1", 1, 1500), "tun2socks already running");
        assert!(core.relay_is_running());

        assert!(core.feed_inbound_packet(&[1, 2, 3]));
        let mut buf = [0u8; 64];
        assert_eq!(core.poll_outbound_packet(&mut buf), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(core.poll_outbound_packet(&mut buf), 0);

        let stats: serde_json::Value = serde_json::from_str(&core.relay_stats_json()).unwrap();
        assert_eq!(stats["inbound_packets"], 1);
        assert_eq!(stats["outbound_packets"], 1);

        assert_eq!(core.relay_stop(), "");
        assert_eq!(core.relay_stop(), "");
        assert!(!core.relay_is_running());
        assert_eq!(core.poll_outbound_packet(&mut buf), 0);
    }

    #[test]
    fn test_relay_drops_when_full_and_oversized() {
        let (core, _) = core();
        assert_eq!(core.relay_start("127.0.0.1", 1, 1500), "");

        for i in 0..6u8 {
            assert!(core.feed_inbound_packet(&[i; 8]));
        }
        assert_eq!(core.relay_stats().dropped_packets, 2);

        let mut small = [0u8; 4];
        assert_eq!(core.poll_outbound_packet(&mut small), 0);
        assert_eq!(core.relay_stats().oversized_packets, 1);

        let mut buf = [0u8; 16];
        assert_eq!(core.poll_outbound_packet(&mut buf), 8);
        assert_eq!(buf[0], 1);
    }

    #[test]
    fn test_relay_independent_of_session() {
        let home = tempfile::tempdir().unwrap();
        let (core, _) = core();

        assert_eq!(core.start(home.path(), PROFILE, Some(5)), "");
        assert_eq!(core.relay_start("127.0.0.1", 1, 1500), "");
        core.stop();

        assert!(core.relay_is_running());
        assert!(core.feed_inbound_packet(&[9]));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = CoreConfig::default();
        config.relay.queue_capacity = 0;

        let result = Core::with_profile_engine(config, Arc::new(FakeTun::default()), Arc::new(LoopbackFactory));
        assert!(matches!(result, Err(ConfigError::InvalidCapacity)));
    }
}
