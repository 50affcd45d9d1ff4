//! Tunnel Session Manager
//!
//! Owns the single active session and its (optional) TUN binding.
//!
//! # Locking
//!
//! ```text
//! session lock  ── running flag, home dir, generation
//!      ▲
//!      │ (brief, never across I/O)
//! binding lock  ── Option<TunnelBinding>, close-then-open swap
//! ```
//!
//! Lock order is always binding → session. `start_session` holds only the
//! session lock (config write + engine handoff); mode and status queries
//! never touch the binding lock, so a TUN rebind cannot stall them.

use crate::engine::{EngineError, Mode, ProxyEngine, TunFactory, TunHandle};
use crate::planner::{self, PlanError, StackKind, StackPolicy, TunOptions};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

/// File the raw profile is persisted to inside the home directory
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// TUN parameters used when a start call only supplies a descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunSettings {
    /// Stack name (resolved with `policy`)
    pub stack: String,
    /// Comma-separated interface prefixes
    pub address: String,
    /// Comma-separated DNS hijack servers
    pub dns: String,
    /// Interface MTU
    pub mtu: u32,
    /// Unknown stack name handling
    pub policy: StackPolicy,
}

impl Default for TunSettings {
    fn default() -> Self {
        Self {
            stack: StackKind::Gvisor.to_string(),
            address: "172.19.0.1/30".into(),
            dns: "1.1.1.1,8.8.8.8".into(),
            mtu: 9000,
            policy: StackPolicy::default(),
        }
    }
}

/// Proof of a successful start, used to attach that session's tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTicket {
    generation: u64,
}

#[derive(Debug, Default)]
struct SessionState {
    running: bool,
    home_dir: Option<PathBuf>,
    /// Bumped on every successful start
    generation: u64,
}

/// An open TUN interface attached to the current session
pub struct TunnelBinding {
    handle: Box<dyn TunHandle>,
    options: TunOptions,
}

impl TunnelBinding {
    /// Options the interface was created with
    pub fn options(&self) -> &TunOptions {
        &self.options
    }

    /// Release the interface
    fn close(self) {
        debug!("Closing TUN binding on FD {}", self.handle.descriptor());
        drop(self);
    }
}

impl Drop for TunnelBinding {
    fn drop(&mut self) {
        self.handle.close();
    }
}

/// Tunnel session manager
///
/// Enforces at most one running session and at most one open binding.
pub struct SessionManager {
    engine: Arc<dyn ProxyEngine>,
    tun_factory: Arc<dyn TunFactory>,
    settings: TunSettings,
    session: Mutex<SessionState>,
    binding: Mutex<Option<TunnelBinding>>,
}

impl SessionManager {
    /// Create a manager over the given collaborators
    pub fn new(
        engine: Arc<dyn ProxyEngine>,
        tun_factory: Arc<dyn TunFactory>,
        settings: TunSettings,
    ) -> Self {
        Self {
            engine,
            tun_factory,
            settings,
            session: Mutex::new(SessionState::default()),
            binding: Mutex::new(None),
        }
    }

    /// Default TUN settings
    pub fn settings(&self) -> &TunSettings {
        &self.settings
    }

    /// Start a session: persist the profile, then hand it to the engine.
    ///
    /// The running flag only flips once both steps succeed, so any failure
    /// leaves the manager exactly as it was.
    pub fn start_session(
        &self,
        home_dir: impl AsRef<Path>,
        config_text: &str,
    ) -> Result<SessionTicket, SessionError> {
        let home_dir = home_dir.as_ref();
        let mut session = self.session.lock();

        if session.running {
            return Err(SessionError::AlreadyRunning);
        }

        let config_path = home_dir.join(CONFIG_FILE_NAME);
        fs::write(&config_path, config_text).map_err(|e| {
            error!("Failed to write {}: {}", config_path.display(), e);
            SessionError::ConfigWriteFailed(e)
        })?;

        self.engine.parse_config(config_text.as_bytes()).map_err(|e| {
            error!("Profile rejected by engine: {}", e);
            SessionError::ConfigParseFailed(e)
        })?;

        session.running = true;
        session.generation += 1;
        session.home_dir = Some(home_dir.to_path_buf());

        info!(
            "Session started (home: {}, mode: {})",
            home_dir.display(),
            self.engine.mode()
        );

        Ok(SessionTicket {
            generation: session.generation,
        })
    }

    /// Attach the tunnel for the session identified by `ticket`, using the
    /// default TUN settings.
    ///
    /// Fails with `SessionNotRunning` if that session has since been stopped
    /// or replaced.
    pub fn attach_default_tunnel(
        &self,
        ticket: SessionTicket,
        descriptor: i32,
    ) -> Result<(), SessionError> {
        let plan = planner::plan(
            &self.settings.stack,
            &self.settings.address,
            &self.settings.dns,
            self.settings.policy,
        )?;

        self.bind(plan.into_options(descriptor, self.settings.mtu), Some(ticket))
    }

    /// Attach (or replace) the tunnel of the running session.
    ///
    /// Parameters are planned before any binding is touched, so an invalid
    /// address list leaves the current binding in place.
    pub fn attach_tunnel(
        &self,
        descriptor: i32,
        stack: &str,
        addresses: &str,
        dns: &str,
    ) -> Result<(), SessionError> {
        let plan = planner::plan(stack, addresses, dns, self.settings.policy)?;
        self.bind(plan.into_options(descriptor, self.settings.mtu), None)
    }

    fn bind(&self, options: TunOptions, ticket: Option<SessionTicket>) -> Result<(), SessionError> {
        let mut binding = self.binding.lock();

        {
            let session = self.session.lock();
            let stale = ticket.is_some_and(|t| t.generation != session.generation);
            if !session.running || stale {
                return Err(SessionError::SessionNotRunning);
            }
        }

        // Old interface must be released before the new descriptor is bound
        if let Some(old) = binding.take() {
            old.close();
        }

        info!("Starting TUN: {}", options);

        let handle = self.tun_factory.create(&options).map_err(|e| {
            error!("Failed to create TUN listener: {}", e);
            SessionError::TunnelBindFailed(e)
        })?;

        *binding = Some(TunnelBinding { handle, options });
        info!("TUN listener started");
        Ok(())
    }

    /// Stop the session. Safe to call at any time, any number of times.
    pub fn stop_session(&self) {
        let mut binding = self.binding.lock();

        if let Some(old) = binding.take() {
            old.close();
            info!("TUN listener closed");
        }

        let mut session = self.session.lock();
        if session.running {
            session.running = false;
            session.home_dir = None;
            info!("Session stopped");
        }
    }

    /// Whether a session is running
    pub fn is_running(&self) -> bool {
        self.session.lock().running
    }

    /// Home directory of the running session
    pub fn home_dir(&self) -> Option<PathBuf> {
        self.session.lock().home_dir.clone()
    }

    /// Descriptor of the open binding, if any
    pub fn binding_descriptor(&self) -> Option<i32> {
        self.binding.lock().as_ref().map(|b| b.options.descriptor)
    }

    /// Options of the open binding, if any
    pub fn binding_options(&self) -> Option<TunOptions> {
        self.binding.lock().as_ref().map(|b| b.options().clone())
    }

    /// Active routing mode
    pub fn mode(&self) -> Mode {
        self.engine.mode()
    }

    /// Switch routing mode
    pub fn set_mode(&self, mode: Mode) {
        self.engine.set_mode(mode);
        info!("Mode changed to: {}", mode);
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop_session();
    }
}

/// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Core already running")]
    AlreadyRunning,

    #[error("Write Config Error: {0}")]
    ConfigWriteFailed(#[source] std::io::Error),

    #[error("Hub Parse Error: {0}")]
    ConfigParseFailed(#[source] EngineError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("Failed to create TUN listener: {0}")]
    TunnelBindFailed(#[source] EngineError),

    #[error("Session not running")]
    SessionNotRunning,
}
