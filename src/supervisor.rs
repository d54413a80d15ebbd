//! Engine process lifecycle.
//!
//! `Stopped → Starting → Connecting → Ready`, with any state dropping to `Crashed`
//! when the process is found dead and `Crashed → Stopped` through teardown.

use crate::config::Config;
use crate::engine::process::{EngineProcess, Launcher};
use crate::engine::{Broker, ConnectionDescriptor, Desktop, ProcessStatus};
use crate::error::ConversionError;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Stopped,
    Starting,
    Connecting,
    Ready,
    Crashed,
}

/// How long the supervisor keeps trying to reach a freshly started engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: Duration,
    /// 0 means no limit.
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            backoff: Duration::from_millis(cfg.connect.backoff_ms),
            max_attempts: cfg.connect.max_attempts,
        }
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts > 0 && attempts >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(1),
            max_attempts: 60,
        }
    }
}

/// Handle to the engine desktop, tied to one engine process.
///
/// Cheap to clone. The generation changes every time a new connection is made, so
/// handles from before a restart compare unequal to current ones.
#[derive(Clone)]
pub struct Connection {
    generation: u64,
    desktop: Arc<Mutex<Box<dyn Desktop>>>,
}

impl Connection {
    pub fn new(generation: u64, desktop: Box<dyn Desktop>) -> Self {
        Self {
            generation,
            desktop: Arc::new(Mutex::new(desktop)),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn desktop(&self) -> Arc<Mutex<Box<dyn Desktop>>> {
        Arc::clone(&self.desktop)
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.generation == other.generation && Arc::ptr_eq(&self.desktop, &other.desktop)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

pub struct Supervisor {
    launcher: Arc<dyn Launcher>,
    broker: Arc<dyn Broker>,
    descriptor: ConnectionDescriptor,
    policy: RetryPolicy,
    process: Option<Box<dyn EngineProcess>>,
    connection: Option<Connection>,
    state: EngineState,
    generation: u64,
}

impl Supervisor {
    pub fn new(
        launcher: Arc<dyn Launcher>,
        broker: Arc<dyn Broker>,
        descriptor: ConnectionDescriptor,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            launcher,
            broker,
            descriptor,
            policy,
            process: None,
            connection: None,
            state: EngineState::Stopped,
            generation: 0,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.pid())
    }

    /// Whether the engine process exists and has not exited.
    ///
    /// Marks the supervisor `Crashed` when it finds the process gone.
    pub fn is_alive(&mut self) -> bool {
        let Some(process) = self.process.as_mut() else {
            return false;
        };
        match process.status() {
            Ok(ProcessStatus::Running) => true,
            Ok(ProcessStatus::Exited(code)) => {
                warn!(?code, "engine process exited");
                self.state = EngineState::Crashed;
                false
            }
            Err(err) => {
                warn!("polling engine process: {err}");
                self.state = EngineState::Crashed;
                false
            }
        }
    }

    /// Bring the engine to `Ready` and return its connection.
    ///
    /// Restarts the engine if it is missing or dead. A healthy, connected engine is
    /// returned as is.
    pub async fn ensure(&mut self) -> Result<Connection, ConversionError> {
        if !self.is_alive() {
            if self.process.is_some() {
                info!("engine not running; resetting");
            }
            self.shutdown().await;
            self.start()?;
        }

        if self.state == EngineState::Ready {
            if let Some(conn) = &self.connection {
                return Ok(conn.clone());
            }
        }

        self.state = EngineState::Connecting;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            debug!(attempt = attempts, "connecting to engine at {}", self.descriptor);
            let broker = Arc::clone(&self.broker);
            let descriptor = self.descriptor.clone();
            let desktop = tokio::task::spawn_blocking(move || broker.connect(&descriptor))
                .await
                .map_err(|err| ConversionError::Process(format!("connect task failed: {err}")))?;

            if let Some(desktop) = desktop {
                self.generation += 1;
                let conn = Connection::new(self.generation, desktop);
                self.connection = Some(conn.clone());
                self.state = EngineState::Ready;
                info!(
                    generation = self.generation,
                    attempts, "engine connection established"
                );
                return Ok(conn);
            }

            if !self.is_alive() {
                self.shutdown().await;
                return Err(ConversionError::Process(
                    "engine exited while waiting for a connection".to_string(),
                ));
            }

            if self.policy.exhausted(attempts) {
                warn!(attempts, "giving up on engine connection");
                return Err(ConversionError::Connection { attempts });
            }

            tokio::time::sleep(self.policy.backoff).await;
        }
    }

    fn start(&mut self) -> Result<(), ConversionError> {
        self.state = EngineState::Starting;
        info!("starting headless engine on {}", self.descriptor);
        match self.launcher.launch(&self.descriptor) {
            Ok(process) => {
                self.process = Some(process);
                Ok(())
            }
            Err(err) => {
                self.state = EngineState::Stopped;
                Err(err)
            }
        }
    }

    /// Drop the connection and stop the engine, off the async threads.
    ///
    /// Safe to call in any state.
    pub async fn shutdown(&mut self) {
        let (conn, process) = self.release();
        if conn.is_none() && process.is_none() {
            return;
        }
        if let Err(err) = tokio::task::spawn_blocking(move || stop_engine(conn, process)).await {
            warn!("engine shutdown task failed: {err}");
        }
    }

    /// Blocking form of [`Supervisor::shutdown`]; also what `Drop` runs.
    pub fn teardown(&mut self) {
        let (conn, process) = self.release();
        stop_engine(conn, process);
    }

    fn release(&mut self) -> (Option<Connection>, Option<Box<dyn EngineProcess>>) {
        self.state = EngineState::Stopped;
        (self.connection.take(), self.process.take())
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Terminate the desktop if nobody holds it, then kill the process if it still runs.
fn stop_engine(conn: Option<Connection>, process: Option<Box<dyn EngineProcess>>) {
    if let Some(conn) = conn {
        info!(generation = conn.generation, "closing engine desktop");
        match conn.desktop.try_lock() {
            Ok(mut desktop) => {
                if let Err(err) = desktop.terminate() {
                    warn!("failed to terminate engine desktop: {err}");
                }
            }
            Err(TryLockError::WouldBlock) => {
                warn!("engine desktop busy with an abandoned call; skipping clean shutdown");
            }
            Err(TryLockError::Poisoned(_)) => {
                warn!("engine desktop handle poisoned; skipping clean shutdown");
            }
        };
    }

    if let Some(mut process) = process {
        match process.status() {
            Ok(ProcessStatus::Running) | Err(_) => {
                info!(pid = process.pid(), "killing engine process");
                if let Err(err) = process.kill() {
                    warn!("failed to kill engine process: {err}");
                }
            }
            Ok(ProcessStatus::Exited(_)) => {}
        }
    }
}
