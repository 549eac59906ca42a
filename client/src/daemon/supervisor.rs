// Frontend daemon supervisor
//
// Owns the daemon's process lifecycle:
// - at most one live daemon per supervisor
// - unexpected exits are relaunched after a fixed delay, forever unless a
//   retry ceiling is configured
// - exits during shutdown are terminal
// - teardown kills the whole process tree and waits for the exit, bounded
//   by a timeout

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::launch::LaunchCommand;
use super::process::{DaemonExit, ProcessKiller, SpawnedDaemon, Spawner};
use crate::config::Config;
use crate::handshake::ports::HandshakePorts;

/// Daemon lifecycle as seen from the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonLifecycle {
    NotStarted,
    Starting,
    Running,
    /// Exited on its own; a relaunch is pending
    ExitedUnexpectedly,
    ShuttingDown,
    Terminated,
    /// Retry ceiling reached; no further relaunch
    GaveUp,
}

impl std::fmt::Display for DaemonLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DaemonLifecycle::NotStarted => "NotStarted",
            DaemonLifecycle::Starting => "Starting",
            DaemonLifecycle::Running => "Running",
            DaemonLifecycle::ExitedUnexpectedly => "ExitedUnexpectedly",
            DaemonLifecycle::ShuttingDown => "ShuttingDown",
            DaemonLifecycle::Terminated => "Terminated",
            DaemonLifecycle::GaveUp => "GaveUp",
        };
        write!(f, "{}", name)
    }
}

/// Result of a bounded shutdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// No daemon was alive when shutdown began
    NotRunning,
    /// The daemon exited within the timeout
    Exited(DaemonExit),
    /// The timeout elapsed first; the host should exit anyway
    TimedOut,
}

/// Point-in-time view of the supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub lifecycle: DaemonLifecycle,
    pub daemon_started: bool,
    pub shutting_down: bool,
    pub pid: Option<u32>,
    /// Number of launches so far
    pub generation: u64,
    /// Number of unexpected exits so far
    pub restarts: u32,
    pub last_exit: Option<DaemonExit>,
    pub last_exit_at: Option<DateTime<Utc>>,
}

/// The live daemon; replaced wholesale on respawn
struct DaemonHandle {
    generation: u64,
    pid: Option<u32>,
    killer: Arc<dyn ProcessKiller>,
}

struct SupervisorState {
    daemon_started: bool,
    shutting_down: bool,
    lifecycle: DaemonLifecycle,
    handle: Option<DaemonHandle>,
    generation: u64,
    restarts: u32,
    /// Port used by the most recent launch
    last_port: u16,
    last_exit: Option<DaemonExit>,
    last_exit_at: Option<DateTime<Utc>>,
}

impl SupervisorState {
    fn new() -> Self {
        Self {
            daemon_started: false,
            shutting_down: false,
            lifecycle: DaemonLifecycle::NotStarted,
            handle: None,
            generation: 0,
            restarts: 0,
            last_port: 0,
            last_exit: None,
            last_exit_at: None,
        }
    }
}

struct Inner {
    config: Config,
    spawner: Arc<dyn Spawner>,
    ports: Arc<HandshakePorts>,
    state: Mutex<SupervisorState>,
    /// Generation of the most recently exited daemon (0 = none yet)
    exits: watch::Sender<u64>,
}

/// Supervisor for the frontend daemon; cheap to clone, clones share state
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(config: Config, spawner: Arc<dyn Spawner>, ports: Arc<HandshakePorts>) -> Self {
        let (exits, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                config,
                spawner,
                ports,
                state: Mutex::new(SupervisorState::new()),
                exits,
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SupervisorState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Launch the daemon pointed at the client API server on `local_api_port`.
    ///
    /// Returns `false` without spawning when a daemon is already started or
    /// shutdown has begun. Otherwise returns `true`: spawning is fire-and-forget
    /// and daemon health is only observed later through the handshake. A spawn
    /// failure is handled like an immediate exit.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, local_api_port: u16) -> bool {
        let generation = {
            let mut state = self.lock_state();
            if state.daemon_started {
                debug!(port = local_api_port, "Frontend daemon already running; skipping start");
                return false;
            }
            if state.shutting_down {
                debug!(port = local_api_port, "Shutdown in progress; not starting frontend daemon");
                return false;
            }
            state.daemon_started = true;
            state.generation += 1;
            state.last_port = local_api_port;
            state.lifecycle = DaemonLifecycle::Starting;
            state.generation
        };

        let command = LaunchCommand::new(&self.inner.config, local_api_port);
        info!(
            generation,
            port = local_api_port,
            command = %command.display(),
            "Frontend daemon starting"
        );

        match self.inner.spawner.spawn(&command) {
            Ok(spawned) => self.track(generation, spawned),
            Err(e) => {
                error!(generation, error = %e, "Failed to spawn frontend daemon");
                self.handle_exit(
                    generation,
                    DaemonExit::SpawnFailed {
                        message: e.to_string(),
                    },
                );
            }
        }

        true
    }

    fn track(&self, generation: u64, spawned: SpawnedDaemon) {
        let SpawnedDaemon { pid, exit, killer } = spawned;
        let killer: Arc<dyn ProcessKiller> = Arc::from(killer);

        let kill_now = {
            let mut state = self.lock_state();
            state.handle = Some(DaemonHandle {
                generation,
                pid,
                killer: Arc::clone(&killer),
            });
            if state.shutting_down {
                // Shutdown raced the spawn and found no handle to kill
                state.lifecycle = DaemonLifecycle::ShuttingDown;
                true
            } else {
                state.lifecycle = DaemonLifecycle::Running;
                false
            }
        };

        info!(generation, ?pid, "Frontend daemon spawned");

        if kill_now {
            if let Err(e) = killer.kill_tree() {
                warn!(generation, ?pid, error = %e, "Failed to kill frontend daemon");
            }
        }

        let supervisor = self.clone();
        tokio::spawn(async move {
            let exit = exit.await.unwrap_or(DaemonExit::Lost);
            supervisor.handle_exit(generation, exit);
        });
    }

    fn handle_exit(&self, generation: u64, exit: DaemonExit) {
        let restart = {
            let mut state = self.lock_state();
            if state.generation != generation {
                debug!(generation, current = state.generation, "Ignoring exit of a stale daemon");
                return;
            }
            state.handle = None;
            state.last_exit = Some(exit.clone());
            state.last_exit_at = Some(Utc::now());

            if state.shutting_down {
                // Not a crash: the exit we asked for
                state.lifecycle = DaemonLifecycle::Terminated;
                info!(generation, %exit, "Frontend daemon exited during shutdown");
                false
            } else {
                state.daemon_started = false;
                state.restarts += 1;
                warn!(generation, %exit, "Frontend daemon exited with {}", exit);

                match self.inner.config.max_restarts {
                    Some(max) if state.restarts > max => {
                        state.lifecycle = DaemonLifecycle::GaveUp;
                        error!(
                            restarts = state.restarts - 1,
                            "Frontend daemon keeps exiting; giving up after {} restarts", max
                        );
                        false
                    }
                    _ => {
                        state.lifecycle = DaemonLifecycle::ExitedUnexpectedly;
                        true
                    }
                }
            }
        };

        self.inner.exits.send_replace(generation);

        if restart {
            self.schedule_restart();
        }
    }

    fn schedule_restart(&self) {
        let delay = self.inner.config.restart_delay;
        info!(?delay, "Will reattempt to start the frontend daemon");

        let supervisor = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if supervisor.is_shutting_down() {
                debug!("Shutdown began while a restart was pending; not restarting");
                return;
            }
            let port = supervisor.restart_port();
            info!(port, "Attempting to restart the frontend daemon");
            supervisor.start(port);
        });
    }

    /// Latest port recorded by the handshake, else the one used last time
    fn restart_port(&self) -> u16 {
        match self.inner.ports.local_port() {
            0 => self.lock_state().last_port,
            port => port,
        }
    }

    /// Flag the supervisor as shutting down without touching the process.
    ///
    /// From here on exits are terminal and no relaunch happens.
    pub fn begin_shutdown(&self) {
        let mut state = self.lock_state();
        state.shutting_down = true;
        if state.handle.is_some() {
            state.lifecycle = DaemonLifecycle::ShuttingDown;
        }
    }

    /// Give up on the daemon after the host's own deadline passed.
    ///
    /// Leaves the supervisor terminal even when `shutdown` was cut short mid-wait.
    pub fn abandon(&self) {
        let mut state = self.lock_state();
        state.shutting_down = true;
        if state.lifecycle != DaemonLifecycle::Terminated {
            warn!(generation = state.generation, "Abandoning frontend daemon at the shutdown deadline");
            state.lifecycle = DaemonLifecycle::Terminated;
        }
    }

    /// Stop the daemon: flag shutdown, kill its process tree, and wait up to
    /// `timeout` for the exit.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownOutcome {
        let mut exits = self.inner.exits.subscribe();

        let target = {
            let mut state = self.lock_state();
            state.shutting_down = true;
            match &state.handle {
                Some(handle) => {
                    let target = (handle.generation, handle.pid, Arc::clone(&handle.killer));
                    state.lifecycle = DaemonLifecycle::ShuttingDown;
                    Some(target)
                }
                None => {
                    state.lifecycle = DaemonLifecycle::Terminated;
                    None
                }
            }
        };

        let Some((generation, pid, killer)) = target else {
            debug!("No frontend daemon running at shutdown");
            return ShutdownOutcome::NotRunning;
        };

        info!(generation, ?pid, "Stopping frontend daemon");
        if let Err(e) = killer.kill_tree() {
            warn!(generation, ?pid, error = %e, "Failed to kill frontend daemon");
        }

        let waited = tokio::time::timeout(timeout, async {
            exits
                .wait_for(|exited| *exited >= generation)
                .await
                .map(|_| ())
        })
        .await;

        let mut state = self.lock_state();
        state.lifecycle = DaemonLifecycle::Terminated;
        match waited {
            Ok(Ok(())) => {
                info!(generation, "Frontend daemon has exited");
                ShutdownOutcome::Exited(state.last_exit.clone().unwrap_or(DaemonExit::Lost))
            }
            Ok(Err(_)) => ShutdownOutcome::Exited(DaemonExit::Lost),
            Err(_) => {
                warn!(generation, ?timeout, "Frontend daemon did not exit in time");
                ShutdownOutcome::TimedOut
            }
        }
    }

    pub fn is_started(&self) -> bool {
        self.lock_state().daemon_started
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock_state().shutting_down
    }

    pub fn status(&self) -> SupervisorStatus {
        let state = self.lock_state();
        SupervisorStatus {
            lifecycle: state.lifecycle,
            daemon_started: state.daemon_started,
            shutting_down: state.shutting_down,
            pid: state.handle.as_ref().and_then(|h| h.pid),
            generation: state.generation,
            restarts: state.restarts,
            last_exit: state.last_exit.clone(),
            last_exit_at: state.last_exit_at,
        }
    }

    /// Watch the generation number of the most recently exited daemon
    pub fn subscribe_exits(&self) -> watch::Receiver<u64> {
        self.inner.exits.subscribe()
    }
}
