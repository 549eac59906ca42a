//! Test utilities for supervisor and handshake tests
//!
//! Provides polling assertions with proper timeout/retry semantics, plus a
//! scripted `Spawner` so supervisor behaviour can be tested without real
//! processes.

use std::fmt::Display;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::config::{Config, DEFAULT_LOG_FILTER};
use crate::daemon::launch::{BuildMode, LaunchCommand};
use crate::daemon::process::{DaemonExit, ProcessKiller, SpawnedDaemon, Spawner};

/// Assert that an async condition eventually becomes true within a timeout.
///
/// Retries the provided async function at the specified interval until it
/// succeeds or the timeout is reached, instead of guessing a fixed
/// `tokio::time::sleep()`.
///
/// # Arguments
///
/// * `desc` - Human-readable description of what we're waiting for (for error messages)
/// * `timeout` - Maximum time to wait before failing
/// * `interval` - Time between retry attempts
/// * `f` - Async function that returns `Result<T, E>` where `Ok(_)` means success
///
/// # Example
///
/// ```rust,ignore
/// # use std::time::Duration;
/// # async fn example() {
/// use aether_client_lib::test_utils::assert_eventually;
///
/// // Wait up to 3 seconds for the supervisor to relaunch, checking every 100ms
/// assert_eventually(
///     "daemon to be relaunched",
///     Duration::from_secs(3),
///     Duration::from_millis(100),
///     || async {
///         match supervisor.status().generation {
///             g if g >= 2 => Ok(g),
///             g => Err(format!("still at generation {}", g)),
///         }
///     }
/// ).await;
/// # }
/// ```
pub async fn assert_eventually<F, Fut, T, E>(
    desc: &str,
    timeout: Duration,
    interval: Duration,
    mut f: F,
) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let start = std::time::Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return value,
            Err(e) => {
                let elapsed = start.elapsed();
                if elapsed >= timeout {
                    panic!(
                        "Timeout waiting for {}\n\
                         Duration: {:?}\n\
                         Attempts: {}\n\
                         Last error: {}",
                        desc, elapsed, attempt, e
                    );
                }

                tokio::time::sleep(interval).await;
            }
        }
    }
}

/// Variant of `assert_eventually` that takes a simple boolean condition.
///
/// ```rust,ignore
/// assert_eventually_bool(
///     "handshake to complete",
///     Duration::from_secs(2),
///     Duration::from_millis(50),
///     || async { host.ports().ports_exchanged() }
/// ).await;
/// ```
pub async fn assert_eventually_bool<F, Fut>(
    desc: &str,
    timeout: Duration,
    interval: Duration,
    mut f: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = std::time::Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        if f().await {
            return;
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            panic!(
                "Timeout waiting for {}\n\
                 Duration: {:?}\n\
                 Attempts: {}\n\
                 Condition never became true",
                desc, elapsed, attempt
            );
        }

        tokio::time::sleep(interval).await;
    }
}

/// Production-mode config with the stock delays and no retry ceiling
pub fn test_config() -> Config {
    Config {
        build_mode: BuildMode::Production,
        frontend_dir: PathBuf::from("/nonexistent/aether"),
        frontend_binary: None,
        dev_entrypoint: PathBuf::from("../frontend/main.go"),
        restart_delay: Duration::from_secs(10),
        max_restarts: None,
        shutdown_timeout: Duration::from_secs(3),
        log_filter: DEFAULT_LOG_FILTER.to_string(),
        log_format: Default::default(),
    }
}

// ============================================================================
// Scripted spawner
// ============================================================================

type ExitSlot = Arc<Mutex<Option<oneshot::Sender<DaemonExit>>>>;

fn fire(slot: &ExitSlot, exit: DaemonExit) {
    let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(sender) = sender {
        let _ = sender.send(exit);
    }
}

/// Spawner that records launches instead of starting processes
pub struct FakeSpawner {
    launches: mpsc::UnboundedSender<FakeDaemon>,
    next_pid: AtomicU32,
    failures_left: AtomicU32,
    ignore_kills: AtomicBool,
}

impl FakeSpawner {
    pub fn new() -> (Self, SpawnLog) {
        let (tx, rx) = mpsc::unbounded_channel();
        let spawner = Self {
            launches: tx,
            next_pid: AtomicU32::new(4000),
            failures_left: AtomicU32::new(0),
            ignore_kills: AtomicBool::new(false),
        };
        (spawner, SpawnLog { rx })
    }

    /// Make the next `n` spawns fail with `NotFound`
    pub fn fail_next_spawns(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Daemons launched from now on survive `kill_tree`
    pub fn ignore_kills(&self) {
        self.ignore_kills.store(true, Ordering::SeqCst);
    }
}

impl Spawner for FakeSpawner {
    fn spawn(&self, command: &LaunchCommand) -> io::Result<SpawnedDaemon> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", command.program.to_string_lossy()),
            ));
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (exit_tx, exit_rx) = oneshot::channel();
        let exit_slot: ExitSlot = Arc::new(Mutex::new(Some(exit_tx)));
        let killed = Arc::new(AtomicBool::new(false));

        let killer = FakeKiller {
            exit_slot: Arc::clone(&exit_slot),
            killed: Arc::clone(&killed),
            ignore: self.ignore_kills.load(Ordering::SeqCst),
        };

        let _ = self.launches.send(FakeDaemon {
            command: command.clone(),
            pid,
            exit_slot,
            killed,
        });

        Ok(SpawnedDaemon {
            pid: Some(pid),
            exit: exit_rx,
            killer: Box::new(killer),
        })
    }
}

struct FakeKiller {
    exit_slot: ExitSlot,
    killed: Arc<AtomicBool>,
    ignore: bool,
}

impl ProcessKiller for FakeKiller {
    fn kill_tree(&self) -> io::Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        if !self.ignore {
            fire(
                &self.exit_slot,
                DaemonExit::Exited {
                    code: None,
                    signal: Some(9),
                },
            );
        }
        Ok(())
    }
}

/// Receiving end of a `FakeSpawner`: one entry per successful launch
pub struct SpawnLog {
    rx: mpsc::UnboundedReceiver<FakeDaemon>,
}

impl SpawnLog {
    /// Wait for the next launch; pends forever if none comes
    pub async fn next(&mut self) -> FakeDaemon {
        match self.rx.recv().await {
            Some(daemon) => daemon,
            None => std::future::pending().await,
        }
    }

    pub fn try_next(&mut self) -> Option<FakeDaemon> {
        self.rx.try_recv().ok()
    }
}

/// A launch recorded by `FakeSpawner`; the test decides when it exits
pub struct FakeDaemon {
    command: LaunchCommand,
    pid: u32,
    exit_slot: ExitSlot,
    killed: Arc<AtomicBool>,
}

impl FakeDaemon {
    pub fn command(&self) -> &LaunchCommand {
        &self.command
    }

    pub fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    /// Port passed through `--clientport=`
    pub fn port(&self) -> Option<u16> {
        self.command
            .args
            .iter()
            .find_map(|arg| arg.strip_prefix("--clientport="))
            .and_then(|port| port.parse().ok())
    }

    /// Make the daemon exit; later calls are ignored
    pub fn exit(&self, exit: DaemonExit) {
        fire(&self.exit_slot, exit);
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}
