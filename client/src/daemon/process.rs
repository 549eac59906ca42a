// Child process plumbing for the frontend daemon
//
// The supervisor only sees the `Spawner` / `ProcessKiller` seams. The system
// implementation wraps tokio's child process support:
// - stdout/stderr are echoed to the log line by line
// - exit status is delivered on a oneshot channel
// - the whole process tree can be killed (`go run` forks the real daemon)

use std::fmt;
use std::io;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::launch::LaunchCommand;

const DAEMON_OUTPUT_TARGET: &str = "aether_client_lib::daemon::output";

/// How a daemon process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonExit {
    /// The process ran and exited; on Unix `signal` is set when it was killed by one
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// The executable could not be launched at all
    SpawnFailed { message: String },
    /// The exit could not be observed (waiting on the child failed)
    Lost,
}

impl DaemonExit {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        DaemonExit::Exited {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for DaemonExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonExit::Exited { code, signal } => {
                let code = code.map_or("none".to_string(), |c| c.to_string());
                let signal = signal.map_or("none".to_string(), |s| s.to_string());
                write!(f, "code {} and signal {}", code, signal)
            }
            DaemonExit::SpawnFailed { message } => write!(f, "spawn failure: {}", message),
            DaemonExit::Lost => write!(f, "unobserved exit"),
        }
    }
}

/// Kills a spawned daemon together with its descendants
pub trait ProcessKiller: Send + Sync {
    fn kill_tree(&self) -> io::Result<()>;
}

/// A launched daemon as seen by the supervisor
pub struct SpawnedDaemon {
    pub pid: Option<u32>,
    /// Resolves once when the process exits
    pub exit: oneshot::Receiver<DaemonExit>,
    pub killer: Box<dyn ProcessKiller>,
}

impl fmt::Debug for SpawnedDaemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnedDaemon").field("pid", &self.pid).finish()
    }
}

/// Launches daemon processes
pub trait Spawner: Send + Sync {
    /// Start the process described by `command`.
    ///
    /// Called from within a Tokio runtime; must not block.
    fn spawn(&self, command: &LaunchCommand) -> io::Result<SpawnedDaemon>;
}

/// Spawner backed by real OS processes
#[derive(Debug, Default, Clone)]
pub struct SystemSpawner;

impl SystemSpawner {
    pub fn new() -> Self {
        Self
    }
}

impl Spawner for SystemSpawner {
    fn spawn(&self, command: &LaunchCommand) -> io::Result<SpawnedDaemon> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group so the daemon and anything it forks die together
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn()?;
        let pid = child.id();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(echo_lines(stdout, pid, false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(echo_lines(stderr, pid, true));
        }

        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => DaemonExit::from_status(status),
                Err(e) => {
                    warn!(?pid, error = %e, "Failed to wait on frontend daemon");
                    DaemonExit::Lost
                }
            };
            let _ = exit_tx.send(exit);
        });

        Ok(SpawnedDaemon {
            pid,
            exit: exit_rx,
            killer: Box::new(TreeKiller { pid }),
        })
    }
}

/// Echo daemon output to the log; no parsing
async fn echo_lines<R>(stream: R, pid: Option<u32>, is_stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if is_stderr => warn!(target: DAEMON_OUTPUT_TARGET, ?pid, "{}", line),
            Ok(Some(line)) => info!(target: DAEMON_OUTPUT_TARGET, ?pid, "{}", line),
            Ok(None) => break,
            Err(e) => {
                debug!(?pid, error = %e, "Daemon output stream closed");
                break;
            }
        }
    }
}

/// Kills the process group (Unix) or process tree (Windows) rooted at `pid`
#[derive(Debug, Clone, Copy)]
pub struct TreeKiller {
    pid: Option<u32>,
}

impl TreeKiller {
    pub fn new(pid: Option<u32>) -> Self {
        Self { pid }
    }
}

impl ProcessKiller for TreeKiller {
    fn kill_tree(&self) -> io::Result<()> {
        let Some(pid) = self.pid else {
            // Child already reaped before we could read its pid
            return Ok(());
        };
        kill_process_tree(pid)
    }
}

#[cfg(unix)]
fn kill_process_tree(pid: u32) -> io::Result<()> {
    let pgid = pid as libc::pid_t;
    // Negative pid targets the whole process group the daemon leads
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        // Already gone
        return Ok(());
    }
    Err(err)
}

#[cfg(windows)]
fn kill_process_tree(pid: u32) -> io::Result<()> {
    let status = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("taskkill exited with {}", status),
        ))
    }
}

#[cfg(not(any(unix, windows)))]
fn kill_process_tree(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process tree kill is not supported on this platform",
    ))
}
