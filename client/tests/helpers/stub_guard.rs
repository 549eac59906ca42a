use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// One "<pid> <port>" line written by the stub daemon once it is ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StubLaunch {
    pub pid: u32,
    pub api_port: u16,
}

pub fn parse_trace(content: &str) -> Vec<StubLaunch> {
    content
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let pid = parts.next()?.parse().ok()?;
            let api_port = parts.next()?.parse().ok()?;
            Some(StubLaunch { pid, api_port })
        })
        .collect()
}

pub fn stub_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_aether-frontend-stub"))
}

/// Kills every stub listed in the trace file on drop, so a failed test leaves no orphans
pub struct StubGuard {
    trace_file: PathBuf,
}

impl StubGuard {
    pub fn new(trace_file: &Path) -> Self {
        Self {
            trace_file: trace_file.to_path_buf(),
        }
    }
}

impl Drop for StubGuard {
    fn drop(&mut self) {
        let Ok(content) = std::fs::read_to_string(&self.trace_file) else {
            return;
        };
        for launch in parse_trace(&content) {
            if is_process_running(launch.pid) {
                kill_pid(launch.pid);
            }
        }
    }
}

#[cfg(unix)]
pub fn kill_pid(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
pub fn kill_pid(_pid: u32) {}

#[cfg(unix)]
pub fn is_process_running(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
pub fn is_process_running(_pid: u32) -> bool {
    false
}

/// Wait for a process to disappear, used to check that no orphans remain
pub async fn wait_for_process_exit(pid: u32, timeout: Duration) -> bool {
    let start = Instant::now();
    while is_process_running(pid) && start.elapsed() < timeout {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    !is_process_running(pid)
}
