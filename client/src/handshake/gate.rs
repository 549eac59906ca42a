// Readiness gate: defer work until the handshake has completed

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::ports::HandshakePorts;

/// Defers actions until the ports have been exchanged.
///
/// Waiting is a notification on the handshake state rather than a poll loop,
/// so a deferred action runs as soon as the exchange completes.
#[derive(Clone)]
pub struct ReadinessGate {
    ready_rx: watch::Receiver<bool>,
}

impl ReadinessGate {
    pub fn new(ports: &HandshakePorts) -> Self {
        Self {
            ready_rx: ports.subscribe(),
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_rx.borrow()
    }

    /// Run `action` once the handshake is complete.
    ///
    /// When already ready the action runs right away on the caller's task and
    /// `None` is returned. Otherwise a task is spawned that runs it exactly
    /// once after readiness; there is no cancellation, and if the handshake
    /// state is dropped first the action is abandoned.
    pub fn run_when_ready<F>(&self, action: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_ready() {
            action();
            return None;
        }

        let gate = self.clone();
        Some(tokio::spawn(async move {
            if gate.wait_ready().await {
                action();
            } else {
                debug!("Handshake state dropped before readiness; abandoning deferred action");
            }
        }))
    }

    /// Wait until ready. Returns `false` if the handshake state went away first.
    pub async fn wait_ready(&self) -> bool {
        let mut rx = self.ready_rx.clone();
        let ready = rx.wait_for(|ready| *ready).await.is_ok();
        ready
    }
}
