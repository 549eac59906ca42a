// Handshake state shared between the supervisor, the client API server and IPC answerers
//
// Holds the two ports of the handshake plus the host-wide flags. Everything is
// owned here and handed around as `Arc<HandshakePorts>`.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortsSnapshot {
    /// Port of the client API server, assigned by the OS
    pub local_api_port: u16,
    /// Port the daemon reported once listening
    pub daemon_api_port: u16,
    pub ports_exchanged: bool,
    pub frontend_ready: bool,
    pub renderer_ready: bool,
    pub client_conn_initialised: bool,
    pub app_shutting_down: bool,
}

/// Port exchange state; `ports_exchanged` only ever goes from false to true
pub struct HandshakePorts {
    state: Mutex<PortsSnapshot>,
    ready_tx: watch::Sender<bool>,
}

impl Default for HandshakePorts {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakePorts {
    pub fn new() -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            state: Mutex::new(PortsSnapshot::default()),
            ready_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PortsSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the port the client API server bound to
    pub fn record_local_port(&self, port: u16) {
        let mut state = self.lock();
        state.local_api_port = port;
        self.mark_exchanged_if_complete(&mut state);
    }

    /// Store the port the daemon reported through the handshake RPC
    pub fn record_daemon_port(&self, port: u16) {
        let mut state = self.lock();
        state.daemon_api_port = port;
        self.mark_exchanged_if_complete(&mut state);
    }

    fn mark_exchanged_if_complete(&self, state: &mut PortsSnapshot) {
        if state.ports_exchanged || state.local_api_port == 0 || state.daemon_api_port == 0 {
            return;
        }
        state.ports_exchanged = true;
        info!(
            local_api_port = state.local_api_port,
            daemon_api_port = state.daemon_api_port,
            "Handshake complete: ports exchanged"
        );
        self.ready_tx.send_replace(true);
    }

    pub fn local_port(&self) -> u16 {
        self.lock().local_api_port
    }

    pub fn daemon_port(&self) -> u16 {
        self.lock().daemon_api_port
    }

    pub fn ports_exchanged(&self) -> bool {
        self.lock().ports_exchanged
    }

    /// Receiver that flips to `true` once, when the ports have been exchanged
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    pub fn snapshot(&self) -> PortsSnapshot {
        *self.lock()
    }

    pub fn frontend_ready(&self) -> bool {
        self.lock().frontend_ready
    }

    pub fn set_frontend_ready(&self, ready: bool) {
        self.lock().frontend_ready = ready;
    }

    pub fn renderer_ready(&self) -> bool {
        self.lock().renderer_ready
    }

    pub fn set_renderer_ready(&self, ready: bool) {
        self.lock().renderer_ready = ready;
    }

    pub fn client_conn_initialised(&self) -> bool {
        self.lock().client_conn_initialised
    }

    pub fn set_client_conn_initialised(&self, initialised: bool) {
        self.lock().client_conn_initialised = initialised;
    }

    pub fn app_shutting_down(&self) -> bool {
        self.lock().app_shutting_down
    }

    pub fn set_app_shutting_down(&self, shutting_down: bool) {
        self.lock().app_shutting_down = shutting_down;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_needs_both_ports() {
        let ports = HandshakePorts::new();
        assert!(!ports.ports_exchanged());

        ports.record_local_port(5000);
        assert!(!ports.ports_exchanged());

        ports.record_daemon_port(6000);
        assert!(ports.ports_exchanged());
        assert_eq!(ports.local_port(), 5000);
        assert_eq!(ports.daemon_port(), 6000);
    }

    #[test]
    fn test_daemon_port_first_still_completes() {
        let ports = HandshakePorts::new();
        ports.record_daemon_port(6000);
        assert!(!ports.ports_exchanged());
        ports.record_local_port(5000);
        assert!(ports.ports_exchanged());
    }

    #[test]
    fn test_exchanged_is_monotonic() {
        let ports = HandshakePorts::new();
        let rx = ports.subscribe();
        ports.record_local_port(5000);
        ports.record_daemon_port(6000);
        assert!(*rx.borrow());

        // Later updates, even zeroes, never reset readiness
        ports.record_local_port(0);
        ports.record_daemon_port(0);
        ports.record_local_port(5100);
        ports.record_daemon_port(6100);
        assert!(ports.ports_exchanged());
        assert!(*rx.borrow());
        assert_eq!(ports.local_port(), 5100);
        assert_eq!(ports.daemon_port(), 6100);
    }

    #[test]
    fn test_zero_port_does_not_complete() {
        let ports = HandshakePorts::new();
        ports.record_local_port(5000);
        ports.record_daemon_port(0);
        assert!(!ports.ports_exchanged());
    }

    #[test]
    fn test_flags_and_snapshot() {
        let ports = HandshakePorts::new();
        ports.set_frontend_ready(true);
        ports.set_renderer_ready(true);
        ports.set_client_conn_initialised(true);
        ports.set_app_shutting_down(true);
        ports.record_local_port(5000);

        let snapshot = ports.snapshot();
        assert_eq!(
            snapshot,
            PortsSnapshot {
                local_api_port: 5000,
                daemon_api_port: 0,
                ports_exchanged: false,
                frontend_ready: true,
                renderer_ready: true,
                client_conn_initialised: true,
                app_shutting_down: true,
            }
        );

        let json = serde_json::to_value(snapshot).unwrap();
        assert_eq!(json["local_api_port"], 5000);
        assert_eq!(json["ports_exchanged"], false);
    }
}
