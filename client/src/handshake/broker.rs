// Port broker: routes both halves of the port exchange

use std::sync::Arc;

use tracing::{debug, info};

use super::ports::HandshakePorts;
use crate::daemon::supervisor::Supervisor;

/// Records the ports of the handshake and starts the daemon once the local
/// API server is known
#[derive(Clone)]
pub struct PortBroker {
    ports: Arc<HandshakePorts>,
    supervisor: Supervisor,
}

impl PortBroker {
    pub fn new(ports: Arc<HandshakePorts>, supervisor: Supervisor) -> Self {
        Self { ports, supervisor }
    }

    /// The client API server is listening on `port`: store it and start the daemon.
    ///
    /// Returns `false` when the daemon was already started. That happens on a
    /// renderer refresh; the new port is kept for the next relaunch and the
    /// existing handshake stays valid.
    pub fn record_local_port(&self, port: u16) -> bool {
        self.ports.record_local_port(port);
        let started = self.supervisor.start(port);
        if started {
            info!(port, "Client API server port recorded; frontend daemon launched");
        } else {
            debug!(port, "Client API server port recorded; frontend daemon already running");
        }
        started
    }

    /// The daemon reported it is listening on `port`
    pub fn record_daemon_port(&self, port: u16) {
        self.ports.set_frontend_ready(true);
        self.ports.set_client_conn_initialised(true);
        self.ports.record_daemon_port(port);
        info!(port, "Frontend daemon API port recorded");
    }

    pub fn is_ready(&self) -> bool {
        self.ports.ports_exchanged()
    }

    pub fn ports(&self) -> &Arc<HandshakePorts> {
        &self.ports
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::gate::ReadinessGate;
    use crate::test_utils::{test_config, FakeSpawner, SpawnLog};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn broker() -> (PortBroker, SpawnLog) {
        let (spawner, spawns) = FakeSpawner::new();
        let ports = Arc::new(HandshakePorts::new());
        let supervisor = Supervisor::new(test_config(), Arc::new(spawner), Arc::clone(&ports));
        (PortBroker::new(ports, supervisor), spawns)
    }

    #[tokio::test]
    async fn test_cold_start_handshake() {
        let (broker, mut spawns) = broker();
        let gate = ReadinessGate::new(broker.ports());

        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let deferred = gate
            .run_when_ready(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .expect("not ready before the handshake");

        assert!(broker.record_local_port(5000));
        let daemon = spawns.next().await;
        assert_eq!(daemon.port(), Some(5000));
        assert!(!broker.is_ready(), "daemon has not reported yet");
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        broker.record_daemon_port(6000);
        assert!(broker.is_ready());
        assert!(broker.ports().frontend_ready());
        assert!(broker.ports().client_conn_initialised());

        tokio::time::timeout(Duration::from_secs(1), deferred)
            .await
            .expect("deferred action should run")
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_keeps_handshake_and_updates_port() {
        let (broker, mut spawns) = broker();

        assert!(broker.record_local_port(5000));
        spawns.next().await;
        broker.record_daemon_port(6000);
        assert!(broker.is_ready());

        // Renderer refresh: new client API server, same daemon
        assert!(!broker.record_local_port(5100));
        assert!(spawns.try_next().is_none(), "refresh must not spawn");
        assert!(broker.is_ready());
        assert_eq!(broker.ports().local_port(), 5100);
        assert_eq!(broker.ports().daemon_port(), 6000);
    }

    #[tokio::test]
    async fn test_daemon_port_before_local_port_does_not_open_gate() {
        let (broker, _spawns) = broker();
        broker.record_daemon_port(6000);
        assert!(!broker.is_ready());
        assert!(broker.ports().frontend_ready());
    }
}
