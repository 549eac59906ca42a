// Host wiring
//
// Boot order: shared state, supervisor, broker, gate, IPC channel, then the
// client API server. Announcing the server port through IPC is what launches
// the daemon, so the handshake runs local port -> start -> daemon port.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::daemon::process::Spawner;
use crate::daemon::supervisor::{ShutdownOutcome, Supervisor};
use crate::handshake::{
    ClientApiServer, HandshakePorts, IpcCall, IpcClient, IpcError, IpcReply, MainChannel,
    PortBroker, ReadinessGate, ServerError,
};

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("main-process call failed: {0}")]
    Ipc(#[from] IpcError),
    #[error("unexpected reply to {call:?}: {reply:?}")]
    UnexpectedReply { call: IpcCall, reply: IpcReply },
}

/// The running host: owns the client API server and the daemon supervisor
pub struct Host {
    config: Config,
    ports: Arc<HandshakePorts>,
    supervisor: Supervisor,
    gate: ReadinessGate,
    ipc: IpcClient,
    server: ClientApiServer,
}

impl Host {
    pub async fn boot(config: Config, spawner: Arc<dyn Spawner>) -> Result<Self, HostError> {
        let ports = Arc::new(HandshakePorts::new());
        let supervisor = Supervisor::new(config.clone(), spawner, Arc::clone(&ports));
        let broker = PortBroker::new(Arc::clone(&ports), supervisor.clone());
        let gate = ReadinessGate::new(&ports);
        let ipc = MainChannel::spawn(Arc::clone(&ports), broker.clone());

        let server = ClientApiServer::bind(broker).await?;
        let started = announce_client_api_port(&ipc, server.port()).await?;
        if started {
            info!(port = server.port(), "Cold start: frontend daemon launched");
        } else {
            info!(port = server.port(), "Refresh: frontend daemon already running");
        }

        Ok(Self {
            config,
            ports,
            supervisor,
            gate,
            ipc,
            server,
        })
    }

    /// Replace the client API server, as a renderer reload does.
    ///
    /// The running daemon keeps its handshake; the new port is used the next
    /// time it is relaunched. Returns whether a daemon was launched.
    pub async fn rebind_client_api(&mut self) -> Result<bool, HostError> {
        let broker = PortBroker::new(Arc::clone(&self.ports), self.supervisor.clone());
        let server = ClientApiServer::bind(broker).await?;
        let old = std::mem::replace(&mut self.server, server);
        old.shutdown().await;

        let started = announce_client_api_port(&self.ipc, self.server.port()).await?;
        if !started {
            info!(port = self.server.port(), "Client API server rebound; handshake kept");
        }
        Ok(started)
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn ports(&self) -> &Arc<HandshakePorts> {
        &self.ports
    }

    pub fn ipc(&self) -> &IpcClient {
        &self.ipc
    }

    pub fn client_api_port(&self) -> u16 {
        self.server.port()
    }

    /// Stop everything; never takes longer than the configured shutdown timeout
    pub async fn shutdown(self) -> ShutdownOutcome {
        let Host {
            config,
            supervisor,
            ipc,
            server,
            ..
        } = self;
        let limit = config.shutdown_timeout;
        let deadline = tokio::time::Instant::now() + limit;

        let stopping = supervisor.clone();
        let sequence = async move {
            if let Err(e) = ipc.call(IpcCall::SetAppShuttingDown(true)).await {
                warn!(error = %e, "Could not flag shutdown through the main-process channel");
                stopping.begin_shutdown();
            }
            server.shutdown().await;
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            stopping.shutdown(remaining).await
        };

        let outcome = match tokio::time::timeout_at(deadline, sequence).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(?limit, "Shutdown hit the hard limit; exiting anyway");
                supervisor.abandon();
                ShutdownOutcome::TimedOut
            }
        };
        info!(?outcome, "Host shut down");
        outcome
    }
}

async fn announce_client_api_port(ipc: &IpcClient, port: u16) -> Result<bool, HostError> {
    let call = IpcCall::SetClientApiServerPort(port);
    match ipc.call(call).await? {
        IpcReply::DaemonStarted(started) => Ok(started),
        reply => Err(HostError::UnexpectedReply { call, reply }),
    }
}
