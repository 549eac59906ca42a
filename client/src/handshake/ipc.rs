// Main-process channel
//
// Renderer-facing getters and setters for the handshake state, served by a
// single task. Callers send an `IpcCall` with a reply slot and await the
// answer; calls are handled one at a time in arrival order.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::broker::PortBroker;
use super::ports::HandshakePorts;

const CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcCall {
    GetFrontendReady,
    SetFrontendReady(bool),
    SetRendererReady(bool),
    GetFrontendApiPort,
    SetFrontendApiPort(u16),
    GetFrontendClientConnInitialised,
    SetFrontendClientConnInitialised(bool),
    GetClientApiServerPort,
    /// Record the client API server port and start the daemon if needed
    SetClientApiServerPort(u16),
    SetAppShuttingDown(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcReply {
    Flag(bool),
    Port(u16),
    /// For `SetClientApiServerPort`: whether this call launched the daemon
    DaemonStarted(bool),
    Ack,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IpcError {
    #[error("main-process channel is closed")]
    Closed,
    #[error("main-process channel dropped the call without replying")]
    NoReply,
}

struct Envelope {
    call: IpcCall,
    reply: oneshot::Sender<IpcReply>,
}

/// Handle for sending calls to the main-process channel
#[derive(Clone)]
pub struct IpcClient {
    tx: mpsc::Sender<Envelope>,
}

impl IpcClient {
    pub async fn call(&self, call: IpcCall) -> Result<IpcReply, IpcError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                call,
                reply: reply_tx,
            })
            .await
            .map_err(|_| IpcError::Closed)?;
        reply_rx.await.map_err(|_| IpcError::NoReply)
    }
}

pub struct MainChannel {
    ports: Arc<HandshakePorts>,
    broker: PortBroker,
}

impl MainChannel {
    /// Start the answering task; it runs until every `IpcClient` is dropped
    pub fn spawn(ports: Arc<HandshakePorts>, broker: PortBroker) -> IpcClient {
        let (tx, mut rx) = mpsc::channel::<Envelope>(CHANNEL_CAPACITY);
        let channel = MainChannel { ports, broker };

        tokio::spawn(async move {
            while let Some(Envelope { call, reply }) = rx.recv().await {
                let answer = channel.answer(call);
                if reply.send(answer).is_err() {
                    debug!(?call, "IPC caller went away before the reply");
                }
            }
            debug!("Main-process channel closed");
        });

        IpcClient { tx }
    }

    fn answer(&self, call: IpcCall) -> IpcReply {
        match call {
            IpcCall::GetFrontendReady => IpcReply::Flag(self.ports.frontend_ready()),
            IpcCall::SetFrontendReady(ready) => {
                self.ports.set_frontend_ready(ready);
                IpcReply::Ack
            }
            IpcCall::SetRendererReady(ready) => {
                self.ports.set_renderer_ready(ready);
                IpcReply::Ack
            }
            IpcCall::GetFrontendApiPort => IpcReply::Port(self.ports.daemon_port()),
            IpcCall::SetFrontendApiPort(port) => {
                self.ports.record_daemon_port(port);
                IpcReply::Ack
            }
            IpcCall::GetFrontendClientConnInitialised => {
                IpcReply::Flag(self.ports.client_conn_initialised())
            }
            IpcCall::SetFrontendClientConnInitialised(initialised) => {
                self.ports.set_client_conn_initialised(initialised);
                IpcReply::Ack
            }
            IpcCall::GetClientApiServerPort => IpcReply::Port(self.ports.local_port()),
            IpcCall::SetClientApiServerPort(port) => {
                IpcReply::DaemonStarted(self.broker.record_local_port(port))
            }
            IpcCall::SetAppShuttingDown(shutting_down) => {
                self.ports.set_app_shutting_down(shutting_down);
                if shutting_down {
                    info!("App is shutting down; frontend daemon exits are now final");
                    self.broker.supervisor().begin_shutdown();
                }
                IpcReply::Ack
            }
        }
    }
}
