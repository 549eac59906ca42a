// Port exchange between the host and the frontend daemon

pub mod broker;
pub mod gate;
pub mod ipc;
pub mod ports;
pub mod protocol;
pub mod server;

pub use broker::PortBroker;
pub use gate::ReadinessGate;
pub use ipc::{IpcCall, IpcClient, IpcError, IpcReply, MainChannel};
pub use ports::{HandshakePorts, PortsSnapshot};
pub use server::{ClientApiServer, ServerError};
