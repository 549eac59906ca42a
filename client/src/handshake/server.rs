// Client API server
//
// Loopback TCP listener the frontend daemon connects to once it is up. Each
// connection carries newline-delimited JSON requests; every request gets
// exactly one response line. A `FrontendReady` request completes the daemon
// side of the port exchange.

use std::io;

use chrono::Utc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::broker::PortBroker;
use super::protocol::{
    deserialize_message, serialize_message, ClientApiErrorCode, ClientApiRequest,
    ClientApiResponse, MAX_REQUEST_FRAME_SIZE,
};
use crate::daemon::launch::CLIENT_API_HOST;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind client API server on {host}: {source}")]
    Bind {
        host: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("failed to read client API server address: {0}")]
    LocalAddr(#[source] io::Error),
}

/// Running client API server; dropping it also stops the accept loop
pub struct ClientApiServer {
    port: u16,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl ClientApiServer {
    /// Bind an ephemeral loopback port and start accepting connections
    pub async fn bind(broker: PortBroker) -> Result<Self, ServerError> {
        let listener = TcpListener::bind((CLIENT_API_HOST, 0))
            .await
            .map_err(|source| ServerError::Bind {
                host: CLIENT_API_HOST,
                source,
            })?;
        let port = listener.local_addr().map_err(ServerError::LocalAddr)?.port();
        info!(port, "Client API server listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, broker, shutdown_rx));

        Ok(Self {
            port,
            shutdown_tx,
            accept_task,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting and close open connections
    pub async fn shutdown(self) {
        self.shutdown_tx.send_replace(true);
        if let Err(e) = self.accept_task.await {
            warn!(error = %e, "Client API accept loop ended abnormally");
        }
        info!(port = self.port, "Client API server stopped");
    }
}

async fn accept_loop(listener: TcpListener, broker: PortBroker, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(%addr, "Client API connection accepted");
                        let broker = broker.clone();
                        let shutdown_rx = shutdown_rx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(broker, stream, shutdown_rx).await {
                                warn!(%addr, error = %e, "Client API connection error");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Client API accept error");
                    }
                }
            }

            _ = stopped(&mut shutdown_rx) => break,
        }
    }
}

/// Resolves once the server is told to stop or its handle is dropped
async fn stopped(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

/// One newline-terminated request as read off the wire
#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Closed,
    Line,
    /// Longer than `MAX_REQUEST_FRAME_SIZE`; the rest of the line was discarded
    TooLarge,
}

/// Read the next request into `buf`, never buffering more than one frame's worth
async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = MAX_REQUEST_FRAME_SIZE as u64 + 1;
    let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if read == 0 {
        return Ok(Frame::Closed);
    }
    if buf.last() == Some(&b'\n') || (read as u64) < limit {
        return Ok(Frame::Line);
    }

    buf.clear();
    discard_line(reader).await?;
    Ok(Frame::TooLarge)
}

/// Skip input up to and including the next newline
async fn discard_line<R>(reader: &mut R) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        match available.iter().position(|b| *b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(());
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
}

/// Serve one connection until the peer hangs up or the server stops
async fn handle_client(
    broker: PortBroker,
    mut stream: TcpStream,
    mut shutdown_rx: watch::Receiver<bool>,
) -> io::Result<()> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        tokio::select! {
            result = read_frame(&mut reader, &mut buf) => {
                let response = match result {
                    Ok(Frame::Closed) => break,
                    Ok(Frame::TooLarge) => ClientApiResponse::error(
                        ClientApiErrorCode::InvalidRequest,
                        format!("Request frame too large (max {} bytes)", MAX_REQUEST_FRAME_SIZE),
                    ),
                    Ok(Frame::Line) => match deserialize_message::<ClientApiRequest>(&buf) {
                        Ok(request) => handle_request(&broker, request),
                        Err(e) => ClientApiResponse::error(
                            ClientApiErrorCode::InvalidRequest,
                            format!("Failed to parse request: {}", e),
                        ),
                    },
                    Err(e) => {
                        debug!(error = %e, "Error reading from client API connection");
                        break;
                    }
                };

                let bytes = serialize_message(&response)?;
                writer.write_all(&bytes).await?;
                writer.flush().await?;
            }

            _ = stopped(&mut shutdown_rx) => break,
        }
    }

    Ok(())
}

fn handle_request(broker: &PortBroker, request: ClientApiRequest) -> ClientApiResponse {
    match request {
        ClientApiRequest::FrontendReady { address, port: 0 } => {
            warn!(%address, "Frontend daemon reported port 0");
            ClientApiResponse::error(ClientApiErrorCode::InvalidPort, "port must be non-zero")
        }
        ClientApiRequest::FrontendReady { address, port } => {
            info!(%address, port, "Frontend daemon reported ready");
            broker.record_daemon_port(port);
            ClientApiResponse::FrontendReadyAck {
                received_at: Utc::now(),
            }
        }
        ClientApiRequest::Ping => ClientApiResponse::Pong,
    }
}
