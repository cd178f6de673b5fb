//! TCP IPC server - accept loop and per-connection handler.
//!
//! One connection is one front-end window. Exec frames are handed to the
//! bridge on their own tasks; every envelope those calls emit comes back
//! through the connection's window and is written by a single writer task,
//! so frames never interleave.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::bridge::{Bridge, ExecRequest};
use crate::host::{ChannelWindow, HostWindow, Push};
use crate::ipc::codec::{self, read_frame, write_frame, TransportError, MSG_ERROR, MSG_EXEC, MSG_PUSH};
use crate::types::{ConnectionId, IpcConfig};

/// IPC server feeding front-end calls into the bridge.
#[derive(Debug)]
pub struct IpcServer {
    bridge: Bridge,
    addr: SocketAddr,
    cancel: CancellationToken,
    ipc_config: IpcConfig,
}

impl IpcServer {
    pub fn new(bridge: Bridge, addr: SocketAddr, ipc_config: IpcConfig) -> Self {
        Self {
            bridge,
            addr,
            cancel: CancellationToken::new(),
            ipc_config,
        }
    }

    /// Bind the configured address and serve until cancelled.
    pub async fn serve(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_on(listener).await
    }

    /// Serve on an already bound listener until cancelled or a fatal error occurs.
    pub async fn serve_on(&self, listener: TcpListener) -> std::io::Result<()> {
        let conn_semaphore = Arc::new(Semaphore::new(self.ipc_config.max_connections));
        tracing::info!(
            "IPC server listening on {} (max_connections={})",
            listener.local_addr()?,
            self.ipc_config.max_connections,
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("IPC server shutting down");
                    break;
                }
                accept = listener.accept() => {
                    let (stream, peer) = accept?;

                    // Backpressure when at capacity.
                    let permit = match conn_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            tracing::warn!(
                                "Connection from {} rejected: at max_connections ({})",
                                peer,
                                self.ipc_config.max_connections,
                            );
                            drop(stream);
                            continue;
                        }
                    };

                    tracing::debug!("IPC connection from {} (active={})",
                        peer,
                        self.ipc_config.max_connections - conn_semaphore.available_permits(),
                    );
                    let bridge = self.bridge.clone();
                    let cancel = self.cancel.clone();
                    let ipc_config = self.ipc_config.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, bridge, cancel, ipc_config, permit).await {
                            tracing::warn!("Connection from {} error: {}", peer, e);
                        }
                    });
                }
            }
        }
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Handle one connection: read exec frames → bridge; pushes → writer task.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    bridge: Bridge,
    cancel: CancellationToken,
    ipc_config: IpcConfig,
    _permit: OwnedSemaphorePermit, // held until the writer stops
) -> std::io::Result<()> {
    let connection_id = ConnectionId::new();
    tracing::debug!(%connection_id, "window connected from {}", peer);
    let (mut reader, writer) = stream.into_split();
    let (window, pushes) = ChannelWindow::new(format!("ipc:{}", connection_id));
    let window: Arc<dyn HostWindow> = Arc::new(window);
    let (errors, error_rx) = mpsc::unbounded_channel();
    let conn_cancel = cancel.child_token();

    let mut writer_task = tokio::spawn(write_loop(
        writer,
        pushes,
        error_rx,
        conn_cancel.clone(),
        ipc_config.write_timeout,
    ));

    let read_result = async {
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = tokio::time::timeout(
                    ipc_config.read_timeout,
                    read_frame(&mut reader, ipc_config.max_frame_bytes),
                ) => frame,
            };
            let (msg_type, payload) = match frame {
                Err(_elapsed) => {
                    tracing::debug!(
                        "Read timeout ({:?}), dropping connection from {}",
                        ipc_config.read_timeout,
                        peer
                    );
                    break;
                }
                Ok(result) => match result? {
                    Some(frame) => frame,
                    None => break, // clean EOF
                },
            };

            if msg_type != MSG_EXEC {
                let _ = errors.send(TransportError::invalid_argument(format!(
                    "unexpected message type: 0x{:02X}",
                    msg_type
                )));
                continue;
            }

            match codec::decode::<ExecRequest>(&payload) {
                Ok(request) => {
                    bridge.spawn(request, Arc::clone(&window));
                }
                Err(e) => {
                    let _ = errors.send(TransportError::invalid_argument(format!(
                        "invalid exec request: {}",
                        e
                    )));
                }
            }
        }
        Ok::<_, std::io::Error>(())
    }
    .await;

    // In-flight calls keep their window clones; the writer drains until the
    // last of them finishes or the drain window closes.
    drop(window);
    drop(errors);
    let joined = match tokio::time::timeout(ipc_config.drain_timeout, &mut writer_task).await {
        Ok(joined) => joined,
        Err(_elapsed) => {
            tracing::debug!(
                %connection_id,
                "calls still pending after {:?}, closing connection from {}",
                ipc_config.drain_timeout,
                peer
            );
            conn_cancel.cancel();
            writer_task.await
        }
    };
    match joined {
        Ok(write_result) => read_result.and(write_result),
        Err(join_err) => Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            join_err.to_string(),
        )),
    }
}

async fn write_loop(
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    mut pushes: mpsc::UnboundedReceiver<Push>,
    mut errors: mpsc::UnboundedReceiver<TransportError>,
    cancel: CancellationToken,
    write_timeout: Duration,
) -> std::io::Result<()> {
    loop {
        let (msg_type, encoded) = tokio::select! {
            _ = cancel.cancelled() => break,
            Some(push) = pushes.recv() => (MSG_PUSH, codec::encode(&push)?),
            Some(error) = errors.recv() => (MSG_ERROR, codec::encode(&error)?),
            else => break,
        };
        timed_write(&mut writer, msg_type, &encoded, write_timeout).await?;
    }
    Ok(())
}

/// Write a frame with a timeout. Returns an error if the write takes too long
/// (prevents slow consumers from holding connections indefinitely).
async fn timed_write<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg_type: u8,
    payload: &[u8],
    timeout: Duration,
) -> std::io::Result<()> {
    tokio::time::timeout(timeout, write_frame(writer, msg_type, payload))
        .await
        .map_err(|_| {
            tracing::warn!("Write timeout ({:?}), dropping connection", timeout);
            std::io::Error::new(std::io::ErrorKind::TimedOut, "write timeout")
        })?
}
