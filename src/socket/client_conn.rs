//! Per-connection protocol loop.
//!
//! Each accepted socket gets a [`ClientConn`] that reads chunks in arrival
//! order, answers policy requests and polls, hands every other command to the
//! bridge, and emits the connection's lifecycle events.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::framing::{decode_chunk, is_policy_request, policy_response, Inbound, LineDecoder};
use crate::bridge::events::{BridgeEvent, ConnectionId};
use crate::bridge::{Bridge, Dispatch};
use crate::config::Framing;
use crate::constants::{MAX_LINE_SIZE, READ_BUFFER_SIZE};

/// Lifecycle of a connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket accepted, connect event not yet emitted.
    Accepted,
    /// Serving frames.
    Active,
    /// Disconnect emitted; resources released.
    Closed,
}

impl ConnectionState {
    /// `Accepted → Active`. Returns `false` from any other state.
    pub fn activate(&mut self) -> bool {
        if *self == Self::Accepted {
            *self = Self::Active;
            true
        } else {
            false
        }
    }

    /// Move to `Closed`. Returns `false` if already closed.
    pub fn close(&mut self) -> bool {
        if *self == Self::Closed {
            false
        } else {
            *self = Self::Closed;
            true
        }
    }
}

/// Bridge-side state for a single client connection.
pub struct ClientConn {
    conn_id: ConnectionId,
    peer: SocketAddr,
    bridge: Bridge,
    /// Port announced in policy replies.
    policy_port: u16,
    state: ConnectionState,
    lines: Option<LineDecoder>,
}

impl std::fmt::Debug for ClientConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConn")
            .field("conn_id", &self.conn_id)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ClientConn {
    /// Create the handler for an accepted connection.
    pub fn new(conn_id: ConnectionId, peer: SocketAddr, bridge: Bridge, policy_port: u16) -> Self {
        let lines = match bridge.config().framing {
            Framing::Chunk => None,
            Framing::Line => Some(LineDecoder::new(MAX_LINE_SIZE)),
        };
        Self {
            conn_id,
            peer,
            bridge,
            policy_port,
            state: ConnectionState::Accepted,
            lines,
        }
    }

    /// Connection identifier.
    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Serve a TCP client until it disconnects.
    pub async fn run(self, stream: TcpStream) {
        // Loopback traffic of tiny frames; don't let Nagle batch replies.
        if let Err(e) = stream.set_nodelay(true) {
            log::warn!("[Socket] Failed to set TCP_NODELAY for {}: {e}", self.conn_id);
        }
        let (reader, writer) = stream.into_split();
        self.serve(reader, writer).await;
    }

    /// Protocol loop over any byte stream.
    pub async fn serve<R, W>(mut self, mut reader: R, mut writer: W)
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.state.activate();
        self.bridge.emit(&BridgeEvent::Connect {
            conn_id: self.conn_id.clone(),
            peer: self.peer,
        });

        let read_timeout = self.bridge.config().read_timeout();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let read = match read_timeout {
                Some(limit) => match tokio::time::timeout(limit, reader.read(&mut buf)).await {
                    Ok(read) => read,
                    Err(_elapsed) => {
                        log::info!(
                            "[Socket] Closing idle client {} after {:?}",
                            self.conn_id,
                            limit
                        );
                        break;
                    }
                },
                None => reader.read(&mut buf).await,
            };

            match read {
                Ok(0) => {
                    log::info!("[Socket] Client disconnected: {}", self.conn_id);
                    break;
                }
                Ok(n) => {
                    if let Err(e) = self.handle_chunk(&buf[..n], &mut writer).await {
                        log::error!("[Socket] Write error for {}: {e}", self.conn_id);
                        break;
                    }
                }
                Err(e) => {
                    log::error!("[Socket] Read error for {}: {e}", self.conn_id);
                    break;
                }
            }
        }

        let _ = writer.shutdown().await;
        if self.state.close() {
            self.bridge.emit(&BridgeEvent::Disconnect {
                conn_id: self.conn_id.clone(),
            });
        }
    }

    /// Process one received chunk. Only I/O failures are returned; protocol
    /// errors are reported through the bridge and swallowed.
    async fn handle_chunk<W>(&mut self, data: &[u8], writer: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let text = String::from_utf8_lossy(data).into_owned();
        self.bridge.emit(&BridgeEvent::Data {
            conn_id: self.conn_id.clone(),
            text: text.clone(),
        });

        // The policy request is answered before any framing so a pending
        // partial line never swallows it.
        if is_policy_request(&text) {
            log::debug!("[Socket] Policy request from {}", self.conn_id);
            return self.write(writer, policy_response(self.policy_port).as_bytes()).await;
        }

        let units = match self.lines.as_mut() {
            Some(decoder) => decoder.feed(data),
            None => vec![decode_chunk(&text)],
        };

        for unit in units {
            match unit {
                Ok(Inbound::PolicyRequest) => {
                    self.write(writer, policy_response(self.policy_port).as_bytes())
                        .await?;
                }
                Ok(Inbound::Json(value)) => {
                    let dispatched = self.bridge.dispatch_value(&self.conn_id, value);
                    if let Dispatch::PollReply(reply) = dispatched {
                        self.write(writer, &reply).await?;
                        self.bridge.emit(&BridgeEvent::Poll {
                            conn_id: self.conn_id.clone(),
                        });
                    }
                }
                Err(err) => self.bridge.report(&self.conn_id, err),
            }
        }
        Ok(())
    }

    async fn write<W>(&self, writer: &mut W, bytes: &[u8]) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let limit: Duration = self.bridge.config().write_timeout();
        match tokio::time::timeout(limit, async {
            writer.write_all(bytes).await?;
            writer.flush().await
        })
        .await
        {
            Ok(result) => result,
            Err(_elapsed) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("write stalled for {limit:?}"),
            )),
        }
    }
}
