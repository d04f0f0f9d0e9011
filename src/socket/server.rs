//! TCP listener for extension clients.
//!
//! Binds the configured address and spawns an accept loop that runs a
//! [`ClientConn`] task for each connection. Connections are independent: a
//! stalled client never holds up `accept()` or any other client.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::runtime::RuntimeFlavor;
use tokio::task::{JoinHandle, JoinSet};

use super::client_conn::ClientConn;
use crate::bridge::Bridge;
use crate::constants::ACCEPT_RETRY_DELAY;

/// Running listener returned by [`Bridge::listen`].
#[derive(Debug)]
pub struct SocketServer {
    /// Address actually bound (resolves port `0`).
    local_addr: SocketAddr,
    /// Handle to the accept loop task.
    accept_handle: JoinHandle<()>,
}

impl SocketServer {
    /// Bind and start accepting.
    ///
    /// Must be called from within a Tokio runtime. Returns as soon as the
    /// socket is bound; the accept loop runs in the background.
    pub fn start(bridge: Bridge) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("Bridge::listen must be called from within a Tokio runtime")?;
        if runtime.runtime_flavor() == RuntimeFlavor::CurrentThread {
            log::warn!(
                "[Socket] Serving on a current-thread runtime: a blocking handler will stall \
                 every connection"
            );
        }

        let config = bridge.config();
        let addr = SocketAddr::new(config.bind_address, config.port);
        let listener = std::net::TcpListener::bind(addr)
            .with_context(|| format!("Failed to bind {addr}"))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let listener = {
            let _guard = runtime.enter();
            TcpListener::from_std(listener)?
        };

        log::info!("[Socket] Listening on {local_addr} ({:?} framing)", config.framing);

        let accept_handle = runtime.spawn(Self::accept_loop(listener, bridge, local_addr.port()));

        Ok(Self {
            local_addr,
            accept_handle,
        })
    }

    /// Accept loop, run as a tokio task.
    ///
    /// Connection tasks live in a `JoinSet` owned by this loop, so aborting
    /// the loop also tears down every open connection.
    async fn accept_loop(listener: TcpListener, bridge: Bridge, policy_port: u16) {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let conn_id = generate_conn_id();
                        log::info!("[Socket] Client connected: {} from {}", conn_id, peer);
                        let conn = ClientConn::new(conn_id, peer, bridge.clone(), policy_port);
                        connections.spawn(conn.run(stream));
                    }
                    Err(e) => {
                        log::error!("[Socket] Accept error: {e}");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        log::error!("[Socket] Connection task failed: {e}");
                    }
                }
            }
        }
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting and drop all open connections. No disconnect events
    /// are emitted for connections closed this way.
    pub fn shutdown(self) {
        log::info!("[Socket] Shutting down listener on {}", self.local_addr);
        self.accept_handle.abort();
    }
}

impl Bridge {
    /// Start accepting connections on the configured port.
    ///
    /// Returns immediately once bound; see [`SocketServer::start`].
    ///
    /// Method handlers and event subscribers run inline on their
    /// connection's task. Serve from a multi-thread runtime (the
    /// `#[tokio::main]` default) so a handler that blocks only holds up its
    /// own connection; on a current-thread runtime it stalls every client
    /// and the accept loop.
    pub fn listen(&self) -> Result<SocketServer> {
        SocketServer::start(self.clone())
    }
}

/// Generate a unique connection ID using a monotonic counter + random suffix.
fn generate_conn_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let rand: u16 = rand::random();
    format!("tcp:{seq:x}{rand:04x}")
}
