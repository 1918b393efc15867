//! TCP listener / accept loop.

use std::sync::Arc;

use socket2::SockRef;
use tokio::net::TcpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::server::connection;
use crate::shutdown::GracefulShutdown;
use crate::store::Engine;

/// Generous send-buffer size set on every accepted connection so a
/// burst of pipelined responses doesn't stall on a full kernel buffer.
const SEND_BUFFER_SIZE: usize = 1024 * 1024;

pub struct Listener {
    socket: TcpSocket,
    addr: std::net::SocketAddr,
}

impl Listener {
    /// Binds a listening socket with `SO_REUSEADDR` set explicitly,
    /// rather than relying on `TcpListener::bind`'s defaults.
    pub fn bind(config: &Config) -> std::io::Result<Self> {
        let addr: std::net::SocketAddr = ([0, 0, 0, 0], config.port).into();
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let addr = socket.local_addr()?;
        Ok(Listener { socket, addr })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.addr
    }

    /// Accepts connections until `shutdown` is cancelled. Each
    /// connection's task is tracked by `graceful` so shutdown can wait
    /// for in-flight commands to finish.
    pub async fn serve(
        self,
        engine: Arc<Engine>,
        shutdown: CancellationToken,
        graceful: GracefulShutdown,
    ) -> std::io::Result<()> {
        let listener = self.socket.listen(1024)?;
        info!(component = "listener", addr = %self.addr, "listening");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(component = "listener", "accept loop stopping");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            error!(component = "listener", %err, "accept failed");
                            continue;
                        }
                    };
                    if let Err(err) = socket.set_nodelay(true) {
                        error!(component = "listener", %err, "failed to set TCP_NODELAY");
                    }
                    if let Err(err) = SockRef::from(&socket).set_send_buffer_size(SEND_BUFFER_SIZE) {
                        error!(component = "listener", %err, "failed to set SO_SNDBUF");
                    }

                    let engine = Arc::clone(&engine);
                    let conn_shutdown = shutdown.clone();
                    graceful.add(1);
                    let graceful_done = graceful.clone();
                    tokio::spawn(async move {
                        if let Err(err) = connection::handle(socket, engine, conn_shutdown).await {
                            debug_log_conn_error(peer, &err);
                        }
                        graceful_done.done();
                    });
                }
            }
        }
    }
}

fn debug_log_conn_error(peer: std::net::SocketAddr, err: &std::io::Error) {
    tracing::debug!(component = "connection", %peer, %err, "connection ended with error");
}
