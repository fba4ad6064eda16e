// Listening socket and admission

use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{Result, TrackerError};
use crate::server::protocol::REJECTION_LINE;
use crate::server::registry::ConnectionRegistry;
use crate::server::worker::{ClientSession, ConnectionContext, ConnectionWorker};

pub struct ConnectionAcceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    context: Arc<ConnectionContext>,
    read_timeout: Duration,
    running: Arc<AtomicBool>,
}

/// Stops a running accept loop from another thread.
#[derive(Clone)]
pub struct AcceptorHandle {
    running: Arc<AtomicBool>,
    wake_addr: SocketAddr,
}

impl AcceptorHandle {
    /// Close the listening socket. Workers already serving clients carry on.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            // Unblock the pending accept(); the loop sees the flag and exits.
            if let Err(e) = TcpStream::connect_timeout(&self.wake_addr, Duration::from_secs(1)) {
                debug!(error = %e, "wake-up connection failed");
            }
        }
    }
}

impl ConnectionAcceptor {
    pub fn bind(
        bind_address: &str,
        port: u16,
        registry: Arc<ConnectionRegistry>,
        context: Arc<ConnectionContext>,
        read_timeout: Duration,
    ) -> Result<Self> {
        let listener = TcpListener::bind((bind_address, port)).map_err(|e| {
            TrackerError::Network(format!(
                "Failed to create listening socket on {}:{}: {}",
                bind_address, port, e
            ))
        })?;
        let local_addr = listener.local_addr()?;

        Ok(ConnectionAcceptor {
            listener,
            local_addr,
            registry,
            context,
            read_timeout,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> AcceptorHandle {
        let wake_ip = match self.local_addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        AcceptorHandle {
            running: Arc::clone(&self.running),
            wake_addr: SocketAddr::new(wake_ip, self.local_addr.port()),
        }
    }

    /// Accept until stopped. The listening socket closes when this returns.
    pub fn run(self) {
        info!(addr = %self.local_addr, limit = ?self.registry.limit(), "🚀 The socket is now listening");

        for incoming in self.listener.incoming() {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let stream = match incoming {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "⚠️  Exception while accepting incoming connection");
                    continue;
                }
            };

            let peer = match stream.peer_addr() {
                Ok(peer) => peer,
                Err(e) => {
                    debug!(error = %e, "connection closed before it could be admitted");
                    continue;
                }
            };

            if let Err(e) = stream.set_read_timeout(Some(self.read_timeout)) {
                warn!(%peer, error = %e, "⚠️  Could not set read timeout, dropping connection");
                continue;
            }

            self.admit(stream, peer);
        }

        info!("Listening socket closed");
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        let Some(slot) = self.registry.try_register(peer) else {
            info!(%peer, "Rejecting connection, server is full");
            reject(stream);
            return;
        };

        let session = match ClientSession::new(stream, peer) {
            Ok(session) => session,
            Err(e) => {
                warn!(%peer, error = %e, "⚠️  Exception while setting up socket streams");
                return;
            }
        };

        let worker = ConnectionWorker::new(session, slot, Arc::clone(&self.context));
        let spawned = thread::Builder::new()
            .name(format!("conn-{}", peer))
            .spawn(move || worker.run());

        if let Err(e) = spawned {
            error!(%peer, error = %e, "❌ Could not start connection worker");
        }
    }
}

fn reject(mut stream: TcpStream) {
    let _ = stream.write_all(REJECTION_LINE.as_bytes());
    let _ = stream.write_all(b"\n");
    let _ = stream.flush();
    let _ = stream.shutdown(Shutdown::Both);
}
