//! TCP and UDP acceptors for the plaintext protocol.

use super::Collector;
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const UDP_BUFFER_SIZE: usize = 65_536;

/// Accept connections until `shutdown` is cancelled; one task per connection.
pub async fn serve_tcp(
    listener: TcpListener,
    collector: Arc<Collector>,
    shutdown: CancellationToken,
) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Accepting Graphite TCP connections");
    }
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.cancelled() => break,
        };
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Error accepting connection");
                continue;
            }
        };

        let collector = collector.clone();
        tokio::spawn(async move {
            debug!(%peer, "Connection opened");
            if let Err(e) = collector.process_reader(stream).await {
                debug!(%peer, error = %e, "Connection closed with error");
            } else {
                debug!(%peer, "Connection closed");
            }
        });
    }
    debug!("TCP listener stopped");
}

/// Receive datagrams until `shutdown` is cancelled; each datagram is
/// processed on its own task.
pub async fn serve_udp(
    socket: UdpSocket,
    collector: Arc<Collector>,
    shutdown: CancellationToken,
) {
    if let Ok(addr) = socket.local_addr() {
        info!(%addr, "Accepting Graphite UDP packets");
    }
    let mut buf = vec![0u8; UDP_BUFFER_SIZE];
    loop {
        let received = tokio::select! {
            received = socket.recv_from(&mut buf) => received,
            _ = shutdown.cancelled() => break,
        };
        let (len, peer) = match received {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Error reading UDP packet");
                continue;
            }
        };

        let datagram = buf[..len].to_vec();
        let collector = collector.clone();
        tokio::spawn(async move {
            if let Err(e) = collector.process_reader(datagram.as_slice()).await {
                debug!(%peer, error = %e, "Failed to process datagram");
            }
        });
    }
    debug!("UDP listener stopped");
}
