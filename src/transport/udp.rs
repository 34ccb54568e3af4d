//! UDP endpoints backed by tokio sockets

use bytes::Bytes;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::OnceLock;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::{DatagramTransport, Endpoint, EndpointMode};
use crate::{DroneError, Result};

/// Default receive buffer, comfortably above the drone's 1460-byte video datagrams.
pub const DEFAULT_MAX_DATAGRAM: usize = 2048;

/// A UDP socket in connected or listening mode.
///
/// The socket is closed when the endpoint is dropped. Cancelling marks the
/// endpoint dead: pending and future receives resolve to
/// [`DroneError::Cancelled`] and sends are refused.
pub struct UdpEndpoint {
    socket: UdpSocket,
    endpoint: Endpoint,
    local: SocketAddr,
    peer: OnceLock<SocketAddr>,
    max_datagram: usize,
    cancel: CancellationToken,
}

impl UdpEndpoint {
    /// Open a socket connected to `host:port`.
    ///
    /// Resolution and bind failures are returned before any endpoint exists.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let endpoint = Endpoint::connected(host, port);
        let peer = resolve(&endpoint.address()).await?;

        let local_bind: SocketAddr = if peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local_bind)
            .await
            .map_err(|e| DroneError::Bind { address: local_bind.to_string(), source: e })?;
        socket.connect(peer).await.map_err(|e| {
            DroneError::connection_failed_with_source(format!("connect to {}", peer), Box::new(e))
        })?;

        let local = socket.local_addr().map_err(|e| DroneError::io("local_addr", e))?;
        info!(%local, %peer, "UDP endpoint connected");

        let cell = OnceLock::new();
        let _ = cell.set(peer);

        Ok(Self {
            socket,
            endpoint,
            local,
            peer: cell,
            max_datagram: DEFAULT_MAX_DATAGRAM,
            cancel: CancellationToken::new(),
        })
    }

    /// Bind `host:port` and wait passively for the first peer.
    pub async fn listen(host: &str, port: u16) -> Result<Self> {
        let endpoint = Endpoint::listening(host, port);
        let address = resolve(&endpoint.address()).await?;

        let socket = UdpSocket::bind(address)
            .await
            .map_err(|e| DroneError::Bind { address: address.to_string(), source: e })?;
        let local = socket.local_addr().map_err(|e| DroneError::io("local_addr", e))?;
        info!(%local, "UDP endpoint listening");

        Ok(Self {
            socket,
            endpoint,
            local,
            peer: OnceLock::new(),
            max_datagram: DEFAULT_MAX_DATAGRAM,
            cancel: CancellationToken::new(),
        })
    }

    /// Override the receive buffer size.
    pub fn with_max_datagram(mut self, size: usize) -> Self {
        self.max_datagram = size;
        self
    }

    /// Tie the endpoint to an external cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Locally bound address (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn mode(&self) -> EndpointMode {
        self.endpoint.mode
    }

    async fn recv_datagram(&self) -> Result<Bytes> {
        let mut buf = vec![0u8; self.max_datagram];

        let len = match self.peer.get() {
            Some(_) => self.socket.recv(&mut buf).await.map_err(|e| DroneError::io("receive", e))?,
            None => {
                let (len, from) = self
                    .socket
                    .recv_from(&mut buf)
                    .await
                    .map_err(|e| DroneError::io("receive", e))?;
                // Adopt the first sender; later senders are filtered by the kernel
                if self.peer.set(from).is_ok() {
                    self.socket.connect(from).await.map_err(|e| DroneError::io("adopt peer", e))?;
                    info!(local = %self.local, peer = %from, "Listener adopted peer");
                }
                len
            }
        };

        buf.truncate(len);
        trace!(local = %self.local, len, "Datagram received");
        Ok(Bytes::from(buf))
    }
}

#[async_trait::async_trait]
impl DatagramTransport for UdpEndpoint {
    async fn send(&self, payload: &[u8]) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(DroneError::Cancelled);
        }
        if self.peer.get().is_none() {
            return Err(DroneError::NotConnected { operation: "send".to_string() });
        }

        let sent = self.socket.send(payload).await.map_err(|e| DroneError::io("send", e))?;
        trace!(local = %self.local, len = sent, "Datagram sent");
        Ok(())
    }

    async fn recv(&self) -> Result<Bytes> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(DroneError::Cancelled),
            result = self.recv_datagram() => result,
        }
    }

    fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!(local = %self.local, "Cancelling UDP endpoint");
            self.cancel.cancel();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn peer(&self) -> Option<SocketAddr> {
        self.peer.get().copied()
    }
}

/// Resolve `host:port`, preferring IPv4 since the drone only speaks IPv4.
async fn resolve(address: &str) -> Result<SocketAddr> {
    let host = address.rsplit_once(':').map(|(host, _)| host).unwrap_or(address).to_string();
    let resolved: Vec<SocketAddr> = tokio::net::lookup_host(address)
        .await
        .map_err(|_| DroneError::AddressResolution { host: host.clone() })?
        .collect();

    resolved
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| resolved.first())
        .copied()
        .ok_or(DroneError::AddressResolution { host })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn connected_endpoint_exchanges_datagrams() {
        let _ = tracing_subscriber::fmt::try_init();

        let drone = UdpSocket::bind("127.0.0.1:0").await.expect("bind drone");
        let drone_addr = drone.local_addr().unwrap();

        let client = UdpEndpoint::connect("127.0.0.1", drone_addr.port()).await.expect("connect");
        assert_eq!(client.mode(), EndpointMode::Connected);
        assert_eq!(client.peer(), Some(drone_addr));

        client.send(b"command").await.expect("send");
        let mut buf = [0u8; 64];
        let (len, from) = drone.recv_from(&mut buf).await.expect("drone recv");
        assert_eq!(&buf[..len], b"command");

        drone.send_to(b"ok", from).await.expect("drone reply");
        let reply = tokio::time::timeout(Duration::from_secs(1), client.recv())
            .await
            .expect("reply in time")
            .expect("reply");
        assert_eq!(&reply[..], b"ok");
    }

    #[tokio::test]
    async fn listening_endpoint_adopts_first_peer() {
        let listener = UdpEndpoint::listen("127.0.0.1", 0).await.expect("listen");
        assert_eq!(listener.mode(), EndpointMode::Listening);
        assert!(listener.peer().is_none());

        let err = listener.send(b"early").await.unwrap_err();
        assert!(matches!(err, DroneError::NotConnected { .. }));

        let drone = UdpSocket::bind("127.0.0.1:0").await.expect("bind drone");
        drone.send_to(b"bat:86;", listener.local_addr()).await.expect("drone send");

        let first = listener.recv().await.expect("first datagram");
        assert_eq!(&first[..], b"bat:86;");
        assert_eq!(listener.peer(), Some(drone.local_addr().unwrap()));

        // Behaves as connected once the peer is known
        listener.send(b"hello").await.expect("send to adopted peer");
        let mut buf = [0u8; 16];
        let len = drone.recv(&mut buf).await.expect("drone recv");
        assert_eq!(&buf[..len], b"hello");
    }

    #[tokio::test]
    async fn cancel_unblocks_pending_receive() {
        let listener = std::sync::Arc::new(UdpEndpoint::listen("127.0.0.1", 0).await.unwrap());

        let waiter = {
            let listener = listener.clone();
            tokio::spawn(async move { listener.recv().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        listener.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("receive unblocked")
            .expect("task joined");
        assert!(matches!(result, Err(DroneError::Cancelled)));
        assert!(listener.is_cancelled());
        assert!(matches!(listener.send(b"x").await, Err(DroneError::Cancelled)));
    }

    #[tokio::test]
    async fn unresolvable_host_fails_construction() {
        let err = UdpEndpoint::connect("no-such-host.invalid", 8889).await.err().expect("error");
        assert!(matches!(err, DroneError::AddressResolution { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn bind_conflict_fails_construction() {
        let first = UdpEndpoint::listen("127.0.0.1", 0).await.unwrap();
        let port = first.local_addr().port();
        let err = UdpEndpoint::listen("127.0.0.1", port).await.err().expect("error");
        assert!(matches!(err, DroneError::Bind { .. }), "got {err:?}");
    }
}
