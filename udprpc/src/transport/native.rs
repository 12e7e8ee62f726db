use super::{Datagram, DatagramListener, Transport};
use crate::errors::TransportError;
use log::*;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// Large enough for any UDP payload.
const RECEIVE_BUFFER_SIZE: usize = 65_536;

/// The default transport: an IPv4 tokio UDP socket listening on all interfaces.
///
/// Binding spawns a receive task on the current tokio runtime that forwards every datagram to the listener. Closing
/// (or dropping) the transport aborts that task and releases the socket.
#[derive(Default)]
pub struct NativeUdpTransport {
    socket: Option<Arc<UdpSocket>>,
    listener: Option<DatagramListener>,
    receiver: Option<JoinHandle<()>>,
}

impl NativeUdpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bound(&self) -> bool {
        self.socket.is_some()
    }
}

impl Transport for NativeUdpTransport {
    async fn send(&self, payload: Vec<u8>, destination: SocketAddrV4) -> Result<(), TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotRunning)?;
        let sent = socket.send_to(&payload, destination).await?;
        trace!("Sent {sent} bytes to {destination}");
        Ok(())
    }

    async fn bind(&mut self, port: u16) -> Result<(), TransportError> {
        if self.socket.is_some() {
            return Err(TransportError::AlreadyBound);
        }
        let socket = Arc::new(UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)).await?);
        let local = socket.local_addr()?;
        debug!("UDP socket bound to {local}");
        let listener = self.listener.clone();
        if listener.is_none() {
            warn!("UDP socket on {local} was bound without a listener. Inbound datagrams will be dropped.");
        }
        self.receiver = Some(tokio::spawn(receive_loop(Arc::clone(&socket), listener)));
        self.socket = Some(socket);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let socket = self.socket.take().ok_or(TransportError::NotRunning)?;
        let local = socket.local_addr();
        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
            // The receive task holds a handle to the socket. It must be gone before the port is free again.
            if let Err(e) = receiver.await {
                if !e.is_cancelled() {
                    warn!("UDP receive task ended abnormally. {e}");
                }
            }
        }
        drop(socket);
        if let Ok(local) = local {
            debug!("UDP socket on {local} closed");
        }
        Ok(())
    }

    fn on_message(&mut self, listener: DatagramListener) {
        self.listener = Some(listener);
    }

    fn local_port(&self) -> Option<u16> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok()).map(|addr| addr.port())
    }
}

impl Drop for NativeUdpTransport {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
        }
    }
}

async fn receive_loop(socket: Arc<UdpSocket>, listener: Option<DatagramListener>) {
    let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, SocketAddr::V4(source))) => {
                trace!("Received {len} bytes from {source}");
                match &listener {
                    Some(listener) => listener(Datagram { payload: buf[..len].to_vec(), source }),
                    None => trace!("No listener registered. Dropping datagram from {source}"),
                }
            }
            Ok((_, SocketAddr::V6(source))) => {
                debug!("Ignoring datagram from IPv6 address {source}");
            }
            // ICMP port-unreachable from an earlier send can surface here on some platforms. It does not affect the
            // socket, so keep receiving.
            Err(e) => {
                warn!("Error receiving datagram: {e}");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use futures::channel::mpsc;
    use futures::StreamExt;
    use std::time::Duration;

    fn localhost(port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
    }

    #[tokio::test]
    async fn close_is_only_valid_when_bound() {
        let mut transport = NativeUdpTransport::new();
        assert!(matches!(transport.close().await, Err(TransportError::NotRunning)));
        transport.bind(0).await.unwrap();
        assert!(transport.is_bound());
        assert!(matches!(transport.bind(0).await, Err(TransportError::AlreadyBound)));
        transport.close().await.unwrap();
        assert!(matches!(transport.close().await, Err(TransportError::NotRunning)));
        assert_eq!(transport.local_port(), None);
    }

    #[tokio::test]
    async fn close_releases_the_port() {
        let mut transport = NativeUdpTransport::new();
        transport.bind(0).await.unwrap();
        let port = transport.local_port().unwrap();
        transport.close().await.unwrap();
        let rebound = std::net::UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
        assert!(rebound.is_ok(), "port {port} still in use after close: {rebound:?}");
        drop(rebound);
        transport.bind(port).await.unwrap();
        assert_eq!(transport.local_port(), Some(port));
        transport.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_releases_the_port_on_a_multi_thread_runtime() {
        for _ in 0..20 {
            let mut transport = NativeUdpTransport::new();
            transport.bind(0).await.unwrap();
            let port = transport.local_port().unwrap();
            transport.close().await.unwrap();
            let rebound = std::net::UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
            assert!(rebound.is_ok(), "port {port} still in use after close: {rebound:?}");
        }
    }

    #[tokio::test]
    async fn send_requires_a_bound_socket() {
        let transport = NativeUdpTransport::new();
        let result = transport.send(b"hi".to_vec(), localhost(9)).await;
        assert!(matches!(result, Err(TransportError::NotRunning)));
    }

    #[tokio::test]
    async fn delivers_datagrams_to_the_listener() {
        let (tx, mut rx) = mpsc::unbounded();
        let mut receiver = NativeUdpTransport::new();
        receiver.on_message(Arc::new(move |d: Datagram| {
            let _ = tx.unbounded_send(d);
        }));
        receiver.bind(0).await.unwrap();
        let receiver_port = receiver.local_port().unwrap();

        let mut sender = NativeUdpTransport::new();
        sender.bind(0).await.unwrap();
        let sender_port = sender.local_port().unwrap();
        sender.send(b"message1".to_vec(), localhost(receiver_port)).await.unwrap();
        sender.send(b"message2".to_vec(), localhost(receiver_port)).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), rx.next()).await.unwrap().unwrap();
        assert_eq!(first.payload, b"message1");
        assert_eq!(first.source.port(), sender_port);
        let second = tokio::time::timeout(Duration::from_secs(1), rx.next()).await.unwrap().unwrap();
        assert_eq!(second.payload, b"message2");
    }
}
