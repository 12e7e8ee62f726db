use super::{Datagram, DatagramListener, NativeUdpTransport, Transport};
use crate::errors::TransportError;
use log::*;
use rand::Rng;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::SocketAddrV4;
use std::ops::Range;
use std::sync::{Arc, Mutex, PoisonError};

/// The ports the simulated router hands out in place of the one requested.
pub const ROUTER_PORT_RANGE: Range<u16> = 34_000..36_000;

const BIND_ATTEMPTS: usize = 5;

/// A transport that simulates a port-restricted NAT router sitting in front of the node.
///
/// - `bind(port)` binds a random port from [`ROUTER_PORT_RANGE`] instead of `port`, so peers see the router's port
///   as the source of everything this node sends.
/// - Every successful `send` punches a hole for the destination port.
/// - Inbound datagrams from a source port without a hole are silently dropped, the way a router drops unsolicited
///   traffic.
///
/// Meant for testing hole-punching behaviour only.
#[derive(Default)]
pub struct RouterSimulatorTransport {
    inner: NativeUdpTransport,
    punched: Arc<Mutex<HashSet<u16>>>,
    requested_port: Option<u16>,
}

impl RouterSimulatorTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// The port the node asked for, before the router remapped it.
    pub fn requested_port(&self) -> Option<u16> {
        self.requested_port
    }

    pub fn is_punched(&self, port: u16) -> bool {
        self.punched.lock().unwrap_or_else(PoisonError::into_inner).contains(&port)
    }
}

impl Transport for RouterSimulatorTransport {
    async fn send(&self, payload: Vec<u8>, destination: SocketAddrV4) -> Result<(), TransportError> {
        self.inner.send(payload, destination).await?;
        let newly_punched = self.punched.lock().unwrap_or_else(PoisonError::into_inner).insert(destination.port());
        if newly_punched {
            info!(
                "A hole was punched from port {} to router port {:?} (original port {:?})",
                destination.port(),
                self.inner.local_port(),
                self.requested_port
            );
        }
        Ok(())
    }

    async fn bind(&mut self, port: u16) -> Result<(), TransportError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let router_port = rand::rng().random_range(ROUTER_PORT_RANGE);
            match self.inner.bind(router_port).await {
                Ok(()) => {
                    info!(
                        "Router simulator: was requested to bind node port {port} but bound router port {router_port} \
                         instead"
                    );
                    self.requested_port = Some(port);
                    return Ok(());
                }
                Err(TransportError::Io(e)) if e.kind() == ErrorKind::AddrInUse && attempts < BIND_ATTEMPTS => {
                    debug!("Router port {router_port} is taken. Trying another one.");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.close().await
    }

    fn on_message(&mut self, listener: DatagramListener) {
        let punched = Arc::clone(&self.punched);
        self.inner.on_message(Arc::new(move |datagram: Datagram| {
            let allowed = punched.lock().unwrap_or_else(PoisonError::into_inner).contains(&datagram.source.port());
            if allowed {
                listener(datagram);
            } else {
                trace!("Router simulator: dropping unsolicited datagram from {}", datagram.source);
            }
        }));
    }

    fn local_port(&self) -> Option<u16> {
        self.inner.local_port()
    }
}
