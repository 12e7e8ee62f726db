//! The datagram transport that an engine runs on.
//!
//! [`Transport`] is a narrow capability set: send a datagram, bind a local endpoint, close it, and be notified of
//! arrivals through a single listener. The engine is generic over it, which is what lets a test double stand in for
//! the real socket:
//!
//! - [`NativeUdpTransport`] passes straight through to a tokio UDP socket.
//! - [`RouterSimulatorTransport`] (feature `router_simulator`) behaves like a port-restricted NAT router in front of
//!   the socket.

mod native;
#[cfg(feature = "router_simulator")]
mod router_simulator;

pub use native::NativeUdpTransport;
#[cfg(feature = "router_simulator")]
pub use router_simulator::{RouterSimulatorTransport, ROUTER_PORT_RANGE};

use crate::errors::TransportError;
use std::future::Future;
use std::net::SocketAddrV4;
use std::sync::Arc;

/// One inbound datagram, as handed to the arrival listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub source: SocketAddrV4,
}

/// The arrival callback. It is invoked once per datagram, in arrival order, and must not block.
pub type DatagramListener = Arc<dyn Fn(Datagram) + Send + Sync>;

pub trait Transport: Send + Sync + 'static {
    /// Hand a datagram to the OS. An error means the local stack refused the write, not that the peer missed it.
    fn send(
        &self,
        payload: Vec<u8>,
        destination: SocketAddrV4,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Reserve the local endpoint. Implementations may bind a different physical port than the one requested;
    /// [`Transport::local_port`] reports the one actually in use.
    fn bind(&mut self, port: u16) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Release the endpoint. Fails with [`TransportError::NotRunning`] if the transport is not bound.
    fn close(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Register the arrival listener, replacing any previous one. The listener in place when [`Transport::bind`] is
    /// called receives the traffic.
    fn on_message(&mut self, listener: DatagramListener);

    fn local_port(&self) -> Option<u16>;
}
