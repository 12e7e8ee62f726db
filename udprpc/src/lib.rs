//! Peer-to-peer JSON-RPC 2.0 over UDP.
//!
//! UDP gives no delivery guarantee, no ordering and no pairing of requests with responses. This crate adds what is
//! needed to make remote calls over it anyway:
//!
//! - every request carries a call id minted by the sending engine,
//! - responses are matched back to their call through a correlation table,
//! - each attempt waits a bounded time, and attempts that time out are retried until an overall retry budget is
//!   spent.
//!
//! Messages travel as JSON envelopes, one per datagram, that mark the body as a request or a response. The socket
//! sits behind the [`Transport`] trait so that test doubles, like the NAT-simulating [`RouterSimulatorTransport`],
//! can replace it without touching the engine.

pub mod config;
mod engine;
pub mod envelope;
pub mod errors;
pub mod message_types;
pub mod transport;

pub use config::RpcConfig;
pub use engine::{InboundRequest, RequestHandler, Responder, RpcClient, UdpRpc};
pub use errors::{ConfigError, DecodeError, RpcError, TransportError};
pub use message_types::{codes, CallId, Envelope, ErrorObject, RequestBody, ResponseBody};
#[cfg(feature = "router_simulator")]
pub use transport::RouterSimulatorTransport;
pub use transport::{Datagram, DatagramListener, NativeUdpTransport, Transport};
