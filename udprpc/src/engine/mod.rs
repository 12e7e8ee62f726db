//! The RPC engine.
//!
//! A [`UdpRpc`] owns one transport bound to one local port. Once started, a single event-loop task owns all engine
//! state (transport, correlation table, call-id counter and handler) and everything else talks to it over a channel:
//!
//! ```text
//!  RpcClient::send ──Call──────┐
//!  Responder::succeed ─Reply───┤                      ┌── transport.send
//!  UdpRpc::register ─Register──┼──> EventLoop::run ───┤
//!  transport listener ─Inbound─┤                      └── PendingCalls / RequestHandler
//!  UdpRpc::stop ─Shutdown──────┘
//! ```
//!
//! Outbound calls race two clocks. Each attempt waits at most [`RpcConfig::attempt_timeout`] for its response and is
//! retried with a fresh call id when that runs out. The whole retry chain is bounded by
//! [`RpcConfig::retries_timeout`], after which the call fails with [`RpcError::RetriesExhausted`].

mod event_loop;
mod handler;
mod pending_calls;

pub use handler::{InboundRequest, RequestHandler, Responder};

use crate::config::RpcConfig;
use crate::errors::{ConfigError, RpcError, TransportError};
use crate::transport::{Datagram, NativeUdpTransport, Transport};
use event_loop::{EngineCommand, EventLoop};
use futures::channel::{mpsc, oneshot};
use log::*;
use serde_json::Value;
use std::net::SocketAddrV4;
use std::sync::Arc;
use tokio::task::JoinHandle;

enum EngineState<T> {
    Created {
        transport: T,
        command_receiver: mpsc::UnboundedReceiver<EngineCommand>,
    },
    Started {
        event_loop: JoinHandle<T>,
        local_port: Option<u16>,
    },
    /// Keeps the closed transport, if the event loop handed it back, so that repeated stops still go through it.
    Stopped(Option<T>),
}

/// A JSON-RPC 2.0 peer over UDP.
///
/// ```ignore
/// let mut server = UdpRpc::new(3000)?;
/// server.register(|req: InboundRequest, res: Responder| match req.method.as_str() {
///     "echo" => res.succeed(req.params.first().cloned().unwrap_or_default()),
///     _ => res.fail_with(ErrorObject::method_not_found(&req.method)),
/// });
/// server.start().await?;
/// ```
pub struct UdpRpc<T: Transport = NativeUdpTransport> {
    port: u16,
    client: RpcClient,
    state: EngineState<T>,
}

impl UdpRpc<NativeUdpTransport> {
    /// An engine on the native UDP transport, with timeouts taken from the environment (see
    /// [`RpcConfig::from_env`]).
    pub fn new(port: u16) -> Result<Self, ConfigError> {
        Ok(Self::with_config(port, RpcConfig::from_env()?))
    }

    pub fn with_config(port: u16, config: RpcConfig) -> Self {
        Self::with_transport(port, config, NativeUdpTransport::new())
    }
}

impl<T: Transport> UdpRpc<T> {
    /// An engine on an arbitrary transport. This is the seam for test doubles such as
    /// [`crate::RouterSimulatorTransport`].
    pub fn with_transport(port: u16, config: RpcConfig, transport: T) -> Self {
        let (command_sender, command_receiver) = mpsc::unbounded();
        let client = RpcClient { commands: command_sender, config };
        Self { port, client, state: EngineState::Created { transport, command_receiver } }
    }

    /// The port this engine was asked to listen on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The port actually bound, while the engine is running. It differs from [`UdpRpc::port`] when binding port 0,
    /// or when the transport remaps ports.
    pub fn local_port(&self) -> Option<u16> {
        match &self.state {
            EngineState::Started { local_port, .. } => *local_port,
            _ => None,
        }
    }

    pub fn config(&self) -> &RpcConfig {
        &self.client.config
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, EngineState::Started { .. })
    }

    /// A cloneable handle for making calls from other tasks. Calls through the handle fail with
    /// [`RpcError::Stopped`] once the engine has stopped.
    pub fn client(&self) -> RpcClient {
        self.client.clone()
    }

    /// Bind the transport and start processing traffic. An engine can only be started once.
    pub async fn start(&mut self) -> Result<(), RpcError> {
        let (mut transport, command_receiver) =
            match std::mem::replace(&mut self.state, EngineState::Stopped(None)) {
                EngineState::Created { transport, command_receiver } => (transport, command_receiver),
                other => {
                    self.state = other;
                    return Err(RpcError::AlreadyStarted);
                }
            };
        let inbound = self.client.commands.clone();
        transport.on_message(Arc::new(move |datagram: Datagram| {
            if inbound.unbounded_send(EngineCommand::Inbound(datagram)).is_err() {
                trace!("Engine stopped. Dropping inbound datagram.");
            }
        }));
        // The node listens on this port and also sends its requests from it.
        if let Err(e) = transport.bind(self.port).await {
            self.state = EngineState::Created { transport, command_receiver };
            return Err(e.into());
        }
        let local_port = transport.local_port();
        info!("UdpRpc engine started on port {} (bound {local_port:?})", self.port);
        let event_loop = EventLoop::new(transport, command_receiver, self.client.commands.clone());
        self.state = EngineState::Started { event_loop: tokio::spawn(event_loop.run()), local_port };
        Ok(())
    }

    /// Close the transport and stop the event loop. Stopping is idempotent: a transport that is not running counts
    /// as closed, and stopping an engine that never started (or already stopped) succeeds.
    pub async fn stop(&mut self) -> Result<(), RpcError> {
        match std::mem::replace(&mut self.state, EngineState::Stopped(None)) {
            EngineState::Created { mut transport, command_receiver } => {
                let result = closed_ok(transport.close().await);
                self.state = EngineState::Created { transport, command_receiver };
                result.map_err(RpcError::from)
            }
            EngineState::Started { event_loop, .. } => {
                let (sender, receiver) = oneshot::channel();
                let close_result = match self.client.commands.unbounded_send(EngineCommand::Shutdown(sender)) {
                    Ok(()) => receiver.await.unwrap_or(Ok(())),
                    Err(_) => Ok(()),
                };
                let transport = match event_loop.await {
                    Ok(transport) => Some(transport),
                    Err(e) => {
                        warn!("UdpRpc event loop ended abnormally. {e}");
                        None
                    }
                };
                self.state = EngineState::Stopped(transport);
                info!("UdpRpc engine on port {} stopped", self.port);
                closed_ok(close_result).map_err(RpcError::from)
            }
            EngineState::Stopped(Some(mut transport)) => {
                let result = closed_ok(transport.close().await);
                self.state = EngineState::Stopped(Some(transport));
                result.map_err(RpcError::from)
            }
            EngineState::Stopped(None) => Ok(()),
        }
    }

    /// Install the handler for inbound requests and notifications, replacing any previous one.
    pub fn register(&self, handler: impl RequestHandler) {
        if let Err(e) = self.client.register(handler) {
            warn!("Request handler was not registered. {e}");
        }
    }

    /// Call `method` on the peer at `destination` and wait for its result. See [`RpcClient::send`].
    pub async fn send(&self, method: &str, params: Vec<Value>, destination: SocketAddrV4) -> Result<Value, RpcError> {
        self.ensure_running()?;
        self.client.send(method, params, destination).await
    }

    /// Send a notification. See [`RpcClient::notify`].
    pub async fn notify(&self, method: &str, params: Vec<Value>, destination: SocketAddrV4) -> Result<(), RpcError> {
        self.ensure_running()?;
        self.client.notify(method, params, destination).await
    }

    fn ensure_running(&self) -> Result<(), RpcError> {
        match self.state {
            EngineState::Started { .. } => Ok(()),
            EngineState::Created { .. } => Err(RpcError::NotStarted),
            EngineState::Stopped(_) => Err(RpcError::Stopped),
        }
    }
}

impl<T: Transport> Drop for UdpRpc<T> {
    fn drop(&mut self) {
        if let EngineState::Started { event_loop, .. } = &self.state {
            event_loop.abort();
        }
    }
}

/// Closing a transport that is not running is a successful no-op.
fn closed_ok(result: Result<(), TransportError>) -> Result<(), TransportError> {
    match result {
        Err(TransportError::NotRunning) => Ok(()),
        other => other,
    }
}

/// A cheap, cloneable handle to an engine's event loop.
///
/// Like the engine itself, this struct does no work: it forwards commands to the event loop and waits for the
/// results. Calls made before the engine starts are queued until it does, still bounded by the retry budget.
#[derive(Clone)]
pub struct RpcClient {
    commands: mpsc::UnboundedSender<EngineCommand>,
    config: RpcConfig,
}

impl RpcClient {
    /// Call `method` on the peer at `destination`.
    ///
    /// Each attempt uses a new call id and waits up to the attempt timeout. Attempts that time out are retried;
    /// every other failure (a write the local stack refused, an error reported by the peer, the engine stopping) is
    /// returned straight away. If no attempt has succeeded when the retry budget runs out, the call fails with
    /// [`RpcError::RetriesExhausted`], even if an attempt is still in flight.
    pub async fn send(&self, method: &str, params: Vec<Value>, destination: SocketAddrV4) -> Result<Value, RpcError> {
        let budget = self.config.retries_timeout();
        match tokio::time::timeout(budget, self.send_with_retries(method, params, destination)).await {
            Ok(result) => result,
            Err(_) => {
                debug!("Call to '{method}' on {destination} ran out of retries after {budget:?}");
                Err(RpcError::RetriesExhausted(budget))
            }
        }
    }

    async fn send_with_retries(
        &self,
        method: &str,
        params: Vec<Value>,
        destination: SocketAddrV4,
    ) -> Result<Value, RpcError> {
        let mut attempt = 1;
        loop {
            match self.attempt(method, params.clone(), destination).await {
                Err(RpcError::AttemptTimeout(timeout)) => {
                    debug!("Attempt {attempt} of '{method}' on {destination} timed out after {timeout:?}. Retrying.");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn attempt(&self, method: &str, params: Vec<Value>, destination: SocketAddrV4) -> Result<Value, RpcError> {
        let timeout = self.config.attempt_timeout();
        let call = async {
            let (sender, receiver) = oneshot::channel();
            let command = EngineCommand::Call { method: method.to_string(), params, destination, sender };
            self.commands.unbounded_send(command).map_err(|_| RpcError::Stopped)?;
            receiver.await.map_err(|_| RpcError::Stopped)?
        };
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::AttemptTimeout(timeout)),
        }
    }

    /// Send `method` as a notification: no call id, no response, no retries. Only a failed write is reported.
    pub async fn notify(&self, method: &str, params: Vec<Value>, destination: SocketAddrV4) -> Result<(), RpcError> {
        let (sender, receiver) = oneshot::channel();
        let command = EngineCommand::Notify { method: method.to_string(), params, destination, sender };
        self.commands.unbounded_send(command).map_err(|_| RpcError::Stopped)?;
        receiver.await.map_err(|_| RpcError::Stopped)?
    }

    /// Install the handler for inbound requests and notifications, replacing any previous one.
    pub fn register(&self, handler: impl RequestHandler) -> Result<(), RpcError> {
        self.commands.unbounded_send(EngineCommand::Register(Arc::new(handler))).map_err(|_| RpcError::Stopped)
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }
}
