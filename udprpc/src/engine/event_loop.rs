use super::handler::{InboundRequest, RequestHandler, Responder};
use super::pending_calls::{CallSender, PendingCalls};
use crate::envelope::{decode_envelope, encode_envelope};
use crate::errors::{DecodeError, RpcError, TransportError};
use crate::message_types::{CallId, Envelope, ErrorObject, RequestBody, ResponseBody};
use crate::transport::{Datagram, Transport};
use futures::channel::{mpsc, oneshot};
use futures::StreamExt;
use log::*;
use serde_json::Value;
use std::net::SocketAddrV4;
use std::sync::Arc;

/// Everything the event loop acts on. Outbound calls, handler replies and inbound datagrams all arrive through the
/// same channel, which makes the event loop the only writer of engine state.
pub(crate) enum EngineCommand {
    /// Write one request and, if the write succeeds, wait in the correlation table for its response.
    Call {
        method: String,
        params: Vec<Value>,
        destination: SocketAddrV4,
        sender: CallSender,
    },
    /// Write one notification. Only the write result is reported.
    Notify {
        method: String,
        params: Vec<Value>,
        destination: SocketAddrV4,
        sender: oneshot::Sender<Result<(), RpcError>>,
    },
    /// A handler finished an inbound request.
    Reply {
        destination: SocketAddrV4,
        response: ResponseBody,
    },
    Register(Arc<dyn RequestHandler>),
    /// Pushed by the transport's arrival listener.
    Inbound(Datagram),
    Shutdown(oneshot::Sender<Result<(), TransportError>>),
}

/// Owns the transport and the correlation table of a started engine and processes [`EngineCommand`]s one at a time.
pub(crate) struct EventLoop<T: Transport> {
    transport: T,
    pending: PendingCalls,
    next_id: CallId,
    handler: Option<Arc<dyn RequestHandler>>,
    command_receiver: mpsc::UnboundedReceiver<EngineCommand>,
    /// Handed to [`Responder`]s so that handler replies come back through the loop.
    command_sender: mpsc::UnboundedSender<EngineCommand>,
}

impl<T: Transport> EventLoop<T> {
    pub fn new(
        transport: T,
        command_receiver: mpsc::UnboundedReceiver<EngineCommand>,
        command_sender: mpsc::UnboundedSender<EngineCommand>,
    ) -> Self {
        Self { transport, pending: PendingCalls::new(), next_id: 0, handler: None, command_receiver, command_sender }
    }

    /// Runs until a shutdown command arrives, then hands the (closed) transport back.
    pub async fn run(mut self) -> T {
        while let Some(command) = self.command_receiver.next().await {
            match command {
                EngineCommand::Call { method, params, destination, sender } => {
                    self.start_call(method, params, destination, sender).await;
                }
                EngineCommand::Notify { method, params, destination, sender } => {
                    let envelope = Envelope::from(RequestBody::notification(method, params));
                    let result = write(&self.transport, &envelope, destination).await;
                    if sender.send(result).is_err() {
                        trace!("Caller stopped waiting for the notification write result");
                    }
                }
                EngineCommand::Reply { destination, response } => {
                    let envelope = Envelope::from(response);
                    match write(&self.transport, &envelope, destination).await {
                        Ok(()) => trace!("{envelope} sent to {destination}"),
                        Err(e) => error!("Failed to send {envelope} to {destination}: {e}"),
                    }
                }
                EngineCommand::Register(handler) => {
                    if self.handler.replace(handler).is_some() {
                        debug!("Request handler replaced");
                    }
                }
                EngineCommand::Inbound(datagram) => self.handle_datagram(datagram).await,
                EngineCommand::Shutdown(sender) => {
                    let result = self.transport.close().await;
                    if !self.pending.is_empty() {
                        debug!("Shutting down with {} calls still pending", self.pending.len());
                    }
                    let _ = sender.send(result);
                    break;
                }
            }
        }
        self.transport
    }

    fn next_call_id(&mut self) -> CallId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    async fn start_call(&mut self, method: String, params: Vec<Value>, destination: SocketAddrV4, sender: CallSender) {
        let id = self.next_call_id();
        let envelope = Envelope::from(RequestBody::call(id, method, params));
        match write(&self.transport, &envelope, destination).await {
            Ok(()) => {
                trace!("{envelope} sent to {destination}");
                self.pending.register(id, sender);
            }
            Err(e) => {
                debug!("Could not send request #{id} to {destination}: {e}");
                let _ = sender.send(Err(e));
            }
        }
    }

    async fn handle_datagram(&mut self, datagram: Datagram) {
        let Datagram { payload, source } = datagram;
        let envelope = match decode_envelope(&payload) {
            Ok(envelope) => envelope,
            Err(err) => return self.reject_datagram(err, source).await,
        };
        trace!("Received {} envelope from {source}", envelope.message_type());
        match envelope {
            Envelope::Response(response) => self.complete_call(response, source),
            Envelope::Request(request) => self.dispatch_request(request, source),
        }
    }

    fn complete_call(&mut self, response: ResponseBody, source: SocketAddrV4) {
        let id = response.id;
        match self.pending.remove(id) {
            Some(sender) => {
                trace!("Completing call #{id} with response from {source}");
                let outcome = response.into_outcome().map_err(RpcError::Remote);
                if sender.send(outcome).is_err() {
                    warn!("Response #{id} from {source} arrived after the caller stopped waiting");
                }
            }
            None => {
                warn!("Received a response from {source}, but found no matching call id {id}");
            }
        }
    }

    fn dispatch_request(&mut self, request: RequestBody, source: SocketAddrV4) {
        let RequestBody { method, params, id, .. } = request;
        let responder = match id {
            Some(id) => Responder::reply_to(id, source, self.command_sender.clone()),
            None => Responder::discard(),
        };
        let request = InboundRequest { method, params, source, id };
        match &self.handler {
            Some(handler) => handler.handle(request, responder),
            None => {
                warn!("No request handler registered. Rejecting '{}' from {source}", request.method);
                responder.fail_with(ErrorObject::method_not_found(&request.method));
            }
        }
    }

    async fn reject_datagram(&mut self, err: DecodeError, source: SocketAddrV4) {
        warn!("Dropping datagram from {source}. {err}");
        let Some(id) = err.recoverable_id() else {
            return;
        };
        let envelope = Envelope::from(ResponseBody::failure(id, err.to_error_object()));
        if let Err(e) = write(&self.transport, &envelope, source).await {
            error!("Failed to send {envelope} to {source}: {e}");
        }
    }
}

async fn write<T: Transport>(transport: &T, envelope: &Envelope, destination: SocketAddrV4) -> Result<(), RpcError> {
    let payload = encode_envelope(envelope)?;
    transport.send(payload, destination).await?;
    Ok(())
}
