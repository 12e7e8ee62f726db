use super::event_loop::EngineCommand;
use crate::message_types::{CallId, ErrorObject, ResponseBody};
use futures::channel::mpsc;
use log::*;
use serde_json::Value;
use std::net::SocketAddrV4;

/// A request or notification received from a peer.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRequest {
    pub method: String,
    pub params: Vec<Value>,
    pub source: SocketAddrV4,
    /// `None` for notifications.
    pub id: Option<CallId>,
}

impl InboundRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn param(&self, index: usize) -> Option<&Value> {
        self.params.get(index)
    }
}

/// Answers every inbound request and notification on an engine. There is one handler per engine; dispatching on the
/// method name is up to the handler.
///
/// Handlers are called from the engine's event loop and must not block it. Anything slow should be spawned, with the
/// [`Responder`] moved into the task.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: InboundRequest, responder: Responder);
}

impl<F> RequestHandler for F
where
    F: Fn(InboundRequest, Responder) + Send + Sync + 'static,
{
    fn handle(&self, request: InboundRequest, responder: Responder) {
        self(request, responder)
    }
}

struct ReplyRoute {
    id: CallId,
    destination: SocketAddrV4,
    commands: mpsc::UnboundedSender<EngineCommand>,
}

/// Completes one inbound request. Consuming `self` guarantees that at most one response is ever sent.
///
/// For notifications the responder discards whatever outcome it is given.
pub struct Responder {
    route: Option<ReplyRoute>,
}

impl Responder {
    pub(crate) fn reply_to(
        id: CallId,
        destination: SocketAddrV4,
        commands: mpsc::UnboundedSender<EngineCommand>,
    ) -> Self {
        Self { route: Some(ReplyRoute { id, destination, commands }) }
    }

    pub(crate) fn discard() -> Self {
        Self { route: None }
    }

    /// True if nothing will be sent back, whatever the outcome.
    pub fn is_discarding(&self) -> bool {
        self.route.is_none()
    }

    /// Send back a response carrying `result`.
    pub fn succeed(mut self, result: Value) {
        self.complete(Ok(result));
    }

    /// Send back an internal error carrying `message`.
    pub fn fail(mut self, message: impl Into<String>) {
        self.complete(Err(ErrorObject::internal(message)));
    }

    /// Send back `error` as is.
    pub fn fail_with(mut self, error: ErrorObject) {
        self.complete(Err(error));
    }

    pub fn respond(mut self, outcome: Result<Value, ErrorObject>) {
        self.complete(outcome);
    }

    fn complete(&mut self, outcome: Result<Value, ErrorObject>) {
        let Some(route) = self.route.take() else {
            if let Err(err) = outcome {
                trace!("Discarding notification failure: {err}");
            }
            return;
        };
        let response = ResponseBody::from_outcome(route.id, outcome);
        let command = EngineCommand::Reply { destination: route.destination, response };
        if route.commands.unbounded_send(command).is_err() {
            warn!("Engine stopped before the response to request #{} could be sent", route.id);
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if let Some(route) = &self.route {
            warn!("Request #{} from {} was dropped without a response", route.id, route.destination);
        }
    }
}
