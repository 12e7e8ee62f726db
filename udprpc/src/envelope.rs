//! Encoding and decoding of envelopes to and from datagram payloads.
//!
//! Every datagram carries exactly one compact JSON envelope. Decoding happens in two stages so that the two failure
//! modes stay distinguishable:
//!
//! 1. The payload must be a JSON object with a `message_type` string and a `body`. Anything else is a
//!    [`DecodeError::Parse`].
//! 2. The `message_type` must be `request` or `response`, and the body must be a valid JSON-RPC 2.0 message of that
//!    kind. Anything else is a [`DecodeError::InvalidRequest`], which carries the request id when one can be
//!    recovered from the body.

use crate::errors::DecodeError;
use crate::message_types::{CallId, Envelope, MessageType, RequestBody, ResponseBody, JSONRPC_VERSION};
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
struct RawEnvelope {
    message_type: String,
    body: Value,
}

pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(envelope)
}

pub fn decode_envelope(payload: &[u8]) -> Result<Envelope, DecodeError> {
    let raw: RawEnvelope = serde_json::from_slice(payload)?;
    match raw.message_type.as_str() {
        "request" => decode_request(raw.body).map(Envelope::Request),
        "response" => decode_response(raw.body).map(Envelope::Response),
        other => Err(DecodeError::invalid(None, format!("Unknown message type '{other}'"))),
    }
}

fn decode_request(body: Value) -> Result<RequestBody, DecodeError> {
    let id = body.get("id").and_then(Value::as_u64);
    let request: RequestBody = serde_json::from_value(body)
        .map_err(|e| DecodeError::invalid(id, format!("Malformed {} body. {e}", MessageType::Request)))?;
    check_version(&request.jsonrpc, id)?;
    Ok(request)
}

fn decode_response(body: Value) -> Result<ResponseBody, DecodeError> {
    let response: ResponseBody = serde_json::from_value(body)
        .map_err(|e| DecodeError::invalid(None, format!("Malformed {} body. {e}", MessageType::Response)))?;
    check_version(&response.jsonrpc, None)?;
    Ok(response)
}

fn check_version(version: &str, id: Option<CallId>) -> Result<(), DecodeError> {
    if version == JSONRPC_VERSION {
        Ok(())
    } else {
        Err(DecodeError::invalid(id, format!("Unsupported JSON-RPC version '{version}'")))
    }
}
