use crate::message_types::{codes, CallId, ErrorObject};
use std::time::Duration;
use thiserror::Error;

/// Failures reported by a [`crate::Transport`] implementation.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The transport is not bound. `close` on an unbound transport reports this, and the engine treats it as a
    /// successful no-op.
    #[error("Not running")]
    NotRunning,
    #[error("The transport is already bound.")]
    AlreadyBound,
    #[error("I/O error. {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons an inbound datagram could not be turned into an envelope.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Datagram is not a well-formed envelope. {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid request. {reason}")]
    InvalidRequest { id: Option<CallId>, reason: String },
}

impl DecodeError {
    pub fn invalid(id: Option<CallId>, reason: impl Into<String>) -> Self {
        DecodeError::InvalidRequest { id, reason: reason.into() }
    }

    /// The id of the offending request, if one could be recovered. Only then can the failure be reported back.
    pub fn recoverable_id(&self) -> Option<CallId> {
        match self {
            DecodeError::Parse(_) => None,
            DecodeError::InvalidRequest { id, .. } => *id,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            DecodeError::Parse(_) => codes::PARSE_ERROR,
            DecodeError::InvalidRequest { .. } => codes::INVALID_REQUEST,
        }
    }

    pub fn to_error_object(&self) -> ErrorObject {
        ErrorObject::new(self.code(), self.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}. Expected a whole number of milliseconds.")]
    InvalidValue { key: String, value: String },
}

/// Everything that can go wrong with an outbound call, or with the engine lifecycle.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("The datagram could not be written. {0}")]
    Transport(#[from] TransportError),
    #[error("Could not encode the envelope. {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("Promise timed out in {} ms.", .0.as_millis())]
    AttemptTimeout(Duration),
    #[error("Promises timed out in {} ms.", .0.as_millis())]
    RetriesExhausted(Duration),
    #[error("The remote peer returned an error. {0}")]
    Remote(ErrorObject),
    #[error("The engine has not been started.")]
    NotStarted,
    #[error("The engine has already been started.")]
    AlreadyStarted,
    #[error("The engine stopped before the call completed.")]
    Stopped,
}

impl RpcError {
    /// The JSON-RPC error code that best describes this error.
    pub fn code(&self) -> i64 {
        match self {
            RpcError::AttemptTimeout(_) => codes::ATTEMPT_TIMEOUT,
            RpcError::RetriesExhausted(_) => codes::RETRIES_EXHAUSTED,
            RpcError::Remote(err) => err.code,
            _ => codes::INTERNAL_ERROR,
        }
    }

    pub fn to_error_object(&self) -> ErrorObject {
        match self {
            RpcError::Remote(err) => err.clone(),
            other => ErrorObject::new(other.code(), other.to_string()),
        }
    }

    /// The error object sent by the remote peer, if this is a remote failure.
    pub fn remote(&self) -> Option<&ErrorObject> {
        match self {
            RpcError::Remote(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, RpcError::RetriesExhausted(_))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn timeout_codes_match_engine_reserved_codes() {
        let attempt = RpcError::AttemptTimeout(Duration::from_millis(40));
        assert_eq!(attempt.code(), 3);
        assert_eq!(attempt.to_string(), "Promise timed out in 40 ms.");
        let exhausted = RpcError::RetriesExhausted(Duration::from_millis(150));
        assert_eq!(exhausted.code(), 4);
        assert!(exhausted.is_retries_exhausted());
        let obj = exhausted.to_error_object();
        assert_eq!(obj.code, 4);
        assert_eq!(obj.message, "Promises timed out in 150 ms.");
    }

    #[test]
    fn remote_errors_are_passed_through_untouched() {
        let remote = ErrorObject::new(-32601, "Method not found").with_data(serde_json::json!({"method": "x"}));
        let err = RpcError::Remote(remote.clone());
        assert_eq!(err.code(), -32601);
        assert_eq!(err.to_error_object(), remote);
        assert_eq!(err.remote(), Some(&remote));
    }

    #[test]
    fn decode_errors_only_report_back_with_an_id() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = DecodeError::from(parse);
        assert_eq!(err.code(), codes::PARSE_ERROR);
        assert_eq!(err.recoverable_id(), None);
        let err = DecodeError::invalid(Some(7), "bad version");
        assert_eq!(err.code(), codes::INVALID_REQUEST);
        assert_eq!(err.recoverable_id(), Some(7));
        assert_eq!(err.to_error_object().message, "Invalid request. bad version");
    }
}
