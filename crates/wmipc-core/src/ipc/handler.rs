//! Pluggable handlers invoked by the connection handler

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::ipc::protocol::MessageType;

/// Handles `COMMAND` payloads
///
/// Called synchronously for every command frame; the returned value is sent
/// back verbatim as the `COMMAND_RESPONSE` payload.
pub trait CommandHandler: Send + Sync {
    fn handle(&self, payload: Value) -> Value;
}

impl<F> CommandHandler for F
where
    F: Fn(Value) -> Value + Send + Sync,
{
    fn handle(&self, payload: Value) -> Value {
        self(payload)
    }
}

/// Handles the four REPL request types
///
/// The returned mapping is the response payload. It is discarded for
/// `REPL_SESSION_END`, which has no response frame.
pub trait ReplHandler: Send + Sync {
    fn handle(&self, msg_type: MessageType, payload: Value) -> BoxFuture<'_, Value>;
}

/// Build the conventional `{"error": message}` response
pub fn error_response(message: impl Into<String>) -> Value {
    serde_json::json!({ "error": message.into() })
}
