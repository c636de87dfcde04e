//! Per-connection request loop
//!
//! One `ConnectionHandler` serves exactly one accepted stream. Requests are
//! handled strictly in order: the next frame is not read until the response
//! for the current one has been written.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::ipc::handler::{error_response, CommandHandler, ReplHandler};
use crate::ipc::lock::LockGate;
use crate::ipc::protocol::{read_message, write_message, MessageType};

/// Slot holding the optional REPL handler, shared with the server so it can
/// be installed or removed while connections are open
pub type ReplSlot = Arc<RwLock<Option<Arc<dyn ReplHandler>>>>;

/// Error payload for commands refused by the lock gate
pub const LOCKED_MESSAGE: &str = "Session is locked.";

/// Error payload for REPL requests when no REPL handler is installed
pub const REPL_DISABLED_MESSAGE: &str = "REPL not enabled";

/// Connection state machine
#[derive(Debug)]
enum ConnectionState {
    /// Waiting for the next frame
    AwaitFrame,
    /// A decoded request is being handled
    Dispatch(MessageType, Value),
    /// Terminal state
    Closed,
}

/// Serves the frames of a single connection
pub struct ConnectionHandler<S> {
    stream: S,
    commands: Arc<dyn CommandHandler>,
    repl: ReplSlot,
    lock: LockGate,
    peer: u64,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        commands: Arc<dyn CommandHandler>,
        repl: ReplSlot,
        lock: LockGate,
        peer: u64,
    ) -> Self {
        Self {
            stream,
            commands,
            repl,
            lock,
            peer,
        }
    }

    /// Run until the peer closes, sends `CLOSE`, or violates the protocol
    pub async fn run(mut self) {
        tracing::debug!("IPC connection {} opened", self.peer);
        let mut state = ConnectionState::AwaitFrame;
        loop {
            state = match state {
                ConnectionState::AwaitFrame => self.await_frame().await,
                ConnectionState::Dispatch(msg_type, payload) => {
                    self.dispatch(msg_type, payload).await
                }
                ConnectionState::Closed => break,
            };
        }
        tracing::debug!("IPC connection {} closed", self.peer);
    }

    async fn await_frame(&mut self) -> ConnectionState {
        match read_message(&mut self.stream).await {
            Ok(Some((msg_type, payload))) => ConnectionState::Dispatch(msg_type, payload),
            Ok(None) => ConnectionState::Closed,
            Err(e) => {
                tracing::warn!("IPC connection {}: dropping peer: {}", self.peer, e);
                ConnectionState::Closed
            }
        }
    }

    async fn dispatch(&mut self, msg_type: MessageType, payload: Value) -> ConnectionState {
        match msg_type {
            MessageType::Close => ConnectionState::Closed,
            MessageType::Keepalive => self.respond(MessageType::KeepaliveAck, &Value::Null).await,
            MessageType::Command => {
                let response = self.handle_command(payload);
                self.respond(MessageType::CommandResponse, &response).await
            }
            t if t.is_repl_request() => self.handle_repl(t, payload).await,
            other => {
                tracing::debug!(
                    "IPC connection {}: ignoring unexpected {} frame",
                    self.peer,
                    other
                );
                ConnectionState::AwaitFrame
            }
        }
    }

    fn handle_command(&self, payload: Value) -> Value {
        if self.lock.is_locked() {
            return error_response(LOCKED_MESSAGE);
        }
        let commands = self.commands.clone();
        match catch_unwind(AssertUnwindSafe(move || commands.handle(payload))) {
            Ok(response) => response,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                tracing::error!("Command handler panicked: {}", reason);
                error_response(format!("Command handler failed: {}", reason))
            }
        }
    }

    async fn handle_repl(&mut self, msg_type: MessageType, payload: Value) -> ConnectionState {
        let handler = self.repl.read().clone();
        let response = match handler {
            Some(handler) => handler.handle(msg_type, payload).await,
            None => error_response(REPL_DISABLED_MESSAGE),
        };
        match msg_type.response_type() {
            Some(response_type) => self.respond(response_type, &response).await,
            None => ConnectionState::AwaitFrame,
        }
    }

    async fn respond(&mut self, msg_type: MessageType, payload: &Value) -> ConnectionState {
        match write_message(&mut self.stream, msg_type, payload).await {
            Ok(()) => ConnectionState::AwaitFrame,
            Err(e) => {
                tracing::debug!("IPC connection {}: write failed: {}", self.peer, e);
                ConnectionState::Closed
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncWriteExt, DuplexStream};

    struct CountingHandler {
        calls: AtomicUsize,
    }

    impl CommandHandler for CountingHandler {
        fn handle(&self, payload: Value) -> Value {
            self.calls.fetch_add(1, Ordering::SeqCst);
            json!({"echo": payload})
        }
    }

    struct StubRepl;

    impl ReplHandler for StubRepl {
        fn handle(&self, msg_type: MessageType, _payload: Value) -> BoxFuture<'_, Value> {
            Box::pin(async move { json!({"handled": msg_type.to_string()}) })
        }
    }

    struct Harness {
        client: DuplexStream,
        handler: Arc<CountingHandler>,
        repl: ReplSlot,
        lock: LockGate,
        task: tokio::task::JoinHandle<()>,
    }

    fn spawn_handler() -> Harness {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        });
        let repl: ReplSlot = Arc::new(RwLock::new(None));
        let lock = LockGate::new();
        let conn = ConnectionHandler::new(server, handler.clone(), repl.clone(), lock.clone(), 1);
        let task = tokio::spawn(conn.run());
        Harness {
            client,
            handler,
            repl,
            lock,
            task,
        }
    }

    async fn request(
        client: &mut DuplexStream,
        msg_type: MessageType,
        payload: Value,
    ) -> (MessageType, Value) {
        write_message(client, msg_type, &payload).await.unwrap();
        read_message(client).await.unwrap().expect("response frame")
    }

    #[tokio::test]
    async fn test_command_roundtrip() {
        let mut h = spawn_handler();
        let (t, resp) = request(&mut h.client, MessageType::Command, json!(["status"])).await;
        assert_eq!(t, MessageType::CommandResponse);
        assert_eq!(resp, json!({"echo": ["status"]}));
        assert_eq!(h.handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lock_gate_refuses_commands_but_not_keepalive() {
        let mut h = spawn_handler();
        h.lock.lock();

        let (t, resp) = request(&mut h.client, MessageType::Command, json!("status")).await;
        assert_eq!(t, MessageType::CommandResponse);
        assert_eq!(resp, json!({"error": LOCKED_MESSAGE}));
        assert_eq!(h.handler.calls.load(Ordering::SeqCst), 0);

        let (t, resp) = request(&mut h.client, MessageType::Keepalive, Value::Null).await;
        assert_eq!(t, MessageType::KeepaliveAck);
        assert_eq!(resp, Value::Null);

        h.lock.unlock();
        let (_, resp) = request(&mut h.client, MessageType::Command, json!(1)).await;
        assert_eq!(resp, json!({"echo": 1}));
    }

    #[tokio::test]
    async fn test_repl_without_handler_reports_disabled() {
        let mut h = spawn_handler();
        let (t, resp) = request(&mut h.client, MessageType::ReplEval, json!({"code": "1"})).await;
        assert_eq!(t, MessageType::ReplEvalResponse);
        assert!(resp["error"].as_str().unwrap().contains("not enabled"));

        let (t, _) = request(&mut h.client, MessageType::ReplComplete, json!({"text": "x"})).await;
        assert_eq!(t, MessageType::ReplCompleteResponse);

        // Session end has no response; the next request is still answered
        write_message(&mut h.client, MessageType::ReplSessionEnd, &json!({"session_id": "x"}))
            .await
            .unwrap();
        let (t, _) = request(&mut h.client, MessageType::Keepalive, Value::Null).await;
        assert_eq!(t, MessageType::KeepaliveAck);
    }

    #[tokio::test]
    async fn test_repl_handler_installed_later() {
        let mut h = spawn_handler();
        *h.repl.write() = Some(Arc::new(StubRepl));
        let (t, resp) = request(&mut h.client, MessageType::ReplSessionStart, json!({})).await;
        assert_eq!(t, MessageType::ReplEvalResponse);
        assert_eq!(resp, json!({"handled": "REPL_SESSION_START"}));
    }

    #[tokio::test]
    async fn test_unexpected_type_is_ignored() {
        let mut h = spawn_handler();
        write_message(&mut h.client, MessageType::CommandResponse, &json!({}))
            .await
            .unwrap();
        let (t, _) = request(&mut h.client, MessageType::Keepalive, Value::Null).await;
        assert_eq!(t, MessageType::KeepaliveAck);
    }

    #[tokio::test]
    async fn test_close_ends_connection() {
        let mut h = spawn_handler();
        write_message(&mut h.client, MessageType::Close, &Value::Null)
            .await
            .unwrap();
        h.task.await.unwrap();
        assert!(read_message(&mut h.client).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_protocol_error_closes_without_response() {
        let mut h = spawn_handler();
        h.client.write_all(b"\x02\x01\x00\x00\x00\x00").await.unwrap();
        h.task.await.unwrap();
        assert!(read_message(&mut h.client).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let (mut client, server) = tokio::io::duplex(1024);
        let handler: Arc<dyn CommandHandler> =
            Arc::new(|_payload: Value| -> Value { panic!("boom") });
        let conn = ConnectionHandler::new(
            server,
            handler,
            Arc::new(RwLock::new(None)),
            LockGate::new(),
            2,
        );
        tokio::spawn(conn.run());

        let (t, resp) = request(&mut client, MessageType::Command, json!({})).await;
        assert_eq!(t, MessageType::CommandResponse);
        assert!(resp["error"].as_str().unwrap().contains("boom"));

        let (t, _) = request(&mut client, MessageType::Keepalive, Value::Null).await;
        assert_eq!(t, MessageType::KeepaliveAck);
    }
}
