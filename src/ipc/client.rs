//! IPC clients for the control socket
//!
//! [`Client`] opens a connection per command. [`PersistentClient`] keeps one
//! connection open across many request/response exchanges and is what the
//! REPL front-end uses.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::UnixStream;
use wmipc_core::ipc::protocol::{read_message, write_message, MessageType, ProtocolError};

/// Client-side failures
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("Could not connect to {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not connected to the host")]
    NotConnected,

    #[error("No response to {0} within {1:?}")]
    Timeout(MessageType, Duration),

    #[error("Expected {expected} response, got {got}")]
    UnexpectedResponse {
        expected: MessageType,
        got: MessageType,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("IPC I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Host returned an error: {0}")]
    Server(String),
}

/// Bounded wait per request kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub command: Duration,
    pub eval: Duration,
    pub session_start: Duration,
    pub complete: Duration,
    pub keepalive: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command: Duration::from_secs(30),
            eval: Duration::from_secs(30),
            session_start: Duration::from_secs(30),
            complete: Duration::from_secs(5),
            keepalive: Duration::from_secs(5),
        }
    }
}

/// Answer to a `REPL_EVAL` request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvalResponse {
    pub session_id: String,
    pub output: String,
    /// The host buffered the code and waits for more lines
    pub more: bool,
}

/// One-shot client: connect, send one command, disconnect
#[derive(Debug, Clone)]
pub struct Client {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Client {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: Timeouts::default().command,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send `payload` as a `COMMAND` and return the host's response
    pub async fn send(&self, payload: &Value) -> Result<Value, IpcError> {
        let timeouts = Timeouts {
            command: self.timeout,
            ..Timeouts::default()
        };
        let mut client = PersistentClient::new(&self.socket_path).with_timeouts(timeouts);
        client.connect().await?;
        let response = client.send_command(payload).await;
        client.close().await;
        response
    }
}

/// Client holding one connection open across requests
///
/// Any transport failure, including a timeout, drops the connection so a
/// late response can never be taken for the answer to a later request.
/// Call [`PersistentClient::connect`] again to recover.
#[derive(Debug)]
pub struct PersistentClient {
    socket_path: PathBuf,
    timeouts: Timeouts,
    stream: Option<UnixStream>,
}

impl PersistentClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeouts: Timeouts::default(),
            stream: None,
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the connection; a no-op when already connected
    pub async fn connect(&mut self) -> Result<(), IpcError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|source| IpcError::Connect {
                path: self.socket_path.clone(),
                source,
            })?;
        tracing::debug!("Connected to {}", self.socket_path.display());
        self.stream = Some(stream);
        Ok(())
    }

    /// Say goodbye with a `CLOSE` frame and drop the connection
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = write_message(&mut stream, MessageType::Close, &Value::Null).await {
                tracing::debug!("Failed to send CLOSE: {}", e);
            }
        }
    }

    /// Send a `COMMAND`; the response is returned as is, errors included
    pub async fn send_command(&mut self, payload: &Value) -> Result<Value, IpcError> {
        let timeout = self.timeouts.command;
        self.request(MessageType::Command, payload, timeout).await
    }

    /// Round-trip a `KEEPALIVE`
    pub async fn keepalive(&mut self) -> Result<(), IpcError> {
        let timeout = self.timeouts.keepalive;
        self.request(MessageType::Keepalive, &Value::Null, timeout)
            .await
            .map(|_| ())
    }

    /// Open a REPL session and return its id
    pub async fn start_session(&mut self) -> Result<String, IpcError> {
        let timeout = self.timeouts.session_start;
        let response = self
            .request(MessageType::ReplSessionStart, &json!({}), timeout)
            .await?;
        let response = check_error(response)?;
        string_field(&response, "session_id").ok_or_else(|| missing_field("session_id"))
    }

    /// Evaluate `code`, in `session_id` or a fresh session when `None`
    pub async fn send_eval(
        &mut self,
        code: &str,
        session_id: Option<&str>,
    ) -> Result<EvalResponse, IpcError> {
        let timeout = self.timeouts.eval;
        let payload = json!({ "code": code, "session_id": session_id });
        let response = check_error(self.request(MessageType::ReplEval, &payload, timeout).await?)?;
        Ok(EvalResponse {
            session_id: string_field(&response, "session_id")
                .ok_or_else(|| missing_field("session_id"))?,
            output: string_field(&response, "output").unwrap_or_default(),
            more: response
                .get("more")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    /// Completion candidates for `text`
    pub async fn send_complete(
        &mut self,
        text: &str,
        session_id: Option<&str>,
    ) -> Result<Vec<String>, IpcError> {
        let timeout = self.timeouts.complete;
        let payload = json!({ "text": text, "session_id": session_id });
        let response =
            check_error(self.request(MessageType::ReplComplete, &payload, timeout).await?)?;
        let completions = response
            .get("completions")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(completions)
    }

    /// Discard a session; the host sends no response
    pub async fn end_session(&mut self, session_id: &str) -> Result<(), IpcError> {
        let timeout = self.timeouts.keepalive;
        let payload = json!({ "session_id": session_id });
        let stream = self.stream.as_mut().ok_or(IpcError::NotConnected)?;
        let sent = tokio::time::timeout(
            timeout,
            write_message(stream, MessageType::ReplSessionEnd, &payload),
        )
        .await;
        let result = match sent {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(IpcError::from(e)),
            Err(_) => Err(IpcError::Timeout(MessageType::ReplSessionEnd, timeout)),
        };
        if result.is_err() {
            self.stream = None;
        }
        result
    }

    /// Write one frame and wait for its matching response
    async fn request(
        &mut self,
        msg_type: MessageType,
        payload: &Value,
        timeout: Duration,
    ) -> Result<Value, IpcError> {
        let expected = msg_type
            .response_type()
            .ok_or(IpcError::UnexpectedResponse {
                expected: msg_type,
                got: msg_type,
            })?;
        let stream = self.stream.as_mut().ok_or(IpcError::NotConnected)?;
        let exchange = round_trip(stream, msg_type, expected, payload);

        let result = match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(IpcError::Timeout(msg_type, timeout)),
        };
        if let Err(e) = &result {
            tracing::debug!("Dropping connection after failed {} request: {}", msg_type, e);
            self.stream = None;
        }
        result
    }
}

async fn round_trip(
    stream: &mut UnixStream,
    msg_type: MessageType,
    expected: MessageType,
    payload: &Value,
) -> Result<Value, IpcError> {
    write_message(stream, msg_type, payload).await?;
    match read_message(stream).await? {
        Some((got, response)) if got == expected => Ok(response),
        Some((got, _)) => Err(IpcError::UnexpectedResponse { expected, got }),
        None => Err(IpcError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "host closed the connection",
        ))),
    }
}

/// Turn an `{"error": ..}` payload into [`IpcError::Server`]
fn check_error(response: Value) -> Result<Value, IpcError> {
    match response.get("error") {
        Some(error) => Err(IpcError::Server(
            error.as_str().map_or_else(|| error.to_string(), str::to_string),
        )),
        None => Ok(response),
    }
}

fn string_field(response: &Value, key: &str) -> Option<String> {
    response.get(key).and_then(Value::as_str).map(str::to_string)
}

fn missing_field(key: &str) -> IpcError {
    IpcError::Server(format!("response is missing '{}'", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use wmipc_core::ipc::{LockGate, ReplHandler, Server};
    use wmipc_core::repl::SessionManager;
    use wmipc_core::script::Namespace;

    fn echo_or_sleep(payload: Value) -> Value {
        if payload == json!("slow") {
            std::thread::sleep(Duration::from_millis(300));
        }
        json!({ "echo": payload })
    }

    async fn serve(dir: &tempfile::TempDir) -> (Server, PathBuf) {
        let path = dir.path().join("wm.sock");
        let mut server = Server::new(&path, Arc::new(echo_or_sleep));
        server.start().await.unwrap();
        (server, path)
    }

    async fn serve_repl(dir: &tempfile::TempDir) -> (Server, Arc<SessionManager>, PathBuf) {
        let (server, path) = serve(dir).await;
        let manager = Arc::new(SessionManager::new());
        manager.enable(Namespace::new());
        server.set_repl_handler(Some(manager.clone() as Arc<dyn ReplHandler>));
        (server, manager, path)
    }

    #[tokio::test]
    async fn test_one_shot_send() {
        let dir = tempfile::tempdir().unwrap();
        let (_server, path) = serve(&dir).await;

        let response = Client::new(&path).send(&json!(["status"])).await.unwrap();
        assert_eq!(response, json!({ "echo": ["status"] }));
    }

    #[tokio::test]
    async fn test_connect_to_missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        let err = Client::new(dir.path().join("absent.sock"))
            .send(&json!([]))
            .await
            .unwrap_err();
        assert!(matches!(err, IpcError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_requests_before_connect_fail() {
        let mut client = PersistentClient::new("/nonexistent/wm.sock");
        assert!(matches!(
            client.keepalive().await.unwrap_err(),
            IpcError::NotConnected
        ));
    }

    #[tokio::test]
    async fn test_persistent_connection_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let (_server, path) = serve(&dir).await;

        let mut client = PersistentClient::new(&path);
        client.connect().await.unwrap();
        client.keepalive().await.unwrap();
        for i in 0..3 {
            let response = client.send_command(&json!(i)).await.unwrap();
            assert_eq!(response, json!({ "echo": i }));
        }
        assert!(client.is_connected());
        client.close().await;
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_locked_host_returns_error_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locked.sock");
        let lock = LockGate::new();
        let mut server = Server::new(&path, Arc::new(echo_or_sleep)).with_lock_gate(lock.clone());
        server.start().await.unwrap();
        lock.lock();

        let mut client = PersistentClient::new(&path);
        client.connect().await.unwrap();
        let response = client.send_command(&json!("x")).await.unwrap();
        assert_eq!(response, json!({ "error": "Session is locked." }));

        lock.unlock();
        let response = client.send_command(&json!("x")).await.unwrap();
        assert_eq!(response, json!({ "echo": "x" }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_drops_connection_and_reconnect_works() {
        let dir = tempfile::tempdir().unwrap();
        let (_server, path) = serve(&dir).await;

        let mut client = PersistentClient::new(&path).with_timeouts(Timeouts {
            command: Duration::from_millis(50),
            ..Timeouts::default()
        });
        client.connect().await.unwrap();
        let err = client.send_command(&json!("slow")).await.unwrap_err();
        assert!(matches!(
            err,
            IpcError::Timeout(MessageType::Command, _)
        ));
        assert!(!client.is_connected());
        assert!(matches!(
            client.send_command(&json!("fast")).await.unwrap_err(),
            IpcError::NotConnected
        ));

        client.connect().await.unwrap();
        let response = client.send_command(&json!("fast")).await.unwrap();
        assert_eq!(response, json!({ "echo": "fast" }));
    }

    #[tokio::test]
    async fn test_repl_session_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (_server, manager, path) = serve_repl(&dir).await;

        let mut client = PersistentClient::new(&path);
        client.connect().await.unwrap();
        let id = client.start_session().await.unwrap();
        assert_eq!(manager.session_count(), 1);

        let first = client.send_eval("x = 40", Some(&id)).await.unwrap();
        assert_eq!(first.session_id, id);
        assert_eq!(first.output, "");
        let second = client.send_eval("x + 2", Some(&id)).await.unwrap();
        assert_eq!(second.output, "42");

        let opened = client.send_eval("if x:", Some(&id)).await.unwrap();
        assert!(opened.more);
        let closed = client.send_eval("    print('yes')\n", Some(&id)).await.unwrap();
        assert!(!closed.more);
        assert_eq!(closed.output, "yes");

        let completions = client.send_complete("pri", Some(&id)).await.unwrap();
        assert_eq!(completions, vec!["print"]);

        client.end_session(&id).await.unwrap();
        // The end frame has no response; a keepalive orders us after it
        client.keepalive().await.unwrap();
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let (_server, _manager, path) = serve_repl(&dir).await;

        let mut a = PersistentClient::new(&path);
        let mut b = PersistentClient::new(&path);
        a.connect().await.unwrap();
        b.connect().await.unwrap();
        let id_a = a.start_session().await.unwrap();
        let id_b = b.start_session().await.unwrap();
        assert_ne!(id_a, id_b);

        a.send_eval("only_a = 1", Some(&id_a)).await.unwrap();
        let out = b.send_eval("only_a", Some(&id_b)).await.unwrap();
        assert!(out.output.contains("NameError: name 'only_a' is not defined"));
    }

    #[tokio::test]
    async fn test_repl_disabled_is_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let (server, manager, path) = serve_repl(&dir).await;
        manager.disable();

        let mut client = PersistentClient::new(&path);
        client.connect().await.unwrap();
        let err = client.start_session().await.unwrap_err();
        assert!(matches!(err, IpcError::Server(ref m) if m.contains("REPL not enabled")));

        server.set_repl_handler(None);
        let err = client.send_eval("1", None).await.unwrap_err();
        assert!(matches!(err, IpcError::Server(ref m) if m == "REPL not enabled"));
        // Error payloads leave the connection usable
        assert!(client.is_connected());
        client.keepalive().await.unwrap();
    }
}
