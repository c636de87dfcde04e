//! Session manager: the REPL handler installed into the IPC server

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::ipc::connection::LOCKED_MESSAGE;
use crate::ipc::handler::{error_response, ReplHandler};
use crate::ipc::lock::LockGate;
use crate::ipc::protocol::MessageType;
use crate::repl::session::{EvalOutput, Session};
use crate::script::Namespace;

/// Sessions idle longer than this are dropped on the next lookup
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(3600);

/// Greeting returned for `REPL_SESSION_START`
pub const SESSION_STARTED_MESSAGE: &str = "REPL session started. Press Ctrl+C to exit.";

/// Error returned for every REPL request while disabled
pub const NOT_ENABLED_MESSAGE: &str = "REPL not enabled. Run start_repl_server first.";

/// Shared handle to one session
pub type SharedSession = Arc<Mutex<Session>>;

struct Entry {
    session: SharedSession,
    last_active: Instant,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Entry>,
    default_namespace: Namespace,
    enabled: bool,
}

/// Owns every REPL session
///
/// Each session sits behind its own mutex, so evaluations in different
/// sessions run in parallel on the blocking pool while the session map lock
/// is only held for lookups.
pub struct SessionManager {
    inner: Mutex<Inner>,
    idle_timeout: Duration,
    lock: Option<LockGate>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    /// Create a disabled manager
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            idle_timeout: SESSION_TIMEOUT,
            lock: None,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Refuse REPL requests while `lock` is set
    pub fn with_lock_gate(mut self, lock: LockGate) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Enable the REPL, seeding new sessions from `default_namespace`
    pub fn enable(&self, default_namespace: Namespace) {
        let mut inner = self.inner.lock();
        inner.default_namespace = default_namespace;
        inner.enabled = true;
        tracing::info!("REPL functionality enabled");
    }

    /// Disable the REPL and discard every session
    pub fn disable(&self) {
        let mut inner = self.inner.lock();
        inner.sessions.clear();
        inner.enabled = false;
        tracing::info!("REPL functionality disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().enabled
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Return the session for `session_id`, creating one when unknown
    ///
    /// Unknown or absent ids get a freshly minted id, so callers must use
    /// the returned id from then on.
    pub fn get_or_create(&self, session_id: Option<&str>) -> (String, SharedSession) {
        self.get_or_create_at(session_id, Instant::now())
    }

    fn get_or_create_at(&self, session_id: Option<&str>, now: Instant) -> (String, SharedSession) {
        let mut inner = self.inner.lock();
        sweep_expired(&mut inner, now, self.idle_timeout);

        if let Some(id) = session_id {
            if let Some(entry) = inner.sessions.get_mut(id) {
                entry.last_active = now;
                return (id.to_string(), entry.session.clone());
            }
        }

        let id = Uuid::new_v4().to_string();
        let session = Arc::new(Mutex::new(Session::new(
            id.clone(),
            inner.default_namespace.clone(),
        )));
        inner.sessions.insert(
            id.clone(),
            Entry {
                session: session.clone(),
                last_active: now,
            },
        );
        tracing::debug!("Created new REPL session: {}", id);
        (id, session)
    }

    /// Remove a session; unknown ids are ignored
    pub fn remove(&self, session_id: &str) {
        if self.inner.lock().sessions.remove(session_id).is_some() {
            tracing::debug!("Removed REPL session: {}", session_id);
        }
    }

    /// Drop sessions idle longer than the idle timeout, returning how many
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        sweep_expired(&mut self.inner.lock(), now, self.idle_timeout)
    }

    /// Evaluate `code` in `session` on the blocking pool
    pub async fn evaluate(&self, session: SharedSession, code: String) -> EvalOutput {
        match tokio::task::spawn_blocking(move || session.lock().evaluate(&code)).await {
            Ok(output) => output,
            Err(e) => {
                tracing::error!("REPL evaluation task failed: {}", e);
                EvalOutput {
                    output: format!("Evaluation failed: {}", e),
                    more: false,
                }
            }
        }
    }

    /// Completion candidates for `text` in `session`
    pub async fn complete(&self, session: SharedSession, text: String) -> Vec<String> {
        tokio::task::spawn_blocking(move || session.lock().complete(&text))
            .await
            .unwrap_or_else(|e| {
                tracing::error!("REPL completion task failed: {}", e);
                Vec::new()
            })
    }

    /// Answer one REPL request
    pub async fn handle_message(&self, msg_type: MessageType, payload: Value) -> Value {
        if !self.is_enabled() {
            return error_response(NOT_ENABLED_MESSAGE);
        }
        if self.lock.as_ref().is_some_and(LockGate::is_locked) {
            return error_response(LOCKED_MESSAGE);
        }

        let session_id = payload.get("session_id").and_then(Value::as_str);
        match msg_type {
            MessageType::ReplSessionStart => {
                let (id, _) = self.get_or_create(None);
                json!({ "session_id": id, "message": SESSION_STARTED_MESSAGE })
            }
            MessageType::ReplSessionEnd => {
                if let Some(id) = session_id {
                    self.remove(id);
                }
                json!({ "success": true })
            }
            MessageType::ReplEval => {
                let code = payload
                    .get("code")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let (id, session) = self.get_or_create(session_id);
                let result = self.evaluate(session, code).await;
                json!({
                    "session_id": id,
                    "output": result.output.trim(),
                    "more": result.more,
                })
            }
            MessageType::ReplComplete => {
                let text = payload
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let (id, session) = self.get_or_create(session_id);
                let completions = self.complete(session, text).await;
                json!({ "session_id": id, "completions": completions })
            }
            other => error_response(format!("Unknown REPL message type: {}", other)),
        }
    }
}

fn sweep_expired(inner: &mut Inner, now: Instant, idle_timeout: Duration) -> usize {
    let before = inner.sessions.len();
    inner.sessions.retain(|id, entry| {
        let keep = now.saturating_duration_since(entry.last_active) <= idle_timeout;
        if !keep {
            tracing::debug!("Cleaned up inactive REPL session: {}", id);
        }
        keep
    });
    before - inner.sessions.len()
}

impl ReplHandler for SessionManager {
    fn handle(&self, msg_type: MessageType, payload: Value) -> BoxFuture<'_, Value> {
        Box::pin(self.handle_message(msg_type, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Value as ScriptValue;
    use pretty_assertions::assert_eq;

    fn enabled() -> SessionManager {
        let manager = SessionManager::new();
        manager.enable(Namespace::new());
        manager
    }

    async fn eval(manager: &SessionManager, session_id: &str, code: &str) -> Value {
        manager
            .handle_message(
                MessageType::ReplEval,
                json!({ "session_id": session_id, "code": code }),
            )
            .await
    }

    async fn start(manager: &SessionManager) -> String {
        let reply = manager
            .handle_message(MessageType::ReplSessionStart, json!({}))
            .await;
        assert_eq!(reply["message"], SESSION_STARTED_MESSAGE);
        reply["session_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_session_is_stateful() {
        let manager = enabled();
        let id = start(&manager).await;

        let reply = eval(&manager, &id, "y = 456").await;
        assert_eq!(reply["session_id"], id.as_str());
        assert_eq!(reply["output"], "");
        assert_eq!(reply["more"], false);

        let reply = eval(&manager, &id, "y").await;
        assert!(reply["output"].as_str().unwrap().contains("456"));
    }

    #[tokio::test]
    async fn test_sessions_do_not_leak() {
        let manager = enabled();
        let a = start(&manager).await;
        let b = start(&manager).await;
        assert_ne!(a, b);

        eval(&manager, &a, "y = 456").await;
        let reply = eval(&manager, &b, "y").await;
        assert!(reply["output"].as_str().unwrap().contains("NameError"));
    }

    #[tokio::test]
    async fn test_unknown_session_id_mints_new_one() {
        let manager = enabled();
        let reply = eval(&manager, "no-such-session", "1 + 1").await;
        assert_ne!(reply["session_id"], "no-such-session");
        assert_eq!(reply["output"], "2");
        assert_eq!(manager.session_count(), 1);
    }

    #[tokio::test]
    async fn test_disabled_manager_rejects_everything() {
        let manager = SessionManager::new();
        for msg_type in [
            MessageType::ReplSessionStart,
            MessageType::ReplSessionEnd,
            MessageType::ReplEval,
            MessageType::ReplComplete,
        ] {
            let reply = manager
                .handle_message(msg_type, json!({ "code": "1", "text": "x" }))
                .await;
            assert!(reply["error"].as_str().unwrap().contains("not enabled"));
        }
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_disable_clears_sessions() {
        let manager = enabled();
        start(&manager).await;
        assert_eq!(manager.session_count(), 1);
        manager.disable();
        assert!(!manager.is_enabled());
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_session_end_removes_session() {
        let manager = enabled();
        let id = start(&manager).await;
        let reply = manager
            .handle_message(MessageType::ReplSessionEnd, json!({ "session_id": id }))
            .await;
        assert_eq!(reply, json!({ "success": true }));
        assert_eq!(manager.session_count(), 0);

        // Ending twice is harmless
        let reply = manager
            .handle_message(MessageType::ReplSessionEnd, json!({ "session_id": id }))
            .await;
        assert_eq!(reply, json!({ "success": true }));
    }

    #[tokio::test]
    async fn test_complete_uses_session_namespace() {
        let manager = SessionManager::new();
        let ns: Namespace = [("window", ScriptValue::str("x")), ("windows", ScriptValue::Int(123))]
            .into_iter()
            .collect();
        manager.enable(ns);
        let id = start(&manager).await;
        let reply = manager
            .handle_message(
                MessageType::ReplComplete,
                json!({ "session_id": id, "text": "wind" }),
            )
            .await;
        assert_eq!(reply["completions"], json!(["window", "windows"]));
    }

    #[tokio::test]
    async fn test_more_flag_for_open_block() {
        let manager = enabled();
        let id = start(&manager).await;
        let reply = eval(&manager, &id, "if True:").await;
        assert_eq!(reply["more"], true);
        let reply = eval(&manager, &id, "    print('inside')\n").await;
        assert_eq!(reply["more"], false);
        assert_eq!(reply["output"], "inside");
    }

    #[tokio::test]
    async fn test_locked_gate_refuses_repl() {
        let gate = LockGate::new();
        let manager = SessionManager::new().with_lock_gate(gate.clone());
        manager.enable(Namespace::new());
        gate.lock();
        let reply = manager
            .handle_message(MessageType::ReplSessionStart, json!({}))
            .await;
        assert_eq!(reply["error"], LOCKED_MESSAGE);
        gate.unlock();
        start(&manager).await;
    }

    #[tokio::test]
    async fn test_unknown_message_type() {
        let manager = enabled();
        let reply = manager
            .handle_message(MessageType::Command, json!({}))
            .await;
        assert!(reply["error"]
            .as_str()
            .unwrap()
            .starts_with("Unknown REPL message type"));
    }

    #[test]
    fn test_idle_session_is_evicted() {
        let manager = enabled();
        let t0 = Instant::now();
        let (id, _) = manager.get_or_create_at(None, t0);

        assert_eq!(manager.sweep_at(t0 + SESSION_TIMEOUT), 0);
        let (again, _) =
            manager.get_or_create_at(Some(&id), t0 + SESSION_TIMEOUT + Duration::from_secs(1));
        assert_ne!(again, id);
        assert!(!manager.session_ids().contains(&id));
    }

    #[test]
    fn test_touch_resets_idle_clock() {
        let manager = enabled();
        let t0 = Instant::now();
        let (id, _) = manager.get_or_create_at(None, t0);

        let touched = t0 + Duration::from_secs(3000);
        let (same, _) = manager.get_or_create_at(Some(&id), touched);
        assert_eq!(same, id);

        assert_eq!(manager.sweep_at(t0 + SESSION_TIMEOUT + Duration::from_secs(1)), 0);
        assert_eq!(manager.sweep_at(touched + SESSION_TIMEOUT + Duration::from_secs(1)), 1);
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_handler_trait_delegates() {
        let manager: Arc<dyn ReplHandler> = Arc::new(enabled());
        let reply = manager
            .handle(MessageType::ReplSessionStart, json!({}))
            .await;
        assert!(reply["session_id"].is_string());
    }
}
