//! Demo host served by `wmipc serve`
//!
//! Stands in for the window manager: answers a handful of `COMMAND`
//! payloads and exposes itself to REPL sessions as `host`.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value as Json};
use wmipc_core::ipc::{error_response, CommandHandler, LockGate};
use wmipc_core::repl::SessionManager;
use wmipc_core::script::{HostObject, Introspectable, Namespace, ScriptError, Value};

/// Commands understood by [`HostState::run`]
const COMMANDS: &[&str] = &["ping", "status", "echo", "commands"];

/// Commands that only make sense from outside a session
const REPL_COMMANDS: &[&str] = &["start_repl_server", "stop_repl_server"];

/// State shared by the command handler and the `host` script object
#[derive(Debug)]
pub struct HostState {
    started: Instant,
    lock: LockGate,
}

impl HostState {
    pub fn new(lock: LockGate) -> Self {
        Self {
            started: Instant::now(),
            lock,
        }
    }

    pub fn uptime_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn status(&self) -> Map<String, Json> {
        let mut status = Map::new();
        status.insert("pid".to_string(), json!(std::process::id()));
        status.insert("uptime_secs".to_string(), json!(self.uptime_secs()));
        status.insert("locked".to_string(), json!(self.lock.is_locked()));
        status
    }

    /// Run one of [`COMMANDS`]
    pub fn run(&self, name: &str, args: &[Json]) -> Json {
        match name {
            "ping" => json!("pong"),
            "status" => Json::Object(self.status()),
            "echo" => Json::Array(args.to_vec()),
            "commands" => {
                let mut names: Vec<&str> = COMMANDS.iter().chain(REPL_COMMANDS).copied().collect();
                names.sort_unstable();
                json!(names)
            }
            other => error_response(format!("Unknown command: {}", other)),
        }
    }
}

/// `COMMAND` handler of the demo host
pub struct DemoHost {
    state: Arc<HostState>,
    repl: Arc<SessionManager>,
}

impl DemoHost {
    pub fn new(state: Arc<HostState>, repl: Arc<SessionManager>) -> Self {
        Self { state, repl }
    }

    /// Namespace every new REPL session starts from
    pub fn default_namespace(&self) -> Namespace {
        let mut namespace = Namespace::new();
        namespace.set("host", Value::host(HostHandle(self.state.clone())));
        namespace
    }

    pub fn start_repl(&self) {
        self.repl.enable(self.default_namespace());
    }
}

impl CommandHandler for DemoHost {
    fn handle(&self, payload: Json) -> Json {
        let Some((name, args)) = split_command(&payload) else {
            return error_response("Malformed command: expected a name or [name, args...]");
        };
        tracing::debug!("Host command: {}", name);

        match name {
            "start_repl_server" => {
                self.start_repl();
                json!({ "success": true })
            }
            "stop_repl_server" => {
                self.repl.disable();
                json!({ "success": true })
            }
            "status" => {
                let mut status = self.state.status();
                status.insert("repl_enabled".to_string(), json!(self.repl.is_enabled()));
                status.insert("repl_sessions".to_string(), json!(self.repl.session_count()));
                Json::Object(status)
            }
            other => self.state.run(other, args),
        }
    }
}

/// Accepts `"name"` or `["name", args...]`
fn split_command(payload: &Json) -> Option<(&str, &[Json])> {
    match payload {
        Json::String(name) => Some((name.as_str(), &[] as &[Json])),
        Json::Array(items) => {
            let (first, rest) = items.split_first()?;
            Some((first.as_str()?, rest))
        }
        _ => None,
    }
}

/// The `host` object seen from REPL sessions
#[derive(Debug)]
struct HostHandle(Arc<HostState>);

impl Introspectable for HostHandle {
    fn names(&self) -> Vec<(String, bool)> {
        vec![
            ("call".to_string(), true),
            ("name".to_string(), false),
            ("pid".to_string(), false),
            ("uptime".to_string(), true),
        ]
    }
}

impl HostObject for HostHandle {
    fn type_name(&self) -> &str {
        "Host"
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "name" => Some(Value::str("wmipc")),
            "pid" => Some(Value::Int(std::process::id() as i64)),
            _ => None,
        }
    }

    fn call_method(&self, name: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
        match name {
            "uptime" => Ok(Value::Float(self.0.uptime_secs())),
            "call" => {
                let (command, rest) = match args.split_first() {
                    Some((Value::Str(command), rest)) => (command.clone(), rest),
                    _ => {
                        return Err(ScriptError::type_error(
                            "call() expects a command name string",
                        ))
                    }
                };
                let args = rest.iter().map(to_json).collect::<Result<Vec<_>, _>>()?;
                from_json(&self.0.run(&command, &args))
            }
            other => Err(ScriptError::attribute_error("Host", other)),
        }
    }

    fn repr(&self) -> String {
        format!("<Host pid={}>", std::process::id())
    }
}

/// Convert a script value to JSON for a command argument
fn to_json(value: &Value) -> Result<Json, ScriptError> {
    Ok(match value {
        Value::None => Json::Null,
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::Float(f) => json!(f),
        Value::Str(s) => json!(s.as_ref()),
        Value::List(_) | Value::Tuple(_) | Value::Set(_) | Value::Range(..) => {
            let items = value.iterate()?;
            Json::Array(items.iter().map(to_json).collect::<Result<_, _>>()?)
        }
        Value::Dict(entries) => {
            let entries = entries.lock().clone();
            let mut map = Map::new();
            for (key, val) in &entries {
                map.insert(key.to_str(), to_json(val)?);
            }
            Json::Object(map)
        }
        other => {
            return Err(ScriptError::type_error(format!(
                "cannot send '{}' to the host",
                other.type_name()
            )))
        }
    })
}

/// Convert a command response into a script value
fn from_json(json: &Json) -> Result<Value, ScriptError> {
    Ok(match json {
        Json::Null => Value::None,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::str(s.as_str()),
        Json::Array(items) => Value::list(items.iter().map(from_json).collect::<Result<_, _>>()?),
        Json::Object(map) => Value::dict(
            map.iter()
                .map(|(k, v)| Ok((Value::str(k.as_str()), from_json(v)?)))
                .collect::<Result<_, ScriptError>>()?,
        )?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wmipc_core::repl::Session;

    fn host() -> (DemoHost, Arc<SessionManager>, LockGate) {
        let lock = LockGate::new();
        let repl = Arc::new(SessionManager::new());
        let host = DemoHost::new(Arc::new(HostState::new(lock.clone())), repl.clone());
        (host, repl, lock)
    }

    #[test]
    fn test_ping_forms() {
        let (host, _, _) = host();
        assert_eq!(host.handle(json!("ping")), json!("pong"));
        assert_eq!(host.handle(json!(["ping"])), json!("pong"));
        assert_eq!(host.handle(json!(["echo", 1, "a"])), json!([1, "a"]));
    }

    #[test]
    fn test_unknown_and_malformed_commands() {
        let (host, _, _) = host();
        assert_eq!(
            host.handle(json!(["nope"])),
            json!({ "error": "Unknown command: nope" })
        );
        assert!(host.handle(json!([])).get("error").is_some());
        assert!(host.handle(json!({ "cmd": "ping" })).get("error").is_some());
    }

    #[test]
    fn test_repl_server_toggle() {
        let (host, repl, _) = host();
        assert!(!repl.is_enabled());
        assert_eq!(host.handle(json!(["start_repl_server"])), json!({ "success": true }));
        assert!(repl.is_enabled());

        let status = host.handle(json!("status"));
        assert_eq!(status["repl_enabled"], json!(true));
        assert_eq!(status["repl_sessions"], json!(0));

        host.handle(json!(["stop_repl_server"]));
        assert!(!repl.is_enabled());
    }

    #[test]
    fn test_status_reports_lock() {
        let (host, _, lock) = host();
        assert_eq!(host.handle(json!("status"))["locked"], json!(false));
        lock.lock();
        assert_eq!(host.handle(json!("status"))["locked"], json!(true));
    }

    #[test]
    fn test_host_object_in_session() {
        let (host, _, _) = host();
        let mut session = Session::new("demo", host.default_namespace());
        assert_eq!(session.evaluate("host.name").output, "'wmipc'\n");
        assert_eq!(session.evaluate("host.call('ping')").output, "'pong'\n");
        assert_eq!(
            session.evaluate("host.call('echo', [1, 2], 'x')").output,
            "[[1, 2], 'x']\n"
        );
        assert_eq!(session.complete("host.up"), vec!["host.uptime("]);
    }

    #[test]
    fn test_host_call_rejects_non_string_name() {
        let (host, _, _) = host();
        let mut session = Session::new("demo", host.default_namespace());
        let out = session.evaluate("host.call(1)").output;
        assert!(out.ends_with("TypeError: call() expects a command name string\n"));
    }

    #[test]
    fn test_json_conversion_of_dicts() {
        let value = from_json(&json!({ "a": [1, 2.5, null] })).unwrap();
        assert_eq!(value.repr(), "{'a': [1, 2.5, None]}");
        assert_eq!(to_json(&value).unwrap(), json!({ "a": [1, 2.5, null] }));
    }
}
