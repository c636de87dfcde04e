//! Runtime values and the capability traits host objects implement

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::ast::FunctionDef;
use super::builtins::{type_methods, Builtin};
use super::error::{ErrorKind, ScriptError};

/// Deepest container nesting rendered or compared before cutting off
const MAX_VALUE_DEPTH: usize = 64;

/// Lists the names an object exposes, flagging the invocable ones
///
/// Completion and `dir()` are built on this instead of runtime reflection.
pub trait Introspectable {
    fn names(&self) -> Vec<(String, bool)>;
}

/// An object owned by the host and exposed to REPL sessions
///
/// Host objects are shared by every session seeded with them, so
/// implementations must be thread-safe.
pub trait HostObject: Introspectable + Send + Sync + fmt::Debug {
    fn type_name(&self) -> &str;

    /// Read a non-callable attribute
    fn get_attr(&self, name: &str) -> Option<Value>;

    /// Invoke a method listed as invocable by `names()`
    fn call_method(&self, name: &str, args: Vec<Value>) -> Result<Value, ScriptError>;

    fn repr(&self) -> String {
        format!("<{} object>", self.type_name())
    }
}

/// A method looked up on a value but not yet called
#[derive(Debug, Clone)]
pub struct BoundMethod {
    pub receiver: Value,
    pub name: String,
}

/// A script value
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    List(Arc<Mutex<Vec<Value>>>),
    Tuple(Arc<[Value]>),
    Dict(Arc<Mutex<Vec<(Value, Value)>>>),
    Set(Arc<Mutex<Vec<Value>>>),
    Range(i64, i64, i64),
    Function(Arc<FunctionDef>),
    Builtin(Builtin),
    Method(Arc<BoundMethod>),
    Exception(ErrorKind, Arc<str>),
    Host(Arc<dyn HostObject>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(Arc::from(s.into()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(Mutex::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Arc::from(items))
    }

    pub fn host(obj: impl HostObject + 'static) -> Self {
        Value::Host(Arc::new(obj))
    }

    /// Build a dict, keys must be hashable
    pub fn dict(pairs: Vec<(Value, Value)>) -> Result<Self, ScriptError> {
        let mut entries: Vec<(Value, Value)> = Vec::with_capacity(pairs.len());
        for (k, v) in pairs {
            dict_insert(&mut entries, k, v)?;
        }
        Ok(Value::Dict(Arc::new(Mutex::new(entries))))
    }

    /// Build a set, dropping duplicates
    pub fn set(items: Vec<Value>) -> Result<Self, ScriptError> {
        let mut out: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            set_insert(&mut out, item)?;
        }
        Ok(Value::Set(Arc::new(Mutex::new(out))))
    }

    pub fn type_name(&self) -> &str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Range(..) => "range",
            Value::Function(_) => "function",
            Value::Builtin(b) if b.is_class() => "type",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Method(_) => "method",
            Value::Exception(kind, _) => kind.name(),
            Value::Host(h) => h.type_name(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_) | Value::Builtin(_) | Value::Method(_)
        )
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.lock().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => !d.lock().is_empty(),
            Value::Set(s) => !s.lock().is_empty(),
            Value::Range(start, stop, step) => range_len(*start, *stop, *step) > 0,
            _ => true,
        }
    }

    /// `repr()` of the value
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, 0);
        out
    }

    /// `str()` of the value
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Exception(_, msg) => msg.to_string(),
            other => other.repr(),
        }
    }

    fn write_repr(&self, out: &mut String, depth: usize) {
        if depth > MAX_VALUE_DEPTH {
            out.push_str("...");
            return;
        }
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Float(f) => out.push_str(&float_repr(*f)),
            Value::Str(s) => out.push_str(&str_repr(s)),
            Value::List(items) => {
                let items = items.lock().clone();
                write_seq(out, "[", &items, "]", depth);
            }
            Value::Tuple(items) => {
                if items.len() == 1 {
                    out.push('(');
                    items[0].write_repr(out, depth + 1);
                    out.push_str(",)");
                } else {
                    write_seq(out, "(", items, ")", depth);
                }
            }
            Value::Dict(entries) => {
                let entries = entries.lock().clone();
                out.push('{');
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.write_repr(out, depth + 1);
                    out.push_str(": ");
                    v.write_repr(out, depth + 1);
                }
                out.push('}');
            }
            Value::Set(items) => {
                let items = items.lock().clone();
                if items.is_empty() {
                    out.push_str("set()");
                } else {
                    write_seq(out, "{", &items, "}", depth);
                }
            }
            Value::Range(start, stop, step) => {
                if *step == 1 {
                    out.push_str(&format!("range({}, {})", start, stop));
                } else {
                    out.push_str(&format!("range({}, {}, {})", start, stop, step));
                }
            }
            Value::Function(def) => out.push_str(&format!("<function {}>", def.name)),
            Value::Builtin(b) if b.is_class() => out.push_str(&format!("<class '{}'>", b.name())),
            Value::Builtin(b) => out.push_str(&format!("<built-in function {}>", b.name())),
            Value::Method(m) => out.push_str(&format!(
                "<bound method {}.{}>",
                m.receiver.type_name(),
                m.name
            )),
            Value::Exception(kind, msg) => {
                out.push_str(&format!("{}({})", kind.name(), str_repr(msg)))
            }
            Value::Host(h) => out.push_str(&h.repr()),
        }
    }

    /// Python `==`
    pub fn equals(&self, other: &Value) -> bool {
        values_equal(self, other, 0)
    }

    /// Python `is`
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Arc::ptr_eq(a, b),
            (Value::Set(a), Value::Set(b)) => Arc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Host(a), Value::Host(b)) => Arc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            _ => false,
        }
    }

    /// Values usable as dict keys and set members
    pub fn is_hashable(&self) -> bool {
        match self {
            Value::List(_) | Value::Dict(_) | Value::Set(_) => false,
            Value::Tuple(items) => items.iter().all(Value::is_hashable),
            _ => true,
        }
    }

    /// Snapshot the elements of an iterable
    pub fn iterate(&self) -> Result<Vec<Value>, ScriptError> {
        match self {
            Value::List(items) | Value::Set(items) => Ok(items.lock().clone()),
            Value::Tuple(items) => Ok(items.to_vec()),
            Value::Dict(entries) => Ok(entries.lock().iter().map(|(k, _)| k.clone()).collect()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
            Value::Range(start, stop, step) => {
                let len = range_len(*start, *stop, *step);
                if len > MAX_MATERIALIZED {
                    return Err(ScriptError::new(
                        ErrorKind::MemoryError,
                        "range too large to materialize",
                    ));
                }
                Ok((0..len)
                    .map(|i| Value::Int((*start as i128 + i as i128 * *step as i128) as i64))
                    .collect())
            }
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }
}

/// Largest sequence built in one operation
pub const MAX_MATERIALIZED: usize = 10_000_000;

impl Introspectable for Value {
    fn names(&self) -> Vec<(String, bool)> {
        match self {
            Value::Host(h) => h.names(),
            other => type_methods(other.type_name())
                .iter()
                .map(|m| (m.to_string(), true))
                .chain(
                    matches!(other, Value::Int(_) | Value::Float(_) | Value::Bool(_))
                        .then(|| {
                            [("real".to_string(), false), ("imag".to_string(), false)]
                        })
                        .into_iter()
                        .flatten(),
                )
                .collect(),
        }
    }
}

/// Number of elements in `range(start, stop, step)`
pub fn range_len(start: i64, stop: i64, step: i64) -> usize {
    if step > 0 && start < stop {
        ((stop as i128 - start as i128 - 1) / step as i128 + 1) as usize
    } else if step < 0 && start > stop {
        ((start as i128 - stop as i128 - 1) / (-(step as i128)) + 1) as usize
    } else {
        0
    }
}

fn write_seq(out: &mut String, open: &str, items: &[Value], close: &str, depth: usize) {
    out.push_str(open);
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out, depth + 1);
    }
    out.push_str(close);
}

fn float_repr(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        (if f > 0.0 { "inf" } else { "-inf" }).to_string()
    } else {
        // Debug keeps a trailing `.0` on whole numbers, like Python
        format!("{:?}", f)
    }
}

/// Quote a string the way Python's repr does
pub fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn values_equal(a: &Value, b: &Value, depth: usize) -> bool {
    if depth > MAX_VALUE_DEPTH {
        return false;
    }
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.lock().clone(), y.lock().clone());
            seq_equal(&x, &y, depth)
        }
        (Value::Tuple(x), Value::Tuple(y)) => seq_equal(x, y, depth),
        (Value::Dict(x), Value::Dict(y)) => {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.lock().clone(), y.lock().clone());
            x.len() == y.len()
                && x.iter().all(|(k, v)| {
                    y.iter()
                        .find(|(k2, _)| values_equal(k, k2, depth + 1))
                        .is_some_and(|(_, v2)| values_equal(v, v2, depth + 1))
                })
        }
        (Value::Set(x), Value::Set(y)) => {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.lock().clone(), y.lock().clone());
            x.len() == y.len()
                && x.iter()
                    .all(|item| y.iter().any(|other| values_equal(item, other, depth + 1)))
        }
        (Value::Range(a1, b1, c1), Value::Range(a2, b2, c2)) => (a1, b1, c1) == (a2, b2, c2),
        (Value::Exception(k1, m1), Value::Exception(k2, m2)) => k1 == k2 && m1 == m2,
        _ => match (as_number(a), as_number(b)) {
            (Some(Number::Int(x)), Some(Number::Int(y))) => x == y,
            (Some(x), Some(y)) => x.as_f64() == y.as_f64(),
            _ => a.is_same(b),
        },
    }
}

fn seq_equal(x: &[Value], y: &[Value], depth: usize) -> bool {
    x.len() == y.len()
        && x.iter()
            .zip(y.iter())
            .all(|(a, b)| values_equal(a, b, depth + 1))
}

/// Numeric view of bools, ints and floats
#[derive(Debug, Clone, Copy)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

pub fn as_number(v: &Value) -> Option<Number> {
    match v {
        Value::Bool(b) => Some(Number::Int(*b as i64)),
        Value::Int(i) => Some(Number::Int(*i)),
        Value::Float(f) => Some(Number::Float(*f)),
        _ => None,
    }
}

/// Ordering used by `<`, `sorted`, `min` and `max`
pub fn compare_values(a: &Value, b: &Value) -> Result<std::cmp::Ordering, ScriptError> {
    use std::cmp::Ordering;

    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return Ok(match (x, y) {
            (Number::Int(x), Number::Int(y)) => x.cmp(&y),
            (x, y) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        });
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (x.lock().clone(), y.lock().clone());
            compare_seq(&x, &y)
        }
        (Value::Tuple(x), Value::Tuple(y)) => compare_seq(x, y),
        _ => Err(ScriptError::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn compare_seq(x: &[Value], y: &[Value]) -> Result<std::cmp::Ordering, ScriptError> {
    for (a, b) in x.iter().zip(y.iter()) {
        if !a.equals(b) {
            return compare_values(a, b);
        }
    }
    Ok(x.len().cmp(&y.len()))
}

fn require_hashable(v: &Value) -> Result<(), ScriptError> {
    if v.is_hashable() {
        Ok(())
    } else {
        Err(ScriptError::type_error(format!(
            "unhashable type: '{}'",
            v.type_name()
        )))
    }
}

/// Insert or replace a dict entry
pub fn dict_insert(
    entries: &mut Vec<(Value, Value)>,
    key: Value,
    value: Value,
) -> Result<(), ScriptError> {
    require_hashable(&key)?;
    match entries.iter_mut().find(|(k, _)| k.equals(&key)) {
        Some(entry) => entry.1 = value,
        None => entries.push((key, value)),
    }
    Ok(())
}

pub fn dict_get(entries: &[(Value, Value)], key: &Value) -> Option<Value> {
    entries
        .iter()
        .find(|(k, _)| k.equals(key))
        .map(|(_, v)| v.clone())
}

/// Add a set member, returns false when already present
pub fn set_insert(items: &mut Vec<Value>, item: Value) -> Result<bool, ScriptError> {
    require_hashable(&item)?;
    if items.iter().any(|existing| existing.equals(&item)) {
        return Ok(false);
    }
    items.push(item);
    Ok(true)
}

/// Variable store a snippet reads and writes
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    vars: BTreeMap<String, Value>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Overlay every binding of `other` onto this namespace
    pub fn extend(&mut self, other: &Namespace) {
        for (k, v) in &other.vars {
            self.vars.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.vars.iter()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl Introspectable for Namespace {
    fn names(&self) -> Vec<(String, bool)> {
        self.vars
            .iter()
            .map(|(k, v)| (k.clone(), v.is_callable()))
            .collect()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Namespace {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repr() {
        assert_eq!(Value::Int(456).repr(), "456");
        assert_eq!(Value::Float(1.0).repr(), "1.0");
        assert_eq!(Value::str("it's").repr(), "\"it's\"");
        assert_eq!(Value::str("a\nb").repr(), "'a\\nb'");
        assert_eq!(
            Value::list(vec![Value::None, Value::Bool(true)]).repr(),
            "[None, True]"
        );
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(Value::set(vec![]).unwrap().repr(), "set()");
        let d = Value::dict(vec![(Value::str("a"), Value::Int(1))]).unwrap();
        assert_eq!(d.repr(), "{'a': 1}");
    }

    #[test]
    fn test_self_referencing_list_repr_terminates() {
        let list = Value::list(vec![]);
        if let Value::List(items) = &list {
            items.lock().push(list.clone());
        }
        assert!(list.repr().contains("..."));
        assert!(list.equals(&list));
    }

    #[test]
    fn test_numeric_equality_crosses_types() {
        assert!(Value::Int(1).equals(&Value::Float(1.0)));
        assert!(Value::Bool(true).equals(&Value::Int(1)));
        assert!(!Value::str("1").equals(&Value::Int(1)));
    }

    #[test]
    fn test_dict_rejects_unhashable_keys() {
        let err = Value::dict(vec![(Value::list(vec![]), Value::None)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeError);
    }

    #[test]
    fn test_set_dedups() {
        let s = Value::set(vec![Value::Int(1), Value::Int(1), Value::Float(1.0)]).unwrap();
        assert_eq!(s.iterate().unwrap().len(), 1);
    }

    #[test]
    fn test_range_len() {
        assert_eq!(range_len(0, 10, 1), 10);
        assert_eq!(range_len(0, 10, 3), 4);
        assert_eq!(range_len(10, 0, -2), 5);
        assert_eq!(range_len(5, 5, 1), 0);
    }

    #[test]
    fn test_value_names_for_builtin_types() {
        let names = Value::str("x").names();
        assert!(names.contains(&("upper".to_string(), true)));
        let names = Value::Int(1).names();
        assert!(names.contains(&("real".to_string(), false)));
    }
}
