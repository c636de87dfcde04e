//! Builtin functions and the method tables of the container types

use std::cmp::Ordering;
use std::sync::Arc;

use super::ast::BinOp;
use super::error::{ErrorKind, ScriptError};
use super::interp::{binary_op, check_size, get_attribute, index_of, key_error, Interpreter};
use super::value::{
    as_number, compare_values, dict_get, dict_insert, range_len, set_insert, Introspectable,
    Number, Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
    Repr,
    Str,
    Int,
    Float,
    Bool,
    Len,
    Range,
    List,
    Tuple,
    Dict,
    Set,
    Sorted,
    Reversed,
    Enumerate,
    Zip,
    Min,
    Max,
    Sum,
    Abs,
    Round,
    Dir,
    Type,
    Isinstance,
    Callable,
    Hasattr,
    Getattr,
    Help,
    Input,
    Exit,
    Quit,
    Exception(ErrorKind),
}

const FUNCTIONS: &[(&str, Builtin)] = &[
    ("print", Builtin::Print),
    ("repr", Builtin::Repr),
    ("str", Builtin::Str),
    ("int", Builtin::Int),
    ("float", Builtin::Float),
    ("bool", Builtin::Bool),
    ("len", Builtin::Len),
    ("range", Builtin::Range),
    ("list", Builtin::List),
    ("tuple", Builtin::Tuple),
    ("dict", Builtin::Dict),
    ("set", Builtin::Set),
    ("sorted", Builtin::Sorted),
    ("reversed", Builtin::Reversed),
    ("enumerate", Builtin::Enumerate),
    ("zip", Builtin::Zip),
    ("min", Builtin::Min),
    ("max", Builtin::Max),
    ("sum", Builtin::Sum),
    ("abs", Builtin::Abs),
    ("round", Builtin::Round),
    ("dir", Builtin::Dir),
    ("type", Builtin::Type),
    ("isinstance", Builtin::Isinstance),
    ("callable", Builtin::Callable),
    ("hasattr", Builtin::Hasattr),
    ("getattr", Builtin::Getattr),
    ("help", Builtin::Help),
    ("input", Builtin::Input),
    ("exit", Builtin::Exit),
    ("quit", Builtin::Quit),
];

const EXCEPTIONS: &[ErrorKind] = &[
    ErrorKind::Exception,
    ErrorKind::ValueError,
    ErrorKind::TypeError,
    ErrorKind::KeyError,
    ErrorKind::IndexError,
    ErrorKind::RuntimeError,
    ErrorKind::AttributeError,
    ErrorKind::NameError,
    ErrorKind::ZeroDivisionError,
];

impl Builtin {
    pub fn lookup(name: &str) -> Option<Self> {
        FUNCTIONS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, b)| *b)
            .or_else(|| ErrorKind::from_builtin_name(name).map(Builtin::Exception))
    }

    pub fn name(self) -> &'static str {
        if let Builtin::Exception(kind) = self {
            return kind.name();
        }
        FUNCTIONS
            .iter()
            .find(|(_, b)| *b == self)
            .map_or("<builtin>", |(n, _)| n)
    }

    /// Every name resolvable without a namespace binding
    pub fn all_names() -> impl Iterator<Item = &'static str> {
        FUNCTIONS
            .iter()
            .map(|(n, _)| *n)
            .chain(EXCEPTIONS.iter().map(|k| k.name()))
    }

    /// Builtins that double as types for `type()` and `isinstance()`
    pub fn is_class(self) -> bool {
        matches!(
            self,
            Builtin::Str
                | Builtin::Int
                | Builtin::Float
                | Builtin::Bool
                | Builtin::List
                | Builtin::Tuple
                | Builtin::Dict
                | Builtin::Set
                | Builtin::Range
                | Builtin::Exception(_)
        )
    }
}

/// Method names exposed by each builtin type
pub fn type_methods(type_name: &str) -> &'static [&'static str] {
    match type_name {
        "str" => &[
            "capitalize",
            "count",
            "endswith",
            "find",
            "isalpha",
            "isdigit",
            "join",
            "lower",
            "lstrip",
            "replace",
            "rstrip",
            "split",
            "startswith",
            "strip",
            "title",
            "upper",
        ],
        "list" => &[
            "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove",
            "reverse", "sort",
        ],
        "tuple" => &["count", "index"],
        "dict" => &[
            "clear",
            "copy",
            "get",
            "items",
            "keys",
            "pop",
            "setdefault",
            "update",
            "values",
        ],
        "set" => &[
            "add",
            "clear",
            "copy",
            "difference",
            "discard",
            "intersection",
            "pop",
            "remove",
            "union",
        ],
        _ => &[],
    }
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), ScriptError> {
    let got = args.len();
    if (min..=max).contains(&got) {
        return Ok(());
    }
    let message = if min == max {
        format!(
            "{}() takes exactly {} argument{} ({} given)",
            name,
            min,
            if min == 1 { "" } else { "s" },
            got
        )
    } else if got < min {
        format!("{}() expected at least {} arguments, got {}", name, min, got)
    } else {
        format!("{}() expected at most {} arguments, got {}", name, max, got)
    };
    Err(ScriptError::type_error(message))
}

fn expect_str<'v>(value: &'v Value, context: &str) -> Result<&'v str, ScriptError> {
    match value {
        Value::Str(s) => Ok(s.as_ref()),
        other => Err(ScriptError::type_error(format!(
            "{} must be str, not {}",
            context,
            other.type_name()
        ))),
    }
}

fn expect_int(value: &Value) -> Result<i64, ScriptError> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(*b as i64),
        other => Err(ScriptError::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            other.type_name()
        ))),
    }
}

pub(super) fn call_builtin(
    interp: &mut Interpreter<'_>,
    builtin: Builtin,
    args: Vec<Value>,
) -> Result<Value, ScriptError> {
    let name = builtin.name();
    match builtin {
        Builtin::Print => {
            let line: Vec<String> = args.iter().map(Value::to_str).collect();
            interp.write(&line.join(" "))?;
            interp.write("\n")?;
            Ok(Value::None)
        }
        Builtin::Repr => {
            arity(name, &args, 1, 1)?;
            Ok(Value::str(args[0].repr()))
        }
        Builtin::Str => {
            arity(name, &args, 0, 1)?;
            Ok(Value::str(args.first().map(Value::to_str).unwrap_or_default()))
        }
        Builtin::Int => {
            arity(name, &args, 0, 2)?;
            match args.as_slice() {
                [] => Ok(Value::Int(0)),
                [value] => to_int(value).map(Value::Int),
                [text, base, ..] => {
                    parse_int(expect_str(text, "int() argument")?, expect_int(base)?)
                }
            }
        }
        Builtin::Float => {
            arity(name, &args, 0, 1)?;
            args.first()
                .map_or(Ok(0.0), to_float)
                .map(Value::Float)
        }
        Builtin::Bool => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
        }
        Builtin::Len => {
            arity(name, &args, 1, 1)?;
            let len = len_of(&args[0])?;
            i64::try_from(len).map(Value::Int).map_err(|_| {
                ScriptError::new(ErrorKind::OverflowError, "length does not fit in an int")
            })
        }
        Builtin::Range => {
            arity(name, &args, 1, 3)?;
            let ints = args.iter().map(expect_int).collect::<Result<Vec<_>, _>>()?;
            let (start, stop, step) = match ints[..] {
                [] => (0, 0, 1),
                [stop] => (0, stop, 1),
                [start, stop] => (start, stop, 1),
                [start, stop, step, ..] => (start, stop, step),
            };
            if step == 0 {
                return Err(ScriptError::value_error("range() arg 3 must not be zero"));
            }
            Ok(Value::Range(start, stop, step))
        }
        Builtin::List => {
            arity(name, &args, 0, 1)?;
            Ok(Value::list(iterate_optional(&args)?))
        }
        Builtin::Tuple => {
            arity(name, &args, 0, 1)?;
            Ok(Value::tuple(iterate_optional(&args)?))
        }
        Builtin::Set => {
            arity(name, &args, 0, 1)?;
            Value::set(iterate_optional(&args)?)
        }
        Builtin::Dict => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Value::dict(Vec::new()),
                Some(Value::Dict(entries)) => {
                    let entries = entries.lock().clone();
                    Value::dict(entries)
                }
                Some(other) => Value::dict(pairs_of(other)?),
            }
        }
        Builtin::Sorted => {
            arity(name, &args, 1, 1)?;
            Ok(Value::list(sorted_values(args[0].iterate()?)?))
        }
        Builtin::Reversed => {
            arity(name, &args, 1, 1)?;
            let mut items = args[0].iterate()?;
            items.reverse();
            Ok(Value::list(items))
        }
        Builtin::Enumerate => {
            arity(name, &args, 1, 2)?;
            let start = args.get(1).map_or(Ok(0), expect_int)?;
            let mut out = Vec::new();
            for (i, item) in args[0].iterate()?.into_iter().enumerate() {
                let index = start
                    .checked_add(i as i64)
                    .ok_or_else(|| ScriptError::new(ErrorKind::OverflowError, "integer overflow"))?;
                out.push(Value::tuple(vec![Value::Int(index), item]));
            }
            Ok(Value::list(out))
        }
        Builtin::Zip => {
            let columns = args
                .iter()
                .map(Value::iterate)
                .collect::<Result<Vec<_>, _>>()?;
            let len = columns.iter().map(Vec::len).min().unwrap_or(0);
            let rows = (0..len)
                .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
                .collect();
            Ok(Value::list(rows))
        }
        Builtin::Min | Builtin::Max => {
            arity(name, &args, 1, usize::MAX)?;
            let items = if args.len() == 1 {
                args[0].iterate()?
            } else {
                args
            };
            let want = if builtin == Builtin::Min {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let mut iter = items.into_iter();
            let mut best = iter.next().ok_or_else(|| {
                ScriptError::value_error(format!("{}() arg is an empty sequence", name))
            })?;
            for item in iter {
                if compare_values(&item, &best)? == want {
                    best = item;
                }
            }
            Ok(best)
        }
        Builtin::Sum => {
            arity(name, &args, 1, 2)?;
            let mut total = args.get(1).cloned().unwrap_or(Value::Int(0));
            for item in args[0].iterate()? {
                total = binary_op(BinOp::Add, &total, &item)?;
            }
            Ok(total)
        }
        Builtin::Abs => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Value::Int(i) => i.checked_abs().map(Value::Int).ok_or_else(|| {
                    ScriptError::new(ErrorKind::OverflowError, "integer overflow")
                }),
                Value::Bool(b) => Ok(Value::Int(*b as i64)),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Err(ScriptError::type_error(format!(
                    "bad operand type for abs(): '{}'",
                    other.type_name()
                ))),
            }
        }
        Builtin::Round => {
            arity(name, &args, 1, 2)?;
            round(&args[0], args.get(1))
        }
        Builtin::Dir => {
            arity(name, &args, 0, 1)?;
            let mut names = match args.first() {
                None => interp.visible_names(),
                Some(value) => value.names().into_iter().map(|(n, _)| n).collect(),
            };
            names.sort();
            Ok(Value::list(names.into_iter().map(Value::str).collect()))
        }
        Builtin::Type => {
            arity(name, &args, 1, 1)?;
            Ok(type_of(&args[0]))
        }
        Builtin::Isinstance => {
            arity(name, &args, 2, 2)?;
            let classes = match &args[1] {
                Value::Tuple(items) => items.to_vec(),
                other => vec![other.clone()],
            };
            let mut result = false;
            for class in classes {
                match class {
                    Value::Builtin(b) if b.is_class() => result |= instance_of(&args[0], b),
                    _ => {
                        return Err(ScriptError::type_error(
                            "isinstance() arg 2 must be a type or tuple of types",
                        ))
                    }
                }
            }
            Ok(Value::Bool(result))
        }
        Builtin::Callable => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Bool(args[0].is_callable()))
        }
        Builtin::Hasattr => {
            arity(name, &args, 2, 2)?;
            let attr = expect_str(&args[1], "attribute name")?;
            Ok(Value::Bool(get_attribute(&args[0], attr).is_ok()))
        }
        Builtin::Getattr => {
            arity(name, &args, 2, 3)?;
            let attr = expect_str(&args[1], "attribute name")?;
            match (get_attribute(&args[0], attr), args.get(2)) {
                (Err(e), Some(default)) if e.kind == ErrorKind::AttributeError => {
                    Ok(default.clone())
                }
                (result, _) => result,
            }
        }
        Builtin::Help => {
            match args.first() {
                None => interp.write("Interactive help() is disabled in this REPL.\n")?,
                Some(value) => interp.write(&help_text(value))?,
            }
            Ok(Value::None)
        }
        Builtin::Input | Builtin::Exit | Builtin::Quit => {
            interp.write(&format!("'{}' is disabled in this REPL.\n", name))?;
            Ok(Value::None)
        }
        Builtin::Exception(kind) => {
            let message = match args.as_slice() {
                [] => String::new(),
                [single] => single.to_str(),
                many => Value::tuple(many.to_vec()).repr(),
            };
            Ok(Value::Exception(kind, Arc::from(message)))
        }
    }
}

fn iterate_optional(args: &[Value]) -> Result<Vec<Value>, ScriptError> {
    match args.first() {
        Some(value) => value.iterate(),
        None => Ok(Vec::new()),
    }
}

fn pairs_of(value: &Value) -> Result<Vec<(Value, Value)>, ScriptError> {
    let mut pairs = Vec::new();
    for (i, item) in value.iterate()?.into_iter().enumerate() {
        let pair = item.iterate()?;
        match <[Value; 2]>::try_from(pair) {
            Ok([k, v]) => pairs.push((k, v)),
            Err(pair) => {
                return Err(ScriptError::value_error(format!(
                    "dictionary update sequence element #{} has length {}; 2 is required",
                    i,
                    pair.len()
                )))
            }
        }
    }
    Ok(pairs)
}

fn len_of(value: &Value) -> Result<usize, ScriptError> {
    Ok(match value {
        Value::Str(s) => s.chars().count(),
        Value::List(items) | Value::Set(items) => items.lock().len(),
        Value::Tuple(items) => items.len(),
        Value::Dict(entries) => entries.lock().len(),
        Value::Range(start, stop, step) => range_len(*start, *stop, *step),
        other => {
            return Err(ScriptError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    })
}

fn to_int(value: &Value) -> Result<i64, ScriptError> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(*b as i64),
        Value::Float(f) => float_to_int(*f),
        Value::Str(s) => parse_int(s, 10).and_then(|v| expect_int(&v)),
        other => Err(ScriptError::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn float_to_int(f: f64) -> Result<i64, ScriptError> {
    if f.is_nan() {
        return Err(ScriptError::value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(ScriptError::new(
            ErrorKind::OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    let truncated = f.trunc();
    if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(ScriptError::new(ErrorKind::OverflowError, "integer overflow"));
    }
    Ok(truncated as i64)
}

fn parse_int(text: &str, base: i64) -> Result<Value, ScriptError> {
    let invalid = || {
        ScriptError::value_error(format!(
            "invalid literal for int() with base {}: {}",
            base,
            super::value::str_repr(text)
        ))
    };
    if !(2..=36).contains(&base) {
        return Err(ScriptError::value_error("int() base must be >= 2 and <= 36"));
    }
    let cleaned: String = text.trim().chars().filter(|c| *c != '_').collect();
    if cleaned.is_empty() {
        return Err(invalid());
    }
    i64::from_str_radix(&cleaned, base as u32)
        .map(Value::Int)
        .map_err(|_| invalid())
}

fn to_float(value: &Value) -> Result<f64, ScriptError> {
    match value {
        Value::Str(s) => s.trim().parse::<f64>().map_err(|_| {
            ScriptError::value_error(format!(
                "could not convert string to float: {}",
                super::value::str_repr(s)
            ))
        }),
        other => as_number(other).map(Number::as_f64).ok_or_else(|| {
            ScriptError::type_error(format!(
                "float() argument must be a string or a number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

fn round(value: &Value, digits: Option<&Value>) -> Result<Value, ScriptError> {
    let digits = digits.map(expect_int).transpose()?;
    match (as_number(value), digits) {
        (Some(Number::Int(i)), _) => Ok(Value::Int(i)),
        (Some(Number::Float(f)), None) => float_to_int(f.round_ties_even()).map(Value::Int),
        (Some(Number::Float(f)), Some(n)) => {
            let scale = 10f64.powi(n.clamp(-308, 308) as i32);
            Ok(Value::Float((f * scale).round_ties_even() / scale))
        }
        (None, _) => Err(ScriptError::type_error(format!(
            "type {} doesn't define __round__ method",
            value.type_name()
        ))),
    }
}

fn type_of(value: &Value) -> Value {
    let class = match value {
        Value::Bool(_) => Builtin::Bool,
        Value::Int(_) => Builtin::Int,
        Value::Float(_) => Builtin::Float,
        Value::Str(_) => Builtin::Str,
        Value::List(_) => Builtin::List,
        Value::Tuple(_) => Builtin::Tuple,
        Value::Dict(_) => Builtin::Dict,
        Value::Set(_) => Builtin::Set,
        Value::Range(..) => Builtin::Range,
        Value::Exception(kind, _) => Builtin::Exception(*kind),
        other => return Value::str(format!("<class '{}'>", other.type_name())),
    };
    Value::Builtin(class)
}

fn instance_of(value: &Value, class: Builtin) -> bool {
    match (value, class) {
        (Value::Bool(_), Builtin::Int) => true,
        (Value::Exception(..), Builtin::Exception(ErrorKind::Exception)) => true,
        _ => matches!(type_of(value), Value::Builtin(b) if b == class),
    }
}

fn help_text(value: &Value) -> String {
    let mut names = value.names();
    names.sort();
    let mut out = format!("Help on {} object:\n\n", value.type_name());
    for (name, callable) in names {
        out.push_str("    ");
        out.push_str(&name);
        if callable {
            out.push_str("(...)");
        }
        out.push('\n');
    }
    out
}

/// Stable merge sort that surfaces comparison errors
pub(super) fn sorted_values(mut items: Vec<Value>) -> Result<Vec<Value>, ScriptError> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = sorted_values(items)?;
    let right = sorted_values(right)?;

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => compare_values(r, l)? == Ordering::Less,
            _ => break,
        };
        if take_right {
            merged.extend(right.next());
        } else {
            merged.extend(left.next());
        }
    }
    merged.extend(left);
    merged.extend(right);
    Ok(merged)
}

/// Call a method from `type_methods` on a builtin value
pub(super) fn call_method(
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
) -> Result<Value, ScriptError> {
    match receiver {
        Value::Str(s) => str_method(s, name, args),
        Value::List(_) => list_method(receiver, name, args),
        Value::Tuple(items) => seq_query(items, "tuple", name, &args),
        Value::Dict(_) => dict_method(receiver, name, args),
        Value::Set(_) => set_method(receiver, name, args),
        other => Err(ScriptError::attribute_error(other.type_name(), name)),
    }
}

fn method_name(type_name: &str, name: &str) -> String {
    format!("{}.{}", type_name, name)
}

fn str_method(s: &str, name: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
    let qualified = method_name("str", name);
    let strip_chars = |args: &[Value]| -> Result<Option<Vec<char>>, ScriptError> {
        arity(&qualified, args, 0, 1)?;
        args.first()
            .map(|v| expect_str(v, "strip arg").map(|c| c.chars().collect()))
            .transpose()
    };
    Ok(match name {
        "upper" => Value::str(s.to_uppercase()),
        "lower" => Value::str(s.to_lowercase()),
        "strip" => Value::str(match strip_chars(&args)? {
            Some(chars) => s.trim_matches(chars.as_slice()),
            None => s.trim(),
        }),
        "lstrip" => Value::str(match strip_chars(&args)? {
            Some(chars) => s.trim_start_matches(chars.as_slice()),
            None => s.trim_start(),
        }),
        "rstrip" => Value::str(match strip_chars(&args)? {
            Some(chars) => s.trim_end_matches(chars.as_slice()),
            None => s.trim_end(),
        }),
        "split" => {
            arity(&qualified, &args, 0, 1)?;
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::None) => s.split_whitespace().map(Value::str).collect(),
                Some(sep) => {
                    let sep = expect_str(sep, "separator")?;
                    if sep.is_empty() {
                        return Err(ScriptError::value_error("empty separator"));
                    }
                    s.split(sep).map(Value::str).collect()
                }
            };
            Value::list(parts)
        }
        "join" => {
            arity(&qualified, &args, 1, 1)?;
            let mut parts = Vec::new();
            for (i, item) in args[0].iterate()?.into_iter().enumerate() {
                match item {
                    Value::Str(part) => parts.push(part.to_string()),
                    other => {
                        return Err(ScriptError::type_error(format!(
                            "sequence item {}: expected str instance, {} found",
                            i,
                            other.type_name()
                        )))
                    }
                }
            }
            let joined = parts.join(s);
            check_size(joined.len())?;
            Value::str(joined)
        }
        "replace" => {
            arity(&qualified, &args, 2, 2)?;
            let old = expect_str(&args[0], "replace arg 1")?;
            let new = expect_str(&args[1], "replace arg 2")?;
            if old.is_empty() {
                return Err(ScriptError::value_error("empty pattern"));
            }
            let replaced = s.replace(old, new);
            check_size(replaced.len())?;
            Value::str(replaced)
        }
        "startswith" => {
            arity(&qualified, &args, 1, 1)?;
            Value::Bool(s.starts_with(expect_str(&args[0], "startswith arg")?))
        }
        "endswith" => {
            arity(&qualified, &args, 1, 1)?;
            Value::Bool(s.ends_with(expect_str(&args[0], "endswith arg")?))
        }
        "find" => {
            arity(&qualified, &args, 1, 1)?;
            let needle = expect_str(&args[0], "find arg")?;
            Value::Int(
                s.find(needle)
                    .map_or(-1, |byte| s[..byte].chars().count() as i64),
            )
        }
        "count" => {
            arity(&qualified, &args, 1, 1)?;
            let needle = expect_str(&args[0], "count arg")?;
            Value::Int(if needle.is_empty() {
                s.chars().count() as i64 + 1
            } else {
                s.matches(needle).count() as i64
            })
        }
        "isdigit" => Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())),
        "isalpha" => Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic)),
        "capitalize" => {
            let mut chars = s.chars();
            Value::str(match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            })
        }
        "title" => {
            let mut out = String::with_capacity(s.len());
            let mut prev_alpha = false;
            for c in s.chars() {
                if prev_alpha {
                    out.extend(c.to_lowercase());
                } else {
                    out.extend(c.to_uppercase());
                }
                prev_alpha = c.is_alphabetic();
            }
            Value::str(out)
        }
        _ => return Err(ScriptError::attribute_error("str", name)),
    })
}

/// `count` and `index`, shared by lists and tuples
fn seq_query(
    items: &[Value],
    type_name: &str,
    name: &str,
    args: &[Value],
) -> Result<Value, ScriptError> {
    arity(&method_name(type_name, name), args, 1, 1)?;
    let needle = &args[0];
    match name {
        "count" => Ok(Value::Int(items.iter().filter(|v| v.equals(needle)).count() as i64)),
        "index" => items
            .iter()
            .position(|v| v.equals(needle))
            .map(|i| Value::Int(i as i64))
            .ok_or_else(|| {
                ScriptError::value_error(format!("{} is not in {}", needle.repr(), type_name))
            }),
        _ => Err(ScriptError::attribute_error(type_name, name)),
    }
}

fn list_method(receiver: &Value, name: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
    let Value::List(list) = receiver else {
        return Err(ScriptError::attribute_error(receiver.type_name(), name));
    };
    let qualified = method_name("list", name);
    match name {
        "append" => {
            arity(&qualified, &args, 1, 1)?;
            let mut items = list.lock();
            check_size(items.len() + 1)?;
            items.extend(args);
        }
        "extend" => {
            arity(&qualified, &args, 1, 1)?;
            let extra = args[0].iterate()?;
            let mut items = list.lock();
            check_size(items.len() + extra.len())?;
            items.extend(extra);
        }
        "insert" => {
            arity(&qualified, &args, 2, 2)?;
            let mut items = list.lock();
            check_size(items.len() + 1)?;
            let len = items.len() as i64;
            let at = expect_int(&args[0])?;
            let at = if at < 0 { (at + len).max(0) } else { at.min(len) };
            items.insert(at as usize, args[1].clone());
        }
        "pop" => {
            arity(&qualified, &args, 0, 1)?;
            let mut items = list.lock();
            if items.is_empty() {
                return Err(ScriptError::new(ErrorKind::IndexError, "pop from empty list"));
            }
            let at = match args.first() {
                Some(index) => index_of(index, items.len(), "pop").map_err(|e| match e.kind {
                    ErrorKind::IndexError => {
                        ScriptError::new(ErrorKind::IndexError, "pop index out of range")
                    }
                    _ => e,
                })?,
                None => items.len() - 1,
            };
            return Ok(items.remove(at));
        }
        "remove" => {
            arity(&qualified, &args, 1, 1)?;
            let snapshot = list.lock().clone();
            let Some(pos) = snapshot.iter().position(|v| v.equals(&args[0])) else {
                return Err(ScriptError::value_error("list.remove(x): x not in list"));
            };
            let mut items = list.lock();
            if pos < items.len() {
                items.remove(pos);
            }
        }
        "clear" => {
            arity(&qualified, &args, 0, 0)?;
            list.lock().clear();
        }
        "reverse" => {
            arity(&qualified, &args, 0, 0)?;
            list.lock().reverse();
        }
        "sort" => {
            arity(&qualified, &args, 0, 0)?;
            let snapshot = list.lock().clone();
            let sorted = sorted_values(snapshot)?;
            *list.lock() = sorted;
        }
        "copy" => {
            arity(&qualified, &args, 0, 0)?;
            let items = list.lock().clone();
            return Ok(Value::list(items));
        }
        "count" | "index" => {
            let snapshot = list.lock().clone();
            return seq_query(&snapshot, "list", name, &args);
        }
        _ => return Err(ScriptError::attribute_error("list", name)),
    }
    Ok(Value::None)
}

fn dict_method(receiver: &Value, name: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
    let Value::Dict(dict) = receiver else {
        return Err(ScriptError::attribute_error(receiver.type_name(), name));
    };
    let qualified = method_name("dict", name);
    let hashable = |key: &Value| {
        if key.is_hashable() {
            Ok(())
        } else {
            Err(ScriptError::type_error(format!(
                "unhashable type: '{}'",
                key.type_name()
            )))
        }
    };
    Ok(match name {
        "keys" | "values" | "items" => {
            arity(&qualified, &args, 0, 0)?;
            let entries = dict.lock().clone();
            Value::list(
                entries
                    .into_iter()
                    .map(|(k, v)| match name {
                        "keys" => k,
                        "values" => v,
                        _ => Value::tuple(vec![k, v]),
                    })
                    .collect(),
            )
        }
        "get" => {
            arity(&qualified, &args, 1, 2)?;
            hashable(&args[0])?;
            let found = dict_get(&dict.lock(), &args[0]);
            found.unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None))
        }
        "pop" => {
            arity(&qualified, &args, 1, 2)?;
            hashable(&args[0])?;
            let mut entries = dict.lock();
            match entries.iter().position(|(k, _)| k.equals(&args[0])) {
                Some(pos) => entries.remove(pos).1,
                None => match args.get(1) {
                    Some(default) => default.clone(),
                    None => return Err(key_error(&args[0])),
                },
            }
        }
        "setdefault" => {
            arity(&qualified, &args, 1, 2)?;
            let mut entries = dict.lock();
            match dict_get(&entries, &args[0]) {
                Some(existing) => existing,
                None => {
                    let default = args.get(1).cloned().unwrap_or(Value::None);
                    dict_insert(&mut entries, args[0].clone(), default.clone())?;
                    default
                }
            }
        }
        "update" => {
            arity(&qualified, &args, 1, 1)?;
            let pairs = match &args[0] {
                Value::Dict(other) => other.lock().clone(),
                other => pairs_of(other)?,
            };
            let mut entries = dict.lock();
            for (k, v) in pairs {
                dict_insert(&mut entries, k, v)?;
            }
            Value::None
        }
        "clear" => {
            arity(&qualified, &args, 0, 0)?;
            dict.lock().clear();
            Value::None
        }
        "copy" => {
            arity(&qualified, &args, 0, 0)?;
            let entries = dict.lock().clone();
            Value::Dict(Arc::new(parking_lot::Mutex::new(entries)))
        }
        _ => return Err(ScriptError::attribute_error("dict", name)),
    })
}

fn set_method(receiver: &Value, name: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
    let Value::Set(set) = receiver else {
        return Err(ScriptError::attribute_error(receiver.type_name(), name));
    };
    let qualified = method_name("set", name);
    Ok(match name {
        "add" => {
            arity(&qualified, &args, 1, 1)?;
            let mut items = set.lock();
            check_size(items.len() + 1)?;
            set_insert(&mut items, args[0].clone())?;
            Value::None
        }
        "remove" | "discard" => {
            arity(&qualified, &args, 1, 1)?;
            let mut items = set.lock();
            match items.iter().position(|v| v.equals(&args[0])) {
                Some(pos) => {
                    items.remove(pos);
                }
                None if name == "remove" => return Err(key_error(&args[0])),
                None => {}
            }
            Value::None
        }
        "pop" => {
            arity(&qualified, &args, 0, 0)?;
            let mut items = set.lock();
            if items.is_empty() {
                return Err(ScriptError::new(ErrorKind::KeyError, "'pop from an empty set'"));
            }
            items.remove(0)
        }
        "clear" => {
            arity(&qualified, &args, 0, 0)?;
            set.lock().clear();
            Value::None
        }
        "copy" => {
            arity(&qualified, &args, 0, 0)?;
            let items = set.lock().clone();
            Value::set(items)?
        }
        "union" | "intersection" | "difference" => {
            arity(&qualified, &args, 1, 1)?;
            let mine = set.lock().clone();
            let other = args[0].iterate()?;
            let items: Vec<Value> = match name {
                "union" => mine.into_iter().chain(other).collect(),
                "intersection" => mine
                    .into_iter()
                    .filter(|item| other.iter().any(|o| o.equals(item)))
                    .collect(),
                _ => mine
                    .into_iter()
                    .filter(|item| !other.iter().any(|o| o.equals(item)))
                    .collect(),
            };
            Value::set(items)?
        }
        _ => return Err(ScriptError::attribute_error("set", name)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse_program;
    use crate::script::value::Namespace;

    fn run(src: &str) -> String {
        let mut ns = Namespace::new();
        let mut out = String::new();
        let program = parse_program(src).unwrap();
        if let Err(e) = Interpreter::new(&mut ns, &mut out).interactive().run(&program) {
            out.push_str(&e.render());
        }
        out
    }

    #[test]
    fn test_disabled_builtins_print_notice() {
        assert_eq!(run("help()"), "Interactive help() is disabled in this REPL.\n");
        assert_eq!(run("input('name? ')"), "'input' is disabled in this REPL.\n");
        assert_eq!(run("exit()"), "'exit' is disabled in this REPL.\n");
    }

    #[test]
    fn test_help_on_object_lists_names() {
        let out = run("help([])");
        assert!(out.starts_with("Help on list object:"));
        assert!(out.contains("    append(...)\n"));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(run("int('42')"), "42\n");
        assert_eq!(run("int(' 7 ')"), "7\n");
        assert_eq!(run("int('ff', 16)"), "255\n");
        assert_eq!(run("int(3.9)"), "3\n");
        assert_eq!(run("float('2.5')"), "2.5\n");
        assert_eq!(run("str(1.0)"), "'1.0'\n");
        assert_eq!(run("bool([])"), "False\n");
        assert_eq!(run("list(range(3))"), "[0, 1, 2]\n");
        assert_eq!(run("dict([('a', 1)])"), "{'a': 1}\n");
        assert!(run("int('abc')")
            .contains("ValueError: invalid literal for int() with base 10: 'abc'"));
    }

    #[test]
    fn test_aggregates() {
        assert_eq!(run("sorted([3, 1, 2])"), "[1, 2, 3]\n");
        assert_eq!(run("min(4, 2, 8)"), "2\n");
        assert_eq!(run("max([4, 2, 8])"), "8\n");
        assert_eq!(run("sum([1, 2, 3])"), "6\n");
        assert_eq!(run("len('héllo')"), "5\n");
        assert_eq!(run("abs(-3)"), "3\n");
        assert_eq!(run("round(2.5)"), "2\n");
        assert_eq!(run("list(zip([1, 2], 'ab'))"), "[(1, 'a'), (2, 'b')]\n");
        assert!(run("sorted([1, 'a'])").contains("TypeError"));
        assert!(run("min([])").contains("ValueError: min() arg is an empty sequence"));
    }

    #[test]
    fn test_range_longer_than_an_int() {
        let setup = "r = range(-9223372036854775807 - 1, 9223372036854775807)\n";
        assert!(run(&format!("{}len(r)\n", setup))
            .ends_with("OverflowError: length does not fit in an int\n"));
        assert_eq!(run(&format!("{}r[-1]\n", setup)), "9223372036854775806\n");
        assert_eq!(run(&format!("{}r[0]\n", setup)), "-9223372036854775808\n");
        assert_eq!(run("len(range(0, 10, 3))"), "4\n");
    }

    #[test]
    fn test_type_and_isinstance() {
        assert_eq!(run("type(1)"), "<class 'int'>\n");
        assert_eq!(run("type(1) is int"), "True\n");
        assert_eq!(run("isinstance(True, int)"), "True\n");
        assert_eq!(run("isinstance('a', (int, str))"), "True\n");
        assert_eq!(run("callable(len)"), "True\n");
    }

    #[test]
    fn test_str_methods() {
        assert_eq!(run("'a,b'.split(',')"), "['a', 'b']\n");
        assert_eq!(run("'-'.join(['x', 'y'])"), "'x-y'\n");
        assert_eq!(run("'  hi '.strip()"), "'hi'\n");
        assert_eq!(run("'hello world'.title()"), "'Hello World'\n");
        assert_eq!(run("'abc'.find('c')"), "2\n");
    }

    #[test]
    fn test_container_methods() {
        assert_eq!(run("l = [3, 1]\nl.append(2)\nl.sort()\nl"), "[1, 2, 3]\n");
        assert_eq!(run("l = [1, 2]\nl.pop()"), "2\n");
        assert_eq!(run("d = {'a': 1}\nd.get('b', 0)"), "0\n");
        assert_eq!(run("d = {'a': 1}\nd.update({'b': 2})\nd.items()"), "[('a', 1), ('b', 2)]\n");
        assert_eq!(run("s = {1}\ns.add(1)\ns.add(2)\nlen(s)"), "2\n");
        assert!(run("[].pop()").contains("IndexError: pop from empty list"));
    }

    #[test]
    fn test_dir_lists_namespace() {
        assert_eq!(run("b = 1\na = 2\ndir()"), "['a', 'b']\n");
    }

    #[test]
    fn test_lookup_round_trips_names() {
        for name in Builtin::all_names() {
            assert_eq!(Builtin::lookup(name).map(Builtin::name), Some(name));
        }
    }
}
