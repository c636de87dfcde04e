//! Tab completion over a session namespace

use once_cell::sync::Lazy;
use regex::Regex;

use crate::script::{parse_expression, Builtin, Interpreter, Introspectable, Namespace, Value};

/// Trailing `expr.prefix` or bare `prefix` at the end of the input
static ATTR_MATCH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\w\.]+?)(?:\.([\w]*))?$").expect("completion pattern is valid"));

/// Split input like `window.win` into the base expression and attribute prefix
///
/// Input without a `.` yields the whole trailing identifier as the base and
/// an empty prefix.
pub fn parse_completion_expr(text: &str) -> Option<(String, String)> {
    let caps = ATTR_MATCH.captures(text)?;
    let expr = caps.get(1)?.as_str().to_string();
    let prefix = caps.get(2).map_or("", |m| m.as_str()).to_string();
    Some((expr, prefix))
}

/// Candidates completing `text`; failures yield an empty list
pub fn complete(namespace: &Namespace, text: &str) -> Vec<String> {
    let Some((expr, prefix)) = parse_completion_expr(text) else {
        return Vec::new();
    };

    if !text.contains('.') {
        let mut names: Vec<String> = namespace
            .iter()
            .map(|(name, _)| name)
            .filter(|name| name.starts_with(&expr))
            .cloned()
            .collect();
        names.extend(
            Builtin::all_names()
                .filter(|name| name.starts_with(&expr) && !namespace.contains(name))
                .map(str::to_string),
        );
        return names;
    }

    let Some(base) = resolve(namespace, &expr) else {
        return Vec::new();
    };
    let mut names = base.names();
    names.sort();
    names
        .into_iter()
        .filter(|(name, _)| name.starts_with(&prefix))
        .map(|(name, callable)| format!("{}.{}{}", expr, name, if callable { "(" } else { "" }))
        .collect()
}

/// Evaluate a dotted expression against a scratch copy of the namespace
fn resolve(namespace: &Namespace, expr: &str) -> Option<Value> {
    let parsed = parse_expression(expr).ok()?;
    let mut scratch = namespace.clone();
    let mut sink = String::new();
    Interpreter::new(&mut scratch, &mut sink).eval(&parsed).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{HostObject, ScriptError};
    use pretty_assertions::assert_eq;

    #[derive(Debug)]
    struct Dummy;

    impl Introspectable for Dummy {
        fn names(&self) -> Vec<(String, bool)> {
            vec![("method".to_string(), true), ("value".to_string(), false)]
        }
    }

    impl HostObject for Dummy {
        fn type_name(&self) -> &str {
            "Dummy"
        }

        fn get_attr(&self, name: &str) -> Option<Value> {
            (name == "value").then(|| Value::Int(1))
        }

        fn call_method(&self, _name: &str, _args: Vec<Value>) -> Result<Value, ScriptError> {
            Ok(Value::None)
        }
    }

    fn namespace() -> Namespace {
        [
            ("window", Value::str("x")),
            ("windows", Value::Int(123)),
            ("dummy", Value::host(Dummy)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_parse_completion_expr() {
        assert_eq!(
            parse_completion_expr("window.win"),
            Some(("window".to_string(), "win".to_string()))
        );
        assert_eq!(
            parse_completion_expr("windo"),
            Some(("windo".to_string(), String::new()))
        );
        assert_eq!(
            parse_completion_expr("window."),
            Some(("window".to_string(), String::new()))
        );
        assert_eq!(parse_completion_expr(""), None);
    }

    #[test]
    fn test_top_level_names() {
        assert_eq!(complete(&namespace(), "wind"), vec!["window", "windows"]);
    }

    #[test]
    fn test_top_level_includes_builtins() {
        assert_eq!(complete(&namespace(), "pri"), vec!["print"]);
    }

    #[test]
    fn test_attribute_marks_callables() {
        assert_eq!(complete(&namespace(), "dummy.me"), vec!["dummy.method("]);
        assert_eq!(complete(&namespace(), "dummy."), vec!["dummy.method(", "dummy.value"]);
    }

    #[test]
    fn test_builtin_type_methods() {
        let got = complete(&namespace(), "window.up");
        assert_eq!(got, vec!["window.upper("]);
    }

    #[test]
    fn test_invalid_expression_is_empty() {
        assert!(complete(&namespace(), "invalid..expr").is_empty());
        assert!(complete(&namespace(), "missing.attr").is_empty());
    }
}
