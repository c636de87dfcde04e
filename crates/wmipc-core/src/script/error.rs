//! Script-level errors and traceback rendering

use std::fmt;

use thiserror::Error;

/// Exception kind, named after the Python exception it mirrors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SyntaxError,
    NameError,
    TypeError,
    ValueError,
    ZeroDivisionError,
    IndexError,
    KeyError,
    AttributeError,
    OverflowError,
    MemoryError,
    RecursionError,
    RuntimeError,
    Exception,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::NameError => "NameError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ValueError => "ValueError",
            ErrorKind::ZeroDivisionError => "ZeroDivisionError",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::KeyError => "KeyError",
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::OverflowError => "OverflowError",
            ErrorKind::MemoryError => "MemoryError",
            ErrorKind::RecursionError => "RecursionError",
            ErrorKind::RuntimeError => "RuntimeError",
            ErrorKind::Exception => "Exception",
        }
    }

    /// Kinds user code may construct and raise by name
    pub fn from_builtin_name(name: &str) -> Option<Self> {
        Some(match name {
            "Exception" => ErrorKind::Exception,
            "ValueError" => ErrorKind::ValueError,
            "TypeError" => ErrorKind::TypeError,
            "KeyError" => ErrorKind::KeyError,
            "IndexError" => ErrorKind::IndexError,
            "RuntimeError" => ErrorKind::RuntimeError,
            "AttributeError" => ErrorKind::AttributeError,
            "NameError" => ErrorKind::NameError,
            "ZeroDivisionError" => ErrorKind::ZeroDivisionError,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of a traceback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub line: usize,
    pub scope: String,
}

/// An exception raised while compiling or running a snippet
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub message: String,
    /// Innermost frame last, empty until the error leaves its first statement
    pub trace: Vec<TraceEntry>,
    /// Source line of a syntax error
    pub syntax_line: Option<usize>,
}

impl ScriptError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            trace: Vec::new(),
            syntax_line: None,
        }
    }

    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self {
            syntax_line: Some(line),
            ..Self::new(ErrorKind::SyntaxError, message)
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValueError, message)
    }

    pub fn name_error(name: &str) -> Self {
        Self::new(ErrorKind::NameError, format!("name '{}' is not defined", name))
    }

    pub fn attribute_error(type_name: &str, attr: &str) -> Self {
        Self::new(
            ErrorKind::AttributeError,
            format!("'{}' object has no attribute '{}'", type_name, attr),
        )
    }

    /// Render the Python-style traceback shown to the REPL user
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(line) = self.syntax_line {
            out.push_str(&format!("  File \"<stdin>\", line {}\n", line));
        } else if !self.trace.is_empty() {
            out.push_str("Traceback (most recent call last):\n");
            for entry in &self.trace {
                out.push_str(&format!(
                    "  File \"<stdin>\", line {}, in {}\n",
                    entry.line, entry.scope
                ));
            }
        }
        if self.message.is_empty() {
            out.push_str(self.kind.name());
        } else {
            out.push_str(&format!("{}: {}", self.kind, self.message));
        }
        out.push('\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_traceback() {
        let mut err = ScriptError::new(ErrorKind::ZeroDivisionError, "division by zero");
        err.trace = vec![
            TraceEntry {
                line: 3,
                scope: "<module>".into(),
            },
            TraceEntry {
                line: 2,
                scope: "f".into(),
            },
        ];
        assert_eq!(
            err.render(),
            "Traceback (most recent call last):\n  File \"<stdin>\", line 3, in <module>\n  File \"<stdin>\", line 2, in f\nZeroDivisionError: division by zero\n"
        );
    }

    #[test]
    fn test_render_syntax_error() {
        let err = ScriptError::syntax(4, "invalid syntax");
        assert_eq!(
            err.render(),
            "  File \"<stdin>\", line 4\nSyntaxError: invalid syntax\n"
        );
    }
}
