//! Sandboxed Python-flavoured interpreter backing REPL sessions
//!
//! Snippets run against an explicit [`Namespace`] instead of any
//! process-wide state, so a session can only reach what its host put there.

pub mod ast;
pub mod builtins;
pub mod error;
pub mod interp;
pub mod lexer;
pub mod parser;
pub mod value;

pub use ast::ParseError;
pub use builtins::Builtin;
pub use error::{ErrorKind, ScriptError};
pub use interp::{get_attribute, Interpreter};
pub use parser::{parse_expression, parse_program};
pub use value::{HostObject, Introspectable, Namespace, Value};
