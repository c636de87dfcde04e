//! Core of wmipc: the framed Unix-socket protocol, the connection handler,
//! the REPL session manager and the sandboxed interpreter it evaluates with.

pub mod ipc;
pub mod repl;
pub mod script;
