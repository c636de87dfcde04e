//! wmipc: control socket client and demo host for a window manager
//!
//! The protocol, server and REPL session machinery live in `wmipc_core`;
//! this crate adds settings, the clients, a demo host and the line front-end.

pub mod config;
pub mod host;
pub mod ipc;
pub mod repl;
