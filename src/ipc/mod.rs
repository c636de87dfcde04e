//! Client side of the control socket
//!
//! The host side (protocol, server, connection handling) lives in
//! `wmipc_core::ipc`; this module holds the one-shot and persistent clients.

pub mod client;

pub use client::{Client, EvalResponse, IpcError, PersistentClient, Timeouts};
