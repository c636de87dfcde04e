//! IPC server side
//!
//! Frames are a 6-byte header (version, type, big-endian payload length)
//! followed by a JSON payload, exchanged over a Unix domain stream socket.

pub mod connection;
pub mod handler;
pub mod lock;
pub mod protocol;
pub mod server;

pub use connection::ConnectionHandler;
pub use handler::{error_response, CommandHandler, ReplHandler};
pub use lock::LockGate;
pub use protocol::{MessageType, ProtocolError};
pub use server::Server;
