//! REPL sessions served over IPC

pub mod completion;
pub mod manager;
pub mod session;

pub use manager::{SessionManager, SESSION_TIMEOUT};
pub use session::{EvalOutput, Session};
