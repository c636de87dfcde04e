//! IPC server for the host process
//!
//! Binds the control socket, accepts client connections and runs one
//! `ConnectionHandler` task per connection.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

use crate::ipc::connection::{ConnectionHandler, ReplSlot};
use crate::ipc::handler::{CommandHandler, ReplHandler};
use crate::ipc::lock::LockGate;

/// IPC server owning the listening socket
pub struct Server {
    socket_path: PathBuf,
    handler: Arc<dyn CommandHandler>,
    repl: ReplSlot,
    lock: LockGate,
    accept_task: Option<JoinHandle<()>>,
}

impl Server {
    /// Create a server for `socket_path`; nothing is bound until `start`
    pub fn new(socket_path: impl Into<PathBuf>, handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            socket_path: socket_path.into(),
            handler,
            repl: Arc::new(RwLock::new(None)),
            lock: LockGate::new(),
            accept_task: None,
        }
    }

    /// Share an existing lock gate instead of the server's own
    pub fn with_lock_gate(mut self, lock: LockGate) -> Self {
        self.lock = lock;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// The lock gate consulted for every `COMMAND`
    pub fn lock_gate(&self) -> &LockGate {
        &self.lock
    }

    /// Install or remove the REPL handler
    ///
    /// Takes effect for already open connections on their next request.
    pub fn set_repl_handler(&self, handler: Option<Arc<dyn ReplHandler>>) {
        *self.repl.write() = handler;
    }

    pub fn has_repl_handler(&self) -> bool {
        self.repl.read().is_some()
    }

    /// Bind the socket and spawn the accept loop
    ///
    /// A stale socket file is removed first; an active one (another host
    /// still listening) is an error.
    pub async fn start(&mut self) -> Result<()> {
        if self.accept_task.is_some() {
            return Ok(());
        }

        if let Some(dir) = self.socket_path.parent() {
            ensure_socket_dir(dir)?;
        }

        let sock = &self.socket_path;
        if sock.exists() {
            match tokio::net::UnixStream::connect(sock).await {
                Ok(_) => {
                    anyhow::bail!(
                        "Another host is already listening on {}",
                        sock.display()
                    );
                }
                Err(_) => {
                    // Stale socket, safe to remove
                    std::fs::remove_file(sock).with_context(|| {
                        format!("Failed to remove stale socket: {}", sock.display())
                    })?;
                }
            }
        }

        // std binds with SOCK_CLOEXEC, so the descriptor never leaks into
        // processes the host spawns
        let listener = UnixListener::bind(sock)
            .with_context(|| format!("Failed to bind IPC socket: {}", sock.display()))?;

        std::fs::set_permissions(sock, std::fs::Permissions::from_mode(0o700))
            .context("Failed to set socket permissions")?;

        let handler = self.handler.clone();
        let repl = self.repl.clone();
        let lock = self.lock.clone();
        self.accept_task = Some(tokio::spawn(async move {
            Self::accept_loop(listener, handler, repl, lock).await;
        }));

        tracing::info!("IPC server listening on {}", sock.display());
        Ok(())
    }

    /// Stop accepting connections and remove the socket file
    pub fn close(&mut self) {
        if let Some(task) = self.accept_task.take() {
            tracing::info!("Stopping IPC server on {}", self.socket_path.display());
            task.abort();
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }

    async fn accept_loop(
        listener: UnixListener,
        handler: Arc<dyn CommandHandler>,
        repl: ReplSlot,
        lock: LockGate,
    ) {
        let next_peer = AtomicU64::new(1);
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let peer = next_peer.fetch_add(1, Ordering::Relaxed);
                    let conn = ConnectionHandler::new(
                        stream,
                        handler.clone(),
                        repl.clone(),
                        lock.clone(),
                        peer,
                    );
                    tokio::spawn(conn.run());
                }
                Err(e) => {
                    tracing::warn!("IPC accept error: {}", e);
                }
            }
        }
    }
}

/// Ensure the socket directory exists and is not a symlink
fn ensure_socket_dir(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    if dir.exists() {
        let meta = std::fs::symlink_metadata(dir)
            .with_context(|| format!("Failed to read metadata for: {}", dir.display()))?;
        if meta.is_symlink() {
            anyhow::bail!(
                "Socket directory is a symlink (possible attack): {}",
                dir.display()
            );
        }
        if !meta.is_dir() {
            anyhow::bail!("Socket path parent is not a directory: {}", dir.display());
        }
        return Ok(());
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create socket directory: {}", dir.display()))?;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
        .with_context(|| format!("Failed to set permissions on: {}", dir.display()))?;
    Ok(())
}

impl Drop for Server {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::{read_message, write_message, MessageType};
    use serde_json::{json, Value};

    fn echo() -> Arc<dyn CommandHandler> {
        Arc::new(|payload: Value| payload)
    }

    #[test]
    fn test_server_holds_handlers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sock");
        let server = Server::new(&path, echo());
        assert_eq!(server.socket_path(), path.as_path());
        assert!(!server.has_repl_handler());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_start_serves_commands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sock");
        let mut server = Server::new(&path, echo());
        server.start().await.unwrap();
        assert!(path.exists());

        let mut stream = tokio::net::UnixStream::connect(&path).await.unwrap();
        write_message(&mut stream, MessageType::Command, &json!({"ping": 1}))
            .await
            .unwrap();
        let (t, payload) = read_message(&mut stream).await.unwrap().unwrap();
        assert_eq!(t, MessageType::CommandResponse);
        assert_eq!(payload, json!({"ping": 1}));

        server.close();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_start_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        // A socket file nobody listens on
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let mut server = Server::new(&path, echo());
        server.start().await.unwrap();
        let mut stream = tokio::net::UnixStream::connect(&path).await.unwrap();
        write_message(&mut stream, MessageType::Keepalive, &Value::Null)
            .await
            .unwrap();
        let (t, _) = read_message(&mut stream).await.unwrap().unwrap();
        assert_eq!(t, MessageType::KeepaliveAck);
    }

    #[tokio::test]
    async fn test_start_refuses_active_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("busy.sock");
        let mut first = Server::new(&path, echo());
        first.start().await.unwrap();

        let mut second = Server::new(&path, echo());
        let err = second.start().await.unwrap_err();
        assert!(err.to_string().contains("already listening"));
    }
}
