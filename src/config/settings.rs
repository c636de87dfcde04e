use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::ipc::client::Timeouts;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Window manager control socket and REPL client")]
pub struct Config {
    /// Enable debug mode
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Use the given control socket instead of the default one
    #[arg(short, long, global = true)]
    pub socket: Option<PathBuf>,

    /// Subcommand (defaults to `repl`)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run a demo host serving the control socket
    Serve {
        /// Accept REPL sessions from the start
        #[arg(long)]
        repl: bool,
    },
    /// Send one JSON command and print the response
    Cmd {
        /// Command payload, e.g. '["status"]'
        payload: String,
    },
    /// Check that a host answers keepalives
    Ping,
    /// Open an interactive REPL session in the host
    Repl,
}

impl Config {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The selected subcommand, `repl` when none was given
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Repl)
    }
}

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Control socket path; derived from the display when unset
    #[serde(default)]
    pub socket_path: Option<PathBuf>,

    /// REPL settings of the serving host
    #[serde(default)]
    pub repl: ReplSettings,

    /// Client request timeouts
    #[serde(default)]
    pub client: ClientSettings,
}

/// REPL settings of the serving host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplSettings {
    /// Enable the session manager at startup
    #[serde(default)]
    pub enabled: bool,

    /// Seconds a session may sit untouched before it is evicted
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_idle_timeout() -> u64 {
    3600
}

impl Default for ReplSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl ReplSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Per-request client timeouts, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_eval_timeout")]
    pub eval_timeout_secs: u64,

    #[serde(default = "default_complete_timeout")]
    pub complete_timeout_secs: u64,

    #[serde(default = "default_keepalive_timeout")]
    pub keepalive_timeout_secs: u64,
}

fn default_command_timeout() -> u64 {
    30
}

fn default_eval_timeout() -> u64 {
    30
}

fn default_complete_timeout() -> u64 {
    5
}

fn default_keepalive_timeout() -> u64 {
    5
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
            eval_timeout_secs: default_eval_timeout(),
            complete_timeout_secs: default_complete_timeout(),
            keepalive_timeout_secs: default_keepalive_timeout(),
        }
    }
}

impl ClientSettings {
    /// Timeouts for a [`crate::ipc::PersistentClient`]
    ///
    /// Session start shares the evaluation timeout.
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            command: Duration::from_secs(self.command_timeout_secs),
            eval: Duration::from_secs(self.eval_timeout_secs),
            session_start: Duration::from_secs(self.eval_timeout_secs),
            complete: Duration::from_secs(self.complete_timeout_secs),
            keepalive: Duration::from_secs(self.keepalive_timeout_secs),
        }
    }
}

impl Settings {
    /// Load settings from config file
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        // An explicit path must exist
        if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read config file: {:?}", p))?;
            return toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", p));
        }

        let default_paths = [
            dirs::config_dir().map(|p| p.join("wmipc/config.toml")),
            dirs::home_dir().map(|p| p.join(".config/wmipc/config.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {:?}", path))?;
                return toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {:?}", path));
            }
        }

        Ok(Self::default())
    }

    /// Merge CLI config into settings (CLI takes precedence)
    pub fn merge_cli(&mut self, cli: &Config) {
        if let Some(socket) = &cli.socket {
            self.socket_path = Some(socket.clone());
        }
        if let Some(Command::Serve { repl: true }) = &cli.command {
            self.repl.enabled = true;
        }
    }

    /// Clamp values that would make the socket unusable
    pub fn validate(&mut self) {
        self.repl.idle_timeout_secs = self.repl.idle_timeout_secs.max(1);
        let client = &mut self.client;
        client.command_timeout_secs = client.command_timeout_secs.max(1);
        client.eval_timeout_secs = client.eval_timeout_secs.max(1);
        client.complete_timeout_secs = client.complete_timeout_secs.max(1);
        client.keepalive_timeout_secs = client.keepalive_timeout_secs.max(1);
    }

    /// Socket to serve or connect to
    ///
    /// Falls back to the per-display default under the cache directory.
    pub fn socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(|| wmipc_core::ipc::protocol::socket_path(None))
    }
}
