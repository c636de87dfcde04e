use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wmipc::config::{Command, Config, Settings};
use wmipc::host::{DemoHost, HostState};
use wmipc::ipc::{Client, PersistentClient};
use wmipc_core::ipc::{LockGate, ReplHandler, Server};
use wmipc_core::repl::SessionManager;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Config::parse_args();

    // Setup logging
    setup_logging(cli.debug);

    // Load settings
    let mut settings = Settings::load(cli.config.as_ref())?;
    settings.merge_cli(&cli);
    settings.validate();

    match cli.command() {
        Command::Serve { .. } => serve(&settings).await,
        Command::Cmd { payload } => send_command(&settings, &payload).await,
        Command::Ping => ping(&settings).await,
        Command::Repl => wmipc::repl::run(&settings).await,
    }
}

fn setup_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("wmipc=debug,wmipc_core=debug")
    } else {
        EnvFilter::new("wmipc=info,wmipc_core=info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Serve the demo host until SIGINT or SIGTERM
///
/// SIGUSR1 locks the session and SIGUSR2 unlocks it.
async fn serve(settings: &Settings) -> Result<()> {
    let lock = LockGate::new();
    let manager = Arc::new(
        SessionManager::new()
            .with_idle_timeout(settings.repl.idle_timeout())
            .with_lock_gate(lock.clone()),
    );
    let host = Arc::new(DemoHost::new(
        Arc::new(HostState::new(lock.clone())),
        manager.clone(),
    ));
    if settings.repl.enabled {
        host.start_repl();
    }

    let mut server = Server::new(settings.socket_path(), host).with_lock_gate(lock.clone());
    server.set_repl_handler(Some(manager as Arc<dyn ReplHandler>));
    server.start().await?;

    let mut usr1 = signal(SignalKind::user_defined1()).context("Failed to watch SIGUSR1")?;
    let mut usr2 = signal(SignalKind::user_defined2()).context("Failed to watch SIGUSR2")?;
    let mut term = signal(SignalKind::terminate()).context("Failed to watch SIGTERM")?;
    loop {
        tokio::select! {
            _ = usr1.recv() => lock.lock(),
            _ = usr2.recv() => lock.unlock(),
            _ = term.recv() => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    server.close();
    Ok(())
}

async fn send_command(settings: &Settings, payload: &str) -> Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("Command payload is not valid JSON")?;
    let response = Client::new(settings.socket_path())
        .with_timeout(settings.client.timeouts().command)
        .send(&payload)
        .await?;
    if let Some(error) = response.get("error") {
        anyhow::bail!("Host returned an error: {}", error);
    }
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn ping(settings: &Settings) -> Result<()> {
    let socket = settings.socket_path();
    let mut client = PersistentClient::new(&socket).with_timeouts(settings.client.timeouts());
    let started = std::time::Instant::now();
    client.connect().await?;
    client.keepalive().await?;
    client.close().await;
    println!("{}: alive ({:?})", socket.display(), started.elapsed());
    Ok(())
}
