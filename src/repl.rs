//! Line-oriented REPL front-end over a persistent connection
//!
//! Reads stdin a line at a time and submits a block once it is complete.
//! A line starting with `?` asks the host for completions instead.

use std::io::Write;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use wmipc_core::script::{parse_program, ParseError};

use crate::config::Settings;
use crate::ipc::{Client, IpcError, PersistentClient};

const PROMPT: &str = ">>> ";
const CONTINUATION: &str = "... ";

/// Whether `text` is ready to submit
///
/// Incomplete input waits for more lines. A multi-line block is only
/// complete once it ends with a blank line. Syntax errors count as complete
/// so the host reports them.
pub fn is_code_complete(text: &str) -> bool {
    match parse_program(text) {
        Err(ParseError::Incomplete) => false,
        Err(ParseError::Syntax { .. }) => true,
        Ok(_) => text.trim_end_matches('\n').lines().count() <= 1 || text.ends_with("\n\n"),
    }
}

/// Run an interactive session against the host at the configured socket
///
/// The host's REPL server is started first and stopped again on exit.
pub async fn run(settings: &Settings) -> Result<()> {
    let socket = settings.socket_path();
    let timeouts = settings.client.timeouts();
    let control = Client::new(&socket).with_timeout(timeouts.command);

    control
        .send(&json!(["start_repl_server"]))
        .await
        .context("Failed to start the host REPL server")?;

    let mut client = PersistentClient::new(&socket).with_timeouts(timeouts);
    let result = session(&mut client).await;

    if let Err(e) = control.send(&json!(["stop_repl_server"])).await {
        tracing::warn!("Failed to stop the host REPL server: {}", e);
    }
    result
}

async fn session(client: &mut PersistentClient) -> Result<()> {
    client.connect().await?;
    let session_id = client.start_session().await?;
    println!("Connected to wmipc REPL\nPress Ctrl+D to exit.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut buffer = String::new();
    loop {
        prompt(if buffer.is_empty() { PROMPT } else { CONTINUATION })?;
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!("\nExiting.");
            break;
        };

        if buffer.is_empty() {
            if let Some(text) = line.strip_prefix('?') {
                complete(client, text, &session_id).await?;
                continue;
            }
            buffer = line;
        } else {
            buffer.push('\n');
            buffer.push_str(&line);
        }

        if !is_code_complete(&buffer) {
            continue;
        }
        let code = std::mem::take(&mut buffer);
        match client.send_eval(&code, Some(&session_id)).await {
            Ok(response) if !response.output.is_empty() => println!("{}", response.output),
            Ok(_) => {}
            Err(IpcError::Server(e)) => println!("Error: {}", e),
            Err(e) => return Err(e.into()),
        }
    }

    client.end_session(&session_id).await?;
    client.close().await;
    Ok(())
}

async fn complete(client: &mut PersistentClient, text: &str, session_id: &str) -> Result<()> {
    match client.send_complete(text, Some(session_id)).await {
        Ok(candidates) => {
            for candidate in candidates {
                println!("{}", candidate);
            }
            Ok(())
        }
        Err(IpcError::Server(e)) => {
            println!("Error: {}", e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn prompt(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line_is_complete() {
        assert!(is_code_complete("x = 1"));
        assert!(is_code_complete("print(x)"));
    }

    #[test]
    fn test_open_block_is_incomplete() {
        assert!(!is_code_complete("def f():"));
        assert!(!is_code_complete("values = [1,"));
    }

    #[test]
    fn test_block_needs_trailing_blank_line() {
        assert!(!is_code_complete("def f():\n    return 1"));
        assert!(!is_code_complete("def f():\n    return 1\n"));
        assert!(is_code_complete("def f():\n    return 1\n\n"));
    }

    #[test]
    fn test_syntax_error_is_submitted() {
        assert!(is_code_complete("x = = 1"));
    }
}
