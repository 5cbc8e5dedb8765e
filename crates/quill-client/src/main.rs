//! Quill interactive client.
//!
//! Reads prompts from stdin and streams replies to stdout. Ctrl-C cancels
//! the reply in progress; `/clear` starts over; `/quit` or end of input exits.

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use quill_client::{ChatOptions, ClientError, HttpClient, HttpConfig, SessionClient, SessionEvent};
use quill_core::config::load_config;
use quill_core::tracing_init::{LogTarget, init_tracing_with};

#[derive(Parser, Debug)]
#[command(name = "quill")]
#[command(version, about = "Quill - chat with a streaming relay from the terminal")]
struct Args {
    /// Path to a JSON settings file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Relay base URL.
    #[arg(long, env = "QUILL_RELAY_URL")]
    relay_url: Option<String>,

    /// Bearer token sent to the relay.
    #[arg(long, env = "QUILL_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    /// Model to request (the relay's default when unset).
    #[arg(long)]
    model: Option<String>,

    /// Sampling temperature.
    #[arg(long)]
    temperature: Option<f32>,

    /// Maximum tokens per reply.
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Output logs as JSON.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing_with("quill=warn,quill_client=warn", args.log_json, LogTarget::Stderr);

    let mut config = load_config(args.config.as_deref())?.client;
    if let Some(url) = args.relay_url {
        config.relay_url = url;
    }
    if let Some(token) = args.auth_token.filter(|t| !t.is_empty()) {
        config.auth_token = Some(token);
    }

    let http = HttpClient::new(HttpConfig::from_client_config(&config)?)?;
    let options = ChatOptions {
        path: config.chat_path.clone(),
        model: args.model,
        temperature: args.temperature,
        max_tokens: args.max_tokens,
    };
    let (session, mut events) = SessionClient::spawn(http, options);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut out = std::io::stdout();

    loop {
        write!(out, "> ")?;
        out.flush()?;

        let Some(line) = stdin.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => {}
            "/quit" => break,
            "/clear" => {
                session.clear_session().await?;
                drain_until(&mut events, |e| matches!(e, SessionEvent::Cleared)).await;
                writeln!(out, "[Session cleared]")?;
            }
            text => match session.begin_turn(text).await {
                Ok(_) => {
                    if !stream_reply(&session, &mut events, &mut out).await? {
                        break;
                    }
                }
                Err(ClientError::TurnInFlight) => writeln!(out, "[Still answering]")?,
                Err(e) => return Err(e.into()),
            },
        }
    }

    Ok(())
}

/// Print the in-flight reply as it streams. Returns `false` if the session
/// task is gone.
async fn stream_reply(
    session: &quill_client::SessionHandle,
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    out: &mut std::io::Stdout,
) -> anyhow::Result<bool> {
    let mut printed = 0;
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Cannot listen for Ctrl-C");
                }
                session.cancel_turn().await?;
                continue;
            }
        };
        let Some(event) = event else {
            return Ok(false);
        };

        match event {
            SessionEvent::MessageUpdated(message) => {
                write_tail(out, &message.content, &mut printed)?;
            }
            SessionEvent::TurnEnded { message, .. } => {
                if let Some(message) = message {
                    write_tail(out, &message.content, &mut printed)?;
                }
                writeln!(out)?;
                return Ok(true);
            }
            SessionEvent::Error { status, message } => {
                warn!(?status, error = %message, "Turn failed");
            }
            SessionEvent::TurnStarted { .. } | SessionEvent::Cleared => {}
        }
    }
}

/// Write the part of `content` not yet printed.
fn write_tail(out: &mut std::io::Stdout, content: &str, printed: &mut usize) -> std::io::Result<()> {
    if let Some(tail) = content.get(*printed..) {
        out.write_all(tail.as_bytes())?;
        out.flush()?;
        *printed = content.len();
    }
    Ok(())
}

async fn drain_until(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    done: impl Fn(&SessionEvent) -> bool,
) {
    while let Some(event) = events.recv().await {
        if done(&event) {
            break;
        }
    }
}
