use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    select,
    task::block_in_place,
    time::{MissedTickBehavior, interval},
};
use tracing::{info, warn};

use protocol_chat::{
    cli::Cli,
    console::ConsoleCommand,
    history::TracingHistory,
    session::{ChatLine, ChatSession},
    status,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the transcript; logs go to stderr.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let (sink, status_rx) = status::channel();
    let mut session = ChatSession::new(
        cli.build_handlers(&sink),
        Box::new(TracingHistory),
        status_rx,
    );

    // The sink's own events (e.g. "listening") would repeat the select status.
    let mut startup = block_in_place(|| session.select(cli.protocol));
    for line in session.poll() {
        if !startup.contains(&line) {
            startup.push(line);
        }
    }
    render(&startup).await?;

    run_loop(&mut session, cli.poll_interval()).await?;

    render(&block_in_place(|| session.shutdown())).await?;
    info!("chat session closed");
    Ok(())
}

async fn run_loop(session: &mut ChatSession, poll_interval: Duration) -> Result<()> {
    let mut stdin = BufReader::new(io::stdin()).lines();
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        select! {
            _ = ticker.tick() => {
                render(&session.poll()).await?;
            }
            line = stdin.next_line() => {
                let Some(input) = line? else {
                    break;
                };
                if !handle_input(session, &input).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }
    Ok(())
}

/// Returns `false` when the user asked to leave.
async fn handle_input(session: &mut ChatSession, input: &str) -> Result<bool> {
    let lines = match ConsoleCommand::parse(input) {
        Ok(None) => return Ok(true),
        Ok(Some(ConsoleCommand::Quit)) => return Ok(false),
        // Handlers block on sockets and thread joins; keep the runtime's
        // other workers free while they do.
        Ok(Some(ConsoleCommand::Say(text))) => block_in_place(|| session.send(&text)),
        Ok(Some(ConsoleCommand::Use(kind))) => block_in_place(|| session.select(kind)),
        Ok(Some(ConsoleCommand::Protocols)) => {
            vec![ChatLine::Status(format!(
                "available: {}",
                session.protocols().join(", ")
            ))]
        }
        Err(err) => vec![ChatLine::Error(err.to_string())],
    };
    render(&lines).await?;
    Ok(true)
}

async fn render(lines: &[ChatLine]) -> Result<()> {
    if lines.is_empty() {
        return Ok(());
    }
    let mut stdout = io::stdout();
    for line in lines {
        stdout.write_all(line.to_string().as_bytes()).await?;
        stdout.write_all(b"\n").await?;
    }
    stdout.flush().await?;
    Ok(())
}
