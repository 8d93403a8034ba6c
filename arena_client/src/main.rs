//! Headless arena client.
//!
//! Usage:
//!   cargo run -p arena_client -- [--addr 127.0.0.1:40000] [--name Player]
//!                                [--session session.json] [--config client.json]
//!
//! Resumes a stored session if it is still valid, otherwise waits for a
//! `login` command. Match state is summarized to the log.
//!
//! Console commands:
//!   login <name> <token> - Store a session and connect
//!   logout               - Disconnect and forget the session
//!   pause | resume       - Ask the server to pause or resume the match
//!   restart | surrender  - Match controls
//!   status               - Show connection and match status
//!   lobby                - Show profile, minis, maps and friends
//!   quit                 - Exit client

use std::env;
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use arena_client::{
    render::LogPresenter,
    session::{JsonFileStore, MaxAgeValidator},
    GameClient,
};
use arena_shared::{config::ClientConfig, net::TcpDialer};
use tokio::{runtime::Handle, sync::mpsc};
use tracing::info;

/// Seconds between match summaries in the log.
const SUMMARY_EVERY_SECS: u64 = 2;

fn parse_args() -> anyhow::Result<ClientConfig> {
    let args: Vec<String> = env::args().collect();

    // Config file first so flags override it.
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => ClientConfig::load(Path::new(&args[i + 1]))?,
        _ => ClientConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.player_name = args[i + 1].clone();
                i += 2;
            }
            "--session" if i + 1 < args.len() => {
                cfg.session_path = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(server = %cfg.server_addr, session = %cfg.session_path, tick_hz = cfg.tick_hz, "Starting client");

    let mut store = JsonFileStore::new(&cfg.session_path);
    let validator = MaxAgeValidator::hours(cfg.session_max_age_hours);
    let tick_interval = cfg.tick_interval();
    let mut presenter = LogPresenter::new(u64::from(cfg.tick_hz) * SUMMARY_EVERY_SECS);

    let mut client = GameClient::new(cfg, Arc::new(TcpDialer), Handle::current());
    let outcome = client.boot(&mut store, &validator, Instant::now());
    info!(?outcome, "Session checked");

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Type 'login <name> <token>' to sign in, 'status' for info, 'quit' to exit.");
    println!();

    let mut last = Instant::now();
    loop {
        while let Ok(line) = console_rx.try_recv() {
            if matches!(line.as_str(), "quit" | "exit") {
                info!("Quit requested");
                return Ok(());
            }
            match client.exec_console(&line, &mut store, Instant::now()) {
                Ok(output) => {
                    for line in output {
                        println!("{}", line);
                    }
                }
                Err(e) => {
                    println!("Error: {:#}", e);
                }
            }
        }

        let now = Instant::now();
        client.tick(now, now - last);
        last = now;
        client.present(&mut presenter);

        tokio::time::sleep(tick_interval).await;
    }
}
