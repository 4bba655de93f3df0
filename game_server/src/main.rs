//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p game_server -- [--config server.json] [--addr 127.0.0.1:8303] [--tick-hz 50]
//!
//! Command line flags override the config file. Every line typed on stdin
//! is run through the admin console, e.g. `status`, `tune gravity 0.3` or
//! `sv_scorelimit 20`.

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use game_server::GameServer;
use game_shared::config::ServerConfig;
use tokio::sync::mpsc;
use tracing::info;

struct Args {
    config: Option<String>,
    addr: Option<String>,
    tick_hz: Option<u32>,
}

fn parse_args() -> Args {
    let mut out = Args {
        config: None,
        addr: None,
        tick_hz: None,
    };
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                out.config = Some(args[i + 1].clone());
                i += 2;
            }
            "--addr" if i + 1 < args.len() => {
                out.addr = Some(args[i + 1].clone());
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                out.tick_hz = args[i + 1].parse().ok();
                i += 2;
            }
            _ => i += 1,
        }
    }
    out
}

fn load_config(args: &Args) -> anyhow::Result<ServerConfig> {
    let mut cfg = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
            ServerConfig::from_json_str(&text).with_context(|| format!("parse {path}"))?
        }
        None => ServerConfig::default(),
    };
    if let Some(addr) = &args.addr {
        cfg.server_addr = addr.clone();
    }
    if let Some(hz) = args.tick_hz {
        cfg.tick_hz = hz;
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = load_config(&parse_args())?;
    info!(
        addr = %cfg.server_addr,
        tick_hz = cfg.tick_hz,
        gametype = %cfg.game.sv_gametype,
        map = %cfg.game.sv_map,
        "starting server"
    );

    let mut server = GameServer::new(cfg).await.context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "server listening");

    let (console_tx, console_rx) = mpsc::channel::<String>(32);
    server.set_console_input(console_rx);

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

    server.run().await
}
