//! Audio Relay Server
//!
//! Accepts PCM chunks from capture agents over HTTP and fans them out to
//! browser viewers over WebSocket.

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audio_relay::{config::AppConfig, server::RelayServer};

/// Command-line overrides
#[derive(Default)]
struct Args {
    config_path: Option<PathBuf>,
    port: Option<u16>,
    bind_address: Option<String>,
    static_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args();
    let mut config = AppConfig::load_or_default(args.config_path.as_ref())?.relay;
    config.apply_env();

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind_address {
        config.bind_address = bind;
    }
    if args.static_dir.is_some() {
        config.static_dir = args.static_dir;
    }

    tracing::info!("Starting Audio Relay");
    tracing::info!(
        "Source timeout {}s, sweep every {}s",
        config.source_timeout_secs,
        config.sweep_interval_secs
    );

    RelayServer::new(config).start().await
}

fn parse_args() -> Args {
    let mut parsed = Args::default();

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    if let Ok(port) = args[i + 1].parse() {
                        parsed.port = Some(port);
                    }
                    i += 1;
                }
            }
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    parsed.bind_address = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--static" => {
                if i + 1 < args.len() {
                    parsed.static_dir = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Audio Relay - multi-source PCM relay");
                println!();
                println!("Usage: relay [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <FILE>   Configuration file (TOML)");
                println!("  -p, --port <PORT>     HTTP port (default: 8080, env PORT)");
                println!("  -b, --bind <ADDR>     Bind address (default: 0.0.0.0)");
                println!("  --static <DIR>        Serve viewer files from DIR");
                println!("  -h, --help            Show this help");
                std::process::exit(0);
            }
            other => {
                eprintln!("Ignoring unknown argument: {}", other);
            }
        }
        i += 1;
    }

    parsed
}
