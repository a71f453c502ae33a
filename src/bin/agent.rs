//! Audio Capture Agent
//!
//! Captures audio (synthetic tone or the default input device), batches it
//! into ~20ms chunks and posts them to a relay.

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audio_relay::{
    agent::{CaptureAgent, ToneSource},
    config::{AgentConfig, AppConfig, CaptureKind},
};

/// Command-line overrides
#[derive(Default)]
struct Args {
    config_path: Option<PathBuf>,
    server_url: Option<String>,
    client_name: Option<String>,
    source: Option<CaptureKind>,
    tone_hz: Option<f32>,
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
    let mut config = AppConfig::load_or_default(args.config_path.as_ref())?.agent;
    config.apply_env();

    if let Some(url) = args.server_url {
        config.server_url = url;
    }
    if args.client_name.is_some() {
        config.client_name = args.client_name;
    }
    if let Some(source) = args.source {
        config.source = source;
    }
    if let Some(hz) = args.tone_hz {
        config.tone_hz = hz;
    }

    tracing::info!("Starting Audio Capture Agent");
    let agent = CaptureAgent::new(config.clone());
    run(&agent, &config).await
}

async fn run(agent: &CaptureAgent, config: &AgentConfig) -> Result<()> {
    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
        }
    };

    match config.source {
        CaptureKind::Tone => {
            let source = ToneSource::new(config.tone_format, config.tone_hz);
            agent.run(source, shutdown).await?;
        }
        #[cfg(feature = "device-capture")]
        CaptureKind::Device => {
            let source = audio_relay::agent::DeviceSource::open_default()?;
            agent.run(source, shutdown).await?;
        }
        #[cfg(not(feature = "device-capture"))]
        CaptureKind::Device => {
            anyhow::bail!("device capture requires building with the `device-capture` feature");
        }
    }
    Ok(())
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
            "--server" | "-s" => {
                if i + 1 < args.len() {
                    parsed.server_url = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--name" | "-n" => {
                if i + 1 < args.len() {
                    parsed.client_name = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--tone" => {
                parsed.source = Some(CaptureKind::Tone);
                if let Some(hz) = args.get(i + 1).and_then(|a| a.parse().ok()) {
                    parsed.tone_hz = Some(hz);
                    i += 1;
                }
            }
            "--device" | "-d" => {
                parsed.source = Some(CaptureKind::Device);
            }
            "--help" | "-h" => {
                println!("Audio Capture Agent - streams local audio to a relay");
                println!();
                println!("Usage: agent [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <FILE>   Configuration file (TOML)");
                println!("  -s, --server <URL>    Relay URL (default: http://localhost:8080, env SERVER_URL)");
                println!("  -n, --name <NAME>     Display name (env CLIENT_NAME)");
                println!("  --tone [HZ]           Stream a synthetic sine tone (default)");
                println!("  -d, --device          Capture from the default input device");
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
