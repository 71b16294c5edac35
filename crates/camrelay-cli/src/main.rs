use anyhow::{Context, Result};
use camrelay_core::{Command, CommandKey, Endpoint, Request, Response};
use clap::{Parser, Subcommand};
use std::time::Duration;

mod client;

use client::{render, RemoteClient};

#[derive(Parser)]
#[command(name = "camrelay", about = "Remote control for a camrelayd camera")]
struct Cli {
    /// Remote-control endpoint
    #[arg(short, long, default_value = "tcp://127.0.0.1:5555", env = "CAMRELAY_ENDPOINT")]
    endpoint: Endpoint,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the camera's current features
    Read,
    /// Queue parameter changes
    Change {
        /// Exposure time in microseconds
        #[arg(long)]
        exposure: Option<f64>,
        #[arg(long)]
        gain: Option<f64>,
        /// Gain auto mode, e.g. Off, Once, Continuous
        #[arg(long)]
        gain_auto: Option<String>,
        /// Exposure auto mode, e.g. Off, Once, Continuous
        #[arg(long)]
        exposure_auto: Option<String>,
    },
    /// Read repeatedly
    Poll {
        /// Milliseconds between reads
        #[arg(short, long, default_value_t = 1000)]
        interval_ms: u64,
        /// Stop after this many reads
        #[arg(short, long)]
        count: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut client = RemoteClient::connect(&cli.endpoint.connect_addr()).await?;

    match cli.command {
        Commands::Read => {
            let reply = client.request(&Request::Read).await?;
            println!("{}", render(&reply));
        }
        Commands::Change {
            exposure,
            gain,
            gain_auto,
            exposure_auto,
        } => {
            let mut command = Command::new();
            if let Some(v) = exposure {
                command.set(CommandKey::Exposure, v);
            }
            if let Some(v) = gain {
                command.set(CommandKey::Gain, v);
            }
            if let Some(v) = gain_auto {
                command.set(CommandKey::GainMode, v);
            }
            if let Some(v) = exposure_auto {
                command.set(CommandKey::ExposureMode, v);
            }
            if command.is_empty() {
                anyhow::bail!("nothing to change; pass --exposure, --gain, --gain-auto or --exposure-auto");
            }
            let reply = client.request(&Request::Change(command)).await?;
            println!("{}", render(&reply));
            if reply != Response::Ok {
                std::process::exit(1);
            }
        }
        Commands::Poll { interval_ms, count } => {
            let mut ticks = tokio::time::interval(Duration::from_millis(interval_ms));
            let mut n = 0u64;
            while count.map_or(true, |c| n < c) {
                ticks.tick().await;
                let reply = client.request(&Request::Read).await.context("poll failed")?;
                println!("--- {}\n{}", n + 1, render(&reply));
                n += 1;
            }
        }
    }

    Ok(())
}
