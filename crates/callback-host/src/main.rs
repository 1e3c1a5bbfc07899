//! Callback Host - command-line front end for the remote result callback.
//!
//! `serve` hosts a callback that prints every result it receives; `send`
//! delivers one result to a hosted callback. Both print machine-readable
//! `KEY=value` lines on stdout and log to stderr.

mod sender;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use remote_callback::DeliveryPolicy;
use std::net::SocketAddr;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "callback-host")]
#[command(about = "Host or invoke a remote result callback")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Host a callback that prints each delivered result
    Serve {
        /// Port to listen on (0 = auto-assign)
        #[arg(short, long, default_value = "0")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
    /// Deliver one result to a hosted callback
    Send {
        /// Address of the hosting process
        #[arg(long)]
        addr: SocketAddr,

        /// Result as a JSON object (omit to send an absent result)
        #[arg(long)]
        json: Option<String>,

        /// Wait for the receiver to acknowledge delivery
        #[arg(long)]
        ack: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; stdout is reserved for KEY=value lines
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match args.command {
        Command::Serve { port, host } => serve(&host, port).await,
        Command::Send { addr, json, ack } => {
            let policy = if ack {
                DeliveryPolicy::Acknowledged
            } else {
                DeliveryPolicy::OneWay
            };
            sender::send(addr, json.as_deref(), policy).await
        }
    }
}

async fn serve(host: &str, port: u16) -> Result<()> {
    info!("Starting callback host");

    let mut handle = server::start_server(host, port).await?;

    // Print port for the parent process to read (intentional stdout for IPC)
    println!("CALLBACK_PORT={}", handle.port);

    info!("Callback host running on {}", handle.addr());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    handle.shutdown();

    Ok(())
}
