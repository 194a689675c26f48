use anyhow::Result;
use clap::Parser;
use minisocks::{Config, Socks5Server};
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "A lightweight SOCKS5 proxy", long_about = None)]
struct Args {
    /// Listener address
    #[arg(short, long, default_value = "127.0.0.1:1080")]
    listen: String,

    /// Seconds to wait for a destination to accept a connection
    #[arg(long, default_value_t = 30)]
    dial_timeout: u64,

    /// Seconds to let in-flight connections finish on shutdown
    #[arg(long, default_value_t = 1)]
    shutdown_timeout: u64,

    /// Close a tunnel after this many seconds with no traffic either way
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Maximum number of concurrent connections (0 = unlimited)
    #[arg(long)]
    max_connections: Option<usize>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args
    let args = Args::parse();

    // Initialize tracing subscriber
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    let config = Config::default()
        .with_dial_timeout(Duration::from_secs(args.dial_timeout))
        .with_shutdown_timeout(Duration::from_secs(args.shutdown_timeout))
        .with_idle_timeout(args.idle_timeout.map(Duration::from_secs))
        .with_max_connections(args.max_connections);

    info!(listen = %args.listen, verbose = args.verbose, "init");

    // Instantiate server; a bind failure ends the process here
    let server = Socks5Server::bind(&args.listen, config).await?;

    // Run it until Ctrl-C / SIGTERM
    info!("Starting SOCKS5 proxy: {}", server.listen_addr);
    server.run().await
}
