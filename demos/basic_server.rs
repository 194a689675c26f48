//! Basic SOCKS5 server example

use minisocks::{Config, Socks5Server};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::default().with_idle_timeout(Some(Duration::from_secs(300)));
    let server = Socks5Server::bind("127.0.0.1:1080", config).await?;
    println!("Starting SOCKS5 server on {}", server.local_addr());

    server.run().await?;
    Ok(())
}
