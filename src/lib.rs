//! A lightweight SOCKS5 proxy library
//!
//! ## SOCKS5 Implementation
//!
//! - Features:
//!     - CONNECT over IPv4, IPv6 and domain names
//!     - No Authentication
//!     - Protocol-correct rejection replies for unsupported commands and address types
//!     - Async using tokio, one task per client connection
//!     - Bidirectional relay that tears down both sides as soon as one ends
//!     - Optional idle timeout and connection cap
//!     - Graceful shutdown with a bounded drain period
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//!
//! # Example
//! ```no_run
//! use minisocks::Socks5Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut server = Socks5Server::new("127.0.0.1:1080").await?;
//!     server.start()?;
//!     tokio::signal::ctrl_c().await?;
//!     server.stop(Duration::from_secs(1)).await;
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod auth;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod server;
pub mod tunnel;

// Re-export main types at crate root for convenience
pub use address::Address;
pub use config::Config;
pub use error::{Error, Errors};
pub use protocol::{AddressType, AuthMethod, Command, Reply, ReplyCode, Version};
pub use server::{ServerState, Socks5Server};
pub use tunnel::{Completion, Transferred, Tunnel};
