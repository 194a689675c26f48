use std::time::Duration;

/// Config holds the runtime knobs of a Socks5Server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// How long to wait for the destination to accept the outbound connection
    pub dial_timeout: Duration,
    /// Grace period given to in-flight connections on shutdown
    pub shutdown_timeout: Duration,
    /// Optional limit on how long a tunnel may carry no bytes in either direction
    pub idle_timeout: Option<Duration>,
    /// Optional cap on concurrently served connections
    pub max_connections: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(1),
            idle_timeout: None,
            max_connections: None,
        }
    }
}

impl Config {
    pub fn with_dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// with_max_connections sets the admission cap; zero means unlimited
    pub fn with_max_connections(mut self, max_connections: Option<usize>) -> Self {
        self.max_connections = max_connections.filter(|&n| n > 0);
        self
    }
}
