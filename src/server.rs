use crate::{config::Config, connection::handle_connection, error::Error};
use anyhow::{Context, Result, bail};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{Semaphore, mpsc},
    time,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{Instrument, debug, info, info_span, warn};

/// Pause after a failed accept so a persistent error (e.g. fd exhaustion)
/// does not spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// ServerState tracks the lifecycle of a Socks5Server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Running,
    Draining,
    Stopped,
}

/// Socks5Server represents a SOCKS5 server and houses related
/// configuration data
pub struct Socks5Server {
    pub listen_addr: SocketAddr,
    config: Arc<Config>,
    listener: Option<TcpListener>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    state: ServerState,
}

/// Socks5Server implementation block
impl Socks5Server {
    /// new binds listen_addr with the default configuration
    pub async fn new(listen_addr: &str) -> Result<Self> {
        Self::bind(listen_addr, Config::default()).await
    }

    /// bind listens on listen_addr immediately; failing to bind is fatal
    pub async fn bind(listen_addr: &str, config: Config) -> Result<Self> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("[ERR] failed to listen on address {listen_addr}"))?;
        let addr = listener.local_addr()?;

        info!("SOCKS5 proxy listening on {:?}", addr);

        Ok(Self {
            listen_addr: addr,
            config: Arc::new(config),
            listener: Some(listener),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            state: ServerState::Created,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// start spawns the accept loop and the dispatch loop and returns
    pub fn start(&mut self) -> Result<()> {
        if self.state != ServerState::Created {
            bail!("[ERR] server cannot be started from state {:?}", self.state);
        }
        let Some(listener) = self.listener.take() else {
            bail!("[ERR] listener already consumed");
        };

        // Accepted connections are handed to the dispatcher one at a time
        let (handoff_tx, handoff_rx) = mpsc::channel(1);
        let gate = self
            .config
            .max_connections
            .map(|limit| Arc::new(Semaphore::new(limit)));

        self.tracker
            .spawn(accept_loop(listener, handoff_tx, self.shutdown.clone()));
        self.tracker.spawn(dispatch_loop(
            handoff_rx,
            self.shutdown.clone(),
            self.tracker.clone(),
            Arc::clone(&self.config),
            gate,
        ));

        self.state = ServerState::Running;
        Ok(())
    }

    /// stop closes the listener, signals both loops and waits up to timeout
    /// for in-flight connections. Returns false if the wait timed out; the
    /// remaining handlers are left to end on their own
    pub async fn stop(&mut self, timeout: Duration) -> bool {
        if self.state == ServerState::Stopped {
            return true;
        }
        self.state = ServerState::Draining;

        // Not started yet: the listener is still ours to close
        drop(self.listener.take());
        self.shutdown.cancel();
        self.tracker.close();

        let drained = time::timeout(timeout, self.tracker.wait()).await.is_ok();
        if !drained {
            warn!(
                in_flight = self.tracker.len(),
                "timed out waiting for connections to finish"
            );
        }

        self.state = ServerState::Stopped;
        info!("server stopped");
        drained
    }

    /// run starts the server, waits for Ctrl-C or SIGTERM and stops it
    /// within the configured shutdown timeout
    pub async fn run(mut self) -> Result<()> {
        self.start()?;
        shutdown_signal().await;

        debug!("shutting down server...");
        let timeout = self.config.shutdown_timeout;
        self.stop(timeout).await;
        Ok(())
    }
}

impl Drop for Socks5Server {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// accept_loop accepts clients until shutdown and hands them to the dispatcher.
/// The listener is closed when the loop returns
async fn accept_loop(
    listener: TcpListener,
    handoff: mpsc::Sender<(TcpStream, SocketAddr)>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        sent = handoff.send(conn) => if sent.is_err() {
                            break;
                        },
                    }
                }
                Err(e) => {
                    warn!("{}", Error::Accept(e));
                    time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }

    drop(listener);
    debug!("accept loop stopped");
}

/// dispatch_loop spawns one tracked handler task per accepted client
async fn dispatch_loop(
    mut handoff: mpsc::Receiver<(TcpStream, SocketAddr)>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    config: Arc<Config>,
    gate: Option<Arc<Semaphore>>,
) {
    let mut next_id: u64 = 0;

    loop {
        let (stream, peer_addr) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = handoff.recv() => match accepted {
                Some(conn) => conn,
                None => break,
            },
        };

        let permit = match &gate {
            Some(gate) => match Arc::clone(gate).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    warn!(
                        "connection from {} rejected: max connections ({}) reached",
                        peer_addr,
                        config.max_connections.unwrap_or_default()
                    );
                    drop(stream);
                    continue;
                }
            },
            None => None,
        };

        next_id += 1;
        let span = info_span!("conn", id = next_id, peer = %peer_addr);
        let config = Arc::clone(&config);

        tracker.spawn(
            async move {
                debug!("new client");
                handle_connection(stream, &config).await;
                drop(permit);
                debug!("close connection");
            }
            .instrument(span),
        );
    }

    debug!("dispatch loop stopped");
}

/// shutdown_signal resolves on Ctrl-C, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
