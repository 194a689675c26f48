use crate::error::{Error, Errors};
use std::io;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf, split};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const RELAY_BUF_SIZE: usize = 16 * 1024;

/// Direction of a copy loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

/// Termination records which copy loop ended first and why
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination {
    /// None when the idle watchdog ended the tunnel
    pub direction: Option<Direction>,
    /// None when the loop saw EOF
    pub error: Option<io::ErrorKind>,
}

/// Completion is the shared done signal of one tunnel. The first loop to
/// finish records its termination and cancels the other; later signals are
/// no-ops
#[derive(Debug, Default)]
pub struct Completion {
    token: CancellationToken,
    first: Mutex<Option<Termination>>,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// signal_done returns true only for the call that recorded termination
    pub fn signal_done(&self, termination: Termination) -> bool {
        let mut first = self.first.lock().unwrap_or_else(PoisonError::into_inner);
        if first.is_some() {
            return false;
        }
        *first = Some(termination);
        self.token.cancel();
        true
    }

    /// wait resolves once any loop has signalled
    pub async fn wait(&self) {
        self.token.cancelled().await
    }

    /// first_termination returns what ended the tunnel, if anything has
    pub fn first_termination(&self) -> Option<Termination> {
        *self.first.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Activity tracks the last moment any byte moved through the tunnel, in
/// either direction
#[derive(Debug)]
struct Activity {
    last: Mutex<Instant>,
}

impl Activity {
    fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn last(&self) -> Instant {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Transferred counts the bytes relayed in each direction
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Transferred {
    pub from_client: u64,
    pub from_server: u64,
}

/// Tunnel relays bytes between the client (inbound) and the destination
/// (outbound) until either side closes or fails
pub struct Tunnel<I, O> {
    pub inbound: I,
    pub outbound: O,
    idle_timeout: Option<Duration>,
}

impl<I, O> Tunnel<I, O>
where
    I: AsyncRead + AsyncWrite,
    O: AsyncRead + AsyncWrite,
{
    pub fn new(inbound: I, outbound: O) -> Self {
        Self {
            inbound,
            outbound,
            idle_timeout: None,
        }
    }

    /// with_idle_timeout fails the tunnel once no byte has moved in either
    /// direction for this long
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// run relays until the first direction ends, then tears down both
    /// streams. The error, if any, joins the failures of both directions and
    /// the idle timeout
    pub async fn run(self) -> Result<Transferred, Error> {
        let completion = Completion::new();
        let activity = Activity::new();
        let (inbound_read, mut inbound_write) = split(self.inbound);
        let (outbound_read, mut outbound_write) = split(self.outbound);

        let (upstream, downstream, idle) = tokio::join!(
            relay(
                inbound_read,
                &mut outbound_write,
                Direction::ClientToServer,
                &completion,
                &activity,
            ),
            relay(
                outbound_read,
                &mut inbound_write,
                Direction::ServerToClient,
                &completion,
                &activity,
            ),
            watch_idle(&activity, &completion, self.idle_timeout),
        );

        // Both loops are done; close the destination first, then the client.
        // Shutdown errors only mean the peer is already gone
        let _ = outbound_write.shutdown().await;
        let _ = inbound_write.shutdown().await;
        drop(outbound_write);
        drop(inbound_write);

        if let Some(first) = completion.first_termination() {
            debug!(direction = ?first.direction, error = ?first.error, "tunnel terminated");
        }

        let mut errors = Errors::default();
        let mut transferred = Transferred::default();
        match upstream {
            Ok(n) => transferred.from_client = n,
            Err(e) => errors.push(Error::TunnelIo(e)),
        }
        match downstream {
            Ok(n) => transferred.from_server = n,
            Err(e) => errors.push(Error::TunnelIo(e)),
        }
        if let Err(e) = idle {
            errors.push(Error::TunnelIo(e));
        }

        debug!(
            from_client = transferred.from_client,
            from_server = transferred.from_server,
            "tunnel closed"
        );

        errors.into_result().map(|()| transferred)
    }
}

/// relay copies reader into writer until EOF, an error, or cancellation.
/// Whatever was read is written before the next read is attempted
async fn relay<R, W>(
    mut reader: ReadHalf<R>,
    writer: &mut WriteHalf<W>,
    direction: Direction,
    completion: &Completion,
    activity: &Activity,
) -> io::Result<u64>
where
    R: AsyncRead,
    W: AsyncWrite,
{
    let mut buf = vec![0u8; RELAY_BUF_SIZE];
    let mut total = 0u64;

    let result = loop {
        let n = tokio::select! {
            _ = completion.wait() => break Ok(total),
            read = reader.read(&mut buf) => match read {
                Ok(0) => break Ok(total),
                Ok(n) => n,
                Err(e) => break Err(e),
            },
        };
        activity.touch();

        tokio::select! {
            _ = completion.wait() => break Ok(total),
            written = writer.write_all(&buf[..n]) => {
                if let Err(e) = written {
                    break Err(e);
                }
            }
        }

        activity.touch();
        total += n as u64;
    };

    completion.signal_done(Termination {
        direction: Some(direction),
        error: result.as_ref().err().map(io::Error::kind),
    });

    result
}

/// watch_idle fails the tunnel once the shared activity clock has not moved
/// for idle_timeout. Without a limit it only waits for the copy loops
async fn watch_idle(
    activity: &Activity,
    completion: &Completion,
    idle_timeout: Option<Duration>,
) -> io::Result<()> {
    let Some(limit) = idle_timeout else {
        completion.wait().await;
        return Ok(());
    };

    loop {
        tokio::select! {
            _ = completion.wait() => return Ok(()),
            _ = sleep_until(activity.last() + limit) => {
                if activity.last().elapsed() < limit {
                    continue;
                }
                if completion.signal_done(Termination {
                    direction: None,
                    error: Some(io::ErrorKind::TimedOut),
                }) {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "idle timeout"));
                }
                return Ok(());
            }
        }
    }
}
