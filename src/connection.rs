use crate::config::Config;
use crate::handshake;
use crate::tunnel::Tunnel;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

/// handle_connection serves one accepted client from handshake to teardown.
/// Every failure is logged here; nothing is returned to the accept side
pub async fn handle_connection<S>(mut stream: S, config: &Config)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let outbound = match handshake::perform(&mut stream, config.dial_timeout).await {
        Ok(outbound) => outbound,
        Err(e) => {
            if e.is_client_fault() {
                warn!("handshake failed: {e}");
            } else {
                error!("handshake failed: {e}");
            }
            // Flush any reply already written before the client stream drops
            let _ = stream.shutdown().await;
            return;
        }
    };

    match outbound.peer_addr() {
        Ok(target) => debug!(%target, "open connection"),
        Err(_) => debug!("open connection"),
    }

    // The tunnel owns both streams from here and closes them on return
    let tunnel = Tunnel::new(stream, outbound).with_idle_timeout(config.idle_timeout);
    match tunnel.run().await {
        Ok(transferred) => info!(
            "connection closed: {} bytes from client, {} bytes from server",
            transferred.from_client, transferred.from_server
        ),
        Err(e) if e.is_connection_reset() => debug!("connection reset: {e}"),
        Err(e) => error!("connection error: {e}"),
    }
}
