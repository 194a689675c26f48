//! Server side of the SOCKS5 handshake: method negotiation, the connection
//! request, dialing the destination and answering with a reply.
//!
//! Failures before a request could be parsed are answered with nothing at
//! all. Anything later gets a best-effort reply carrying a failure status; if
//! writing that reply fails too, both errors are returned together.

use crate::address::Address;
use crate::auth;
use crate::commands::{Rejection, connect_target, read_connection_request, send_reply};
use crate::error::Error;
use crate::protocol::{Reply, ReplyCode};
use std::time::Duration;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tracing::debug;

/// perform runs the handshake on an accepted client stream and returns the
/// established outbound connection. The caller owns both streams afterwards
pub async fn perform<S>(stream: &mut S, dial_timeout: Duration) -> Result<TcpStream, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    auth::negotiate_auth(stream).await?;

    let request = read_connection_request(stream).await?;
    if let Err(Rejection { error, reply }) = request.check() {
        return Err(error.join(send_reply(stream, &reply).await.err()));
    }

    debug!(address = %request.address, port = request.port, "try connect");

    let outbound = match connect_target(&request.address, request.port, dial_timeout).await {
        Ok(outbound) => outbound,
        Err(e) => {
            let reply = request.reply(ReplyCode::ConnectionRefused);
            return Err(e.join(send_reply(stream, &reply).await.err()));
        }
    };

    // BND.ADDR always describes our side of the outbound connection, whatever
    // address type the client asked for
    // local_addr only fails on a socket that is already gone, which a freshly
    // connected TcpStream cannot be; this branch is not reachable from tests
    let (address, port) = match outbound.local_addr() {
        Ok(local) => Address::from_socket_addr(local),
        Err(e) => {
            drop(outbound);
            let reply = request.reply(ReplyCode::ServerFailure);
            return Err(Error::LocalAddress(e).join(send_reply(stream, &reply).await.err()));
        }
    };

    if let Err(e) = send_reply(stream, &Reply::new(ReplyCode::Succeeded, address, port)).await {
        drop(outbound);
        return Err(e);
    }

    Ok(outbound)
}
