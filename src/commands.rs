use crate::address::{Address, read_address, read_port};
use crate::error::Error;
use crate::protocol::{Command, Reply, ReplyCode, Version};
use std::io;
use std::time::Duration;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time,
};

/// ConnectionRequest is a structurally complete client request. The command
/// and address type may still be ones this server refuses to serve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub command: u8,
    pub address: Address,
    pub port: u16,
}

/// Rejection pairs a refused request with the reply the client should get
#[derive(Debug)]
pub struct Rejection {
    pub error: Error,
    pub reply: Reply,
}

impl ConnectionRequest {
    /// check validates the command first, then the address type
    pub fn check(&self) -> Result<(), Rejection> {
        if Command::from_byte(self.command) != Some(Command::Connect) {
            return Err(Rejection {
                error: Error::CommandUnsupported(self.command),
                reply: self.reply(ReplyCode::CommandNotSupported),
            });
        }

        if self.address.address_type().is_none() {
            return Err(Rejection {
                error: Error::AddressTypeUnsupported(self.address.atyp()),
                reply: self.reply(ReplyCode::AddrTypeUnsupported),
            });
        }

        Ok(())
    }

    /// reply builds a reply echoing the requested address and port
    pub fn reply(&self, code: ReplyCode) -> Reply {
        Reply::new(code, self.address.clone(), self.port)
    }
}

/// read_connection_request reads one request from the stream
pub async fn read_connection_request<R>(reader: &mut R) -> Result<ConnectionRequest, Error>
where
    R: AsyncRead + Unpin,
{
    // SOCKS5 request format
    // +----+-----+-------+------+----------+----------+
    // |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+

    let mut reqbuf = [0u8; 4];
    reader.read_exact(&mut reqbuf).await.map_err(Error::Truncated)?;

    let version = reqbuf[0];
    let command = reqbuf[1];
    // Not checking RSV (RESERVED) -> 0x00
    let atyp = reqbuf[3];

    // Ensure version is 0x05 -> SOCKS5
    if version != Version::SOCKS5 as u8 {
        return Err(Error::VersionMismatch(version));
    }

    let address = read_address(reader, atyp).await?;
    let port = read_port(reader).await?;

    Ok(ConnectionRequest {
        command,
        address,
        port,
    })
}

/// send_reply writes the encoded reply to the client
pub async fn send_reply<W>(writer: &mut W, reply: &Reply) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(&reply.encode())
        .await
        .map_err(|source| Error::WriteFailed {
            context: "reply",
            source,
        })
}

/// connect_target dials the requested destination within dial_timeout
pub async fn connect_target(
    address: &Address,
    port: u16,
    dial_timeout: Duration,
) -> Result<TcpStream, Error> {
    let target = match address.dial_target(port) {
        Ok(target) => target,
        Err(source) => {
            return Err(Error::DialFailed {
                target: format!("{address}:{port}"),
                source,
            });
        }
    };

    match time::timeout(dial_timeout, TcpStream::connect(&target)).await {
        Ok(Ok(outbound)) => Ok(outbound),
        Ok(Err(source)) => Err(Error::DialFailed { target, source }),
        Err(_) => Err(Error::DialFailed {
            target,
            source: io::Error::new(io::ErrorKind::TimedOut, "dial timed out"),
        }),
    }
}
