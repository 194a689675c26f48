use crate::error::Error;
use crate::protocol::{AuthMethod, Version};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Greeting is the client hello: the methods the client is able to use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub methods: Vec<u8>,
}

/// read_greeting reads the client hello from the stream
pub async fn read_greeting<R>(reader: &mut R) -> Result<Greeting, Error>
where
    R: AsyncRead + Unpin,
{
    // ClientHello format
    // +----+----------+----------+
    // |VER | NMETHODS | METHODS  |
    // +----+----------+----------+
    // | 1  |    1     | 1 to 255 |
    // +----+----------+----------+

    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf).await.map_err(Error::Truncated)?;

    let version = buf[0];
    let n_methods = buf[1];

    // Ensure version is 0x05 -> SOCKS5
    if version != Version::SOCKS5 as u8 {
        return Err(Error::VersionMismatch(version));
    }

    let mut methods = vec![0u8; n_methods as usize];
    reader.read_exact(&mut methods).await.map_err(Error::Truncated)?;

    Ok(Greeting { methods })
}

/// select_auth_method picks the method this server answers with.
/// Only no-auth is ever offered
pub fn select_auth_method(client_methods: &[u8]) -> AuthMethod {
    if client_methods.contains(&(AuthMethod::NoAuth as u8)) {
        AuthMethod::NoAuth
    } else {
        AuthMethod::NoAcceptable
    }
}

/// write_method_selection answers the greeting and returns the method that
/// was written. NoAcceptable is still a successful write; the caller is
/// expected to hang up afterwards
pub async fn write_method_selection<W>(writer: &mut W, offered: &[u8]) -> Result<AuthMethod, Error>
where
    W: AsyncWrite + Unpin,
{
    // ServerChoice method selection reply format
    // +----+--------+
    // |VER | METHOD |
    // +----+--------+
    // | 1  |   1    |
    // +----+--------+

    let method = select_auth_method(offered);
    writer
        .write_all(&[Version::SOCKS5 as u8, method as u8])
        .await
        .map_err(|source| Error::WriteFailed {
            context: "method selection",
            source,
        })?;

    Ok(method)
}

/// negotiate_auth runs the greeting exchange on a connection
pub async fn negotiate_auth<S>(stream: &mut S) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let greeting = read_greeting(stream).await?;

    match write_method_selection(stream, &greeting.methods).await? {
        AuthMethod::NoAuth => Ok(()),
        AuthMethod::NoAcceptable => Err(Error::AuthenticationUnsupported),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_read_greeting() {
        let mut input: &[u8] = &[0x05, 0x02, 0x02, 0x00];
        let greeting = read_greeting(&mut input).await.unwrap();
        assert_eq!(greeting.methods, vec![0x02, 0x00]);
    }

    #[tokio::test]
    async fn test_read_greeting_invalid_version() {
        let mut input: &[u8] = &[0x04, 0x01, 0x00];
        let err = read_greeting(&mut input).await.unwrap_err();
        assert!(matches!(err, Error::VersionMismatch(0x04)));
    }

    #[tokio::test]
    async fn test_read_greeting_truncated() {
        let mut input: &[u8] = &[0x05, 0x03, 0x00];
        let err = read_greeting(&mut input).await.unwrap_err();
        assert!(matches!(err, Error::Truncated(_)));
    }

    #[tokio::test]
    async fn test_method_selection_bytes() {
        let cases: [(&[u8], [u8; 2]); 4] = [
            (&[0x00], [0x05, 0x00]),
            (&[0x02, 0x01, 0x00], [0x05, 0x00]),
            (&[0x02], [0x05, 0xff]),
            (&[], [0x05, 0xff]),
        ];
        for (offered, expected) in cases {
            let mut out = Vec::new();
            write_method_selection(&mut out, offered).await.unwrap();
            assert_eq!(out, expected);
        }
    }

    #[tokio::test]
    async fn test_negotiate_without_no_auth() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();

        let err = negotiate_auth(&mut server).await.unwrap_err();
        assert!(matches!(err, Error::AuthenticationUnsupported));

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0xff]);
    }
}
