use crate::error::Error;
use crate::protocol::AddressType;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Address represents a SOCKS5 address as it travels on the wire:
/// IPv4, domain name, IPv6, or an address type this server does not know.
/// Domain names are kept as raw bytes, exactly as the client sent them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    IPv4([u8; 4]),
    DomainName(Vec<u8>),
    IPv6([u8; 16]),
    /// Unknown carries the ATYP byte; no address bytes follow it
    Unknown(u8),
}

impl Address {
    /// from_socket_addr converts a bound socket address into its reply form.
    /// IPv4-mapped IPv6 addresses are reported as plain IPv4
    pub fn from_socket_addr(addr: SocketAddr) -> (Self, u16) {
        let address = match addr {
            SocketAddr::V4(v4) => Address::IPv4(v4.ip().octets()),
            SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
                Some(v4) => Address::IPv4(v4.octets()),
                None => Address::IPv6(v6.ip().octets()),
            },
        };
        (address, addr.port())
    }

    /// atyp returns the ATYP byte for this address
    pub fn atyp(&self) -> u8 {
        match self {
            Address::IPv4(_) => AddressType::IPv4 as u8,
            Address::DomainName(_) => AddressType::DomainName as u8,
            Address::IPv6(_) => AddressType::IPv6 as u8,
            Address::Unknown(atyp) => *atyp,
        }
    }

    /// address_type returns the typed ATYP, None for unknown types
    pub fn address_type(&self) -> Option<AddressType> {
        AddressType::from_byte(self.atyp())
    }

    /// encoded_len is the number of DST.ADDR / BND.ADDR bytes on the wire
    pub fn encoded_len(&self) -> usize {
        match self {
            Address::IPv4(_) => 4,
            Address::DomainName(domain) => 1 + domain.len(),
            Address::IPv6(_) => 16,
            Address::Unknown(_) => 0,
        }
    }

    /// encode_into appends the address bytes (without ATYP) to buf
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Address::IPv4(octets) => buf.extend_from_slice(octets),
            Address::DomainName(domain) => {
                // The first octet contains the number of octets to follow.
                // Domains are read through a 1-byte length so this never truncates
                buf.push(domain.len() as u8);
                buf.extend_from_slice(domain);
            }
            Address::IPv6(octets) => buf.extend_from_slice(octets),
            Address::Unknown(_) => (),
        }
    }

    /// dial_target builds the `host:port` string used to reach the destination
    pub fn dial_target(&self, port: u16) -> io::Result<String> {
        match self {
            Address::IPv4(octets) => Ok(format!("{}:{port}", Ipv4Addr::from(*octets))),
            Address::IPv6(octets) => Ok(format!("[{}]:{port}", Ipv6Addr::from(*octets))),
            Address::DomainName(domain) => {
                let host = std::str::from_utf8(domain).map_err(|e| {
                    io::Error::new(io::ErrorKind::InvalidInput, format!("invalid domain: {e}"))
                })?;
                Ok(format!("{host}:{port}"))
            }
            Address::Unknown(atyp) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unknown address type: {atyp:#04x}"),
            )),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::IPv4(octets) => write!(f, "{}", Ipv4Addr::from(*octets)),
            Address::DomainName(domain) => write!(f, "{}", String::from_utf8_lossy(domain)),
            Address::IPv6(octets) => write!(f, "{}", Ipv6Addr::from(*octets)),
            Address::Unknown(atyp) => write!(f, "<atyp {atyp:#04x}>"),
        }
    }
}

/// read_address reads the DST.ADDR field whose layout is selected by atyp.
/// Unknown address types consume no bytes so the port can still be read
pub async fn read_address<R>(reader: &mut R, atyp: u8) -> Result<Address, Error>
where
    R: AsyncRead + Unpin,
{
    let address = match AddressType::from_byte(atyp) {
        Some(AddressType::IPv4) => {
            let mut addr = [0u8; 4];
            reader.read_exact(&mut addr).await.map_err(Error::Truncated)?;
            Address::IPv4(addr)
        }
        Some(AddressType::DomainName) => {
            // First octet in DomainName contains the number of
            // octets to follow
            let len = reader.read_u8().await.map_err(Error::Truncated)?;
            let mut domain = vec![0u8; len as usize];
            reader.read_exact(&mut domain).await.map_err(Error::Truncated)?;
            Address::DomainName(domain)
        }
        Some(AddressType::IPv6) => {
            let mut addr = [0u8; 16];
            reader.read_exact(&mut addr).await.map_err(Error::Truncated)?;
            Address::IPv6(addr)
        }
        None => Address::Unknown(atyp),
    };

    Ok(address)
}

/// read_port reads a big-endian DST.PORT
pub async fn read_port<R>(reader: &mut R) -> Result<u16, Error>
where
    R: AsyncRead + Unpin,
{
    reader.read_u16().await.map_err(Error::Truncated)
}
