use std::fmt;
use std::io;
use thiserror::Error;

/// Error classifies every way a single proxied connection can fail
#[derive(Error, Debug)]
pub enum Error {
    #[error("unsupported SOCKS version {0:#04x}")]
    VersionMismatch(u8),
    #[error("truncated message: {0}")]
    Truncated(#[source] io::Error),
    #[error("command {0:#04x} not supported")]
    CommandUnsupported(u8),
    #[error("address type {0:#04x} not supported")]
    AddressTypeUnsupported(u8),
    #[error("no acceptable authentication method offered")]
    AuthenticationUnsupported,
    #[error("failed to dial {target}: {source}")]
    DialFailed { target: String, source: io::Error },
    #[error("failed to derive local address: {0}")]
    LocalAddress(#[source] io::Error),
    #[error("failed to write {context}: {source}")]
    WriteFailed {
        context: &'static str,
        source: io::Error,
    },
    #[error("tunnel i/o error: {0}")]
    TunnelIo(#[source] io::Error),
    #[error("accept error: {0}")]
    Accept(#[source] io::Error),
    #[error("{0}")]
    Multiple(Errors),
}

impl Error {
    /// join appends other behind self. The primary error is never replaced
    pub fn join(self, other: impl Into<Option<Error>>) -> Error {
        match other.into() {
            None => self,
            Some(other) => {
                let mut errors = Errors::default();
                errors.push(self);
                errors.push(other);
                Error::Multiple(errors)
            }
        }
    }

    /// causes yields every leaf error, flattening joined errors
    pub fn causes(&self) -> Vec<&Error> {
        match self {
            Error::Multiple(errors) => errors.iter().collect(),
            other => vec![other],
        }
    }

    /// is_connection_reset reports whether this error only reflects a peer
    /// going away mid-tunnel, which is ordinary termination for a relay
    pub fn is_connection_reset(&self) -> bool {
        self.causes().iter().all(|cause| match cause {
            Error::TunnelIo(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        })
    }

    /// is_client_fault reports errors caused by what the client sent
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self.causes().first(),
            Some(
                Error::VersionMismatch(_)
                    | Error::Truncated(_)
                    | Error::CommandUnsupported(_)
                    | Error::AddressTypeUnsupported(_)
                    | Error::AuthenticationUnsupported
            )
        )
    }
}

/// Errors is an ordered list of independent failures
#[derive(Debug, Default)]
pub struct Errors(Vec<Error>);

impl Errors {
    /// push appends an error, flattening nested lists so causes stay in order
    pub fn push(&mut self, error: Error) {
        match error {
            Error::Multiple(nested) => self.0.extend(nested.0),
            other => self.0.push(other),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Error> {
        self.0.iter()
    }

    /// into_result collapses the list: no errors is Ok, a single error is
    /// returned as is, anything more becomes Error::Multiple
    pub fn into_result(mut self) -> Result<(), Error> {
        match self.0.len() {
            0 => Ok(()),
            1 => Err(self.0.remove(0)),
            _ => Err(Error::Multiple(self)),
        }
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}
