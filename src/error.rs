use std::{error, fmt, io, string};

use picky_asn1::restricted_string::CharSetError;
use picky_asn1_der::Asn1DerError;
use picky_krb::crypto::KerberosCryptoError;

pub type Result<T> = std::result::Result<T, Error>;

/// The kind of a credential lifecycle error.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// May correspond to any internal error (I/O error, subprocess spawn failure, etc.).
    InternalError,
    /// Used when supplied options or arguments are missing or malformed.
    InvalidParameter,
    /// Used when a keytab, ticket cache or Kerberos message cannot be decoded.
    InvalidToken,
    UnsupportedFunction,
    /// No KDC answered on any transport.
    NoAuthenticatingAuthority,
    /// The ticket cache holds no ticket for the requested principal.
    NoCredentials,
    /// The Kerberos tooling refused to issue or renew a ticket.
    LogonDenied,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub error_type: ErrorKind,
    pub description: String,
}

impl Error {
    pub fn new(error_type: ErrorKind, description: impl ToString) -> Self {
        Self {
            error_type,
            description: description.to_string(),
        }
    }
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.error_type, self.description)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => Self::new(ErrorKind::TimedOut, format!("IO error: {:?}", err)),
            _ => Self::new(ErrorKind::InternalError, format!("IO error: {:?}", err)),
        }
    }
}

impl From<Asn1DerError> for Error {
    fn from(err: Asn1DerError) -> Self {
        Self::new(ErrorKind::InvalidToken, format!("ASN1 DER error: {:?}", err))
    }
}

impl From<CharSetError> for Error {
    fn from(err: CharSetError) -> Self {
        Self::new(ErrorKind::InvalidParameter, format!("invalid character set: {:?}", err))
    }
}

impl From<KerberosCryptoError> for Error {
    fn from(err: KerberosCryptoError) -> Self {
        Self::new(ErrorKind::InternalError, format!("Kerberos crypto error: {:?}", err))
    }
}

impl From<string::FromUtf8Error> for Error {
    fn from(err: string::FromUtf8Error) -> Self {
        Self::new(ErrorKind::InvalidToken, format!("UTF-8 error: {:?}", err))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::new(ErrorKind::InvalidParameter, format!("URL error: {:?}", err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::new(ErrorKind::TimedOut, format!("HTTP request timed out: {:?}", err))
        } else {
            Self::new(ErrorKind::NoAuthenticatingAuthority, format!("HTTP error: {:?}", err))
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::new(ErrorKind::TimedOut, "operation timed out")
    }
}

impl From<time::error::ComponentRange> for Error {
    fn from(err: time::error::ComponentRange) -> Self {
        Self::new(ErrorKind::InvalidToken, format!("invalid timestamp: {:?}", err))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        io::Error::other(format!("{:?}: {}", err.error_type, err.description))
    }
}
