//! Error types for client operations.

use std::{error, fmt, io};

/// The error type returned by every client operation.
///
/// Server-reported errors (`Rerror`) are never retried; they abort the
/// issuing operation only. Transport and decode failures are fatal to the
/// whole session.
#[derive(Debug)]
pub enum Error {
    /// Transport failure or malformed wire data
    Io(io::Error),
    /// The server answered the transaction with `Rerror`
    Server(String),
    /// The server answered with a response of the wrong type for the request
    UnexpectedResponse {
        expected: &'static str,
        got: String,
    },
    /// A walk resolved fewer path elements than requested
    WalkShort { wanted: usize, got: usize },
    /// A write transaction reported fewer bytes written than were sent
    ShortWrite { requested: u32, written: u32 },
    /// Malformed operation arguments, detected before any network activity
    InvalidArgument(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Io(ref e) => write!(f, "{}", e),
            Error::Server(ref ename) => write!(f, "server error: {}", ename),
            Error::UnexpectedResponse { expected, ref got } => {
                write!(f, "expected {}, got {}", expected, got)
            }
            Error::WalkShort { wanted, got } => {
                write!(f, "walk stopped at element {} of {}", got, wanted)
            }
            Error::ShortWrite { requested, written } => {
                write!(f, "short write: {} of {} bytes", written, requested)
            }
            Error::InvalidArgument(ref msg) => write!(f, "invalid argument: {}", msg),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Io(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_server_message() {
        let err = Error::Server("No such file or directory".to_owned());
        assert_eq!(
            err.to_string(),
            "server error: No such file or directory"
        );
    }

    #[test]
    fn walk_short_names_depth() {
        let err = Error::WalkShort { wanted: 3, got: 1 };
        assert_eq!(err.to_string(), "walk stopped at element 1 of 3");
    }
}
