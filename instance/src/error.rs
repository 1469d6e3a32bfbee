use std::io;

use thiserror::Error;

/// Rejected configuration change on a [`crate::SingleInstance`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InstanceError {
    #[error("identity and scope cannot change while this instance is master")]
    Busy,
    #[error("invalid instance id {0:?}")]
    InvalidId(String),
}

/// Why forwarding arguments to the master did not complete.
///
/// Every variant is recoverable through the recovery path; [`code`](Self::code)
/// is what the host exits with when recovery is off or fails.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("master endpoint not found")]
    ServerNotFound,
    #[error("master refused the connection")]
    ConnectionRefused,
    #[error("permission denied on master endpoint")]
    AccessDenied,
    #[error("master closed the connection before acknowledging")]
    PeerClosed,
    #[error("master did not respond within {0:?}")]
    Timeout(std::time::Duration),
    #[error("master did not acknowledge the arguments (got {0:?})")]
    AckMismatch(Vec<u8>),
    #[error("cannot frame arguments: {0}")]
    Encode(#[from] wire::EncodeError),
    #[error("socket error: {0}")]
    Io(#[source] io::Error),
}

impl HandshakeError {
    pub fn code(&self) -> i32 {
        match self {
            HandshakeError::ConnectionRefused => 1,
            HandshakeError::PeerClosed => 2,
            HandshakeError::ServerNotFound => 3,
            HandshakeError::AccessDenied => 4,
            HandshakeError::Timeout(_) => 5,
            HandshakeError::AckMismatch(_) => 6,
            HandshakeError::Encode(_) | HandshakeError::Io(_) => 7,
        }
    }

    pub(crate) fn from_connect(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => HandshakeError::ServerNotFound,
            io::ErrorKind::ConnectionRefused => HandshakeError::ConnectionRefused,
            io::ErrorKind::PermissionDenied => HandshakeError::AccessDenied,
            _ => HandshakeError::Io(e),
        }
    }

    pub(crate) fn from_transfer(e: io::Error) -> Self {
        if is_peer_closed(&e) {
            HandshakeError::PeerClosed
        } else {
            HandshakeError::Io(e)
        }
    }
}

/// A normal hang-up from the other side; not worth a warning.
pub fn is_peer_closed(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::UnexpectedEof
    )
}
