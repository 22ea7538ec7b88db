use std::io;

/// Result alias used throughout the transport engine.
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Internal signal/fatal split.
///
/// `Wait` never reaches user code; the transport engine uses it to mean
/// "this call would have blocked, try again on the next readiness event".
/// Everything else becomes an `error` event bound to the offending
/// connection.
#[derive(Debug)]
pub enum NetworkError {
    Wait,
    Fatal(ErrorKind),
}

/// The taxonomy surfaced to users as the payload of an `error` event.
#[derive(Debug)]
pub enum ErrorKind {
    /// Address grammar violated; carries the reason.
    BadAddress(String),
    /// An OS call failed; carries `"<syscall>: <os message>"`.
    Socket(String),
    /// Unknown message kind, unknown reply-id, or a malformed frame.
    Protocol(String),
    /// TCP connect reported refusal or timeout.
    Refused(String),
    /// Request/reply deadline elapsed with no reply.
    TimedOut(String),
}

impl ErrorKind {
    /// Renders the payload text handed to the user's `error` callback.
    pub fn message(&self) -> String {
        match self {
            ErrorKind::BadAddress(reason) => reason.clone(),
            ErrorKind::Socket(reason) => reason.clone(),
            ErrorKind::Protocol(reason) => reason.clone(),
            ErrorKind::Refused(reason) => reason.clone(),
            ErrorKind::TimedOut(reason) => reason.clone(),
        }
    }
}

impl From<io::Error> for NetworkError {
    #[inline]
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => NetworkError::Wait,
            io::ErrorKind::Interrupted => NetworkError::Wait,
            _ => NetworkError::Fatal(ErrorKind::Socket(format!("{}", err))),
        }
    }
}

/// Distinguishes "try later" from an actual failure without matching on the
/// variant at every call site.
pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for NetworkResult<T> {
    #[inline]
    fn has_failed(&self) -> bool {
        !matches!(self, Ok(_) | Err(NetworkError::Wait))
    }
}

/// Tags a syscall name onto an `io::Error`, producing the
/// `"<syscall>: <os message>"` wording used for socket errors.
#[inline]
pub fn socket_error(syscall: &str, err: io::Error) -> NetworkError {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => NetworkError::Wait,
        _ => NetworkError::Fatal(ErrorKind::Socket(format!("{}: {}", syscall, err))),
    }
}
