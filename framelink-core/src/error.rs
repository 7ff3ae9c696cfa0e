//! Error types and the error-class taxonomy.
//!
//! Errors never cross the strand boundary into application code; connection
//! failures surface as `Close` events. The classifiers below decide how a
//! completion error is treated at the point where it is observed.

use std::io;

use thiserror::Error;

/// Main error type for transport operations.
#[derive(Error, Debug)]
pub enum NetError {
    /// IO error during socket or runtime operations.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A framing header declared an impossible packet size.
    #[error("invalid frame: {size} bytes (min 4, max {max})")]
    Frame { size: usize, max: usize },

    /// The receive buffer filled up without containing a complete packet.
    #[error("receive buffer exhausted at {capacity} bytes")]
    ReceiveBufferExhausted { capacity: usize },

    /// The worker pool has not been started yet.
    #[error("I/O worker pool is not running")]
    PoolNotRunning,
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, NetError>;

/// How a stream-level completion error is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connection-level failure: log at debug, stop the session.
    Transient,
    /// Expected while tearing down: log at debug, otherwise ignore.
    Teardown,
    /// Everything else: log at error, stop the session.
    Fatal,
}

/// Classify an error observed on an established connection.
pub fn classify_stream_error(kind: io::ErrorKind) -> ErrorClass {
    use io::ErrorKind::*;
    match kind {
        ConnectionReset | ConnectionAborted | BrokenPipe | TimedOut | UnexpectedEof => {
            ErrorClass::Transient
        }
        NotConnected | Interrupted | WouldBlock => ErrorClass::Teardown,
        _ => ErrorClass::Fatal,
    }
}

/// How a dial-side (connect/resolve) error is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialClass {
    /// The target is not coming back: the client service self-stops.
    Terminal,
    /// The attempt ends silently; other attempts may still succeed.
    Transient,
}

/// Classify an error observed while resolving or connecting.
pub fn classify_dial_error(kind: io::ErrorKind) -> DialClass {
    use io::ErrorKind::*;
    match kind {
        ConnectionRefused | ConnectionAborted | TimedOut | NotFound | HostUnreachable
        | NetworkUnreachable => DialClass::Terminal,
        _ => DialClass::Transient,
    }
}

/// Whether an accept-loop error should stop the server service.
///
/// Per-connection failures surfaced through the acceptor just mean the
/// half-open connection went away; the loop re-arms.
pub fn accept_error_is_fatal(kind: io::ErrorKind) -> bool {
    use io::ErrorKind::*;
    !matches!(
        kind,
        ConnectionReset | ConnectionAborted | ConnectionRefused | TimedOut | Interrupted
    )
}
