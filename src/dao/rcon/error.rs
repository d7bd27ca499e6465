//! Error types shared by the remote-console client.

use thiserror::Error;

/// Convenient result alias returning [`RconError`] failures.
pub type RconResult<T> = Result<T, RconError>;

/// Failures that can occur while talking to a remote console.
#[derive(Debug, Error)]
pub enum RconError {
    /// The TCP connection could not be opened.
    #[error("failed to connect to `{addr}`")]
    Connect {
        /// Address that was dialed.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },
    /// The server answered the auth request with the failure id.
    #[error("remote console rejected the password")]
    AuthRejected,
    /// Reading or writing the established stream failed.
    #[error("remote console I/O failure")]
    Io(#[from] std::io::Error),
    /// The peer sent a frame that does not follow the packet layout.
    #[error("malformed remote console frame: {0}")]
    Protocol(String),
    /// The command body is larger than the server accepts.
    #[error("command exceeds {max} bytes")]
    CommandTooLong {
        /// Largest accepted body in bytes.
        max: usize,
    },
    /// The link went away before a response arrived.
    #[error("remote console connection closed")]
    Closed,
    /// No correlated response arrived in time.
    #[error("timed out waiting for a command response")]
    ResponseTimeout,
}
