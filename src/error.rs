//! Error taxonomy for the message-routing daemon
//!
//! Each failure class the dispatch loop distinguishes has its own type so the
//! caller can decide between retry, skip and fatal without string matching:
//!
//! - [`ConnectError`] - broker unreachable, retried with a fixed backoff
//! - [`SubscribeError`] - one destination rejected, other topics unaffected
//! - [`ReceiveError`] - the live session broke, discarded and reconnected
//! - [`HandlerError`] - a handler reported failure, logged and skipped
//! - [`DaemonError`] - startup-time failures, the only fatal class
//!
//! Configuration errors live in [`crate::config::ConfigError`].

use std::io;
use std::time::Duration;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Establishing a broker session failed
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Invalid broker endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Broker refused connection: {0}")]
    Refused(String),
    #[error("No connection acknowledgement within {0:?}")]
    Timeout(Duration),
    #[error("Transport error while connecting")]
    Transport(#[source] BoxError),
}

/// Subscribing or unsubscribing one destination failed
#[derive(Debug, Error)]
#[error("Subscription to '{topic}' failed: {reason}")]
pub struct SubscribeError {
    pub topic: String,
    pub reason: String,
}

impl SubscribeError {
    pub fn new<T: Into<String>, R: Into<String>>(topic: T, reason: R) -> Self {
        Self {
            topic: topic.into(),
            reason: reason.into(),
        }
    }
}

/// Receiving the next frame failed; the session is no longer usable
#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("Transport connection reset: {0}")]
    BrokenPipe(#[source] io::Error),
    #[error("Broker closed the session: {0}")]
    Disconnected(String),
    #[error("Transport error while receiving")]
    Transport(#[source] BoxError),
}

impl ReceiveError {
    /// Classify an I/O failure, separating reset-class errors from the rest
    pub fn from_io(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof => ReceiveError::BrokenPipe(error),
            _ => ReceiveError::Transport(Box::new(error)),
        }
    }

    /// Whether the failure is a broken-pipe class transport reset
    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, ReceiveError::BrokenPipe(_))
    }
}

/// Best-effort teardown step failed (unsubscribe / disconnect)
#[derive(Debug, Error)]
#[error("{operation} failed: {message}")]
pub struct TeardownError {
    pub operation: &'static str,
    pub message: String,
}

impl TeardownError {
    pub fn new<M: Into<String>>(operation: &'static str, message: M) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// A handler returned a failure outcome
#[derive(Debug, Error, Clone, PartialEq)]
#[error("Handler '{handler}' failed: {message}")]
pub struct HandlerError {
    pub handler: String,
    pub message: String,
    pub notes: Vec<String>,
}

/// Failures that stop the daemon before the dispatch loop starts
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("No handlers could be loaded, nothing to listen for")]
    NoHandlers,

    #[error("Failed to install signal handlers: {0}")]
    Signal(#[source] io::Error),

    #[error("Failed to detach into the background: {message}")]
    Daemonize { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DaemonError {
    /// Create daemonization error
    pub fn daemonize<S: Into<String>>(message: S) -> Self {
        Self::Daemonize {
            message: message.into(),
        }
    }

    /// Process exit code for this failure
    ///
    /// The zero-handlers condition is logged but is not a crash.
    pub fn exit_code(&self) -> i32 {
        match self {
            DaemonError::NoHandlers => 0,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_error_classifies_reset_as_broken_pipe() {
        for kind in [
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::UnexpectedEof,
        ] {
            let err = ReceiveError::from_io(io::Error::new(kind, "reset"));
            assert!(err.is_broken_pipe(), "{kind:?} should be broken-pipe class");
        }

        let other = ReceiveError::from_io(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(!other.is_broken_pipe());
        assert!(!ReceiveError::Disconnected("bye".to_string()).is_broken_pipe());
    }

    #[test]
    fn test_daemon_error_exit_codes() {
        assert_eq!(DaemonError::NoHandlers.exit_code(), 0);
        assert_eq!(DaemonError::daemonize("fork failed").exit_code(), 1);
        let config = DaemonError::Config(crate::config::ConfigError::NoBrokerEndpoint);
        assert_eq!(config.exit_code(), 1);
    }

    #[test]
    fn test_error_display() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(ConnectError::InvalidEndpoint("x".to_string())),
            Box::new(ConnectError::Timeout(Duration::from_secs(3))),
            Box::new(SubscribeError::new("a.b", "rejected")),
            Box::new(ReceiveError::Disconnected("gone".to_string())),
            Box::new(TeardownError::new("disconnect", "closed")),
            Box::new(DaemonError::NoHandlers),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
