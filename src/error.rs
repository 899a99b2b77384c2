//! Error types for wlharness

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum HarnessError {
    /// IO error
    Io(io::Error),
    /// Scenario handler detected an invariant violation
    Assertion(String),
    /// Notification transport failure (bus connect, stream, delivery)
    Transport(String),
    /// Subscription could not be established
    Subscription(String),
    /// Configuration error
    Config(String),
    /// Parse error
    Parse(String),
    /// Invalid state
    InvalidState(String),
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarnessError::Io(e) => write!(f, "IO error: {}", e),
            HarnessError::Assertion(msg) => write!(f, "Assertion failed: {}", msg),
            HarnessError::Transport(msg) => write!(f, "Transport error: {}", msg),
            HarnessError::Subscription(msg) => write!(f, "Subscription error: {}", msg),
            HarnessError::Config(msg) => write!(f, "Configuration error: {}", msg),
            HarnessError::Parse(msg) => write!(f, "Parse error: {}", msg),
            HarnessError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl std::error::Error for HarnessError {}

impl From<io::Error> for HarnessError {
    fn from(error: io::Error) -> Self {
        HarnessError::Io(error)
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(error: serde_json::Error) -> Self {
        HarnessError::Parse(error.to_string())
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
