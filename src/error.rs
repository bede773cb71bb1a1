// src/error.rs
use std::fmt;
use std::io;

/// Errors surfaced synchronously by the directory client.
///
/// Servers that do not answer are not errors: they are reported through the
/// listener as a failed-to-respond outcome.
#[derive(Debug)]
pub enum DirectoryError {
    /// The handle was released, already terminated, or never valid.
    InvalidHandle,
    IndexOutOfRange { index: usize, count: usize },
    MalformedFilter(String),
    /// The client has been shut down.
    ShutDown,
    Config(String),
    Io(io::Error),
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHandle => write!(f, "Invalid or released handle"),
            Self::IndexOutOfRange { index, count } => {
                write!(f, "Server index {} out of range (server count {})", index, count)
            }
            Self::MalformedFilter(reason) => write!(f, "Malformed filter: {}", reason),
            Self::ShutDown => write!(f, "Directory client has been shut down"),
            Self::Config(reason) => write!(f, "Invalid configuration: {}", reason),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for DirectoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DirectoryError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Failures inside a backend. These never reach the caller directly; the
/// client logs them and reports the server as not responding.
#[derive(Debug)]
pub enum BackendError {
    Http(reqwest::Error),
    Io(io::Error),
    Protocol(String),
    NoResponse,
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(e) => write!(f, "Master server request failed: {}", e),
            Self::Io(e) => write!(f, "Socket error: {}", e),
            Self::Protocol(reason) => write!(f, "Invalid response: {}", reason),
            Self::NoResponse => write!(f, "Server did not respond"),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e)
    }
}

impl From<io::Error> for BackendError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, DirectoryError>;
