//! Error types for the `sse` crate.
//!
//! Follows the same pattern as `domain::error`: a root `Error` struct holding
//! an error kind plus an optional source for chaining.

use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in the SSE client.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Connection(ConnectionErrorKind),
    Message(MessageErrorKind),
}

/// Errors that end (or prevent) a stream connection.
#[derive(Debug, PartialEq)]
pub enum ConnectionErrorKind {
    /// The HTTP client could not be built or the request was invalid.
    Builder,
    /// The request never produced a response.
    Network,
    /// The server answered with a non-success status.
    UnexpectedStatus(u16),
    /// The response body failed mid-stream.
    Stream,
    /// The server closed the stream.
    Closed,
}

/// Errors from decoding a single event payload.
#[derive(Debug, PartialEq)]
pub enum MessageErrorKind {
    Empty,
    InvalidJson,
    MissingType,
    UnknownDataType(String),
}

impl Error {
    pub fn connection(kind: ConnectionErrorKind, message: &str) -> Self {
        Error {
            source: Some(message.to_string().into()),
            error_kind: ErrorKind::Connection(kind),
        }
    }

    pub fn message(kind: MessageErrorKind, message: &str) -> Self {
        Error {
            source: Some(message.to_string().into()),
            error_kind: ErrorKind::Message(kind),
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self.error_kind, ErrorKind::Connection(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Connection(kind) => write!(f, "SSE connection error: {kind:?}")?,
            ErrorKind::Message(kind) => write!(f, "SSE message error: {kind:?}")?,
        }
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_builder() {
            ConnectionErrorKind::Builder
        } else if let Some(status) = err.status() {
            ConnectionErrorKind::UnexpectedStatus(status.as_u16())
        } else if err.is_body() || err.is_decode() {
            ConnectionErrorKind::Stream
        } else {
            ConnectionErrorKind::Network
        };

        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Connection(kind),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Message(MessageErrorKind::InvalidJson),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind_and_source() {
        let err = Error::connection(ConnectionErrorKind::UnexpectedStatus(502), "bad gateway");
        assert_eq!(
            err.to_string(),
            "SSE connection error: UnexpectedStatus(502) (bad gateway)"
        );
        assert!(err.is_connection());
    }

    #[test]
    fn test_json_errors_map_to_invalid_json() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{oops")
            .unwrap_err()
            .into();
        assert_eq!(
            err.error_kind,
            ErrorKind::Message(MessageErrorKind::InvalidJson)
        );
        assert!(!err.is_connection());
    }
}
