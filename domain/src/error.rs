//! Error types for the `domain` layer.
use std::error::Error as StdError;
use std::fmt;

/// Top-level domain error type.
/// Errors in the Domain layer are modeled as a tree structure with
/// `domain::error::Error` as the root type holding a tree of `error_kind` enums
/// that represent the kinds of errors that can occur in the domain layer or in
/// lower layers (`sse`, the HTTP client). The `source` field holds the original
/// error. Callers of the realtime service only ever see these kinds, never the
/// lower layers' error types.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: DomainErrorKind,
}

/// Enum representing the major categories of errors that can occur in the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum DomainErrorKind {
    Internal(InternalErrorKind),
    External(ExternalErrorKind),
}

/// Errors caused by this process: bad configuration or invalid input.
#[derive(Debug, PartialEq)]
pub enum InternalErrorKind {
    Config,
    InvalidPeriod,
    Other(String),
}

/// Errors caused by the backend or the network between us.
#[derive(Debug, PartialEq)]
pub enum ExternalErrorKind {
    Network,
    /// The backend answered with a non-success HTTP status.
    Status(u16),
    /// The backend answered with a body we could not interpret.
    InvalidResponse,
}

impl Error {
    pub fn internal(kind: InternalErrorKind, message: &str) -> Self {
        Error {
            source: Some(message.to_string().into()),
            error_kind: DomainErrorKind::Internal(kind),
        }
    }

    pub fn external(kind: ExternalErrorKind, message: &str) -> Self {
        Error {
            source: Some(message.to_string().into()),
            error_kind: DomainErrorKind::External(kind),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "Domain Error: {:?}: {source}", self.error_kind),
            None => write!(f, "Domain Error: {:?}", self.error_kind),
        }
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
        // Errors that result from issues building the reqwest::Client instance. This
        // type of error will occur prior to any network calls being made.
        let error_kind = if err.is_builder() {
            DomainErrorKind::Internal(InternalErrorKind::Other(
                "Failed to build reqwest client".to_string(),
            ))
        } else if err.is_decode() {
            DomainErrorKind::External(ExternalErrorKind::InvalidResponse)
        } else if let Some(status) = err.status() {
            DomainErrorKind::External(ExternalErrorKind::Status(status.as_u16()))
        } else {
            DomainErrorKind::External(ExternalErrorKind::Network)
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<reqwest_middleware::Error> for Error {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(err) => err.into(),
            reqwest_middleware::Error::Middleware(err) => Error {
                source: Some(err.into()),
                error_kind: DomainErrorKind::External(ExternalErrorKind::Network),
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: DomainErrorKind::External(ExternalErrorKind::InvalidResponse),
        }
    }
}

// This is where we translate errors from the `sse` layer to the `domain` layer.
impl From<sse::Error> for Error {
    fn from(err: sse::Error) -> Self {
        use sse::error::{ConnectionErrorKind, ErrorKind};

        let error_kind = match &err.error_kind {
            ErrorKind::Connection(ConnectionErrorKind::Builder) => {
                DomainErrorKind::Internal(InternalErrorKind::Config)
            }
            ErrorKind::Connection(ConnectionErrorKind::UnexpectedStatus(status)) => {
                DomainErrorKind::External(ExternalErrorKind::Status(*status))
            }
            ErrorKind::Connection(_) => DomainErrorKind::External(ExternalErrorKind::Network),
            ErrorKind::Message(_) => DomainErrorKind::External(ExternalErrorKind::InvalidResponse),
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}
