use reqwest::StatusCode;
use thiserror::Error;

/// Errors surfaced by the XMLMC client and its file channel.
///
/// Nothing is retried: every variant reports the first failure observed.
#[derive(Debug, Error)]
pub enum XmlmcError {
    /// Connection, TLS or timeout failure below HTTP.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-success status and no usable envelope.
    #[error("HTTP {status} from {url}: {body}")]
    Http {
        status: StatusCode,
        url: String,
        body: String,
    },

    /// Malformed XML or an unexpected envelope shape.
    #[error("XML parse error: {0}")]
    Parse(String),

    /// The server processed the call and reported `status="fail"`.
    #[error("{service}::{method} failed: {message}")]
    RequestFailure {
        service: String,
        method: String,
        message: String,
    },

    #[error("no session for {service}::{method}; log on or configure an API key")]
    NotAuthenticated { service: String, method: String },

    #[error("response parameter not found: {0}")]
    ParamNotFound(String),

    #[error("response parameter '{key}' value '{value}' is not a valid {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },

    #[error("no response available; invoke a method first")]
    NoResponse,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl XmlmcError {
    /// Server error text for application failures, if this is one.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            XmlmcError::RequestFailure { message, .. } => Some(message),
            _ => None,
        }
    }

    pub(crate) fn parse(err: impl std::fmt::Display) -> Self {
        XmlmcError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, XmlmcError>;
