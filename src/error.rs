//! Error types shared across the stub server.

use crate::registry::StubId;
use thiserror::Error;

/// A stub definition that cannot be compiled or registered.
#[derive(Debug, Error)]
pub enum StubError {
    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("invalid regex `{pattern}`: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid glob `{pattern}`: {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("invalid JSON path `{expression}`: {message}")]
    InvalidJsonPath { expression: String, message: String },

    #[error("invalid status code: {0}")]
    InvalidStatus(u16),

    #[error("stub id cannot be empty")]
    EmptyId,

    #[error("a stub with id `{0}` is already registered")]
    DuplicateId(String),
}

/// Registry lookups by id.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no stub registered with id `{0}`")]
    NotFound(StubId),
}

/// Failures while parsing or evaluating a response template.
#[derive(Debug, Error, PartialEq)]
pub enum TemplateError {
    #[error("unresolved reference `{0}`")]
    MissingBinding(String),

    #[error("`{binding}` is not valid JSON: {message}")]
    InvalidJson { binding: String, message: String },

    #[error("unterminated directive starting at byte {0}")]
    Unterminated(usize),

    #[error("block `{0}` is never closed")]
    UnterminatedBlock(String),

    #[error("unexpected closing tag `{{{{/{0}}}}}`")]
    UnexpectedClose(String),

    #[error("unknown helper `{0}`")]
    UnknownHelper(String),

    #[error("invalid arguments for `{helper}`: {message}")]
    InvalidArguments { helper: String, message: String },
}

impl TemplateError {
    pub(crate) fn arguments(helper: &str, message: impl Into<String>) -> Self {
        TemplateError::InvalidArguments {
            helper: helper.to_string(),
            message: message.into(),
        }
    }
}

/// An HTTP request that parsed but cannot be handled.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("header `{0}` is not valid UTF-8 text")]
    InvalidHeader(String),

    #[error("request path is not valid UTF-8 text")]
    InvalidPath,

    #[error("failed to read request body: {0}")]
    Body(String),

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
}

/// Failures while producing the body of a matched stub.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("invalid base64 body: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("failed to read body file {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize JSON body: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures while starting a [`StubServer`](crate::server::StubServer).
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("stub {index}: {source}")]
    Stub {
        index: usize,
        #[source]
        source: StubError,
    },
}
