use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Possible errors when turning operations into requests.
#[derive(Error, Debug)]
pub enum Error {
    /// A request validation failed
    #[error("request validation failed with {0}")]
    Validation(String),

    /// Required path parameters were absent from the operation
    #[error("operation is missing path parameters: {}", .0.join(", "))]
    MissingPathParams(Vec<String>),

    /// The verb is not advertised by the resolved resource
    #[error("verb {verb} is not supported by resource {name}")]
    UnsupportedVerb {
        /// The operation verb
        verb: &'static str,
        /// The REST name of the resource that rejected it
        name: String,
    },

    /// Failed to parse a group version string
    #[error("failed to parse group version: {0}")]
    InvalidGroupVersion(String),

    /// Failed to serialize body
    #[error("failed to serialize body: {0}")]
    SerializeBody(#[source] serde_json::Error),

    /// Failed to build a request
    #[error("failed to build request: {0}")]
    BuildRequest(#[source] http::Error),
}

/// An error response from the API.
///
/// Deserialized from a Kubernetes `Status` body with `status: "Failure"`;
/// `reason`, `message` and `code` are preserved verbatim for the caller.
#[derive(Error, Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
#[error("{message}: {reason}")]
pub struct ErrorResponse {
    /// The status
    #[serde(default)]
    pub status: String,
    /// A message about the error
    #[serde(default)]
    pub message: String,
    /// The reason for the error
    #[serde(default)]
    pub reason: String,
    /// The error code
    #[serde(default)]
    pub code: u16,
}
