//! Error handling in [`kubedyn`][crate]
pub use kubedyn_core::ErrorResponse;
use thiserror::Error;

/// Possible errors when working with [`kubedyn`][crate]
#[derive(Error, Debug)]
pub enum Error {
    /// ApiError for when things fail
    ///
    /// This can be parsed into as an error handling fallback.
    /// It's also used in `WatchEvent` from watch calls.
    ///
    /// It's quite common to get a `410 Gone` when the `resourceVersion` is too old.
    #[error("ApiError: {0} ({0:?})")]
    Api(#[source] ErrorResponse),

    /// Hyper error
    #[error("HyperError: {0}")]
    HyperError(#[from] hyper::Error),

    /// Service error
    #[error("ServiceError: {0}")]
    Service(#[source] tower::BoxError),

    /// UTF-8 Error
    #[error("UTF-8 Error: {0}")]
    FromUtf8(#[from] std::string::FromUtf8Error),

    /// Returned when failed to find a newline character within max length.
    /// Only returned by `Client::request_events` and this should never happen as
    /// the max is `usize::MAX`.
    #[error("Error finding newline character")]
    LinesCodecMaxLineLengthExceeded,

    /// Returned on `std::io::Error` when reading event stream.
    #[error("Error reading events stream: {0}")]
    ReadEvents(#[source] std::io::Error),

    /// Http based error
    #[error("HttpError: {0}")]
    HttpError(#[from] http::Error),

    /// Failed to construct a URI
    #[error(transparent)]
    InvalidUri(#[from] http::uri::InvalidUri),

    /// Common error case when requesting parsing into own structs
    #[error("Error deserializing response: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// Error building a request from an operation
    #[error("Error building request: {0}")]
    BuildRequest(#[source] kubedyn_core::Error),

    /// Configuration error
    #[error("Error loading kubeconfig: {0}")]
    Kubeconfig(#[from] crate::config::KubeconfigError),

    /// An error from loading in-cluster config
    #[error("Error loading in-cluster config: {0}")]
    InCluster(#[from] crate::config::InClusterError),

    /// Failed to infer config
    #[error("failed to infer config: in-cluster: ({in_cluster}), kubeconfig: ({kubeconfig})")]
    InferConfig {
        /// Error from trying the in-cluster environment
        in_cluster: Box<Error>,
        // The kubeconfig failure is more likely to be a user error
        /// Error from trying the local kubeconfig
        #[source]
        kubeconfig: Box<Error>,
    },

    /// An auth provider failed to produce a request decoration
    #[error("auth error: {0}")]
    Auth(#[from] crate::client::AuthError),

    /// Discovery errors
    #[error("Error from discovery: {0}")]
    Discovery(#[from] DiscoveryError),

    /// An error while assembling TLS material
    #[error("TlsError: {0}")]
    Tls(#[from] crate::client::TlsError),

    /// The connection upgrade to a WebSocket failed
    #[error("failed to upgrade connection: {0}")]
    UpgradeConnection(#[from] crate::client::UpgradeConnectionError),

    /// A watch or connect stream gave up after exhausting its reconnect budget
    #[error("stream interrupted after {retries} attempts: {reason}")]
    StreamInterrupted {
        /// How many reconnects were attempted before giving up
        retries: u32,
        /// The terminal failure
        reason: String,
    },
}

#[derive(Error, Debug)]
// Redundant with the error messages and machine names
#[allow(missing_docs)]
/// Possible errors when using API discovery
pub enum DiscoveryError {
    #[error("Invalid GroupVersion: {0}")]
    InvalidGroupVersion(String),

    /// No resource in the group version matched the requested name or kind
    #[error("Unsupported resource {name} in {api_version}")]
    UnsupportedResource { api_version: String, name: String },

    #[error("Discovery document not found: {0}")]
    NotFound(String),

    #[error("Discovery document unreadable: {0}: {1}")]
    DocumentUnreadable(String, #[source] std::io::Error),

    #[error("Invalid discovery document: {0}")]
    InvalidDocument(#[source] serde_json::Error),

    #[error("Discovery did not complete within {0:?}")]
    DeadlineExceeded(std::time::Duration),
}

impl From<kubedyn_core::Error> for Error {
    fn from(error: kubedyn_core::Error) -> Self {
        match error {
            kubedyn_core::Error::InvalidGroupVersion(s) => {
                Error::Discovery(DiscoveryError::InvalidGroupVersion(s))
            }
            e => Error::BuildRequest(e),
        }
    }
}
