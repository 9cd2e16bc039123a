//! A basic API client for interacting with the Kubernetes API
//!
//! The [`Client`] uses standard kube error handling.
//!
//! This client can be used on its own or together with the [`Operation`]
//! runners in [`runner`](crate::runner) for discovery-driven interaction with
//! the kubernetes API.
use std::sync::Arc;

use bytes::Bytes;
use either::{Either, Left, Right};
use futures::{future::BoxFuture, Stream, StreamExt, TryStream};
use http::{self, Request, Response, StatusCode};
use http_body_util::BodyExt;
use kubedyn_core::{ErrorResponse, Status, WatchEvent};
use serde::de::DeserializeOwned;
use serde_json::{self, Value};
use tokio_util::{
    codec::{FramedRead, LinesCodec, LinesCodecError},
    io::StreamReader,
};
use tower::{buffer::Buffer, util::BoxService, BoxError, Layer, Service, ServiceExt};
use tower_http::map_response_body::MapResponseBodyLayer;

use crate::{discovery::DiscoveryState, Config, Error, Operation, Result};

pub(crate) mod auth;
pub use auth::Error as AuthError;
mod body;
pub use body::Body;
mod builder;
pub use builder::{ClientBuilder, DynBody};
mod config_ext;
pub use config_ext::ConfigExt;
pub mod middleware;
mod tls;
pub use tls::Error as TlsError;
mod upgrade;
pub use upgrade::UpgradeConnectionError;

use body::IntoBodyDataStream;

/// Client for connecting with a Kubernetes cluster.
///
/// The easiest way to instantiate the client is either by
/// inferring the configuration from the environment using
/// [`Client::try_default`] or with an existing [`Config`]
/// using [`Client::try_from`].
#[derive(Clone)]
pub struct Client {
    // - `Buffer` for cheap clone
    // - `BoxService` for dynamic response future type
    inner: Buffer<Request<Body>, BoxFuture<'static, Result<Response<Body>, BoxError>>>,
    default_ns: String,
    // Per-client discovery driver and resource cache, shared by clones.
    pub(crate) discovery: Arc<DiscoveryState>,
}

impl Client {
    /// Create a [`Client`] using a custom `Service` stack.
    ///
    /// [`ConfigExt`](crate::client::ConfigExt) provides extensions for
    /// building a custom stack.
    ///
    /// To create with the default stack with a [`Config`], use
    /// [`Client::try_from`].
    ///
    /// To create with the default stack with an inferred [`Config`], use
    /// [`Client::try_default`].
    pub fn new<S, B, T>(service: S, default_namespace: T) -> Self
    where
        S: Service<Request<Body>, Response = Response<B>> + Send + 'static,
        S::Future: Send + 'static,
        S::Error: Into<BoxError>,
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
        T: Into<String>,
    {
        // Transform response body to the dynamic `Body` and use type erased error to avoid type parameters.
        let service = MapResponseBodyLayer::new(Body::wrap_body)
            .layer(service)
            .map_err(|e| e.into());
        Self {
            inner: Buffer::new(BoxService::new(service), 1024),
            default_ns: default_namespace.into(),
            discovery: Arc::new(DiscoveryState::default()),
        }
    }

    /// Create and initialize a [`Client`] using the inferred configuration.
    ///
    /// Will use [`Config::infer`] which attempts the in-cluster environment
    /// variables first and then falls back to the local kubeconfig.
    ///
    /// Will fail if neither configuration could be loaded.
    ///
    /// Must be called within a tokio runtime: the client's buffered service
    /// spawns a background worker on construction.
    pub async fn try_default() -> Result<Self> {
        Self::try_from(Config::infer()?)
    }

    /// The default namespace of the client, from the context or pod environment
    ///
    /// Useful for callers scoping operations where the user did not pick a
    /// namespace explicitly.
    pub fn default_namespace(&self) -> &str {
        &self.default_ns
    }

    /// Swap the discovery driver, e.g. for the deterministic file driver in tests.
    #[must_use]
    pub fn with_discovery_driver(mut self, driver: crate::DiscoveryDriver) -> Self {
        self.discovery = Arc::new(self.discovery.with_driver(driver));
        self
    }

    /// Override the total deadline used for bulk api discovery.
    #[must_use]
    pub fn with_discovery_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.discovery = Arc::new(self.discovery.with_timeout(timeout));
        self
    }

    /// Override the time-to-live of cached discovery data.
    #[must_use]
    pub fn with_discovery_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.discovery = Arc::new(self.discovery.with_ttl(ttl));
        self
    }

    /// Perform a raw HTTP request against the API and return the raw response back.
    /// This method can be used to get raw access to the API which may be used to, for example,
    /// create a proxy server or application-level gateway between localhost and the API server.
    pub async fn send(&self, request: Request<Body>) -> Result<Response<Body>> {
        let mut svc = self.inner.clone();
        let res = svc
            .ready()
            .await
            .map_err(Error::Service)?
            .call(request)
            .await
            .map_err(|err| {
                // Error decorating request
                err.downcast::<Error>()
                    .map(|e| *e)
                    // Error requesting
                    .or_else(|err| err.downcast::<hyper::Error>().map(|err| Error::HyperError(*err)))
                    // Error from another middleware
                    .unwrap_or_else(Error::Service)
            })?;
        Ok(res)
    }

    /// Make a WebSocket connection for the channel-framed streaming protocol.
    pub(crate) async fn connect_upgrade(
        &self,
        request: Request<Vec<u8>>,
    ) -> Result<tokio_tungstenite::WebSocketStream<hyper_util::rt::TokioIo<hyper::upgrade::Upgraded>>>
    {
        use http::header::HeaderValue;
        let (mut parts, body) = request.into_parts();
        parts
            .headers
            .insert(http::header::CONNECTION, HeaderValue::from_static("Upgrade"));
        parts
            .headers
            .insert(http::header::UPGRADE, HeaderValue::from_static("websocket"));
        parts.headers.insert(
            http::header::SEC_WEBSOCKET_VERSION,
            HeaderValue::from_static("13"),
        );
        let key = upgrade::sec_websocket_key();
        parts.headers.insert(
            http::header::SEC_WEBSOCKET_KEY,
            key.parse().map_err(http::Error::from).map_err(Error::HttpError)?,
        );
        parts.headers.insert(
            http::header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(upgrade::WS_PROTOCOL),
        );

        let res = self.send(Request::from_parts(parts, Body::from(body))).await?;
        upgrade::verify_response(&res, &key).map_err(Error::UpgradeConnection)?;
        match hyper::upgrade::on(res).await {
            Ok(upgraded) => Ok(tokio_tungstenite::WebSocketStream::from_raw_socket(
                hyper_util::rt::TokioIo::new(upgraded),
                tokio_tungstenite::tungstenite::protocol::Role::Client,
                None,
            )
            .await),

            Err(e) => Err(Error::UpgradeConnection(
                UpgradeConnectionError::GetPendingUpgrade(e),
            )),
        }
    }

    /// Perform a raw HTTP request against the API and deserialize the response
    /// as JSON to some known type.
    pub async fn request<T>(&self, request: Request<Vec<u8>>) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let text = self.request_text(request).await?;

        serde_json::from_str(&text).map_err(|e| {
            tracing::warn!("{}, {:?}", text, e);
            Error::SerdeError(e)
        })
    }

    /// Perform a raw HTTP request against the API and get back the response
    /// as a string
    pub async fn request_text(&self, request: Request<Vec<u8>>) -> Result<String> {
        let res = self.send(request.map(Body::from)).await?;
        let status = res.status();
        let body_bytes = res.into_body().collect().await?.to_bytes();
        let text = String::from_utf8(body_bytes.to_vec()).map_err(Error::FromUtf8)?;
        handle_api_errors(&text, status)?;

        Ok(text)
    }

    /// Perform a raw HTTP request against the API and get back the response
    /// as a stream of bytes
    pub async fn request_text_stream(
        &self,
        request: Request<Vec<u8>>,
    ) -> Result<impl Stream<Item = Result<Bytes>>> {
        let res = self.send(request.map(Body::from)).await?;
        Ok(IntoBodyDataStream::into_stream(res.into_body()))
    }

    /// Perform a raw HTTP request against the API and get back either an object
    /// deserialized as JSON or a [`Status`] Object.
    pub async fn request_status<T>(&self, request: Request<Vec<u8>>) -> Result<Either<T, Status>>
    where
        T: DeserializeOwned,
    {
        let text = self.request_text(request).await?;
        // It needs to be JSON:
        let v: Value = serde_json::from_str(&text).map_err(Error::SerdeError)?;
        if v["kind"] == "Status" {
            tracing::trace!("Status from {}", text);
            Ok(Right(serde_json::from_str::<Status>(&text).map_err(|e| {
                tracing::warn!("{}, {:?}", text, e);
                Error::SerdeError(e)
            })?))
        } else {
            Ok(Left(serde_json::from_str::<T>(&text).map_err(|e| {
                tracing::warn!("{}, {:?}", text, e);
                Error::SerdeError(e)
            })?))
        }
    }

    /// Perform a raw request and get back a stream of [`WatchEvent`] objects
    ///
    /// The response body is chunked newline-delimited JSON; partial lines are
    /// buffered across reads and decoded once complete.
    pub async fn request_events<T>(
        &self,
        request: Request<Vec<u8>>,
    ) -> Result<impl TryStream<Item = Result<WatchEvent<T>>>>
    where
        T: Clone + DeserializeOwned,
    {
        let res = self.send(request.map(Body::from)).await?;
        tracing::trace!("headers: {:?}", res.headers());

        let frames = FramedRead::new(
            StreamReader::new(IntoBodyDataStream::into_stream(res.into_body()).map(|result| {
                result.map_err(|e| {
                    // Unexpected EOF from chunked decoder.
                    // Tends to happen when watching for 300+s. This will be ignored.
                    if e.to_string().contains("unexpected EOF during chunk") {
                        return std::io::Error::new(std::io::ErrorKind::UnexpectedEof, e);
                    }
                    std::io::Error::other(e)
                })
            })),
            LinesCodec::new(),
        );

        Ok(frames.filter_map(|res| async {
            match res {
                Ok(line) => match serde_json::from_str::<WatchEvent<T>>(&line) {
                    Ok(event) => Some(Ok(event)),
                    Err(e) => {
                        // Ignore EOF error that can happen for incomplete line from `decode_eof`.
                        if e.is_eof() {
                            return None;
                        }

                        // Got general error response
                        if let Ok(e_resp) = serde_json::from_str::<ErrorResponse>(&line) {
                            if e_resp.status == "Failure" {
                                return Some(Err(Error::Api(e_resp)));
                            }
                        }
                        // Parsing error
                        Some(Err(Error::SerdeError(e)))
                    }
                },

                Err(LinesCodecError::Io(e)) => match e.kind() {
                    // Client timeout
                    std::io::ErrorKind::TimedOut => {
                        tracing::warn!("timeout in poll: {}", e);
                        None
                    }
                    // Unexpected EOF from chunked decoder.
                    // Tends to happen after 300+s of watching.
                    std::io::ErrorKind::UnexpectedEof => {
                        tracing::warn!("eof in poll: {}", e);
                        None
                    }
                    _ => Some(Err(Error::ReadEvents(e))),
                },

                // Reached the maximum line length without finding a newline.
                // This should never happen because we're using the default `usize::MAX`.
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    Some(Err(Error::LinesCodecMaxLineLengthExceeded))
                }
            }
        }))
    }

    /// Resolve and execute an [`Operation`], decoding the JSON response.
    ///
    /// See the [`runner`](crate::runner) module for the streaming variants.
    pub async fn run<T>(&self, op: &Operation) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let req = self.build_request(op).await?;
        self.request(req).await
    }

    /// Resolve and execute an [`Operation`], returning the raw response text.
    ///
    /// This is the variant for endpoints serving `text/plain`, such as
    /// `pods/log` without `follow`.
    pub async fn run_text(&self, op: &Operation) -> Result<String> {
        let req = self.build_request(op).await?;
        self.request_text(req).await
    }

    /// Resolve and execute an [`Operation`], returning the body as a byte stream.
    pub async fn run_stream(&self, op: &Operation) -> Result<impl Stream<Item = Result<Bytes>>> {
        let req = self.build_request(op).await?;
        self.request_text_stream(req).await
    }

    /// Resolve and execute an [`Operation`], decoding either the object or a [`Status`].
    ///
    /// Deletion endpoints return the deleted object or a `Status` depending on
    /// timing, so both sides are surfaced.
    pub async fn run_status<T>(&self, op: &Operation) -> Result<Either<T, Status>>
    where
        T: DeserializeOwned,
    {
        let req = self.build_request(op).await?;
        self.request_status(req).await
    }

    // Single-shot pipeline: resource finder -> path builder -> request renderer.
    pub(crate) async fn build_request(&self, op: &Operation) -> Result<Request<Vec<u8>>> {
        let resource = self.find_resource(&op.api_version, &op.resource).await?;
        kubedyn_core::request::build(op, &resource).map_err(Error::from)
    }
}

/// Kubernetes returned error handling
///
/// Either kube returned an explicit ApiError struct,
/// or it somehow returned something we couldn't parse as one.
///
/// In either case, present an ApiError upstream.
/// The latter is probably a bug if encountered.
fn handle_api_errors(text: &str, s: StatusCode) -> Result<()> {
    if s.is_client_error() || s.is_server_error() {
        let failure = serde_json::from_str::<ErrorResponse>(text)
            .ok()
            .filter(|e| e.status == "Failure");
        if let Some(errdata) = failure {
            tracing::debug!("Unsuccessful: {:?}", errdata);
            Err(Error::Api(errdata))
        } else {
            tracing::warn!("Unsuccessful data error parse: {}", text);
            let ae = ErrorResponse {
                status: s.to_string(),
                code: s.as_u16(),
                message: format!("{:?}", text),
                reason: "Failed to parse error data".into(),
            };
            tracing::debug!("Unsuccessful: {:?} (reconstruct)", ae);
            Err(Error::Api(ae))
        }
    } else {
        Ok(())
    }
}

impl TryFrom<Config> for Client {
    type Error = Error;

    /// Builds a default [`Client`] from a [`Config`], see [`ClientBuilder`] if more customization is required
    fn try_from(config: Config) -> Result<Self> {
        Ok(ClientBuilder::try_from(config)?.build())
    }
}
