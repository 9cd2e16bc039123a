use base64::Engine as _;
use http::{self, Response, StatusCode};
use thiserror::Error;
use tokio_tungstenite::tungstenite as ws;

use crate::client::Body;

/// Binary channel subprotocol, to get a JSON `Status` object in the `error` channel (3).
///
/// There's no official documentation about this protocol, but it's described in
/// [`k8s.io/apiserver/pkg/util/wsstream/conn.go`](https://git.io/JLQED).
/// There's a comment about v4 and `Status` object in
/// [`kubelet/cri/streaming/remotecommand/httpstream.go`](https://git.io/JLQEh).
pub(crate) const WS_PROTOCOL: &str = "v4.channel.k8s.io";

/// Possible errors from upgrading to a WebSocket connection
#[derive(Debug, Error)]
pub enum UpgradeConnectionError {
    /// The server did not respond with [`SWITCHING_PROTOCOLS`] status when upgrading the
    /// connection.
    ///
    /// [`SWITCHING_PROTOCOLS`]: http::status::StatusCode::SWITCHING_PROTOCOLS
    #[error("failed to switch protocol: {0}")]
    ProtocolSwitch(http::status::StatusCode),

    /// `Upgrade` header was not set to `websocket` (case insensitive)
    #[error("upgrade header was not set to websocket")]
    MissingUpgradeWebSocketHeader,

    /// `Connection` header was not set to `Upgrade` (case insensitive)
    #[error("connection header was not set to Upgrade")]
    MissingConnectionUpgradeHeader,

    /// `Sec-WebSocket-Accept` key mismatched.
    #[error("Sec-WebSocket-Accept key mismatched")]
    SecWebSocketAcceptKeyMismatch,

    /// `Sec-WebSocket-Protocol` mismatched.
    #[error("Sec-WebSocket-Protocol mismatched")]
    SecWebSocketProtocolMismatch,

    /// Failed to get pending HTTP upgrade.
    #[error("failed to get pending HTTP upgrade: {0}")]
    GetPendingUpgrade(#[source] hyper::Error),
}

/// Generate a random key for the `Sec-WebSocket-Key` header (RFC6455 4.1).
pub(crate) fn sec_websocket_key() -> String {
    let r: [u8; 16] = rand::random();
    base64::engine::general_purpose::STANDARD.encode(r)
}

// Verify upgrade response according to RFC6455.
// Based on `tungstenite` and added subprotocol verification.
pub(crate) fn verify_response(res: &Response<Body>, key: &str) -> Result<(), UpgradeConnectionError> {
    if res.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Err(UpgradeConnectionError::ProtocolSwitch(res.status()));
    }

    let headers = res.headers();
    if !headers
        .get(http::header::UPGRADE)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
    {
        return Err(UpgradeConnectionError::MissingUpgradeWebSocketHeader);
    }

    if !headers
        .get(http::header::CONNECTION)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.eq_ignore_ascii_case("Upgrade"))
        .unwrap_or(false)
    {
        return Err(UpgradeConnectionError::MissingConnectionUpgradeHeader);
    }

    let accept_key = ws::handshake::derive_accept_key(key.as_ref());
    if !headers
        .get(http::header::SEC_WEBSOCKET_ACCEPT)
        .map(|h| h == &accept_key)
        .unwrap_or(false)
    {
        return Err(UpgradeConnectionError::SecWebSocketAcceptKeyMismatch);
    }

    // Make sure that the server returned the expected subprotocol.
    if !headers
        .get(http::header::SEC_WEBSOCKET_PROTOCOL)
        .map(|h| h == WS_PROTOCOL)
        .unwrap_or(false)
    {
        return Err(UpgradeConnectionError::SecWebSocketProtocolMismatch);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good_response(key: &str) -> Response<Body> {
        Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(http::header::UPGRADE, "websocket")
            .header(http::header::CONNECTION, "Upgrade")
            .header(
                http::header::SEC_WEBSOCKET_ACCEPT,
                ws::handshake::derive_accept_key(key.as_ref()),
            )
            .header(http::header::SEC_WEBSOCKET_PROTOCOL, WS_PROTOCOL)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn accepts_a_valid_upgrade() {
        let key = sec_websocket_key();
        assert!(verify_response(&good_response(&key), &key).is_ok());
    }

    #[test]
    fn rejects_mismatched_accept_key() {
        let key = sec_websocket_key();
        let other = sec_websocket_key();
        assert!(matches!(
            verify_response(&good_response(&other), &key),
            Err(UpgradeConnectionError::SecWebSocketAcceptKeyMismatch)
        ));
    }

    #[test]
    fn rejects_wrong_subprotocol() {
        let key = sec_websocket_key();
        let mut res = good_response(&key);
        res.headers_mut().insert(
            http::header::SEC_WEBSOCKET_PROTOCOL,
            http::HeaderValue::from_static("v3.channel.k8s.io"),
        );
        assert!(matches!(
            verify_response(&res, &key),
            Err(UpgradeConnectionError::SecWebSocketProtocolMismatch)
        ));
    }
}
