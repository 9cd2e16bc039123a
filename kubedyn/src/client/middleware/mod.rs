//! Request middleware for the default client stack.
//!
//! The pipeline is ordered: every request is first rebased under the
//! cluster url (a `ServiceBuilder::map_request` step in the builder), then
//! decorated with authorization; a failing layer aborts the request with its
//! own error before any I/O happens.
use http::{uri, Uri};
use tower::{filter::AsyncFilterLayer, util::Either, Layer};
pub(crate) use tower_http::auth::AddAuthorizationLayer;

use super::auth::RefreshableToken;

/// Layer to set up `Authorization` header depending on the config.
pub struct AuthLayer(pub(crate) Either<AddAuthorizationLayer, AsyncFilterLayer<RefreshableToken>>);

impl<S> Layer<S> for AuthLayer {
    type Service = Either<
        <AddAuthorizationLayer as Layer<S>>::Service,
        <AsyncFilterLayer<RefreshableToken> as Layer<S>>::Service,
    >;

    fn layer(&self, inner: S) -> Self::Service {
        self.0.layer(inner)
    }
}

/// Rewrite a request uri to live under the cluster's base url.
///
/// Requests are rendered as absolute paths (`/api/...`); the cluster url
/// contributes scheme, authority, and any path prefix it carries (gateways
/// can serve an apiserver under a subpath), which is prepended to the
/// request's own path and query.
pub(crate) fn rebase_uri(base: &Uri, request_uri: Uri) -> Uri {
    let prefix = base.path().trim_end_matches('/');
    let tail = request_uri
        .path_and_query()
        .map(uri::PathAndQuery::as_str)
        .unwrap_or("/");
    let mut parts = uri::Parts::default();
    parts.scheme = base.scheme().cloned();
    parts.authority = base.authority().cloned();
    parts.path_and_query = Some(
        format!("{prefix}{tail}")
            .parse()
            .expect("a valid url prefix joined with a valid request path parses"),
    );
    Uri::from_parts(parts).expect("rebased uri keeps its validated components")
}

#[cfg(test)]
mod tests {
    use super::rebase_uri;
    use http::Uri;

    #[test]
    fn joins_paths_under_the_cluster_url() {
        let base: Uri = "https://cluster.example:6443".parse().unwrap();
        let rebased = rebase_uri(
            &base,
            "/api/v1/namespaces/kube-system/pods?limit=5".parse().unwrap(),
        );
        assert_eq!(
            rebased,
            "https://cluster.example:6443/api/v1/namespaces/kube-system/pods?limit=5"
        );
    }

    #[test]
    fn keeps_any_base_path_prefix() {
        // gateways can serve an apiserver under a subpath
        let base: Uri = "https://gateway.example/clusters/c-1".parse().unwrap();
        let rebased = rebase_uri(&base, "/apis/apps/v1/deployments".parse().unwrap());
        assert_eq!(
            rebased,
            "https://gateway.example/clusters/c-1/apis/apps/v1/deployments"
        );
    }

    #[test]
    fn trailing_slash_on_the_base_does_not_double_up() {
        let base: Uri = "https://cluster.example/".parse().unwrap();
        let rebased = rebase_uri(&base, "/version".parse().unwrap());
        assert_eq!(rebased, "https://cluster.example/version");
    }

    mod auth_layer {
        use std::{matches, sync::Arc};

        use chrono::{Duration, Utc};
        use futures::pin_mut;
        use http::{header::AUTHORIZATION, HeaderValue, Request, Response};
        use secrecy::SecretString;
        use tokio_test::assert_ready_ok;
        use tower::filter::AsyncFilterLayer;
        use tower_test::{mock, mock::Handle};

        use crate::client::auth::{Error as AuthError, ExecToken, RefreshableToken};
        use crate::client::Body;
        use crate::config::AuthInfo;

        #[tokio::test(flavor = "current_thread")]
        async fn valid_token() {
            const TOKEN: &str = "test";
            let auth = test_token(TOKEN.into());
            let (mut service, handle): (_, Handle<Request<Body>, Response<Body>>) =
                mock::spawn_layer(AsyncFilterLayer::new(auth));

            let spawned = tokio::spawn(async move {
                // Receive the requests and respond
                pin_mut!(handle);
                let (request, send) = handle.next_request().await.expect("service not called");
                assert_eq!(
                    request.headers().get(AUTHORIZATION).unwrap(),
                    HeaderValue::try_from(format!("Bearer {}", TOKEN)).unwrap()
                );
                send.send_response(Response::builder().body(Body::empty()).unwrap());
            });

            assert_ready_ok!(service.poll_ready());
            service
                .call(Request::builder().uri("/").body(Body::empty()).unwrap())
                .await
                .unwrap();
            spawned.await.unwrap();
        }

        #[tokio::test(flavor = "current_thread")]
        async fn invalid_token() {
            const TOKEN: &str = "\n";
            let auth = test_token(TOKEN.into());
            let (mut service, _handle) =
                mock::spawn_layer::<Request<Body>, Response<Body>, _>(AsyncFilterLayer::new(auth));
            let err = service
                .call(Request::builder().uri("/").body(Body::empty()).unwrap())
                .await
                .unwrap_err();

            assert!(err.is::<AuthError>());
            assert!(matches!(
                *err.downcast::<AuthError>().unwrap(),
                AuthError::InvalidBearerToken(_)
            ));
        }

        fn test_token(token: String) -> RefreshableToken {
            let expiry = Utc::now() + Duration::try_seconds(60 * 60).unwrap();
            let info = AuthInfo {
                token: Some(SecretString::from(token.clone())),
                ..Default::default()
            };
            RefreshableToken::Exec(Arc::new(tokio::sync::Mutex::new(ExecToken::new(
                SecretString::from(token),
                expiry,
                info,
            ))))
        }
    }
}
