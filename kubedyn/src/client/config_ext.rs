use secrecy::ExposeSecret;
use tower::util::Either;

use super::{
    auth::Auth,
    middleware::{AddAuthorizationLayer, AuthLayer},
    tls,
};
use crate::{config::Identity, Config, Result};

/// Extensions to [`Config`](crate::Config) for custom [`Client`](crate::Client).
///
/// See [`Client::new`](crate::Client::new) for usage.
///
/// This trait is sealed and cannot be implemented.
pub trait ConfigExt: private::Sealed {
    /// Optional layer to set up `Authorization` header depending on the config.
    fn auth_layer(&self) -> Result<Option<AuthLayer>>;

    /// Create [`rustls::ClientConfig`] based on config.
    fn rustls_client_config(&self) -> Result<rustls::ClientConfig>;

    /// Create a [`hyper_rustls::HttpsConnector`] based on config.
    fn rustls_https_connector_with_connector(
        &self,
        connector: hyper_util::client::legacy::connect::HttpConnector,
    ) -> Result<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;
}

mod private {
    pub trait Sealed {}
    impl Sealed for super::Config {}
}

impl ConfigExt for Config {
    fn auth_layer(&self) -> Result<Option<AuthLayer>> {
        Ok(match Auth::try_from(&self.auth_info)? {
            // Certificate credentials decorate the TLS handshake, not the headers.
            Auth::None | Auth::Certificate(..) => None,
            Auth::Basic(user, pass) => Some(AuthLayer(Either::Left(
                AddAuthorizationLayer::basic(&user, pass.expose_secret()).as_sensitive(true),
            ))),
            Auth::Bearer(token) => Some(AuthLayer(Either::Left(
                AddAuthorizationLayer::bearer(token.expose_secret()).as_sensitive(true),
            ))),
            Auth::RefreshableToken(r) => Some(AuthLayer(Either::Right(
                tower::filter::AsyncFilterLayer::new(r),
            ))),
        })
    }

    fn rustls_client_config(&self) -> Result<rustls::ClientConfig> {
        let identity = self.resolved_identity()?;
        tls::rustls_client_config(
            &identity,
            self.root_cert.as_deref(),
            self.accept_invalid_certs,
        )
        .map_err(crate::Error::Tls)
    }

    fn rustls_https_connector_with_connector(
        &self,
        connector: hyper_util::client::legacy::connect::HttpConnector,
    ) -> Result<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>> {
        let rustls_config = std::sync::Arc::new(self.rustls_client_config()?);
        Ok(hyper_rustls::HttpsConnector::from((connector, rustls_config)))
    }
}

impl Config {
    // An exec plugin can hand out client certificates instead of tokens;
    // splice those into the identity the TLS stack uses.
    fn resolved_identity(&self) -> Result<Identity> {
        if self.auth_info.exec.is_some() {
            if let Auth::Certificate(cert, key) = Auth::try_from(&self.auth_info)? {
                let mut pem = cert.into_bytes();
                pem.push(b'\n');
                pem.extend(key.expose_secret().as_bytes());
                return Ok(Identity::Pem(pem));
            }
        }
        Ok(self.identity.clone())
    }
}
