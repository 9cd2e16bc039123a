use std::env;

use thiserror::Error;

// Environment the kubelet injects into every pod
pub(crate) const SERVICE_HOSTENV: &str = "KUBERNETES_SERVICE_HOST";
pub(crate) const SERVICE_PORTENV: &str = "KUBERNETES_SERVICE_PORT";
// Mounted credential files
const SERVICE_TOKENFILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const SERVICE_CERTFILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";
const SERVICE_DEFAULT_NS: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Errors from loading in-cluster config
#[derive(Error, Debug)]
pub enum Error {
    /// Required environment variables were not set
    #[error(
        "missing environment variables {} and/or {}",
        SERVICE_HOSTENV,
        SERVICE_PORTENV
    )]
    MissingEnvironmentVariables,

    /// Failed to read the default namespace for the service account
    #[error("failed to read the default namespace: {0}")]
    ReadDefaultNamespace(#[source] std::io::Error),

    /// Failed to read the token for the service account
    #[error("failed to read the SA token: {0}")]
    ReadToken(#[source] std::io::Error),

    /// Failed to read a certificate bundle
    #[error("failed to read a certificate bundle: {0}")]
    ReadCertificateBundle(#[source] std::io::Error),

    /// Failed to parse cluster url
    #[error("failed to parse cluster url: {0}")]
    ParseClusterUrl(#[source] http::uri::InvalidUri),
}

/// Returns the Kubernetes apiserver address from the injected environment.
pub(crate) fn kube_server() -> Result<http::Uri, Error> {
    kube_host_port()
        .ok_or(Error::MissingEnvironmentVariables)?
        .parse::<http::Uri>()
        .map_err(Error::ParseClusterUrl)
}

fn kube_host_port() -> Option<String> {
    let host = env::var(SERVICE_HOSTENV).ok()?;
    let port = env::var(SERVICE_PORTENV).ok()?;
    Some(format!("https://{}:{}", host, port))
}

/// Returns the mounted service account token.
pub(crate) fn token_file() -> &'static str {
    SERVICE_TOKENFILE
}

/// Returns the mounted CA bundle in PEM form.
pub(crate) fn load_cert_pem() -> Result<Vec<u8>, Error> {
    std::fs::read(SERVICE_CERTFILE).map_err(Error::ReadCertificateBundle)
}

/// Returns the default namespace of the service account.
pub(crate) fn load_default_ns() -> Result<String, Error> {
    std::fs::read_to_string(SERVICE_DEFAULT_NS).map_err(Error::ReadDefaultNamespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kube_server() {
        // NB: these tests mutate process env and therefore run in one test fn
        env::remove_var(SERVICE_HOSTENV);
        env::remove_var(SERVICE_PORTENV);
        assert!(matches!(kube_server(), Err(Error::MissingEnvironmentVariables)));

        env::set_var(SERVICE_HOSTENV, "fake.io");
        env::set_var(SERVICE_PORTENV, "8080");
        assert_eq!(kube_server().unwrap(), "https://fake.io:8080");
        env::remove_var(SERVICE_HOSTENV);
        env::remove_var(SERVICE_PORTENV);
    }
}
