//! Kubernetes configuration objects from `~/.kube/config`, `$KUBECONFIG`, or the
//! [cluster environment](https://kubernetes.io/docs/tasks/access-application-cluster/access-cluster/#accessing-the-api-from-a-pod).
//!
//! # Usage
//! The [`Config`] has several constructors plus logic to infer environment.
//!
//! Unless you have issues, prefer using [`Config::infer`], and pass it to a
//! [`Client`][crate::Client].
mod file_config;
mod file_loader;
mod incluster_config;
pub(crate) mod utils;

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

pub use file_config::{
    AuthInfo, AuthProviderConfig, Cluster, Context, ExecConfig, ExecInteractiveMode, Kubeconfig,
    NamedAuthInfo, NamedCluster, NamedContext,
};
pub use file_loader::KubeConfigOptions;
use file_loader::ConfigLoader;
pub use incluster_config::Error as InClusterError;

use crate::{Error, Result};

/// Possible errors when loading a kubeconfig
#[derive(Error, Debug)]
pub enum KubeconfigError {
    /// Failed to determine current context
    #[error("failed to determine current context")]
    CurrentContextNotSet,

    /// Kubeconfigs with mismatching kind cannot be merged
    #[error("kubeconfigs with mismatching kind cannot be merged")]
    KindMismatch,
    /// Kubeconfigs with mismatching api version cannot be merged
    #[error("kubeconfigs with mismatching api version cannot be merged")]
    ApiVersionMismatch,

    /// Failed to load the context
    #[error("failed to load context: {0}")]
    LoadContext(String),
    /// Failed to load the cluster of a context
    #[error("failed to load the cluster of context: {0}")]
    LoadClusterOfContext(String),
    /// Failed to find the named user
    #[error("failed to find named user: {0}")]
    FindUser(String),

    /// Failed to find the path of a kubeconfig
    #[error("failed to find the path of kubeconfig")]
    NoKubeconfigPath,

    /// Failed to read the kubeconfig file
    #[error("failed to read kubeconfig from '{path:?}': {source}")]
    ReadConfig {
        /// The path that could not be read
        path: PathBuf,
        /// The underlying io error
        #[source]
        source: std::io::Error,
    },

    /// Failed to read a referenced file
    #[error("failed to read '{path:?}': {source}")]
    ReadFile {
        /// The path that could not be read
        path: PathBuf,
        /// The underlying io error
        #[source]
        source: std::io::Error,
    },

    /// Failed to decode base64 data
    #[error("failed to decode base64: {0}")]
    Base64Decode(#[source] base64::DecodeError),

    /// Neither a data field nor a file reference was present
    #[error("failed to get data/file with base64 format")]
    NoFileOrData,

    /// Failed to parse kubeconfig YAML
    #[error("failed to parse Kubeconfig YAML: {0}")]
    Parse(#[source] serde_yaml::Error),

    /// The kubeconfig file contained no document
    #[error("failed to find a single YAML document in Kubeconfig: {0}")]
    EmptyConfig(PathBuf),

    /// The selected cluster had no server url
    #[error("cluster {0} has no server url")]
    MissingClusterUrl(String),

    /// Failed to parse the cluster url
    #[error("failed to parse cluster url: {0}")]
    ParseClusterUrl(#[source] http::uri::InvalidUri),

    /// Failed to parse PEM-encoded certificates
    #[error("failed to parse PEM-encoded certificates: {0}")]
    ParseCertificates(#[source] pem::PemError),
}

/// Client identity material selected from the user record
#[derive(Debug, Clone, Default)]
pub(crate) enum Identity {
    /// No client certificate authentication
    #[default]
    None,
    /// Inline PEM material, fixed for the connection lifetime
    Pem(Vec<u8>),
    /// File-backed material, re-read periodically so certificate rotation
    /// takes effect on new connections
    Paths {
        cert: PathBuf,
        key: PathBuf,
    },
}

/// Configuration object detailing things like cluster url, default namespace,
/// root certificates, and timeouts.
#[derive(Debug, Clone)]
pub struct Config {
    /// The configured cluster url
    pub cluster_url: http::Uri,
    /// The configured default namespace
    pub default_namespace: String,
    /// The configured root certificates in DER form
    pub root_cert: Option<Vec<Vec<u8>>>,
    /// Timeout for connecting to the Kubernetes API
    ///
    /// A value of `None` means no timeout.
    pub connect_timeout: Option<Duration>,
    /// Timeout for idle reads from the Kubernetes API
    ///
    /// A value of `None` means no timeout and is required for watches.
    pub read_timeout: Option<Duration>,
    /// Timeout for writes to the Kubernetes API
    pub write_timeout: Option<Duration>,
    /// Total deadline for bulk api discovery
    pub discovery_timeout: Duration,
    /// Whether to accept invalid certificates
    pub accept_invalid_certs: bool,
    /// Client certificate and private key material
    pub(crate) identity: Identity,
    /// Stores information to tell the cluster who you are
    pub(crate) auth_info: AuthInfo,
}

// https://github.com/kube-rs/kube/issues/146#issuecomment-590924397
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(295);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default total deadline for bulk discovery
pub(crate) const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

impl Config {
    /// Construct a new config where only the `cluster_url` is set by the user
    /// and everything else receives a default value.
    ///
    /// Most likely you want to use [`Config::infer`] to infer the config from
    /// the environment.
    pub fn new(cluster_url: http::Uri) -> Self {
        Self {
            cluster_url,
            default_namespace: String::from("default"),
            root_cert: None,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
            write_timeout: None,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            accept_invalid_certs: false,
            identity: Identity::None,
            auth_info: AuthInfo::default(),
        }
    }

    /// Infer the configuration from the environment
    ///
    /// Done by attempting to load the in-cluster environment first, and then
    /// if that fails, trying the local kubeconfig. Fails if both fail.
    pub fn infer() -> Result<Self> {
        match Self::from_cluster_env() {
            Err(in_cluster_err) => {
                tracing::trace!("no in-cluster config found: {in_cluster_err}");
                tracing::trace!("falling back to local kubeconfig");
                let config = Self::from_kubeconfig(&KubeConfigOptions::default()).map_err(
                    |kubeconfig_err| Error::InferConfig {
                        in_cluster: Box::new(in_cluster_err),
                        kubeconfig: Box::new(kubeconfig_err),
                    },
                )?;
                Ok(config)
            }
            success => success,
        }
    }

    /// Create configuration from the cluster's environment variables
    ///
    /// This follows the standard [API Access from a Pod](https://kubernetes.io/docs/tasks/access-application-cluster/access-cluster/#accessing-the-api-from-a-pod)
    /// and relies on the service account's token and certificate bundle being mounted.
    pub fn from_cluster_env() -> Result<Self> {
        let cluster_url = incluster_config::kube_server().map_err(Error::InCluster)?;
        let default_namespace = incluster_config::load_default_ns().map_err(Error::InCluster)?;
        let root_cert_pem = incluster_config::load_cert_pem().map_err(Error::InCluster)?;
        let root_cert = utils::certs(&root_cert_pem)
            .map_err(KubeconfigError::ParseCertificates)
            .map_err(Error::Kubeconfig)?;

        Ok(Self {
            cluster_url,
            default_namespace,
            root_cert: Some(root_cert),
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
            write_timeout: None,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            accept_invalid_certs: false,
            identity: Identity::None,
            auth_info: AuthInfo {
                token_file: Some(incluster_config::token_file().to_string()),
                ..Default::default()
            },
        })
    }

    /// Create configuration from the default local kubeconfig file
    ///
    /// This will respect the `$KUBECONFIG` evar, but otherwise default to
    /// `~/.kube/config`. You can also customize what context/cluster/user you
    /// want to use here, but it will default to the current context.
    pub fn from_kubeconfig(options: &KubeConfigOptions) -> Result<Self> {
        let loader = ConfigLoader::new_from_options(options)?;
        Self::new_from_loader(loader)
    }

    /// Create configuration from a [`Kubeconfig`] struct
    ///
    /// This bypasses the normal config parsing to obtain custom functionality.
    pub fn from_custom_kubeconfig(kubeconfig: Kubeconfig, options: &KubeConfigOptions) -> Result<Self> {
        let loader = ConfigLoader::new_from_kubeconfig(kubeconfig, options)?;
        Self::new_from_loader(loader)
    }

    /// Create configuration for a named cluster from the process environment
    ///
    /// Recognizes, with `<NAME>` being the uppercased cluster name:
    ///
    /// - `K8S_CLUSTER_CONF_SA_<NAME>=true` — use the in-cluster service account
    /// - `K8S_CLUSTER_CONF_PATH_<NAME>` — path to a kubeconfig file
    /// - `K8S_CLUSTER_CONF_CONTEXT_<NAME>` — context to select within it
    /// - `K8S_DISCOVERY_TIMEOUT_<NAME>` — bulk discovery deadline in milliseconds
    pub fn from_named_env(name: &str) -> Result<Self> {
        let suffix = name.to_ascii_uppercase();
        let var = |prefix: &str| std::env::var(format!("{prefix}{suffix}")).ok();

        let mut config = if var("K8S_CLUSTER_CONF_SA_").is_some_and(|v| v == "true") {
            Self::from_cluster_env()?
        } else if let Some(path) = var("K8S_CLUSTER_CONF_PATH_") {
            let kubeconfig = Kubeconfig::read_from(path).map_err(Error::Kubeconfig)?;
            let options = KubeConfigOptions {
                context: var("K8S_CLUSTER_CONF_CONTEXT_"),
                ..Default::default()
            };
            Self::from_custom_kubeconfig(kubeconfig, &options)?
        } else {
            Self::infer()?
        };

        if let Some(ms) = var("K8S_DISCOVERY_TIMEOUT_").and_then(|v| v.parse::<u64>().ok()) {
            config.discovery_timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }

    fn new_from_loader(loader: ConfigLoader) -> Result<Self> {
        let cluster_url = loader
            .cluster
            .server
            .clone()
            .ok_or_else(|| {
                Error::Kubeconfig(KubeconfigError::MissingClusterUrl(
                    loader.current_context.cluster.clone(),
                ))
            })?
            .parse::<http::Uri>()
            .map_err(KubeconfigError::ParseClusterUrl)
            .map_err(Error::Kubeconfig)?;

        let default_namespace = loader
            .current_context
            .namespace
            .clone()
            .unwrap_or_else(|| String::from("default"));

        let accept_invalid_certs = loader.cluster.insecure_skip_tls_verify.unwrap_or(false);
        let mut root_cert = None;
        if let Some(ca_bundle) = loader.ca_bundle()? {
            if accept_invalid_certs {
                tracing::debug!("insecure-skip-tls-verify set; the CA bundle will not be verified");
            }
            root_cert = Some(
                utils::certs(&ca_bundle)
                    .map_err(KubeconfigError::ParseCertificates)
                    .map_err(Error::Kubeconfig)?,
            );
        }

        let identity = identity_from_auth(&loader.user)?;

        Ok(Self {
            cluster_url,
            default_namespace,
            root_cert,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
            write_timeout: None,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            accept_invalid_certs,
            identity,
            auth_info: loader.user,
        })
    }
}

// Inline data beats file paths; a pure path pair selects the rotating
// file-backed identity.
fn identity_from_auth(auth: &AuthInfo) -> Result<Identity> {
    use secrecy::ExposeSecret;
    let has_cert = auth.client_certificate_data.is_some() || auth.client_certificate.is_some();
    let has_key = auth.client_key_data.is_some() || auth.client_key.is_some();
    if !has_cert || !has_key {
        return Ok(Identity::None);
    }
    if auth.client_certificate_data.is_none() && auth.client_key_data.is_none() {
        if let (Some(cert), Some(key)) = (&auth.client_certificate, &auth.client_key) {
            return Ok(Identity::Paths {
                cert: cert.into(),
                key: key.into(),
            });
        }
    }
    let mut pem = utils::data_or_file(&auth.client_certificate_data, &auth.client_certificate)
        .map_err(Error::Kubeconfig)?;
    pem.push(b'\n');
    let key_data = auth.client_key_data.as_ref().map(|s| s.expose_secret().to_string());
    let key = utils::data_or_file(&key_data, &auth.client_key).map_err(Error::Kubeconfig)?;
    pem.extend(key);
    Ok(Identity::Pem(pem))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_loading_from_custom_kubeconfig() {
        let cfgraw = r#"
        apiVersion: v1
        clusters:
        - cluster:
            certificate-authority-data: aGVsbG8K
            server: https://0.0.0.0:6443
          name: k3d-test
        contexts:
        - context:
            cluster: k3d-test
            user: admin@k3d-test
          name: k3d-test
        current-context: k3d-test
        kind: Config
        preferences: {}
        users:
        - name: admin@k3d-test
          user:
            token: shhh
        "#;
        let kubeconfig = Kubeconfig::from_yaml(cfgraw).unwrap();
        let config =
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).unwrap();
        assert_eq!(config.cluster_url, "https://0.0.0.0:6443/");
        assert_eq!(config.default_namespace, "default");
        // "hello\n" is not a certificate, so the parsed DER list is empty
        assert_eq!(config.root_cert.as_ref().unwrap().len(), 0);
    }

    #[test]
    fn named_env_discovery_timeout() {
        std::env::set_var("K8S_DISCOVERY_TIMEOUT_TESTENV", "2500");
        std::env::set_var("K8S_CLUSTER_CONF_PATH_TESTENV", "/does/not/exist");
        let err = Config::from_named_env("testenv").unwrap_err();
        // the path is bogus, but it must have been attempted
        assert!(matches!(
            err,
            Error::Kubeconfig(KubeconfigError::ReadConfig { .. })
        ));
        std::env::remove_var("K8S_DISCOVERY_TIMEOUT_TESTENV");
        std::env::remove_var("K8S_CLUSTER_CONF_PATH_TESTENV");
    }

    #[test]
    fn identity_prefers_inline_data() {
        use secrecy::SecretString;
        let auth = AuthInfo {
            client_certificate_data: Some(base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                "CERT",
            )),
            client_key_data: Some(SecretString::from(base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                "KEY",
            ))),
            client_certificate: Some("/cert/path".into()),
            client_key: Some("/key/path".into()),
            ..Default::default()
        };
        match identity_from_auth(&auth).unwrap() {
            Identity::Pem(pem) => {
                let text = String::from_utf8(pem).unwrap();
                assert!(text.contains("CERT"));
                assert!(text.contains("KEY"));
            }
            other => panic!("unexpected identity {other:?}"),
        }
    }

    #[test]
    fn identity_falls_back_to_paths() {
        let auth = AuthInfo {
            client_certificate: Some("/cert/path".into()),
            client_key: Some("/key/path".into()),
            ..Default::default()
        };
        assert!(matches!(
            identity_from_auth(&auth).unwrap(),
            Identity::Paths { .. }
        ));
    }
}
