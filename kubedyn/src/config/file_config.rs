use std::{collections::HashMap, fs, path::Path};

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{utils, KubeconfigError};

/// [`Kubeconfig`] represents information on how to connect to a remote Kubernetes cluster
///
/// Stored in `~/.kube/config` by default, but can be distributed across multiple paths
/// through `KUBECONFIG`. An analogue of the config type from client-go.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Kubeconfig {
    /// Referencable names to cluster configs
    #[serde(default, deserialize_with = "deserialize_null_as_default")]
    pub clusters: Vec<NamedCluster>,
    /// Referencable names to user configs
    #[serde(rename = "users")]
    #[serde(default, deserialize_with = "deserialize_null_as_default")]
    pub auth_infos: Vec<NamedAuthInfo>,
    /// Referencable names to context configs
    #[serde(default, deserialize_with = "deserialize_null_as_default")]
    pub contexts: Vec<NamedContext>,
    /// The name of the context that you would like to use by default
    #[serde(rename = "current-context")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_context: Option<String>,

    /// Legacy field from TypeMeta
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Legacy field from TypeMeta
    #[serde(rename = "apiVersion")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

/// NamedCluster associates name with cluster.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct NamedCluster {
    /// Name of cluster
    pub name: String,
    /// Information about how to communicate with a kubernetes cluster
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<Cluster>,
}

/// Cluster stores information to connect to a Kubernetes cluster.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Cluster {
    /// The address of the kubernetes cluster (https://hostname:port).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Skips the validity check for the server's certificate. This makes HTTPS connections insecure.
    #[serde(rename = "insecure-skip-tls-verify")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insecure_skip_tls_verify: Option<bool>,
    /// The path to a cert file for the certificate authority.
    #[serde(rename = "certificate-authority")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_authority: Option<String>,
    /// PEM-encoded certificate authority certificates. Overrides `certificate_authority`
    #[serde(rename = "certificate-authority-data")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,
}

impl Cluster {
    /// Load the CA bundle from the data field or the referenced file, if either is set
    pub(crate) fn load_certificate_authority(&self) -> Result<Option<Vec<u8>>, KubeconfigError> {
        if self.certificate_authority_data.is_none() && self.certificate_authority.is_none() {
            return Ok(None);
        }
        utils::data_or_file(&self.certificate_authority_data, &self.certificate_authority).map(Some)
    }
}

/// NamedAuthInfo associates name with authentication.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct NamedAuthInfo {
    /// Name of the user
    pub name: String,
    /// Information that describes identity of the user
    #[serde(rename = "user")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_info: Option<AuthInfo>,
}

fn serialize_secretstring<S>(pw: &Option<SecretString>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match pw {
        Some(_) => serializer.serialize_str("REDACTED"),
        None => serializer.serialize_none(),
    }
}

fn deserialize_secretstring<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer) {
        Ok(Some(secret)) => Ok(Some(SecretString::from(secret))),
        Ok(None) => Ok(None),
        Err(e) => Err(e),
    }
}

/// AuthInfo stores information to tell a cluster who you are.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct AuthInfo {
    /// The username for basic authentication to the kubernetes cluster.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// The password for basic authentication to the kubernetes cluster.
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_secretstring",
        deserialize_with = "deserialize_secretstring",
        default
    )]
    pub password: Option<SecretString>,

    /// The bearer token for authentication to the kubernetes cluster.
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_secretstring",
        deserialize_with = "deserialize_secretstring",
        default
    )]
    pub token: Option<SecretString>,
    /// Pointer to a file that contains a bearer token. If both `token` and `token_file` are present, `token` takes precedence.
    #[serde(rename = "tokenFile")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_file: Option<String>,

    /// Path to a client cert file for TLS.
    #[serde(rename = "client-certificate")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<String>,
    /// PEM-encoded data from a client cert file for TLS. Overrides `client_certificate`
    #[serde(rename = "client-certificate-data")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_certificate_data: Option<String>,

    /// Path to a client key file for TLS.
    #[serde(rename = "client-key")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,
    /// PEM-encoded data from a client key file for TLS. Overrides `client_key`
    #[serde(
        rename = "client-key-data",
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_secretstring",
        deserialize_with = "deserialize_secretstring",
        default
    )]
    pub client_key_data: Option<SecretString>,

    /// Specifies a custom authentication plugin for the kubernetes cluster.
    #[serde(rename = "auth-provider")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_provider: Option<AuthProviderConfig>,

    /// Specifies an exec-based authentication plugin for the kubernetes cluster.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecConfig>,
}

/// AuthProviderConfig stores auth for specified cloud provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthProviderConfig {
    /// Name of the auth provider
    pub name: String,
    /// Auth provider configuration
    #[serde(default)]
    pub config: HashMap<String, String>,
}

/// ExecConfig stores credential-plugin configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Preferred input version of the ExecInfo.
    ///
    /// The returned ExecCredentials MUST use the same encoding version as the input.
    #[serde(rename = "apiVersion")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    /// Command to execute.
    pub command: Option<String>,
    /// Arguments to pass to the command when executing it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Env defines additional environment variables to expose to the process.
    ///
    /// These are unioned with the host's environment, as well as variables client-go uses to pass
    /// argument to the plugin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<HashMap<String, String>>>,
    /// Specifies which environment variables the host should avoid passing to the auth plugin.
    ///
    /// This does currently not exist upstream and cannot be specified on disk.
    /// It has been suggested in client-go via <https://github.com/kubernetes/client-go/issues/1177>
    #[serde(skip)]
    pub drop_env: Option<Vec<String>>,

    /// Interactiveness of the child process.
    #[serde(rename = "interactiveMode")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interactive_mode: Option<ExecInteractiveMode>,
}

/// ExecInteractiveMode define the interactiveness of the child process
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub enum ExecInteractiveMode {
    /// Never get interactive
    Never,
    /// If available et interactive
    IfAvailable,
    /// Alwayes get interactive
    Always,
}

/// NamedContext associates name with context.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NamedContext {
    /// Name of the context
    pub name: String,
    /// Associations for the context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
}

/// Context stores tuple of cluster and user information.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Context {
    /// Name of the cluster for this context
    pub cluster: String,
    /// Name of the `AuthInfo` for this context
    #[serde(default)]
    pub user: String,
    /// The default namespace to use on unspecified requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

const KUBECONFIG: &str = "KUBECONFIG";

impl Kubeconfig {
    /// Read a [`Kubeconfig`] from an arbitrary location
    ///
    /// Relative file references inside the config (CA, client cert/key,
    /// token file) are anchored to the config's own directory, which is how
    /// kubectl resolves them.
    pub fn read_from<P: AsRef<Path>>(path: P) -> Result<Kubeconfig, KubeconfigError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| KubeconfigError::ReadConfig {
            path: path.into(),
            source,
        })?;
        let mut config = Self::fold_documents(&data)?
            .ok_or_else(|| KubeconfigError::EmptyConfig(path.into()))?;
        if let Some(dir) = path.parent() {
            config.anchor_relative_paths(dir);
        }
        Ok(config)
    }

    /// Read a [`Kubeconfig`] from the default location (`$KUBECONFIG` or `~/.kube/config`)
    pub fn read() -> Result<Kubeconfig, KubeconfigError> {
        match Self::from_env()? {
            Some(config) => Ok(config),
            None => {
                let path = utils::default_kube_path().ok_or(KubeconfigError::NoKubeconfigPath)?;
                Self::read_from(path)
            }
        }
    }

    /// Create a [`Kubeconfig`] from `$KUBECONFIG`, merging every listed path in order
    pub fn from_env() -> Result<Option<Self>, KubeconfigError> {
        match std::env::var_os(KUBECONFIG) {
            Some(value) => {
                let paths = std::env::split_paths(&value)
                    .filter(|p| !p.as_os_str().is_empty())
                    .collect::<Vec<_>>();
                if paths.is_empty() {
                    return Ok(None);
                }

                let merged = paths.iter().try_fold(Kubeconfig::default(), |m, p| {
                    Kubeconfig::read_from(p).and_then(|c| m.merge(c))
                })?;
                Ok(Some(merged))
            }
            None => Ok(None),
        }
    }

    /// Parse a [`Kubeconfig`] from a YAML string
    ///
    /// A multi-document string is folded with [`Kubeconfig::merge`]; an input
    /// with no documents parses as the empty config.
    pub fn from_yaml(text: &str) -> Result<Kubeconfig, KubeconfigError> {
        Ok(Self::fold_documents(text)?.unwrap_or_default())
    }

    // Deserialize every YAML document in the text and merge as we go;
    // `None` when the text contained no document at all.
    fn fold_documents(text: &str) -> Result<Option<Kubeconfig>, KubeconfigError> {
        let mut merged: Option<Kubeconfig> = None;
        for document in serde_yaml::Deserializer::from_str(text) {
            let next = Kubeconfig::deserialize(document).map_err(KubeconfigError::Parse)?;
            merged = Some(match merged.take() {
                Some(base) => base.merge(next)?,
                None => next,
            });
        }
        Ok(merged)
    }

    /// Merge another kubeconfig into this one
    ///
    /// Uses kubectl's first-wins rules: a scalar already set and a named
    /// entry already present keep their values, unseen named entries are
    /// appended in order. Merging configs of different kinds or api versions
    /// is refused.
    pub fn merge(mut self, next: Kubeconfig) -> Result<Self, KubeconfigError> {
        match (&self.kind, &next.kind) {
            (Some(ours), Some(theirs)) if ours != theirs => {
                return Err(KubeconfigError::KindMismatch)
            }
            _ => {}
        }
        match (&self.api_version, &next.api_version) {
            (Some(ours), Some(theirs)) if ours != theirs => {
                return Err(KubeconfigError::ApiVersionMismatch)
            }
            _ => {}
        }

        self.kind = self.kind.or(next.kind);
        self.api_version = self.api_version.or(next.api_version);
        self.current_context = self.current_context.or(next.current_context);
        merge_named(&mut self.clusters, next.clusters, |c| c.name.as_str());
        merge_named(&mut self.auth_infos, next.auth_infos, |a| a.name.as_str());
        merge_named(&mut self.contexts, next.contexts, |c| c.name.as_str());
        Ok(self)
    }

    // Resolve relative file references against the directory the config was
    // read from.
    fn anchor_relative_paths(&mut self, dir: &Path) {
        fn anchor(dir: &Path, slot: &mut Option<String>) {
            let Some(value) = slot else { return };
            let referenced = Path::new(value.as_str());
            if referenced.is_absolute() {
                return;
            }
            let joined = dir.join(referenced);
            if let Some(joined) = joined.to_str() {
                *slot = Some(joined.to_owned());
            }
        }

        for cluster in self.clusters.iter_mut().filter_map(|c| c.cluster.as_mut()) {
            anchor(dir, &mut cluster.certificate_authority);
        }
        for user in self.auth_infos.iter_mut().filter_map(|u| u.auth_info.as_mut()) {
            anchor(dir, &mut user.client_certificate);
            anchor(dir, &mut user.client_key);
            anchor(dir, &mut user.token_file);
        }
    }
}

// First occurrence of a name wins across merged files. Linear scan: these
// lists hold a handful of entries at most.
fn merge_named<T, N>(existing: &mut Vec<T>, incoming: Vec<T>, name: N)
where
    N: Fn(&T) -> &str,
{
    for entry in incoming {
        if !existing.iter().any(|have| name(have) == name(&entry)) {
            existing.push(entry);
        }
    }
}


fn deserialize_null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    T: Default + Deserialize<'de>,
    D: Deserializer<'de>,
{
    let opt = Option::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}
