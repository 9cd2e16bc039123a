use super::{
    file_config::{AuthInfo, Cluster, Context, Kubeconfig},
    KubeconfigError,
};

/// KubeConfigOptions stores options used when loading kubeconfig file.
///
/// Unset fields fall back to what the selected (or current) context names.
#[derive(Default, Clone)]
pub struct KubeConfigOptions {
    /// The named context to load
    pub context: Option<String>,
    /// The cluster to load
    pub cluster: Option<String>,
    /// The user to load
    pub user: Option<String>,
}

impl KubeConfigOptions {
    /// Select a named context, keeping its cluster and user
    #[must_use]
    pub fn context(mut self, context: &str) -> Self {
        self.context = Some(context.to_string());
        self
    }
}

/// ConfigLoader pins the selected context, cluster, and authentication
/// information out of a parsed kubeconfig file.
#[derive(Clone, Debug)]
pub struct ConfigLoader {
    pub(crate) current_context: Context,
    pub(crate) cluster: Cluster,
    pub(crate) user: AuthInfo,
}

impl ConfigLoader {
    /// Returns a config loader based on the cluster information from the kubeconfig file.
    pub fn new_from_options(options: &KubeConfigOptions) -> Result<Self, KubeconfigError> {
        let config = Kubeconfig::read()?;
        Self::load(
            config,
            options.context.as_ref(),
            options.cluster.as_ref(),
            options.user.as_ref(),
        )
    }

    /// Returns a config loader from a parsed kubeconfig, bypassing file reading.
    pub fn new_from_kubeconfig(
        config: Kubeconfig,
        options: &KubeConfigOptions,
    ) -> Result<Self, KubeconfigError> {
        Self::load(
            config,
            options.context.as_ref(),
            options.cluster.as_ref(),
            options.user.as_ref(),
        )
    }

    pub(crate) fn load(
        config: Kubeconfig,
        context: Option<&String>,
        cluster: Option<&String>,
        user: Option<&String>,
    ) -> Result<Self, KubeconfigError> {
        let context_name = if let Some(name) = context {
            name
        } else if let Some(name) = &config.current_context {
            name
        } else {
            return Err(KubeconfigError::CurrentContextNotSet);
        };

        let current_context = config
            .contexts
            .iter()
            .find(|named_context| &named_context.name == context_name)
            .and_then(|named_context| named_context.context.clone())
            .ok_or_else(|| KubeconfigError::LoadContext(context_name.clone()))?;

        let cluster_name = cluster.unwrap_or(&current_context.cluster);
        let cluster = config
            .clusters
            .iter()
            .find(|named_cluster| &named_cluster.name == cluster_name)
            .and_then(|named_cluster| named_cluster.cluster.clone())
            .ok_or_else(|| KubeconfigError::LoadClusterOfContext(cluster_name.clone()))?;

        let user_name = user.unwrap_or(&current_context.user);
        let user = config
            .auth_infos
            .iter()
            .find(|named_user| &named_user.name == user_name)
            .and_then(|named_user| named_user.auth_info.clone())
            .ok_or_else(|| KubeconfigError::FindUser(user_name.clone()))?;

        Ok(ConfigLoader {
            current_context,
            cluster,
            user,
        })
    }

    pub(crate) fn ca_bundle(&self) -> Result<Option<Vec<u8>>, KubeconfigError> {
        self.cluster.load_certificate_authority()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Kubeconfig {
        Kubeconfig::from_yaml(
            r#"
apiVersion: v1
kind: Config
clusters:
- cluster: { server: "https://a.example.com" }
  name: cluster-a
- cluster: { server: "https://b.example.com" }
  name: cluster-b
contexts:
- context: { cluster: cluster-a, user: user-a }
  name: ctx-a
- context: { cluster: cluster-b, user: user-b, namespace: beta }
  name: ctx-b
current-context: ctx-a
users:
- name: user-a
  user: { token: token-a }
- name: user-b
  user: { token: token-b }
"#,
        )
        .unwrap()
    }

    #[test]
    fn loads_current_context_by_default() {
        let loader = ConfigLoader::load(fixture(), None, None, None).unwrap();
        assert_eq!(loader.cluster.server.as_deref(), Some("https://a.example.com"));
        assert_eq!(loader.current_context.user, "user-a");
    }

    #[test]
    fn explicit_selection_overrides_context() {
        let loader = ConfigLoader::load(fixture(), Some(&"ctx-b".into()), None, None).unwrap();
        assert_eq!(loader.cluster.server.as_deref(), Some("https://b.example.com"));
        assert_eq!(loader.current_context.namespace.as_deref(), Some("beta"));

        // cluster/user overrides beat what the context names
        let loader = ConfigLoader::load(
            fixture(),
            Some(&"ctx-a".into()),
            Some(&"cluster-b".into()),
            Some(&"user-b".into()),
        )
        .unwrap();
        assert_eq!(loader.cluster.server.as_deref(), Some("https://b.example.com"));
    }

    #[test]
    fn unknown_selections_fail() {
        assert!(matches!(
            ConfigLoader::load(fixture(), Some(&"nope".into()), None, None),
            Err(KubeconfigError::LoadContext(_))
        ));
        assert!(matches!(
            ConfigLoader::load(fixture(), None, Some(&"nope".into()), None),
            Err(KubeconfigError::LoadClusterOfContext(_))
        ));
        assert!(matches!(
            ConfigLoader::load(fixture(), None, None, Some(&"nope".into())),
            Err(KubeconfigError::FindUser(_))
        ));
    }

    #[test]
    fn missing_current_context_fails() {
        let mut config = fixture();
        config.current_context = None;
        assert!(matches!(
            ConfigLoader::load(config, None, None, None),
            Err(KubeconfigError::CurrentContextNotSet)
        ));
    }
}
