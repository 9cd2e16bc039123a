//! Runtime API discovery.
//!
//! At call time an abstract operation is mapped to a concrete REST resource
//! by querying the cluster's `/api` and `/apis` endpoints. Responses are
//! cached per group version with a time-to-live on the [`Client`] that made
//! them, so repeated operations against the same group version do not hit the
//! apiserver again.
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use http::Request;
use kubedyn_core::{resource, ResourceDefinition, ResourceRef};
use serde::Deserialize;

use crate::{error::DiscoveryError, Client, Error, Result};

/// Default lifetime of cached discovery data
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

/// How the client discovers the cluster's api surface
#[derive(Debug, Clone, Default)]
pub enum DiscoveryDriver {
    /// Query the live cluster's `/api` and `/apis` endpoints
    #[default]
    Http,
    /// Read one JSON document with the same data, for deterministic tests
    ///
    /// The document shape is
    /// `{"versions": ["v1", ...], "resources": {"v1": [<APIResource>, ...]}}`.
    File(PathBuf),
}

// Per-client discovery settings plus the groupVersion -> resources cache.
// Concurrent callers may race to populate an entry; both produce the same
// value so last-write-wins is safe.
pub(crate) struct DiscoveryState {
    driver: DiscoveryDriver,
    timeout: Duration,
    ttl: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

struct CacheEntry {
    expires_at: Instant,
    resources: Arc<Vec<ResourceDefinition>>,
}

impl Default for DiscoveryState {
    fn default() -> Self {
        Self {
            driver: DiscoveryDriver::Http,
            timeout: crate::config::DEFAULT_DISCOVERY_TIMEOUT,
            ttl: DEFAULT_CACHE_TTL,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

impl DiscoveryState {
    pub(crate) fn with_driver(&self, driver: DiscoveryDriver) -> Self {
        Self {
            driver,
            timeout: self.timeout,
            ttl: self.ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            driver: self.driver.clone(),
            timeout,
            ttl: self.ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn with_ttl(&self, ttl: Duration) -> Self {
        Self {
            driver: self.driver.clone(),
            timeout: self.timeout,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, group_version: &str) -> Option<Arc<Vec<ResourceDefinition>>> {
        let cache = match self.cache.lock() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache
            .get(group_version)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.resources.clone())
    }

    fn store(&self, group_version: &str, resources: Arc<Vec<ResourceDefinition>>) {
        let mut cache = match self.cache.lock() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.insert(group_version.to_string(), CacheEntry {
            expires_at: Instant::now() + self.ttl,
            resources,
        });
    }
}

// Wire shapes of the discovery endpoints; only the fields we read.

#[derive(Deserialize)]
struct ApiVersions {
    #[serde(default)]
    versions: Vec<String>,
}

#[derive(Deserialize)]
struct ApiGroupList {
    #[serde(default)]
    groups: Vec<ApiGroup>,
}

#[derive(Deserialize)]
struct ApiGroup {
    #[serde(default)]
    versions: Vec<ApiGroupVersion>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiGroupVersion {
    group_version: String,
}

#[derive(Deserialize)]
struct ApiResourceList {
    #[serde(default)]
    resources: Vec<ResourceDefinition>,
}

#[derive(Deserialize)]
struct FileDocument {
    #[serde(default)]
    versions: Vec<String>,
    #[serde(default)]
    resources: HashMap<String, Vec<ResourceDefinition>>,
}

fn read_file_document(path: &std::path::Path) -> Result<FileDocument> {
    let data = std::fs::read(path).map_err(|e| {
        let shown = path.display().to_string();
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::Discovery(DiscoveryError::NotFound(shown))
        } else {
            Error::Discovery(DiscoveryError::DocumentUnreadable(shown, e))
        }
    })?;
    serde_json::from_slice(&data)
        .map_err(|e| Error::Discovery(DiscoveryError::InvalidDocument(e)))
}

/// Discovery methods on [`Client`]
impl Client {
    /// List every apiVersion served by the cluster
    ///
    /// The legacy core group contributes its `/api` versions (as `"v1"`), all
    /// other groups come from `/apis` as `group/version` pairs.
    pub async fn api_versions(&self) -> Result<Vec<String>> {
        match &self.discovery.driver {
            DiscoveryDriver::Http => {
                let core: ApiVersions = self
                    .request(Request::get("/api").body(vec![]).map_err(Error::HttpError)?)
                    .await?;
                let groups: ApiGroupList = self
                    .request(Request::get("/apis").body(vec![]).map_err(Error::HttpError)?)
                    .await?;
                let mut versions = core.versions;
                versions.extend(
                    groups
                        .groups
                        .into_iter()
                        .flat_map(|g| g.versions.into_iter().map(|v| v.group_version)),
                );
                Ok(versions)
            }
            DiscoveryDriver::File(path) => {
                let doc = read_file_document(path)?;
                if doc.versions.is_empty() {
                    let mut versions: Vec<_> = doc.resources.into_keys().collect();
                    versions.sort();
                    Ok(versions)
                } else {
                    Ok(doc.versions)
                }
            }
        }
    }

    /// Fetch the resources served under one apiVersion, through the cache
    pub async fn resources(&self, api_version: &str) -> Result<Arc<Vec<ResourceDefinition>>> {
        if let Some(hit) = self.discovery.cached(api_version) {
            return Ok(hit);
        }
        let mut list = match &self.discovery.driver {
            DiscoveryDriver::Http => {
                // group/version pairs live under /apis, the core group under /api
                let url = if api_version.contains('/') {
                    format!("/apis/{api_version}")
                } else {
                    format!("/api/{api_version}")
                };
                let list: ApiResourceList = self
                    .request(Request::get(url.as_str()).body(vec![]).map_err(Error::HttpError)?)
                    .await?;
                list.resources
            }
            DiscoveryDriver::File(path) => {
                let doc = read_file_document(path)?;
                doc.resources.get(api_version).cloned().ok_or_else(|| {
                    Error::Discovery(DiscoveryError::NotFound(format!(
                        "{api_version} in {}",
                        path.display()
                    )))
                })?
            }
        };
        for resource in &mut list {
            resource.group_version = api_version.to_string();
        }
        let resources = Arc::new(list);
        self.discovery.store(api_version, resources.clone());
        Ok(resources)
    }

    /// Discover the full api surface concurrently
    ///
    /// Fans out one fetch per apiVersion; the whole run is bounded by a single
    /// total deadline (`Config::discovery_timeout`, default 10s).
    pub async fn discover_all(&self) -> Result<HashMap<String, Arc<Vec<ResourceDefinition>>>> {
        let deadline = self.discovery.timeout;
        let run = async {
            let versions = self.api_versions().await?;
            let fetched = futures::future::join_all(versions.iter().map(|gv| self.resources(gv))).await;
            let mut discovered = HashMap::new();
            for (gv, resources) in versions.iter().zip(fetched) {
                discovered.insert(gv.clone(), resources?);
            }
            Ok(discovered)
        };
        tokio::time::timeout(deadline, run)
            .await
            .map_err(|_| Error::Discovery(DiscoveryError::DeadlineExceeded(deadline)))?
    }

    /// The highest-priority served version of an api group
    ///
    /// Versions are ranked by Kubernetes version priority (stable releases
    /// before betas before alphas); pass `""` for the legacy core group.
    pub async fn preferred_api_version(&self, group: &str) -> Result<Option<String>> {
        use kubedyn_core::{GroupVersion, Version};
        use std::cmp::Reverse;

        let mut candidates = Vec::new();
        for gv in self.api_versions().await? {
            let parsed: GroupVersion = gv.parse()?;
            if parsed.group == group {
                candidates.push(parsed.version);
            }
        }
        candidates.sort_by_cached_key(|v| Reverse(Version::parse(v)));
        Ok(candidates
            .into_iter()
            .next()
            .map(|version| GroupVersion::gv(group, &version).api_version()))
    }

    /// Resolve a resource reference within an apiVersion to its REST record
    pub(crate) async fn find_resource(
        &self,
        api_version: &str,
        wanted: &ResourceRef,
    ) -> Result<ResourceDefinition> {
        let resources = self.resources(api_version).await?;
        resource::resolve(&resources, wanted).cloned().ok_or_else(|| {
            Error::Discovery(DiscoveryError::UnsupportedResource {
                api_version: api_version.to_string(),
                name: wanted.to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Body;
    use http::Response;
    use tower_test::mock;

    fn file_client(doc: &serde_json::Value) -> (Client, tempfile::NamedTempFile) {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), serde_json::to_vec(doc).unwrap()).unwrap();
        let (mock_service, _handle) = mock::pair::<http::Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default")
            .with_discovery_driver(DiscoveryDriver::File(file.path().to_path_buf()));
        (client, file)
    }

    fn doc() -> serde_json::Value {
        serde_json::json!({
            "versions": ["v1", "apps/v1"],
            "resources": {
                "v1": [
                    { "name": "pods", "kind": "Pod", "namespaced": true,
                      "verbs": ["get", "list", "watch", "create", "delete"] }
                ],
                "apps/v1": [
                    { "name": "deployments", "kind": "Deployment", "namespaced": true,
                      "verbs": ["get", "list", "watch", "create", "update", "patch", "delete"] },
                    { "name": "deployments/status", "kind": "Deployment", "namespaced": true,
                      "verbs": ["get", "patch", "update"] }
                ]
            }
        })
    }

    #[tokio::test]
    async fn file_driver_serves_versions_and_resources() {
        let (client, _file) = file_client(&doc());
        let versions = client.api_versions().await.unwrap();
        assert_eq!(versions, vec!["v1", "apps/v1"]);

        let resources = client.resources("apps/v1").await.unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].group_version, "apps/v1");

        let discovered = client.discover_all().await.unwrap();
        assert_eq!(discovered.len(), 2);
    }

    #[tokio::test]
    async fn resources_are_cached_per_group_version() {
        let (client, file) = file_client(&doc());
        let first = client.resources("v1").await.unwrap();
        assert_eq!(first[0].kind, "Pod");

        // mutate the backing document; the cache keeps serving the old data
        std::fs::write(
            file.path(),
            serde_json::to_vec(&serde_json::json!({"resources": {"v1": []}})).unwrap(),
        )
        .unwrap();
        let second = client.resources("v1").await.unwrap();
        assert_eq!(second.len(), 1);

        // a zero ttl client re-reads
        let fresh = Client::new(
            mock::pair::<http::Request<Body>, Response<Body>>().0,
            "default",
        )
        .with_discovery_driver(DiscoveryDriver::File(file.path().to_path_buf()))
        .with_discovery_ttl(Duration::ZERO);
        let third = fresh.resources("v1").await.unwrap();
        assert_eq!(third.len(), 0);
    }

    #[tokio::test]
    async fn preferred_version_follows_priority_order() {
        let doc = serde_json::json!({
            "versions": ["v1", "autoscaling/v2beta2", "autoscaling/v1", "autoscaling/v2"],
            "resources": {}
        });
        let (client, _file) = file_client(&doc);
        assert_eq!(
            client.preferred_api_version("autoscaling").await.unwrap(),
            Some("autoscaling/v2".to_string())
        );
        assert_eq!(
            client.preferred_api_version("").await.unwrap(),
            Some("v1".to_string())
        );
        assert_eq!(client.preferred_api_version("batch").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_resources_error_with_the_input() {
        let (client, _file) = file_client(&doc());
        let err = client
            .find_resource("v1", &ResourceRef::Named("CronTab".into()))
            .await
            .unwrap_err();
        match err {
            Error::Discovery(DiscoveryError::UnsupportedResource { api_version, name }) => {
                assert_eq!(api_version, "v1");
                assert_eq!(name, "CronTab");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn missing_document_is_not_found() {
        let (mock_service, _handle) = mock::pair::<http::Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default")
            .with_discovery_driver(DiscoveryDriver::File("/definitely/not/here.json".into()));
        let err = client.api_versions().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Discovery(DiscoveryError::NotFound(_))
        ));
    }
}
