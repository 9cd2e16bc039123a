//! Operation values describing single REST calls against a cluster.
use std::fmt;

use http::Method;
use serde_json::Value;

use crate::{
    error::Error,
    params::{
        ConnectParams, DeleteParams, ListParams, Patch, PatchParams, PostParams, WatchParams,
    },
    selector::Selector,
};

/// The verb of an [`Operation`]
///
/// Verbs map onto HTTP methods with a fixed table; the `*AllNamespaces`
/// variants change the path shape of their base verb, not the method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Fetch a single named object
    Get,
    /// List a collection within one namespace (or cluster-wide for unnamespaced resources)
    List,
    /// List a namespaced collection across every namespace
    ListAllNamespaces,
    /// Open a watch on a collection or object
    Watch,
    /// Open a watch on a namespaced collection across every namespace
    WatchAllNamespaces,
    /// Create an object
    Create,
    /// Replace an object
    Update,
    /// Patch an object
    Patch,
    /// Delete a single object
    Delete,
    /// Delete a collection
    DeleteCollection,
    /// Upgrade into a bidirectional connection (exec, attach) or stream a subresource (log)
    Connect,
}

impl Verb {
    /// The HTTP method this verb renders to
    pub fn method(&self) -> Method {
        match self {
            Verb::Get
            | Verb::List
            | Verb::ListAllNamespaces
            | Verb::Watch
            | Verb::WatchAllNamespaces => Method::GET,
            Verb::Create | Verb::Connect => Method::POST,
            Verb::Update => Method::PUT,
            Verb::Patch => Method::PATCH,
            Verb::Delete | Verb::DeleteCollection => Method::DELETE,
        }
    }

    /// The discovery verb string a resource must advertise to serve this verb
    ///
    /// `connect` renders as POST and therefore requires `create`, which is
    /// how the api server advertises `pods/exec` and friends.
    pub fn required_capability(&self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::List | Verb::ListAllNamespaces => "list",
            Verb::Watch | Verb::WatchAllNamespaces => "watch",
            Verb::Create | Verb::Connect => "create",
            Verb::Update => "update",
            Verb::Patch => "patch",
            Verb::Delete => "delete",
            Verb::DeleteCollection => "deletecollection",
        }
    }

    /// The canonical lowercase name of the verb
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::List => "list",
            Verb::ListAllNamespaces => "list_all_namespaces",
            Verb::Watch => "watch",
            Verb::WatchAllNamespaces => "watch_all_namespaces",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Patch => "patch",
            Verb::Delete => "delete",
            Verb::DeleteCollection => "deletecollection",
            Verb::Connect => "connect",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an operation refers to the resource it targets
///
/// A plain string is resolved against discovery data by REST name or kind
/// (see [`resource::resolve`](crate::resource::resolve)); the pair form
/// addresses a subresource by its parent kind and its own kind, e.g.
/// `("Deployment", "Scale")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceRef {
    /// A REST name (`deployments`, `deployments/status`) or a kind (`Deployment`)
    Named(String),
    /// A subresource addressed by parent kind and subresource kind
    WithSubresource {
        /// The parent kind, e.g. `Deployment`
        kind: String,
        /// The subresource kind, e.g. `Scale`
        subkind: String,
    },
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceRef::Named(n) => f.write_str(n),
            ResourceRef::WithSubresource { kind, subkind } => write!(f, "{kind}/{subkind}"),
        }
    }
}

impl From<&str> for ResourceRef {
    fn from(s: &str) -> Self {
        ResourceRef::Named(s.to_string())
    }
}

impl From<String> for ResourceRef {
    fn from(s: String) -> Self {
        ResourceRef::Named(s)
    }
}

impl From<(&str, &str)> for ResourceRef {
    fn from((kind, subkind): (&str, &str)) -> Self {
        ResourceRef::WithSubresource {
            kind: kind.to_string(),
            subkind: subkind.to_string(),
        }
    }
}

/// A single REST call against the cluster, as a value
///
/// Operations are plain immutable data: the builder methods consume and
/// return a new value, and nothing here performs I/O. A client resolves the
/// operation against discovery, renders it into a request and executes it.
#[derive(Debug, Clone)]
pub struct Operation {
    /// The verb to perform
    pub verb: Verb,
    /// The apiVersion the resource lives under (`v1`, `apps/v1`, ..)
    pub api_version: String,
    /// The resource the operation targets
    pub resource: ResourceRef,
    /// Namespace path parameter
    pub namespace: Option<String>,
    /// Object name path parameter
    pub name: Option<String>,
    /// Label selector applied to collection verbs
    pub labels: Option<Selector>,
    /// Field selector applied to collection verbs
    pub fields: Option<Selector>,
    /// Extra query parameters appended verbatim, in order
    pub query: Vec<(String, String)>,
    /// Extra headers set on the rendered request, in order
    pub headers: Vec<(String, String)>,
    /// Request body for create/update
    pub data: Option<Value>,
    /// Patch body for the patch verb, also selecting the content type
    pub patch: Option<Patch<Value>>,
    /// Query options for create/update
    pub post_params: PostParams,
    /// Query options for patch, `fieldManager`/`force` defaults apply to server-side apply
    pub patch_params: PatchParams,
    /// Body options for delete/deletecollection
    pub delete_params: DeleteParams,
    /// Query options for list/deletecollection pagination
    pub list_params: ListParams,
    /// Query options for watch
    pub watch_params: WatchParams,
    /// Parameters for connect verbs (exec/attach/log)
    pub connect_params: Option<ConnectParams>,
}

impl Operation {
    /// Construct an operation from its verb, apiVersion and resource reference
    pub fn new(verb: Verb, api_version: &str, resource: impl Into<ResourceRef>) -> Self {
        Self {
            verb,
            api_version: api_version.to_string(),
            resource: resource.into(),
            namespace: None,
            name: None,
            labels: None,
            fields: None,
            query: Vec::new(),
            headers: Vec::new(),
            data: None,
            patch: None,
            post_params: PostParams::default(),
            patch_params: PatchParams::default(),
            delete_params: DeleteParams::default(),
            list_params: ListParams::default(),
            watch_params: WatchParams::default(),
            connect_params: None,
        }
    }

    /// A get of a single named object
    pub fn get(api_version: &str, resource: impl Into<ResourceRef>) -> Self {
        Self::new(Verb::Get, api_version, resource)
    }

    /// A namespaced (or cluster scoped) list
    pub fn list(api_version: &str, resource: impl Into<ResourceRef>) -> Self {
        Self::new(Verb::List, api_version, resource)
    }

    /// A watch
    pub fn watch(api_version: &str, resource: impl Into<ResourceRef>) -> Self {
        Self::new(Verb::Watch, api_version, resource)
    }

    /// A create carrying the given manifest as its body
    pub fn create(api_version: &str, resource: impl Into<ResourceRef>) -> Self {
        Self::new(Verb::Create, api_version, resource)
    }

    /// A replace of a named object
    pub fn update(api_version: &str, resource: impl Into<ResourceRef>) -> Self {
        Self::new(Verb::Update, api_version, resource)
    }

    /// A patch of a named object
    pub fn patch(api_version: &str, resource: impl Into<ResourceRef>, patch: Patch<Value>) -> Self {
        let mut op = Self::new(Verb::Patch, api_version, resource);
        op.patch = Some(patch);
        op
    }

    /// A delete of a named object
    pub fn delete(api_version: &str, resource: impl Into<ResourceRef>) -> Self {
        Self::new(Verb::Delete, api_version, resource)
    }

    /// A delete of a whole collection
    pub fn delete_collection(api_version: &str, resource: impl Into<ResourceRef>) -> Self {
        Self::new(Verb::DeleteCollection, api_version, resource)
    }

    /// A connect to a streaming subresource such as `pods/exec` or `pods/log`
    pub fn connect(api_version: &str, resource: impl Into<ResourceRef>) -> Self {
        Self::new(Verb::Connect, api_version, resource)
    }

    /// Build an operation for a manifest carrying `apiVersion`, `kind` and `metadata`
    ///
    /// The manifest's name and namespace become the operation's path
    /// parameters; for create/update/patch verbs the manifest also becomes
    /// the body. Produces the same request as the explicit constructor with
    /// the same fields spelled out.
    pub fn for_object(verb: Verb, manifest: Value) -> Result<Self, Error> {
        let api_version = manifest
            .get("apiVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Validation("manifest is missing apiVersion".into()))?
            .to_string();
        let kind = manifest
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Validation("manifest is missing kind".into()))?
            .to_string();
        let name = manifest.pointer("/metadata/name").and_then(Value::as_str);
        let namespace = manifest.pointer("/metadata/namespace").and_then(Value::as_str);

        let mut op = Self::new(verb, &api_version, ResourceRef::Named(kind));
        op.name = name.map(str::to_string);
        op.namespace = namespace.map(str::to_string);
        match verb {
            Verb::Patch => op.patch = Some(Patch::Merge(manifest)),
            Verb::Create | Verb::Update => op.data = Some(manifest),
            _ => {}
        }
        Ok(op)
    }

    /// A server-side apply of the given manifest
    ///
    /// Shorthand for a patch operation with [`Patch::Apply`] and the
    /// manifest's own name/namespace as path parameters.
    pub fn apply(manifest: Value) -> Result<Self, Error> {
        let mut op = Self::for_object(Verb::Patch, manifest)?;
        let body = match op.patch.take() {
            Some(Patch::Merge(m)) => m,
            _ => unreachable!("for_object sets a merge patch for the patch verb"),
        };
        op.patch = Some(Patch::Apply(body));
        Ok(op)
    }

    /// Set the namespace path parameter
    #[must_use]
    pub fn within(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    /// Target every namespace instead of one
    ///
    /// Switches `list` and `watch` to their all-namespaces path shape and
    /// drops any previously set namespace.
    #[must_use]
    pub fn all_namespaces(mut self) -> Self {
        self.verb = match self.verb {
            Verb::List => Verb::ListAllNamespaces,
            Verb::Watch => Verb::WatchAllNamespaces,
            v => v,
        };
        self.namespace = None;
        self
    }

    /// Set the object name path parameter
    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Attach a request body for create/update
    #[must_use]
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Restrict collection verbs by label selector
    #[must_use]
    pub fn labels(mut self, selector: Selector) -> Self {
        self.labels = Some(selector);
        self
    }

    /// Restrict collection verbs by field selector
    #[must_use]
    pub fn fields(mut self, selector: Selector) -> Self {
        self.fields = Some(selector);
        self
    }

    /// Append an extra query parameter
    #[must_use]
    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Append an extra header
    #[must_use]
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    /// Replace the patch query options
    #[must_use]
    pub fn patch_params(mut self, pp: PatchParams) -> Self {
        self.patch_params = pp;
        self
    }

    /// Replace the create/update query options
    #[must_use]
    pub fn post_params(mut self, pp: PostParams) -> Self {
        self.post_params = pp;
        self
    }

    /// Replace the delete options
    #[must_use]
    pub fn delete_params(mut self, dp: DeleteParams) -> Self {
        self.delete_params = dp;
        self
    }

    /// Replace the list pagination options
    #[must_use]
    pub fn list_params(mut self, lp: ListParams) -> Self {
        self.list_params = lp;
        self
    }

    /// Replace the watch options
    #[must_use]
    pub fn watch_params(mut self, wp: WatchParams) -> Self {
        self.watch_params = wp;
        self
    }

    /// Set the connect parameters (exec, attach or log)
    #[must_use]
    pub fn connect_params(mut self, cp: impl Into<ConnectParams>) -> Self {
        self.connect_params = Some(cp.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verb_method_table() {
        assert_eq!(Verb::Get.method(), Method::GET);
        assert_eq!(Verb::List.method(), Method::GET);
        assert_eq!(Verb::ListAllNamespaces.method(), Method::GET);
        assert_eq!(Verb::Watch.method(), Method::GET);
        assert_eq!(Verb::WatchAllNamespaces.method(), Method::GET);
        assert_eq!(Verb::Create.method(), Method::POST);
        assert_eq!(Verb::Connect.method(), Method::POST);
        assert_eq!(Verb::Update.method(), Method::PUT);
        assert_eq!(Verb::Patch.method(), Method::PATCH);
        assert_eq!(Verb::Delete.method(), Method::DELETE);
        assert_eq!(Verb::DeleteCollection.method(), Method::DELETE);
    }

    #[test]
    fn builders_return_new_values() {
        let base = Operation::list("v1", "Pod");
        let scoped = base.clone().within("default");
        assert_eq!(base.namespace, None);
        assert_eq!(scoped.namespace.as_deref(), Some("default"));
    }

    #[test]
    fn all_namespaces_switches_verb() {
        let op = Operation::list("apps/v1", "Deployment").within("x").all_namespaces();
        assert_eq!(op.verb, Verb::ListAllNamespaces);
        assert_eq!(op.namespace, None);
        let op = Operation::watch("v1", "Pod").all_namespaces();
        assert_eq!(op.verb, Verb::WatchAllNamespaces);
    }

    #[test]
    fn for_object_pulls_path_params_from_manifest() {
        let manifest = serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "nginx", "namespace": "test" },
            "spec": {}
        });
        let op = Operation::for_object(Verb::Update, manifest).unwrap();
        assert_eq!(op.api_version, "apps/v1");
        assert_eq!(op.resource, ResourceRef::Named("Deployment".into()));
        assert_eq!(op.name.as_deref(), Some("nginx"));
        assert_eq!(op.namespace.as_deref(), Some("test"));
        assert!(op.data.is_some());
    }

    #[test]
    fn for_object_requires_type_information() {
        let err = Operation::for_object(Verb::Get, serde_json::json!({"metadata": {}})).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn apply_builds_an_apply_patch() {
        let manifest = serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "cm", "namespace": "default" },
        });
        let op = Operation::apply(manifest).unwrap();
        assert_eq!(op.verb, Verb::Patch);
        assert!(matches!(op.patch, Some(Patch::Apply(_))));
    }
}
