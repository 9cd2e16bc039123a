//! REST resource records produced by api discovery.
use serde::{Deserialize, Serialize};

use crate::operation::ResourceRef;

/// Rbac verbs advertised by discovery
pub mod verbs {
    /// Create a resource
    pub const CREATE: &str = "create";
    /// Get single resource
    pub const GET: &str = "get";
    /// List objects
    pub const LIST: &str = "list";
    /// Watch for objects changes
    pub const WATCH: &str = "watch";
    /// Delete single object
    pub const DELETE: &str = "delete";
    /// Delete multiple objects at once
    pub const DELETE_COLLECTION: &str = "deletecollection";
    /// Update an object
    pub const UPDATE: &str = "update";
    /// Patch an object
    pub const PATCH: &str = "patch";

    /// All the default verbs
    pub const DEFAULT_VERBS: &[&str; 8] =
        &[CREATE, GET, LIST, WATCH, DELETE, DELETE_COLLECTION, UPDATE, PATCH];
}

/// A REST resource record served by one group version
///
/// Deserialized from the `resources` array of an `APIResourceList`; the
/// `group_version` is not part of the wire entries and is filled in by the
/// discovery driver that fetched the list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    /// The group version serving this resource (e.g. `apps/v1`)
    #[serde(default)]
    pub group_version: String,

    /// Singular PascalCase kind of the resource
    pub kind: String,

    /// Plural REST name, `plural/subresource` for subresources
    pub name: String,

    /// Whether the resource is namespaced or not
    pub namespaced: bool,

    /// Supported verbs
    #[serde(default)]
    pub verbs: Vec<String>,

    /// Supported shortnames
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub short_names: Vec<String>,
}

impl ResourceDefinition {
    /// Whether the record addresses a subresource (`pods/log`, `deployments/scale`, ..)
    pub fn is_subresource(&self) -> bool {
        self.name.contains('/')
    }

    /// Checks that a given verb is advertised by this resource
    pub fn supports(&self, verb: &str) -> bool {
        self.verbs.iter().any(|v| v == verb)
    }

    /// Split the REST name into its plural and optional subresource segment
    pub fn split_name(&self) -> (&str, Option<&str>) {
        match self.name.split_once('/') {
            Some((plural, sub)) => (plural, Some(sub)),
            None => (self.name.as_str(), None),
        }
    }
}

/// Select the resource record a reference addresses, if any.
///
/// A plain string is matched with the following precedence, first hit wins:
///
/// 1. exact REST name;
/// 2. exact kind, excluding subresources;
/// 3. lowercased kind equals the input, excluding subresources;
/// 4. REST name equals the lowercased input.
///
/// A `{kind, subkind}` pair only ever matches a subresource: its kind must
/// equal the subkind and its REST name must start with the lowercased parent
/// kind. Plain inputs can still reach a subresource by its full REST name
/// (`deployments/status`), never by kind.
pub fn resolve<'a>(
    resources: &'a [ResourceDefinition],
    wanted: &ResourceRef,
) -> Option<&'a ResourceDefinition> {
    match wanted {
        ResourceRef::Named(input) => {
            let lowered = input.to_ascii_lowercase();
            resources
                .iter()
                .find(|r| r.name == *input)
                .or_else(|| resources.iter().find(|r| r.kind == *input && !r.is_subresource()))
                .or_else(|| {
                    resources
                        .iter()
                        .find(|r| r.kind.to_ascii_lowercase() == *input && !r.is_subresource())
                })
                .or_else(|| resources.iter().find(|r| r.name == lowered))
        }
        ResourceRef::WithSubresource { kind, subkind } => {
            let prefix = kind.to_ascii_lowercase();
            resources
                .iter()
                .find(|r| r.is_subresource() && r.kind == *subkind && r.name.starts_with(&prefix))
        }
    }
}
