//! Types for resources whose schema is only known at runtime.
use serde::{Deserialize, Serialize};

use crate::metadata::{ListMeta, ObjectMeta, TypeMeta};

/// A dynamic representation of a kubernetes object
///
/// This works with any non-list object served by the cluster; the typed
/// fields cover what the client itself needs (names, resource versions) and
/// everything else rides along in `data`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DynamicObject {
    /// The type fields, not always present
    #[serde(flatten, default)]
    pub types: Option<TypeMeta>,

    /// Object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// All other keys
    #[serde(flatten)]
    pub data: serde_json::Value,
}

impl DynamicObject {
    /// Create a named object of the given type with no data
    #[must_use]
    pub fn new(name: &str, types: TypeMeta) -> Self {
        Self {
            types: Some(types),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            data: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Attach dynamic data
    #[must_use]
    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Attach a namespace
    #[must_use]
    pub fn within(mut self, ns: &str) -> Self {
        self.metadata.namespace = Some(ns.into());
        self
    }

    /// The object name, if set
    pub fn name(&self) -> Option<&str> {
        self.metadata.name.as_deref()
    }

    /// The object's resource version, if the server has assigned one
    pub fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }
}

/// A generic kubernetes object list
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ObjectList<T> {
    /// The type fields of the list envelope
    #[serde(flatten, default)]
    pub types: Option<TypeMeta>,

    /// List metadata, carrying the continue token and resource version
    #[serde(default)]
    pub metadata: ListMeta,

    /// The items in the list
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

impl<T> ObjectList<T> {
    /// The pagination token for the next page, if the server has one
    pub fn continue_token(&self) -> Option<&str> {
        self.metadata.continue_.as_deref().filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_arbitrary_objects() {
        let obj: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "nginx", "namespace": "test", "resourceVersion": "12" },
            "spec": { "replicas": 2 }
        }))
        .unwrap();
        assert_eq!(obj.types.as_ref().unwrap().kind, "Deployment");
        assert_eq!(obj.name(), Some("nginx"));
        assert_eq!(obj.resource_version(), Some("12"));
        assert_eq!(obj.data["spec"]["replicas"], 2);
    }

    #[test]
    fn round_trips_unknown_fields() {
        use assert_json_diff::assert_json_eq;
        let raw = serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "cm" },
            "data": { "k": "v" },
            "binaryData": {}
        });
        let obj: DynamicObject = serde_json::from_value(raw.clone()).unwrap();
        assert_json_eq!(serde_json::to_value(&obj).unwrap(), raw);
    }

    #[test]
    fn list_continue_token_handling() {
        let list: ObjectList<DynamicObject> = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "PodList",
            "metadata": { "resourceVersion": "55", "continue": "" },
            "items": []
        }))
        .unwrap();
        assert_eq!(list.continue_token(), None);
        assert_eq!(list.metadata.resource_version.as_deref(), Some("55"));
    }
}
