//! Metadata structs flattened into objects and lists.
//!
//! These are the small hand-maintained subsets of `meta/v1` this client
//! needs; a schema-less client deliberately does not link a generated
//! OpenAPI crate.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Type information that is flattened into every kubernetes object
#[derive(Deserialize, Serialize, Clone, Default, Debug, Eq, PartialEq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    /// The version of the API
    pub api_version: String,

    /// The name of the API
    pub kind: String,
}

impl TypeMeta {
    /// Construct type information from an apiVersion and kind pair
    pub fn new(api_version: &str, kind: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        }
    }
}

/// Standard object metadata
///
/// Only the fields this client reads or writes; unknown fields pass through
/// untouched inside [`DynamicObject::data`](crate::DynamicObject).
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    /// The unique name of this object within its namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// The namespace the object lives in, absent for cluster scoped objects
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Map of string keys and values categorizing the object
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    /// Unstructured key value map for arbitrary external metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,

    /// An opaque version identifier updated by the server on every write
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    /// Server generated unique identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Server assigned creation timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,

    /// Server assigned deletion timestamp when the object is terminating
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<String>,

    /// Sequence number representing the generation of the desired state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
}

/// Standard list metadata
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ListMeta {
    /// Opaque pagination token for the next page
    ///
    /// Empty or absent when the server has no further pages.
    #[serde(rename = "continue", skip_serializing_if = "Option::is_none")]
    pub continue_: Option<String>,

    /// The collection's version at the time the list was served
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    /// Number of items the server left out of this paginated response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_item_count: Option<i64>,
}
