//! Client-less building blocks for the kubedyn dynamic Kubernetes client.
//!
//! This crate carries everything that does not need a network connection:
//! group versions, discovered resource records, operation values, request
//! rendering, label/field selectors, watch event types, and the dynamic
//! object representation used in place of compiled OpenAPI types.

pub mod dynamic;
pub use dynamic::{DynamicObject, ObjectList};

pub mod gvk;
pub use gvk::GroupVersion;

pub mod metadata;
pub use metadata::{ListMeta, ObjectMeta, TypeMeta};

pub mod operation;
pub use operation::{Operation, ResourceRef, Verb};

pub mod params;

pub mod request;

pub mod resource;
pub use resource::ResourceDefinition;

pub mod response;
pub use response::Status;

pub mod selector;
pub use selector::{Expression, Selector};

pub mod version;
pub use version::Version;

pub mod watch;
pub use watch::WatchEvent;

mod error;
pub use error::{Error, ErrorResponse};

/// Convenient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;
