//! A discovery-driven Kubernetes API client.
//!
//! `kubedyn` talks to any cluster without compiled OpenAPI types: callers
//! describe a REST call as an [`Operation`] value and the client resolves it
//! at runtime against the cluster's `/api` and `/apis` discovery endpoints.
//!
//! # Example
//!
//! ```rust,no_run
//! use futures::TryStreamExt;
//! use kubedyn::{Client, DynamicObject, Operation};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // In-cluster configuration first, then the local kubeconfig.
//!     let client = Client::try_default().await?;
//!
//!     // Apply a manifest via server-side apply
//!     let manifest = serde_json::json!({
//!         "apiVersion": "apps/v1",
//!         "kind": "Deployment",
//!         "metadata": { "name": "nginx", "namespace": "default" },
//!         "spec": { "replicas": 1 }
//!     });
//!     let applied: DynamicObject = client.run(&Operation::apply(manifest)?).await?;
//!     println!("applied {:?}", applied.name());
//!
//!     // Lazily page through pods
//!     let pods = client.stream(&Operation::list("v1", "Pod").within("default"));
//!     futures::pin_mut!(pods);
//!     while let Some(pod) = pods.try_next().await? {
//!         println!("{:?}", pod.name());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! For more details, see:
//!
//! - [`Config`](crate::config) for connection configuration (kubeconfig, in-cluster, env)
//! - [`Client`](crate::client) for the tower-based transport
//! - [`discovery`](crate::discovery) for runtime api discovery and the resource finder
//! - [`runner`](crate::runner) for the list, watch and connect streams

pub mod client;
#[doc(inline)] pub use client::Client;

pub mod config;
#[doc(inline)] pub use config::Config;

pub mod discovery;
#[doc(inline)] pub use discovery::DiscoveryDriver;

pub mod runner;

pub mod error;
#[doc(inline)] pub use error::Error;

#[cfg(test)] mod mock_tests;

/// Convenient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub use kubedyn_core::{
    DynamicObject, ErrorResponse, GroupVersion, ObjectList, Operation, ResourceDefinition,
    ResourceRef, Selector, Status, Verb, Version, WatchEvent,
};

/// Re-exports from kubedyn-core
pub use kubedyn_core as core;
