//! # Providers
//!
//! Interfaces to the external systems a reconciliation attempt depends on,
//! and their production implementations.
//!
//! - `cluster` - create/update/delete of rendered objects on the target cluster
//! - `source` - resolution of FluxCD sources into local content and a revision
//! - `render` - rendering of a manifest path into a set of objects
//! - `credentials` - retrieval of remote-cluster kubeconfigs
//!
//! The scheduler only talks to the traits, so tests drive it with in-memory fakes.

pub mod cluster;
pub mod credentials;
pub mod flux;
pub mod kubecfg;
pub mod kubernetes;
pub mod render;
pub mod source;

pub use cluster::{
    ClusterClient, ClusterConnector, ClusterError, ObjectKey, ObjectRef, ResourceScope,
};
pub use credentials::{CredentialError, CredentialFetcher};
pub use render::{RenderError, RenderRequest, Renderer};
pub use source::{ResolvedSource, SourceError, SourceResolver};
