//! Adapters implementing the domain ports
//!
//! - [`rest`]: remote storage-management REST API over reqwest
//! - [`kubernetes`]: desired state, secrets and status via kube

pub mod kubernetes;
pub mod rest;

pub use kubernetes::{KubeAuditSink, KubeDesiredState, KubeSecrets};
pub use rest::{RestConnector, RestStorageApi};
