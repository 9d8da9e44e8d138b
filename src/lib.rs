//! SVM Operator - Storage Virtual Machine reconciliation engine
//!
//! A Kubernetes operator that drives a remote storage cluster's
//! storage-management REST API until one storage virtual machine (SVM) and
//! its protocol features match a declared `StorageVirtualMachine` object.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                  kube::runtime Controller (watch)                     │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                        Reconciler (one pass)                          │
//! │  host ─▶ credentials ─▶ connect ─▶ lookup/adopt ─▶ create | update    │
//! │                                                   │                   │
//! │   ┌───────────────────────────────────────────────┴───────────────┐   │
//! │   │ management │ aggregates │ nfs │ iscsi │ nvme │ s3 │ peering    │   │
//! │   └───────────────────────────────────────────────────────────────┘   │
//! │                 teardown sequencer (on deletion)                      │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  Remote facade + job tracker  │  Audit trail  │  Metrics              │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │            Adapters: REST client  │  Kubernetes API                   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controller`]: reconciler, feature pipeline, teardown and runtime
//! - [`remote`]: storage-management API models, paths and job tracking
//! - [`adapters`]: REST and Kubernetes implementations of the ports
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling

pub mod adapters;
pub mod controller;
pub mod crd;
pub mod domain;
pub mod error;
pub mod remote;

#[cfg(test)]
pub mod testing;

// Re-export commonly used types
pub use controller::{Directive, Metrics, Ports, Reconciler, ReconcilerConfig, TeardownPolicy};

pub use crd::{
    StorageVirtualMachine, StorageVirtualMachineSpec, StorageVirtualMachineStatus,
    SvmCondition, ConditionType, SVM_FINALIZER,
};

pub use domain::ports::{
    ObjectKey, StorageApi, StorageApiConnector, DesiredStateSource,
    CredentialResolver, AuditSink, SecretWriter, Sleeper, TokioSleeper,
};

pub use error::{Error, Result, ErrorAction};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
