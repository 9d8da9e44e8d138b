//! Reconciliation engine
//!
//! - [`driver`]: one pass per object, from discovery to the feature pipeline
//! - [`features`]: the seven feature reconcilers
//! - [`identity`]: network-interface identity resolution
//! - [`teardown`]: ordered release of remote dependents on deletion
//! - [`audit`]: condition history per object
//! - [`metrics`]: Prometheus collectors
//! - [`runtime`]: kube controller wiring

pub mod audit;
pub mod config;
pub mod driver;
pub mod features;
pub mod identity;
pub mod metrics;
pub mod runtime;
pub mod teardown;

pub use audit::{AuditPolicy, AuditRecorder, DEFAULT_MAX_HISTORY};
pub use config::{ReconcilerConfig, TeardownPolicy};
pub use driver::{Directive, Ports, Reconciler};
pub use features::{FeatureOutcome, FeatureReconciler};
pub use identity::{InterfacePlan, MatchedBy, Resolution};
pub use metrics::Metrics;
pub use teardown::{TeardownSequencer, TeardownStep};
