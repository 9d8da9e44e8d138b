//! Feature Reconcilers
//!
//! Each feature converges one optional block of the desired spec against
//! the remote system. Features run in a fixed order on the update path:
//!
//! ```text
//! ManagementInterface -> Aggregates -> Nfs -> Iscsi -> Nvme -> ObjectStorage -> Peering
//! ```
//!
//! Later features depend on earlier ones: data protocols need the SVM's
//! management interface and aggregates in place before they serve data.

pub mod aggregates;
pub mod interfaces;
pub mod iscsi;
pub mod management;
pub mod nfs;
pub mod nvme;
pub mod object_storage;
pub mod peering;

use crate::controller::audit::AuditRecorder;
use crate::crd::{ConditionType, StorageVirtualMachine, StorageVirtualMachineSpec};
use crate::domain::ports::{CredentialResolver, SecretWriter};
use crate::error::Result;
use crate::remote::models::SvmRecord;
use crate::remote::resources::Remote;
use crate::remote::settings::{ClusterVersion, RemoteSettings};
use async_trait::async_trait;

pub use aggregates::Aggregates;
pub use iscsi::Iscsi;
pub use management::ManagementInterface;
pub use nfs::Nfs;
pub use nvme::Nvme;
pub use object_storage::ObjectStorage;
pub use peering::Peering;

/// Result of one feature pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureOutcome {
    /// Remote state matches the desired state
    Converged,
    /// Waiting on the remote side; retry later
    Pending(String),
}

/// Everything a feature needs for one pass
pub struct FeatureContext<'a> {
    pub remote: &'a Remote,
    pub audit: &'a AuditRecorder,
    pub settings: &'a RemoteSettings,
    pub version: ClusterVersion,
    pub svm: &'a StorageVirtualMachine,
    pub svm_uuid: &'a str,
    /// The SVM as fetched at the start of the pass
    pub record: &'a SvmRecord,
    pub credentials: &'a dyn CredentialResolver,
    pub secrets: &'a dyn SecretWriter,
}

impl FeatureContext<'_> {
    /// Record a failure condition for `condition_type` when `result` is an error
    pub async fn checked<T>(&self, condition_type: ConditionType, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.audit.error(condition_type, e).await;
        }
        result
    }
}

/// One feature of the update path
#[async_trait]
pub trait FeatureReconciler: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Whether the desired spec asks for this feature at all
    fn is_configured(&self, spec: &StorageVirtualMachineSpec) -> bool;

    async fn reconcile(&self, ctx: &FeatureContext<'_>) -> Result<FeatureOutcome>;
}

/// Features in reconciliation order
pub fn pipeline() -> Vec<Box<dyn FeatureReconciler>> {
    vec![
        Box::new(ManagementInterface),
        Box::new(Aggregates),
        Box::new(Nfs),
        Box::new(Iscsi),
        Box::new(Nvme),
        Box::new(ObjectStorage),
        Box::new(Peering),
    ]
}
