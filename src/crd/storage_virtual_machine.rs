//! StorageVirtualMachine CRD
//!
//! Declares one multi-protocol storage virtual machine (SVM) on a remote
//! storage cluster together with the protocol features it should serve.
//! Every optional feature block uses presence-as-intent: an absent block
//! means "leave this feature alone", not "disable it".

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Finalizer guarding teardown of remote resources
pub const SVM_FINALIZER: &str = "storage.billyronks.io/svm-finalizer";

// =============================================================================
// StorageVirtualMachine CRD
// =============================================================================

/// StorageVirtualMachine describes the desired state of one SVM and its
/// NFS, iSCSI, NVMe, S3 and peering configuration.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.billyronks.io",
    version = "v1",
    kind = "StorageVirtualMachine",
    plural = "storagevirtualmachines",
    shortname = "svm",
    status = "StorageVirtualMachineStatus",
    printcolumn = r#"{"name": "SVM", "type": "string", "jsonPath": ".spec.svmName"}"#,
    printcolumn = r#"{"name": "UUID", "type": "string", "jsonPath": ".spec.svmUuid"}"#,
    printcolumn = r#"{"name": "Host", "type": "string", "jsonPath": ".spec.clusterHost"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct StorageVirtualMachineSpec {
    /// Name of the SVM on the remote cluster
    pub svm_name: String,

    /// Remote identifier, assigned on creation or adoption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svm_uuid: Option<String>,

    /// Free-form comment stored on the SVM
    #[serde(default)]
    pub svm_comment: Option<String>,

    /// What happens to the remote SVM when this object is deleted
    #[serde(default)]
    pub svm_deletion_policy: DeletionPolicy,

    /// Cluster management host (name or address, optional port)
    pub cluster_host: String,

    /// Secret holding cluster-admin username/password
    pub cluster_credentials: CredentialRef,

    /// Secret holding the SVM-admin account to provision
    #[serde(default)]
    pub svm_admin_credentials: Option<CredentialRef>,

    /// SVM management interface
    #[serde(default)]
    pub management: Option<InterfaceSpec>,

    /// Aggregates assigned to the SVM
    #[serde(default)]
    pub aggregates: Option<Vec<AggregateSpec>>,

    /// NFS service
    #[serde(default)]
    pub nfs: Option<NfsSpec>,

    /// iSCSI service
    #[serde(default)]
    pub iscsi: Option<IscsiSpec>,

    /// NVMe/TCP service
    #[serde(default)]
    pub nvme: Option<NvmeSpec>,

    /// S3 object storage service
    #[serde(default)]
    pub s3: Option<S3Spec>,

    /// Inter-cluster peering
    #[serde(default)]
    pub peer: Option<PeerSpec>,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// Deletion policy for the remote SVM
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeletionPolicy {
    #[default]
    Delete,
    Retain,
}

impl std::fmt::Display for DeletionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeletionPolicy::Delete => write!(f, "delete"),
            DeletionPolicy::Retain => write!(f, "retain"),
        }
    }
}

/// Reference to a Kubernetes secret
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRef {
    /// Secret name
    pub name: String,
    /// Secret namespace (defaults to the object's namespace)
    #[serde(default)]
    pub namespace: Option<String>,
}

impl CredentialRef {
    /// Namespace of the secret, falling back to the owner's namespace
    pub fn namespace_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(fallback)
    }
}

/// A network interface (LIF) definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceSpec {
    /// Interface name
    pub name: String,
    /// IPv4 address
    pub ip_address: String,
    /// Netmask as prefix length ("24") or dotted quad ("255.255.255.0")
    pub netmask: String,
    /// Broadcast domain the interface is placed in
    #[serde(default)]
    pub broadcast_domain: Option<String>,
    /// Home node of the interface
    #[serde(default)]
    pub home_node: Option<String>,
}

/// Aggregate assigned to the SVM
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSpec {
    pub name: String,
}

/// NFS service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NfsSpec {
    /// Whether the NFS server is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// NFSv3 toggle
    #[serde(default)]
    pub v3: Option<bool>,
    /// NFSv4.0 toggle
    #[serde(default)]
    pub v4: Option<bool>,
    /// NFSv4.1 toggle
    #[serde(default)]
    pub v41: Option<bool>,
    /// Data interfaces serving NFS
    #[serde(default)]
    pub interfaces: Vec<InterfaceSpec>,
    /// Export policy applied to the SVM
    #[serde(default)]
    pub export: Option<ExportSpec>,
}

/// NFS export policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExportSpec {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<ExportRuleSpec>,
}

/// One export rule; rules are ordered
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExportRuleSpec {
    /// Client match specifications (hosts, subnets, netgroups)
    pub clients: Vec<String>,
    #[serde(default = "default_any")]
    pub protocols: Vec<String>,
    #[serde(default = "default_any")]
    pub ro_rule: Vec<String>,
    #[serde(default = "default_any")]
    pub rw_rule: Vec<String>,
    #[serde(default = "default_any")]
    pub superuser: Vec<String>,
    /// Anonymous user id
    #[serde(default)]
    pub anonymous_user: Option<String>,
}

/// iSCSI service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IscsiSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Target alias
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<InterfaceSpec>,
}

/// NVMe/TCP service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NvmeSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub interfaces: Vec<InterfaceSpec>,
}

/// S3 object storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct S3Spec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// S3 server name (FQDN clients use)
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub http_enabled: Option<bool>,
    #[serde(default)]
    pub https_enabled: Option<bool>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub secure_port: Option<u16>,
    /// Server certificate name for HTTPS
    #[serde(default)]
    pub certificate: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<InterfaceSpec>,
    #[serde(default)]
    pub users: Vec<S3UserSpec>,
    #[serde(default)]
    pub buckets: Vec<S3BucketSpec>,
}

/// S3 user; its access keys land in a local secret
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct S3UserSpec {
    pub name: String,
    /// Namespace for the access-key secret (defaults to the object's namespace)
    #[serde(default)]
    pub namespace: Option<String>,
}

/// S3 bucket; created once, never updated
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct S3BucketSpec {
    pub name: String,
    /// Size in bytes
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Inter-cluster peering configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PeerSpec {
    /// Remote side of the relationship
    pub remote: RemotePeerSpec,
    /// Secret holding the shared peering passphrase (key `passphrase`)
    pub passphrase: CredentialRef,
    #[serde(default)]
    pub encryption: PeerEncryption,
    /// Applications allowed over the SVM peer
    #[serde(default = "default_peer_applications")]
    pub applications: Vec<String>,
    /// Inter-cluster interfaces (cluster scope)
    #[serde(default)]
    pub interfaces: Vec<InterfaceSpec>,
}

/// Remote cluster and SVM
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemotePeerSpec {
    /// Remote inter-cluster addresses
    pub ip_addresses: Vec<String>,
    /// Remote SVM name
    pub svm_name: String,
    /// Remote cluster name, when known
    #[serde(default)]
    pub cluster_name: Option<String>,
}

/// Encryption proposed for the cluster peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PeerEncryption {
    #[default]
    TlsPsk,
    None,
}

impl std::fmt::Display for PeerEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerEncryption::TlsPsk => write!(f, "tls_psk"),
            PeerEncryption::None => write!(f, "none"),
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// Status of the StorageVirtualMachine
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageVirtualMachineStatus {
    /// Audit trail of reconciliation steps
    #[serde(default)]
    pub conditions: Vec<SvmCondition>,

    /// Last reconcile time
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_reconcile_time: Option<DateTime<Utc>>,
}

/// One recorded outcome of one reconciliation step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SvmCondition {
    /// Step this record belongs to
    pub r#type: ConditionType,
    /// Status: True, False, Unknown
    pub status: ConditionStatus,
    /// Time the record was written
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<DateTime<Utc>>,
    /// Machine-readable reason
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

/// Condition status values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Reconciliation steps that write condition records
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionType {
    ClusterManagementHost,
    ClusterCredentials,
    RemoteConnection,
    SvmLookup,
    SvmCreation,
    SvmUpdate,
    Finalizer,
    SvmAdminAccount,
    ManagementInterface,
    Aggregates,
    NfsService,
    NfsInterfaces,
    NfsExport,
    IscsiService,
    IscsiInterfaces,
    NvmeService,
    NvmeInterfaces,
    S3Service,
    S3Interfaces,
    S3Users,
    S3Buckets,
    PeerInterfaces,
    ClusterPeer,
    SvmPeer,
    Teardown,
    SvmDeletion,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

// =============================================================================
// Default Value Functions
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_any() -> Vec<String> {
    vec!["any".to_string()]
}

fn default_peer_applications() -> Vec<String> {
    vec!["snapmirror".to_string()]
}

// =============================================================================
// Implementations
// =============================================================================

impl StorageVirtualMachine {
    /// Get the name of this object
    pub fn name(&self) -> String {
        self.name_any()
    }

    /// Namespace of this object, "default" when unset
    pub fn namespace_or_default(&self) -> String {
        self.namespace().unwrap_or_else(|| "default".to_string())
    }

    /// Remote identifier, if one has been assigned
    pub fn svm_uuid(&self) -> Option<&str> {
        self.spec
            .svm_uuid
            .as_deref()
            .filter(|uuid| !uuid.trim().is_empty())
    }

    /// Whether the object carries a deletion intent
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether our finalizer is attached
    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == SVM_FINALIZER)
    }

    /// Name of the local secret holding an S3 user's access keys
    pub fn s3_secret_name(&self, user: &str) -> String {
        format!("{}-s3-{}", self.name(), user).to_lowercase()
    }
}
