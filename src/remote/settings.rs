//! Remote API constants
//!
//! Service-policy names, ports and size floors of the storage-management
//! API live here so version-specific behaviour is isolated in one place.

use crate::remote::models::ClusterRecord;

pub const MANAGEMENT_SERVICE_POLICY: &str = "default-management";
pub const NFS_SERVICE_POLICY: &str = "default-data-files";
pub const ISCSI_SERVICE_POLICY: &str = "default-data-blocks";
pub const ISCSI_LEGACY_SERVICE_POLICY: &str = "default-data-iscsi";
pub const NVME_SERVICE_POLICY: &str = "default-data-nvme-tcp";
pub const S3_SERVICE_POLICY: &str = "default-data-s3";
pub const S3_POLICY_SERVICES: &[&str] = &["data_core", "data_s3_server"];
pub const INTERCLUSTER_SERVICE_POLICY: &str = "default-intercluster";
pub const DEFAULT_IPSPACE: &str = "Default";
pub const DEFAULT_S3_HTTP_PORT: u16 = 80;
pub const DEFAULT_S3_HTTPS_PORT: u16 = 443;
/// Smallest bucket the S3 server accepts (95 GiB)
pub const MIN_BUCKET_SIZE_BYTES: u64 = 95 * 1024 * 1024 * 1024;
pub const SVM_ADMIN_ROLE: &str = "vsadmin";
pub const SVM_ADMIN_APPLICATIONS: &[&str] = &["http", "ontapi", "ssh"];
pub const PEER_AVAILABLE_STATE: &str = "available";
/// Error codes of a cluster-peer request the remote cluster has not answered yet
pub const PEER_UNREACHABLE_CODES: &[&str] = &["4653059", "4653060", "4653067"];

/// First release where iSCSI interfaces use the unified block policy
pub const ISCSI_BLOCKS_POLICY_SINCE: ClusterVersion = ClusterVersion::new(9, 10, 0);

// =============================================================================
// Cluster Version
// =============================================================================

/// Release of the remote cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterVersion {
    pub generation: u32,
    pub major: u32,
    pub minor: u32,
}

impl ClusterVersion {
    pub const fn new(generation: u32, major: u32, minor: u32) -> Self {
        Self {
            generation,
            major,
            minor,
        }
    }

    /// Version reported by `/api/cluster`; unknown versions read as 0.0.0
    pub fn from_cluster(record: &ClusterRecord) -> Self {
        record
            .version
            .as_ref()
            .map(|v| Self::new(v.generation, v.major, v.minor))
            .unwrap_or(Self::new(0, 0, 0))
    }
}

impl std::fmt::Display for ClusterVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.generation, self.major, self.minor)
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Remote API names used by the reconcilers
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub management_service_policy: String,
    pub nfs_service_policy: String,
    pub iscsi_service_policy: String,
    pub iscsi_legacy_service_policy: String,
    pub iscsi_blocks_policy_since: ClusterVersion,
    pub nvme_service_policy: String,
    pub s3_service_policy: String,
    pub intercluster_service_policy: String,
    pub ipspace: String,
    pub min_bucket_size_bytes: u64,
    pub svm_admin_role: String,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            management_service_policy: MANAGEMENT_SERVICE_POLICY.to_string(),
            nfs_service_policy: NFS_SERVICE_POLICY.to_string(),
            iscsi_service_policy: ISCSI_SERVICE_POLICY.to_string(),
            iscsi_legacy_service_policy: ISCSI_LEGACY_SERVICE_POLICY.to_string(),
            iscsi_blocks_policy_since: ISCSI_BLOCKS_POLICY_SINCE,
            nvme_service_policy: NVME_SERVICE_POLICY.to_string(),
            s3_service_policy: S3_SERVICE_POLICY.to_string(),
            intercluster_service_policy: INTERCLUSTER_SERVICE_POLICY.to_string(),
            ipspace: DEFAULT_IPSPACE.to_string(),
            min_bucket_size_bytes: MIN_BUCKET_SIZE_BYTES,
            svm_admin_role: SVM_ADMIN_ROLE.to_string(),
        }
    }
}

impl RemoteSettings {
    /// Service policy for iSCSI interfaces on a given release
    pub fn iscsi_service_policy_for(&self, version: ClusterVersion) -> &str {
        if version >= self.iscsi_blocks_policy_since {
            &self.iscsi_service_policy
        } else {
            &self.iscsi_legacy_service_policy
        }
    }

    /// Bucket size raised to the remote minimum
    pub fn bucket_size(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.min_bucket_size_bytes)
            .max(self.min_bucket_size_bytes)
    }
}
