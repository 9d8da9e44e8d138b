//! REST paths of the storage-management API
//!
//! Every path the engine touches is built here so the reconcilers and their
//! tests agree on exact query strings.

use urlencoding::encode;

pub const CLUSTER: &str = "/api/cluster?fields=name,version";
pub const SVMS: &str = "/api/svm/svms";
pub const IP_INTERFACES: &str = "/api/network/ip/interfaces";
pub const SERVICE_POLICIES: &str = "/api/network/ip/service-policies";
pub const NFS_SERVICES: &str = "/api/protocols/nfs/services";
pub const EXPORT_POLICIES: &str = "/api/protocols/nfs/export-policies";
pub const ISCSI_SERVICES: &str = "/api/protocols/san/iscsi/services";
pub const NVME_SERVICES: &str = "/api/protocols/nvme/services";
pub const S3_SERVICES: &str = "/api/protocols/s3/services";
pub const CLUSTER_PEERS: &str = "/api/cluster/peers";
pub const SVM_PEERS: &str = "/api/svm/peers";
pub const ACCOUNTS: &str = "/api/security/accounts";

const INTERFACE_FIELDS: &str = "name,ip,location,service_policy,enabled,svm,scope";

// =============================================================================
// SVM
// =============================================================================

pub fn svm(uuid: &str) -> String {
    format!("{}/{}?fields=name,comment,aggregates,state", SVMS, encode(uuid))
}

pub fn svm_by_name(name: &str) -> String {
    format!("{}?name={}&fields=name,comment,aggregates,state", SVMS, encode(name))
}

pub fn svm_item(uuid: &str) -> String {
    format!("{}/{}", SVMS, encode(uuid))
}

// =============================================================================
// Network Interfaces
// =============================================================================

/// Interfaces owned by an SVM, optionally restricted to one service policy
pub fn svm_interfaces(svm_uuid: &str, service_policy: Option<&str>) -> String {
    let mut path = format!(
        "{}?svm.uuid={}&fields={}&order_by=name",
        IP_INTERFACES,
        encode(svm_uuid),
        INTERFACE_FIELDS
    );
    if let Some(policy) = service_policy {
        path.push_str(&format!("&service_policy.name={}", encode(policy)));
    }
    path
}

/// Cluster-scoped interfaces in an IPspace, optionally by service policy
pub fn cluster_interfaces(ipspace: &str, service_policy: Option<&str>) -> String {
    let mut path = format!(
        "{}?scope=cluster&ipspace.name={}&fields={}&order_by=name",
        IP_INTERFACES,
        encode(ipspace),
        INTERFACE_FIELDS
    );
    if let Some(policy) = service_policy {
        path.push_str(&format!("&service_policy.name={}", encode(policy)));
    }
    path
}

pub fn interface_item(uuid: &str) -> String {
    format!("{}/{}", IP_INTERFACES, encode(uuid))
}

pub fn service_policy_by_name(svm_uuid: &str, name: &str) -> String {
    format!(
        "{}?svm.uuid={}&name={}&fields=name",
        SERVICE_POLICIES,
        encode(svm_uuid),
        encode(name)
    )
}

// =============================================================================
// NFS
// =============================================================================

pub fn nfs_service(svm_uuid: &str) -> String {
    format!("{}/{}?fields=enabled,protocol", NFS_SERVICES, encode(svm_uuid))
}

pub fn nfs_service_item(svm_uuid: &str) -> String {
    format!("{}/{}", NFS_SERVICES, encode(svm_uuid))
}

/// Export policies of an SVM, oldest first
pub fn export_policies(svm_uuid: &str) -> String {
    format!(
        "{}?svm.uuid={}&fields=name,id,rules&order_by=id",
        EXPORT_POLICIES,
        encode(svm_uuid)
    )
}

pub fn export_policy_item(id: u64) -> String {
    format!("{}/{}", EXPORT_POLICIES, id)
}

// =============================================================================
// iSCSI / NVMe
// =============================================================================

pub fn iscsi_service(svm_uuid: &str) -> String {
    format!("{}/{}?fields=enabled,target", ISCSI_SERVICES, encode(svm_uuid))
}

pub fn iscsi_service_item(svm_uuid: &str) -> String {
    format!("{}/{}", ISCSI_SERVICES, encode(svm_uuid))
}

pub fn nvme_service(svm_uuid: &str) -> String {
    format!("{}/{}?fields=enabled", NVME_SERVICES, encode(svm_uuid))
}

pub fn nvme_service_item(svm_uuid: &str) -> String {
    format!("{}/{}", NVME_SERVICES, encode(svm_uuid))
}

// =============================================================================
// S3
// =============================================================================

pub fn s3_service(svm_uuid: &str) -> String {
    format!(
        "{}/{}?fields=enabled,name,is_http_enabled,is_https_enabled,port,secure_port,certificate",
        S3_SERVICES,
        encode(svm_uuid)
    )
}

pub fn s3_service_item(svm_uuid: &str) -> String {
    format!("{}/{}", S3_SERVICES, encode(svm_uuid))
}

pub fn s3_users(svm_uuid: &str) -> String {
    format!("{}/{}/users", S3_SERVICES, encode(svm_uuid))
}

pub fn s3_users_list(svm_uuid: &str) -> String {
    format!("{}?fields=name", s3_users(svm_uuid))
}

pub fn s3_buckets(svm_uuid: &str) -> String {
    format!("{}/{}/buckets", S3_SERVICES, encode(svm_uuid))
}

pub fn s3_buckets_list(svm_uuid: &str) -> String {
    format!("{}?fields=name,uuid,size", s3_buckets(svm_uuid))
}

pub fn s3_bucket_item(svm_uuid: &str, bucket_uuid: &str) -> String {
    format!("{}/{}", s3_buckets(svm_uuid), encode(bucket_uuid))
}

// =============================================================================
// Peering
// =============================================================================

pub fn cluster_peers() -> String {
    format!("{}?fields=name,remote,status", CLUSTER_PEERS)
}

pub fn cluster_peer_item(uuid: &str) -> String {
    format!("{}/{}", CLUSTER_PEERS, encode(uuid))
}

pub fn svm_peers(svm_name: &str) -> String {
    format!("{}?svm.name={}&fields=svm,peer,state", SVM_PEERS, encode(svm_name))
}

pub fn svm_peer_item(uuid: &str) -> String {
    format!("{}/{}", SVM_PEERS, encode(uuid))
}

// =============================================================================
// Security
// =============================================================================

pub fn account(owner_uuid: &str, name: &str) -> String {
    format!(
        "{}?owner.uuid={}&name={}&fields=name,role,locked",
        ACCOUNTS,
        encode(owner_uuid),
        encode(name)
    )
}

pub fn account_item(owner_uuid: &str, name: &str) -> String {
    format!("{}/{}/{}", ACCOUNTS, encode(owner_uuid), encode(name))
}
