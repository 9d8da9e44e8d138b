//! Remote resource records
//!
//! Lenient views of the JSON the storage-management API returns. Only the
//! fields the reconcilers compare are modelled; everything is optional or
//! defaulted so that additional or missing fields never break a pass.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{name, uuid}` reference used throughout the API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

/// Collection envelope: `{"records": [...], "num_records": n}`
#[derive(Debug, Clone, Deserialize)]
struct Collection<T> {
    #[serde(default = "Vec::new")]
    records: Vec<T>,
}

/// Decode the records of a collection response
pub fn records<T: DeserializeOwned>(path: &str, body: Value) -> Result<Vec<T>> {
    let collection: Collection<T> = serde_json::from_value(body).map_err(|e| Error::UnexpectedResponse {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    Ok(collection.records)
}

/// Decode a single-object response
pub fn record<T: DeserializeOwned>(path: &str, body: Value) -> Result<T> {
    serde_json::from_value(body).map_err(|e| Error::UnexpectedResponse {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

// =============================================================================
// Cluster / SVM
// =============================================================================

/// `/api/cluster` version block
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<VersionRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VersionRecord {
    #[serde(default)]
    pub generation: u32,
    #[serde(default)]
    pub major: u32,
    #[serde(default)]
    pub minor: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SvmRecord {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub aggregates: Vec<NamedRef>,
    #[serde(default)]
    pub state: Option<String>,
}

// =============================================================================
// Network
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IpInfo {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub netmask: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InterfaceLocation {
    #[serde(default)]
    pub broadcast_domain: Option<NamedRef>,
    #[serde(default)]
    pub home_node: Option<NamedRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IpInterfaceRecord {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ip: Option<IpInfo>,
    #[serde(default)]
    pub location: Option<InterfaceLocation>,
    #[serde(default)]
    pub service_policy: Option<NamedRef>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub svm: Option<NamedRef>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServicePolicyRecord {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub name: String,
}

// =============================================================================
// Protocol Services
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NfsProtocolRecord {
    #[serde(default)]
    pub v3_enabled: Option<bool>,
    #[serde(default)]
    pub v4_enabled: Option<bool>,
    #[serde(default)]
    pub v41_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NfsServiceRecord {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub protocol: Option<NfsProtocolRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportClient {
    #[serde(rename = "match")]
    pub match_spec: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRuleRecord {
    #[serde(default)]
    pub clients: Vec<ExportClient>,
    #[serde(default)]
    pub protocols: Vec<String>,
    #[serde(default)]
    pub ro_rule: Vec<String>,
    #[serde(default)]
    pub rw_rule: Vec<String>,
    #[serde(default)]
    pub superuser: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous_user: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExportPolicyRecord {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rules: Vec<ExportRuleRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IscsiTargetRecord {
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IscsiServiceRecord {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub target: Option<IscsiTargetRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NvmeServiceRecord {
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct S3ServiceRecord {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_http_enabled: Option<bool>,
    #[serde(default)]
    pub is_https_enabled: Option<bool>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub secure_port: Option<u16>,
    #[serde(default)]
    pub certificate: Option<NamedRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct S3UserRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct S3BucketRecord {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
}

// =============================================================================
// Peering
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PeerRemoteRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PeerStatusRecord {
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ClusterPeerRecord {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub remote: Option<PeerRemoteRecord>,
    #[serde(default)]
    pub status: Option<PeerStatusRecord>,
}

impl ClusterPeerRecord {
    pub fn state(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.state.as_deref())
    }

    pub fn remote_addresses(&self) -> &[String] {
        self.remote
            .as_ref()
            .map(|r| r.ip_addresses.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SvmPeerSide {
    #[serde(default)]
    pub svm: Option<NamedRef>,
    #[serde(default)]
    pub cluster: Option<NamedRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SvmPeerRecord {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub svm: Option<NamedRef>,
    #[serde(default)]
    pub peer: Option<SvmPeerSide>,
    #[serde(default)]
    pub state: Option<String>,
}

impl SvmPeerRecord {
    pub fn peer_svm_name(&self) -> Option<&str> {
        self.peer
            .as_ref()
            .and_then(|p| p.svm.as_ref())
            .and_then(|s| s.name.as_deref())
    }
}

// =============================================================================
// Security
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AccountRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: Option<NamedRef>,
    #[serde(default)]
    pub locked: Option<bool>,
}
