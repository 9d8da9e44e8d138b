//! Network interface (LIF) model
//!
//! Remote interfaces are converted into [`NetworkInterface`], desired ones
//! into [`DesiredInterface`]. Netmasks are compared as prefix lengths so that
//! `24` and `255.255.255.0` are the same mask.

use crate::crd::InterfaceSpec;
use crate::error::{Error, Result};
use crate::remote::models::IpInterfaceRecord;
use serde_json::{json, Value};
use std::net::{IpAddr, Ipv4Addr};

// =============================================================================
// Scope
// =============================================================================

/// Where an interface lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceScope {
    /// Owned by one SVM
    Svm(String),
    /// Cluster-wide, in an IPspace (inter-cluster interfaces)
    Cluster { ipspace: String },
}

impl InterfaceScope {
    pub fn svm(uuid: impl Into<String>) -> Self {
        InterfaceScope::Svm(uuid.into())
    }
}

// =============================================================================
// Remote Interface
// =============================================================================

/// An existing interface on the remote system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub uuid: Option<String>,
    pub name: String,
    pub address: String,
    /// Prefix length; `None` when the remote value could not be parsed
    pub netmask: Option<u8>,
    pub broadcast_domain: Option<String>,
    pub home_node: Option<String>,
    pub service_policy: Option<String>,
    pub enabled: bool,
    /// Owning SVM; `None` for cluster-scoped interfaces
    pub owner: Option<String>,
}

impl From<IpInterfaceRecord> for NetworkInterface {
    fn from(record: IpInterfaceRecord) -> Self {
        let (address, netmask) = match record.ip {
            Some(ip) => (ip.address, normalize_netmask(&ip.netmask).ok()),
            None => (String::new(), None),
        };
        let (broadcast_domain, home_node) = match record.location {
            Some(location) => (
                location.broadcast_domain.and_then(|b| b.name),
                location.home_node.and_then(|n| n.name),
            ),
            None => (None, None),
        };

        Self {
            uuid: record.uuid,
            name: record.name,
            address,
            netmask,
            broadcast_domain,
            home_node,
            service_policy: record.service_policy.and_then(|p| p.name),
            enabled: record.enabled.unwrap_or(true),
            owner: record.svm.and_then(|s| s.uuid),
        }
    }
}

// =============================================================================
// Desired Interface
// =============================================================================

/// Fields compared between desired and existing interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceField {
    Address,
    Name,
    Netmask,
    ServicePolicy,
    Enabled,
}

/// A validated desired interface bound to a service policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredInterface {
    pub name: String,
    pub address: String,
    pub netmask: u8,
    pub broadcast_domain: Option<String>,
    pub home_node: Option<String>,
    pub service_policy: String,
}

impl DesiredInterface {
    /// Validate a spec entry
    pub fn from_spec(spec: &InterfaceSpec, service_policy: &str) -> Result<Self> {
        if spec.name.trim().is_empty() {
            return Err(Error::Configuration("interface name must not be empty".into()));
        }
        let address: IpAddr = spec.ip_address.trim().parse().map_err(|_| {
            Error::Configuration(format!(
                "interface {}: invalid IP address {:?}",
                spec.name, spec.ip_address
            ))
        })?;

        Ok(Self {
            name: spec.name.clone(),
            address: address.to_string(),
            netmask: normalize_netmask(&spec.netmask)?,
            broadcast_domain: spec.broadcast_domain.clone(),
            home_node: spec.home_node.clone(),
            service_policy: service_policy.to_string(),
        })
    }

    /// Fields where `current` deviates from this definition
    pub fn differences(&self, current: &NetworkInterface) -> Vec<InterfaceField> {
        let mut fields = Vec::new();
        if !same_address(&self.address, &current.address) {
            fields.push(InterfaceField::Address);
        }
        if self.name != current.name {
            fields.push(InterfaceField::Name);
        }
        if current.netmask != Some(self.netmask) {
            fields.push(InterfaceField::Netmask);
        }
        if current.service_policy.as_deref() != Some(self.service_policy.as_str()) {
            fields.push(InterfaceField::ServicePolicy);
        }
        if !current.enabled {
            fields.push(InterfaceField::Enabled);
        }
        fields
    }

    fn ip_payload(&self) -> Value {
        json!({ "address": self.address, "netmask": self.netmask.to_string() })
    }

    /// Full-record update resetting every managed field.
    ///
    /// Address and netmask always travel together; the remote API rejects
    /// one without the other. Unspecified placement falls back to `current`.
    pub fn full_update(&self, current: &NetworkInterface) -> Value {
        let mut body = json!({
            "name": self.name,
            "ip": self.ip_payload(),
            "service_policy": { "name": self.service_policy },
            "enabled": true,
        });
        if let Some(node) = self.home_node.as_ref().or(current.home_node.as_ref()) {
            body["location"] = json!({ "home_node": { "name": node } });
        }
        body
    }

    /// Update of the address only, for an interface found by name
    pub fn address_update(&self) -> Value {
        json!({ "ip": self.ip_payload() })
    }

    /// Update of the name only, for an interface found by address
    pub fn name_update(&self) -> Value {
        json!({ "name": self.name })
    }

    /// Creation payload scoped to an SVM or the cluster
    pub fn create_payload(&self, scope: &InterfaceScope) -> Value {
        let mut body = self.embedded_payload();
        match scope {
            InterfaceScope::Svm(uuid) => {
                body["svm"] = json!({ "uuid": uuid });
            }
            InterfaceScope::Cluster { ipspace } => {
                body["scope"] = json!("cluster");
                body["ipspace"] = json!({ "name": ipspace });
            }
        }
        body
    }

    /// Interface definition embedded in an SVM creation request
    pub fn embedded_payload(&self) -> Value {
        let mut body = json!({
            "name": self.name,
            "ip": self.ip_payload(),
            "service_policy": { "name": self.service_policy },
            "enabled": true,
        });

        let mut location = serde_json::Map::new();
        if let Some(domain) = &self.broadcast_domain {
            location.insert("broadcast_domain".into(), json!({ "name": domain }));
        }
        if let Some(node) = &self.home_node {
            location.insert("home_node".into(), json!({ "name": node }));
        }
        if !location.is_empty() {
            body["location"] = Value::Object(location);
        }
        body
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Normalize a netmask to its prefix length.
///
/// Accepts a prefix length (`"24"`, `"/24"`) or a contiguous dotted-quad mask.
pub fn normalize_netmask(raw: &str) -> Result<u8> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('/').unwrap_or(trimmed);

    if let Ok(prefix) = trimmed.parse::<u8>() {
        if prefix <= 32 {
            return Ok(prefix);
        }
        return Err(Error::InvalidNetmask(raw.to_string()));
    }

    let mask: Ipv4Addr = trimmed
        .parse()
        .map_err(|_| Error::InvalidNetmask(raw.to_string()))?;
    let bits = u32::from(mask);
    if bits.leading_ones() + bits.trailing_zeros() != 32 {
        return Err(Error::InvalidNetmask(raw.to_string()));
    }
    Ok(bits.leading_ones() as u8)
}

fn same_address(a: &str, b: &str) -> bool {
    match (a.parse::<IpAddr>(), b.parse::<IpAddr>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Address equality tolerant of formatting differences
pub fn address_matches(desired: &str, existing: &str) -> bool {
    same_address(desired, existing)
}
