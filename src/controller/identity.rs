//! Identity Resolver
//!
//! The remote API offers no single stable key for an interface: a desired
//! interface is looked up by name and by address independently. When the
//! two lookups land on different interfaces the state is ambiguous and is
//! reported as an error; it is never resolved by guessing.

use crate::domain::interface::{
    address_matches, DesiredInterface, InterfaceField, InterfaceScope, NetworkInterface,
};
use crate::error::{Error, Result};
use serde_json::Value;

/// Which key located an existing interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedBy {
    NameAndAddress,
    Name,
    Address,
}

/// Outcome of resolving a desired interface against existing ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Unique { index: usize, matched: MatchedBy },
    Ambiguous { name_index: usize, address_index: usize },
    NotFound,
}

/// Locate `desired` among `existing` by name and by address
pub fn resolve(desired: &DesiredInterface, existing: &[NetworkInterface]) -> Resolution {
    let by_name = existing.iter().position(|i| i.name == desired.name);
    let by_address = existing
        .iter()
        .position(|i| address_matches(&desired.address, &i.address));

    match (by_name, by_address) {
        (Some(n), Some(a)) if n == a => Resolution::Unique {
            index: n,
            matched: MatchedBy::NameAndAddress,
        },
        (Some(n), Some(a)) => Resolution::Ambiguous {
            name_index: n,
            address_index: a,
        },
        (Some(n), None) => Resolution::Unique {
            index: n,
            matched: MatchedBy::Name,
        },
        (None, Some(a)) => Resolution::Unique {
            index: a,
            matched: MatchedBy::Address,
        },
        (None, None) => Resolution::NotFound,
    }
}

// =============================================================================
// Planning
// =============================================================================

/// Call needed to converge one desired interface
#[derive(Debug, Clone, PartialEq)]
pub enum InterfacePlan {
    InSync { uuid: String },
    Update {
        uuid: String,
        fields: Vec<InterfaceField>,
        body: Value,
    },
    Create { body: Value },
}

/// Decide how to converge `desired` given every interface of its owner
pub fn plan(
    desired: &DesiredInterface,
    existing: &[NetworkInterface],
    scope: &InterfaceScope,
) -> Result<InterfacePlan> {
    match resolve(desired, existing) {
        Resolution::NotFound => Ok(InterfacePlan::Create {
            body: desired.create_payload(scope),
        }),
        Resolution::Ambiguous {
            name_index,
            address_index,
        } => Err(Error::AmbiguousInterface {
            name: desired.name.clone(),
            address: desired.address.clone(),
            name_index,
            address_index,
        }),
        Resolution::Unique { index, matched } => {
            let current = &existing[index];
            let uuid = current.uuid.clone().ok_or_else(|| Error::UnexpectedResponse {
                path: "network/ip/interfaces".into(),
                reason: format!("interface {} has no uuid", current.name),
            })?;

            let fields = desired.differences(current);
            if fields.is_empty() {
                return Ok(InterfacePlan::InSync { uuid });
            }

            let body = match matched {
                MatchedBy::NameAndAddress => desired.full_update(current),
                MatchedBy::Name => desired.address_update(),
                MatchedBy::Address => desired.name_update(),
            };
            Ok(InterfacePlan::Update { uuid, fields, body })
        }
    }
}
