//! Interface list reconciliation shared by the protocol features
//!
//! A feature owns an ordered list of desired interfaces bound to one service
//! policy. Existing interfaces with that policy are paired with desired
//! entries: an exact name+address match claims its entry. In SVM scope the
//! remaining slots take the leftover interfaces in order; cluster-scoped
//! interfaces belong to every tenant of the IPspace and are never taken by
//! position. Paired entries that differ get a full-record update; unpaired
//! desired entries go through the identity resolver against every
//! interface of the owner; leftover SVM interfaces are deleted best-effort. Every call is planned before the first mutation, so
//! an ambiguous entry leaves the remote side untouched.

use crate::controller::identity::{self, InterfacePlan, MatchedBy, Resolution};
use crate::crd::InterfaceSpec;
use crate::domain::interface::{DesiredInterface, InterfaceScope, NetworkInterface};
use crate::error::Result;
use crate::remote::paths;
use crate::remote::resources::Remote;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// What a list reconciliation changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failed_deletes: usize,
}

impl InterfaceReport {
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.deleted == 0 && self.failed_deletes == 0
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "created {}, updated {}, deleted {}",
            self.created, self.updated, self.deleted
        );
        if self.failed_deletes > 0 {
            summary.push_str(&format!(", {} stale interface(s) could not be deleted", self.failed_deletes));
        }
        summary
    }
}

/// Validate a list of interface specs against one service policy
pub fn desired_list(specs: &[InterfaceSpec], service_policy: &str) -> Result<Vec<DesiredInterface>> {
    specs
        .iter()
        .map(|spec| DesiredInterface::from_spec(spec, service_policy))
        .collect()
}

/// Pair existing interfaces with desired slots.
///
/// Returns one optional interface per desired entry and the interfaces left
/// over, in their original order. With `by_position` unset only exact
/// name+address matches are paired.
pub fn align(
    desired: &[DesiredInterface],
    current: Vec<NetworkInterface>,
    by_position: bool,
) -> (Vec<Option<NetworkInterface>>, Vec<NetworkInterface>) {
    let mut pool: Vec<Option<NetworkInterface>> = current.into_iter().map(Some).collect();
    let mut slots: Vec<Option<NetworkInterface>> = vec![None; desired.len()];

    for (slot, want) in slots.iter_mut().zip(desired) {
        let candidates: Vec<NetworkInterface> = pool.iter().flatten().cloned().collect();
        if let Resolution::Unique {
            matched: MatchedBy::NameAndAddress,
            index,
        } = identity::resolve(want, &candidates)
        {
            let uuid = &candidates[index].uuid;
            if let Some(entry) = pool
                .iter_mut()
                .find(|entry| entry.as_ref().map(|i| &i.uuid) == Some(uuid))
            {
                *slot = entry.take();
            }
        }
    }

    let mut leftovers = pool.into_iter().flatten();
    if by_position {
        for slot in slots.iter_mut().filter(|s| s.is_none()) {
            *slot = leftovers.next();
        }
    }
    (slots, leftovers.collect())
}

/// Converge the interfaces of one service policy in `scope`.
///
/// Leftover interfaces are pruned only in SVM scope; cluster-scoped
/// interfaces are shared with other tenants of the cluster.
pub async fn reconcile_interfaces(
    remote: &Remote,
    scope: &InterfaceScope,
    service_policy: &str,
    specs: &[InterfaceSpec],
) -> Result<InterfaceReport> {
    let desired = desired_list(specs, service_policy)?;
    let current = remote.interfaces(scope, Some(service_policy)).await?;
    let owned = matches!(scope, InterfaceScope::Svm(_));
    let (slots, leftovers) = align(&desired, current, owned);

    // plan every entry before touching anything
    let claimed: HashSet<String> = slots.iter().flatten().filter_map(|i| i.uuid.clone()).collect();
    let mut owner_interfaces: Option<Vec<NetworkInterface>> = None;
    let mut plans = Vec::with_capacity(desired.len());

    for (want, slot) in desired.iter().zip(&slots) {
        let plan = match slot {
            Some(current) => {
                let fields = want.differences(current);
                let uuid = current.uuid.clone().unwrap_or_default();
                if fields.is_empty() {
                    InterfacePlan::InSync { uuid }
                } else {
                    InterfacePlan::Update {
                        uuid,
                        fields,
                        body: want.full_update(current),
                    }
                }
            }
            None => {
                if owner_interfaces.is_none() {
                    let all = remote.interfaces(scope, None).await?;
                    owner_interfaces = Some(
                        all.into_iter()
                            .filter(|i| i.uuid.as_ref().map_or(true, |u| !claimed.contains(u)))
                            .collect(),
                    );
                }
                identity::plan(want, owner_interfaces.as_deref().unwrap_or_default(), scope)?
            }
        };
        plans.push((want, plan));
    }

    let mut report = InterfaceReport::default();
    for (want, plan) in plans {
        match plan {
            InterfacePlan::InSync { .. } => {
                debug!(interface = %want.name, "Interface in sync");
            }
            InterfacePlan::Update { uuid, fields, body } => {
                info!(interface = %want.name, ?fields, "Updating interface");
                remote.update(&paths::interface_item(&uuid), &body).await?;
                report.updated += 1;
            }
            InterfacePlan::Create { body } => {
                info!(interface = %want.name, address = %want.address, "Creating interface");
                remote.create(paths::IP_INTERFACES, &body).await?;
                report.created += 1;
            }
        }
    }

    if owned {
        for stale in leftovers {
            let Some(uuid) = stale.uuid.as_deref() else {
                continue;
            };
            match remote.remove(&paths::interface_item(uuid)).await {
                Ok(_) => {
                    info!(interface = %stale.name, "Deleted stale interface");
                    report.deleted += 1;
                }
                Err(e) => {
                    warn!(interface = %stale.name, error = %e, "Failed to delete stale interface");
                    report.failed_deletes += 1;
                }
            }
        }
    }

    Ok(report)
}
