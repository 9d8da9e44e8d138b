//! Aggregate assignment
//!
//! The assigned set is compared as a set of names; any difference replaces
//! the whole list in one job-backed SVM update.

use super::{FeatureContext, FeatureOutcome, FeatureReconciler};
use crate::crd::{ConditionType, StorageVirtualMachineSpec};
use crate::error::Result;
use crate::remote::paths;
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeSet;
use tracing::{debug, info};

pub struct Aggregates;

#[async_trait]
impl FeatureReconciler for Aggregates {
    fn name(&self) -> &'static str {
        "aggregates"
    }

    fn is_configured(&self, spec: &StorageVirtualMachineSpec) -> bool {
        spec.aggregates.is_some()
    }

    async fn reconcile(&self, ctx: &FeatureContext<'_>) -> Result<FeatureOutcome> {
        let Some(wanted) = ctx.svm.spec.aggregates.as_ref() else {
            return Ok(FeatureOutcome::Converged);
        };
        let wanted: BTreeSet<&str> = wanted.iter().map(|a| a.name.as_str()).collect();

        let result = converge(ctx, &wanted).await;
        let changed = ctx.checked(ConditionType::Aggregates, result).await?;
        let names = wanted.iter().copied().collect::<Vec<_>>().join(", ");
        if changed {
            ctx.audit
                .success(ConditionType::Aggregates, "Updated", format!("aggregates set to [{}]", names))
                .await;
        } else {
            ctx.audit
                .success(ConditionType::Aggregates, "InSync", format!("aggregates [{}] already assigned", names))
                .await;
        }
        Ok(FeatureOutcome::Converged)
    }
}

async fn converge(ctx: &FeatureContext<'_>, wanted: &BTreeSet<&str>) -> Result<bool> {
    let assigned: BTreeSet<&str> = ctx
        .record
        .aggregates
        .iter()
        .filter_map(|a| a.name.as_deref())
        .collect();
    if &assigned == wanted {
        debug!(svm = %ctx.svm_uuid, "Aggregates in sync");
        return Ok(false);
    }

    let body = json!({
        "aggregates": wanted.iter().map(|name| json!({ "name": name })).collect::<Vec<_>>()
    });
    info!(svm = %ctx.svm_uuid, ?assigned, ?wanted, "Updating aggregates");
    ctx.remote.update(&paths::svm_item(ctx.svm_uuid), &body).await?;
    Ok(true)
}
