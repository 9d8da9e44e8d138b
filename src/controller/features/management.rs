//! SVM management interface

use super::{FeatureContext, FeatureOutcome, FeatureReconciler};
use crate::controller::identity::{self, InterfacePlan};
use crate::crd::{ConditionType, StorageVirtualMachineSpec};
use crate::domain::interface::{DesiredInterface, InterfaceScope};
use crate::error::Result;
use crate::remote::paths;
use async_trait::async_trait;
use tracing::info;

pub struct ManagementInterface;

#[async_trait]
impl FeatureReconciler for ManagementInterface {
    fn name(&self) -> &'static str {
        "management-interface"
    }

    fn is_configured(&self, spec: &StorageVirtualMachineSpec) -> bool {
        spec.management.is_some()
    }

    async fn reconcile(&self, ctx: &FeatureContext<'_>) -> Result<FeatureOutcome> {
        let Some(spec) = ctx.svm.spec.management.as_ref() else {
            return Ok(FeatureOutcome::Converged);
        };

        let result = converge(ctx, spec).await;
        let message = ctx.checked(ConditionType::ManagementInterface, result).await?;
        ctx.audit
            .success(ConditionType::ManagementInterface, "Reconciled", message)
            .await;
        Ok(FeatureOutcome::Converged)
    }
}

async fn converge(ctx: &FeatureContext<'_>, spec: &crate::crd::InterfaceSpec) -> Result<String> {
    let desired = DesiredInterface::from_spec(spec, &ctx.settings.management_service_policy)?;
    let scope = InterfaceScope::svm(ctx.svm_uuid);
    let existing = ctx.remote.interfaces(&scope, None).await?;

    match identity::plan(&desired, &existing, &scope)? {
        InterfacePlan::InSync { .. } => Ok(format!("management interface {} in sync", desired.name)),
        InterfacePlan::Update { uuid, fields, body } => {
            info!(interface = %desired.name, ?fields, "Updating management interface");
            ctx.remote.update(&paths::interface_item(&uuid), &body).await?;
            Ok(format!("management interface {} updated", desired.name))
        }
        InterfacePlan::Create { body } => {
            info!(interface = %desired.name, address = %desired.address, "Creating management interface");
            ctx.remote.create(paths::IP_INTERFACES, &body).await?;
            Ok(format!("management interface {} created", desired.name))
        }
    }
}
