//! NVMe/TCP service and data interfaces

use super::interfaces::reconcile_interfaces;
use super::{FeatureContext, FeatureOutcome, FeatureReconciler};
use crate::crd::{ConditionType, NvmeSpec, StorageVirtualMachineSpec};
use crate::domain::interface::InterfaceScope;
use crate::error::Result;
use crate::remote::models::NvmeServiceRecord;
use crate::remote::paths;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

pub struct Nvme;

#[async_trait]
impl FeatureReconciler for Nvme {
    fn name(&self) -> &'static str {
        "nvme"
    }

    fn is_configured(&self, spec: &StorageVirtualMachineSpec) -> bool {
        spec.nvme.is_some()
    }

    async fn reconcile(&self, ctx: &FeatureContext<'_>) -> Result<FeatureOutcome> {
        let Some(spec) = ctx.svm.spec.nvme.as_ref() else {
            return Ok(FeatureOutcome::Converged);
        };

        let result = service(ctx, spec).await;
        let message = ctx.checked(ConditionType::NvmeService, result).await?;
        ctx.audit.success(ConditionType::NvmeService, "Reconciled", message).await;

        let result = reconcile_interfaces(
            ctx.remote,
            &InterfaceScope::svm(ctx.svm_uuid),
            &ctx.settings.nvme_service_policy,
            &spec.interfaces,
        )
        .await;
        let report = ctx.checked(ConditionType::NvmeInterfaces, result).await?;
        let reason = if report.is_noop() { "InSync" } else { "Reconciled" };
        ctx.audit
            .success(ConditionType::NvmeInterfaces, reason, report.summary())
            .await;

        Ok(FeatureOutcome::Converged)
    }
}

async fn service(ctx: &FeatureContext<'_>, spec: &NvmeSpec) -> Result<String> {
    let current: Option<NvmeServiceRecord> = ctx.remote.fetch_optional(&paths::nvme_service(ctx.svm_uuid)).await?;

    match current {
        None => {
            let body = json!({ "svm": { "uuid": ctx.svm_uuid }, "enabled": spec.enabled });
            info!(svm = %ctx.svm_uuid, "Creating NVMe service");
            ctx.remote.create(paths::NVME_SERVICES, &body).await?;
            Ok("NVMe service created".to_string())
        }
        Some(current) if current.enabled == Some(spec.enabled) => {
            debug!(svm = %ctx.svm_uuid, "NVMe service in sync");
            Ok("NVMe service in sync".to_string())
        }
        Some(_) => {
            info!(svm = %ctx.svm_uuid, enabled = spec.enabled, "Updating NVMe service");
            ctx.remote
                .update(&paths::nvme_service_item(ctx.svm_uuid), &json!({ "enabled": spec.enabled }))
                .await?;
            Ok(format!("NVMe service enabled set to {}", spec.enabled))
        }
    }
}
