//! iSCSI service and data interfaces
//!
//! The interface service policy depends on the cluster release, see
//! [`crate::remote::settings::RemoteSettings::iscsi_service_policy_for`].

use super::interfaces::reconcile_interfaces;
use super::{FeatureContext, FeatureOutcome, FeatureReconciler};
use crate::crd::{ConditionType, IscsiSpec, StorageVirtualMachineSpec};
use crate::domain::interface::InterfaceScope;
use crate::error::Result;
use crate::remote::models::IscsiServiceRecord;
use crate::remote::paths;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

pub struct Iscsi;

#[async_trait]
impl FeatureReconciler for Iscsi {
    fn name(&self) -> &'static str {
        "iscsi"
    }

    fn is_configured(&self, spec: &StorageVirtualMachineSpec) -> bool {
        spec.iscsi.is_some()
    }

    async fn reconcile(&self, ctx: &FeatureContext<'_>) -> Result<FeatureOutcome> {
        let Some(spec) = ctx.svm.spec.iscsi.as_ref() else {
            return Ok(FeatureOutcome::Converged);
        };

        let result = service(ctx, spec).await;
        let message = ctx.checked(ConditionType::IscsiService, result).await?;
        ctx.audit.success(ConditionType::IscsiService, "Reconciled", message).await;

        let policy = ctx.settings.iscsi_service_policy_for(ctx.version);
        let result = reconcile_interfaces(ctx.remote, &InterfaceScope::svm(ctx.svm_uuid), policy, &spec.interfaces).await;
        let report = ctx.checked(ConditionType::IscsiInterfaces, result).await?;
        let reason = if report.is_noop() { "InSync" } else { "Reconciled" };
        ctx.audit
            .success(ConditionType::IscsiInterfaces, reason, report.summary())
            .await;

        Ok(FeatureOutcome::Converged)
    }
}

async fn service(ctx: &FeatureContext<'_>, spec: &IscsiSpec) -> Result<String> {
    let current: Option<IscsiServiceRecord> = ctx.remote.fetch_optional(&paths::iscsi_service(ctx.svm_uuid)).await?;

    let Some(current) = current else {
        let mut body = json!({ "svm": { "uuid": ctx.svm_uuid }, "enabled": spec.enabled });
        if let Some(alias) = &spec.alias {
            body["target"] = json!({ "alias": alias });
        }
        info!(svm = %ctx.svm_uuid, "Creating iSCSI service");
        ctx.remote.create(paths::ISCSI_SERVICES, &body).await?;
        return Ok("iSCSI service created".to_string());
    };

    let mut body = Map::new();
    if current.enabled != Some(spec.enabled) {
        body.insert("enabled".into(), json!(spec.enabled));
    }
    if let Some(alias) = &spec.alias {
        let current_alias = current.target.as_ref().and_then(|t| t.alias.as_deref());
        if current_alias != Some(alias.as_str()) {
            body.insert("target".into(), json!({ "alias": alias }));
        }
    }

    if body.is_empty() {
        debug!(svm = %ctx.svm_uuid, "iSCSI service in sync");
        return Ok("iSCSI service in sync".to_string());
    }

    let fields: Vec<String> = body.keys().cloned().collect();
    info!(svm = %ctx.svm_uuid, ?fields, "Updating iSCSI service");
    ctx.remote
        .update(&paths::iscsi_service_item(ctx.svm_uuid), &Value::Object(body))
        .await?;
    Ok(format!("iSCSI service updated ({})", fields.join(", ")))
}
