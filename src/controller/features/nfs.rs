//! NFS service, data interfaces and export policy

use super::interfaces::reconcile_interfaces;
use super::{FeatureContext, FeatureOutcome, FeatureReconciler};
use crate::crd::{ConditionType, ExportRuleSpec, ExportSpec, NfsSpec, StorageVirtualMachineSpec};
use crate::domain::interface::InterfaceScope;
use crate::error::Result;
use crate::remote::models::{ExportClient, ExportPolicyRecord, ExportRuleRecord, NfsServiceRecord};
use crate::remote::paths;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

/// Export policy every SVM carries; never managed
const BUILTIN_EXPORT_POLICY: &str = "default";

pub struct Nfs;

#[async_trait]
impl FeatureReconciler for Nfs {
    fn name(&self) -> &'static str {
        "nfs"
    }

    fn is_configured(&self, spec: &StorageVirtualMachineSpec) -> bool {
        spec.nfs.is_some()
    }

    async fn reconcile(&self, ctx: &FeatureContext<'_>) -> Result<FeatureOutcome> {
        let Some(spec) = ctx.svm.spec.nfs.as_ref() else {
            return Ok(FeatureOutcome::Converged);
        };

        // Service
        let result = service(ctx, spec).await;
        let message = ctx.checked(ConditionType::NfsService, result).await?;
        ctx.audit.success(ConditionType::NfsService, "Reconciled", message).await;

        // Interfaces
        let result = reconcile_interfaces(
            ctx.remote,
            &InterfaceScope::svm(ctx.svm_uuid),
            &ctx.settings.nfs_service_policy,
            &spec.interfaces,
        )
        .await;
        let report = ctx.checked(ConditionType::NfsInterfaces, result).await?;
        let reason = if report.is_noop() { "InSync" } else { "Reconciled" };
        ctx.audit
            .success(ConditionType::NfsInterfaces, reason, report.summary())
            .await;

        // Export policy
        if let Some(export) = spec.export.as_ref() {
            let result = export_policy(ctx, export).await;
            let message = ctx.checked(ConditionType::NfsExport, result).await?;
            ctx.audit.success(ConditionType::NfsExport, "Reconciled", message).await;
        }

        Ok(FeatureOutcome::Converged)
    }
}

// =============================================================================
// Service
// =============================================================================

fn protocol_changes(spec: &NfsSpec, current: Option<&NfsServiceRecord>) -> Map<String, Value> {
    let protocol = current.and_then(|c| c.protocol.clone()).unwrap_or_default();
    let mut changes = Map::new();
    let toggles = [
        ("v3_enabled", spec.v3, protocol.v3_enabled),
        ("v4_enabled", spec.v4, protocol.v4_enabled),
        ("v41_enabled", spec.v41, protocol.v41_enabled),
    ];
    for (field, wanted, actual) in toggles {
        if let Some(wanted) = wanted {
            if current.is_none() || actual != Some(wanted) {
                changes.insert(field.to_string(), json!(wanted));
            }
        }
    }
    changes
}

async fn service(ctx: &FeatureContext<'_>, spec: &NfsSpec) -> Result<String> {
    let current: Option<NfsServiceRecord> = ctx.remote.fetch_optional(&paths::nfs_service(ctx.svm_uuid)).await?;

    let Some(current) = current else {
        let mut body = json!({ "svm": { "uuid": ctx.svm_uuid }, "enabled": spec.enabled });
        let protocol = protocol_changes(spec, None);
        if !protocol.is_empty() {
            body["protocol"] = Value::Object(protocol);
        }
        info!(svm = %ctx.svm_uuid, "Creating NFS service");
        ctx.remote.create(paths::NFS_SERVICES, &body).await?;
        return Ok("NFS service created".to_string());
    };

    let mut body = Map::new();
    if current.enabled != Some(spec.enabled) {
        body.insert("enabled".into(), json!(spec.enabled));
    }
    let protocol = protocol_changes(spec, Some(&current));
    if !protocol.is_empty() {
        body.insert("protocol".into(), Value::Object(protocol));
    }

    if body.is_empty() {
        debug!(svm = %ctx.svm_uuid, "NFS service in sync");
        return Ok("NFS service in sync".to_string());
    }

    let fields: Vec<String> = body.keys().cloned().collect();
    info!(svm = %ctx.svm_uuid, ?fields, "Updating NFS service");
    ctx.remote
        .update(&paths::nfs_service_item(ctx.svm_uuid), &Value::Object(body))
        .await?;
    Ok(format!("NFS service updated ({})", fields.join(", ")))
}

// =============================================================================
// Export Policy
// =============================================================================

fn desired_rule(rule: &ExportRuleSpec) -> ExportRuleRecord {
    ExportRuleRecord {
        clients: rule
            .clients
            .iter()
            .map(|c| ExportClient { match_spec: c.clone() })
            .collect(),
        protocols: rule.protocols.clone(),
        ro_rule: rule.ro_rule.clone(),
        rw_rule: rule.rw_rule.clone(),
        superuser: rule.superuser.clone(),
        anonymous_user: rule.anonymous_user.clone(),
    }
}

/// Rule equality; an unset anonymous user accepts whatever the remote chose
fn rule_matches(desired: &ExportRuleRecord, current: &ExportRuleRecord) -> bool {
    desired.clients == current.clients
        && desired.protocols == current.protocols
        && desired.ro_rule == current.ro_rule
        && desired.rw_rule == current.rw_rule
        && desired.superuser == current.superuser
        && (desired.anonymous_user.is_none() || desired.anonymous_user == current.anonymous_user)
}

fn rules_match(desired: &[ExportRuleRecord], current: &[ExportRuleRecord]) -> bool {
    desired.len() == current.len() && desired.iter().zip(current).all(|(d, c)| rule_matches(d, c))
}

async fn export_policy(ctx: &FeatureContext<'_>, spec: &ExportSpec) -> Result<String> {
    let rules: Vec<ExportRuleRecord> = spec.rules.iter().map(desired_rule).collect();
    let policies: Vec<ExportPolicyRecord> = ctx.remote.list(&paths::export_policies(ctx.svm_uuid)).await?;
    let mut managed: Vec<ExportPolicyRecord> = policies
        .into_iter()
        .filter(|p| p.name != BUILTIN_EXPORT_POLICY)
        .collect();
    // the policy already carrying the desired name wins; otherwise the first one is renamed
    let chosen = managed
        .iter()
        .position(|p| p.name == spec.name)
        .or_else(|| (!managed.is_empty()).then_some(0))
        .map(|index| managed.remove(index));

    let message = match chosen {
        None => {
            let body = json!({
                "name": spec.name,
                "svm": { "uuid": ctx.svm_uuid },
                "rules": rules,
            });
            info!(export = %spec.name, "Creating export policy");
            ctx.remote.create(paths::EXPORT_POLICIES, &body).await?;
            format!("export policy {} created", spec.name)
        }
        Some(current) if current.name == spec.name && rules_match(&rules, &current.rules) => {
            debug!(export = %spec.name, "Export policy in sync");
            format!("export policy {} in sync", spec.name)
        }
        Some(current) => {
            let id = current.id.ok_or_else(|| crate::error::Error::UnexpectedResponse {
                path: paths::export_policies(ctx.svm_uuid),
                reason: format!("export policy {} has no id", current.name),
            })?;
            // rules are not addressable one by one: replace the list
            let body = json!({ "name": spec.name, "rules": rules });
            info!(export = %spec.name, previous = %current.name, "Replacing export policy rules");
            ctx.remote.update(&paths::export_policy_item(id), &body).await?;
            format!("export policy {} updated", spec.name)
        }
    };

    for extra in managed {
        let Some(id) = extra.id else { continue };
        match ctx.remote.remove(&paths::export_policy_item(id)).await {
            Ok(_) => info!(export = %extra.name, "Deleted extra export policy"),
            Err(e) => warn!(export = %extra.name, error = %e, "Failed to delete extra export policy"),
        }
    }

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ConditionStatus;
    use crate::testing::FeatureHarness;

    fn nfs_spec() -> NfsSpec {
        NfsSpec {
            enabled: true,
            v3: Some(true),
            v4: Some(false),
            v41: None,
            interfaces: vec![],
            export: None,
        }
    }

    fn rule(clients: &[&str]) -> ExportRuleSpec {
        ExportRuleSpec {
            clients: clients.iter().map(|c| c.to_string()).collect(),
            protocols: vec!["nfs3".into()],
            ro_rule: vec!["sys".into()],
            rw_rule: vec!["sys".into()],
            superuser: vec!["none".into()],
            anonymous_user: None,
        }
    }

    fn remote_rule(clients: &[&str]) -> Value {
        json!({
            "clients": clients.iter().map(|c| json!({"match": c})).collect::<Vec<_>>(),
            "protocols": ["nfs3"], "ro_rule": ["sys"], "rw_rule": ["sys"],
            "superuser": ["none"], "anonymous_user": "65534"
        })
    }

    #[tokio::test]
    async fn test_missing_service_is_created() {
        let harness = FeatureHarness::with(|spec| spec.nfs = Some(nfs_spec()));

        Nfs.reconcile(&harness.ctx()).await.unwrap();

        let calls = harness.api.mutating_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].path, paths::NFS_SERVICES);
        let body = calls[0].body.as_ref().unwrap();
        assert_eq!(body["svm"]["uuid"], "svm-1");
        assert_eq!(body["protocol"]["v3_enabled"], true);
        assert_eq!(body["protocol"]["v4_enabled"], false);
        assert!(body["protocol"].get("v41_enabled").is_none());
    }

    #[tokio::test]
    async fn test_service_patch_carries_only_differences() {
        let harness = FeatureHarness::with(|spec| spec.nfs = Some(nfs_spec()));
        harness.api.respond(
            &paths::nfs_service("svm-1"),
            json!({"enabled": true, "protocol": {"v3_enabled": true, "v4_enabled": true, "v41_enabled": true}}),
        );

        Nfs.reconcile(&harness.ctx()).await.unwrap();

        let calls = harness.api.mutating_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].verb, "PATCH");
        assert_eq!(calls[0].body, Some(json!({"protocol": {"v4_enabled": false}})));
    }

    #[tokio::test]
    async fn test_converged_service_records_in_sync() {
        let harness = FeatureHarness::with(|spec| spec.nfs = Some(nfs_spec()));
        harness.api.respond(
            &paths::nfs_service("svm-1"),
            json!({"enabled": true, "protocol": {"v3_enabled": true, "v4_enabled": false}}),
        );

        Nfs.reconcile(&harness.ctx()).await.unwrap();

        assert!(harness.api.mutating_calls().is_empty());
        let conditions = harness.conditions();
        assert!(conditions
            .iter()
            .any(|c| c.r#type == ConditionType::NfsService
                && c.message.as_deref() == Some("NFS service in sync")));
    }

    #[tokio::test]
    async fn test_export_rules_replaced_and_extras_deleted() {
        let harness = FeatureHarness::with(|spec| {
            let mut nfs = nfs_spec();
            nfs.export = Some(ExportSpec {
                name: "exports".into(),
                rules: vec![rule(&["10.0.0.0/24"]), rule(&["10.0.1.0/24"])],
            });
            spec.nfs = Some(nfs);
        });
        harness.api.respond(
            &paths::nfs_service("svm-1"),
            json!({"enabled": true, "protocol": {"v3_enabled": true, "v4_enabled": false}}),
        );
        harness.api.respond(
            &paths::export_policies("svm-1"),
            json!({"records": [
                {"id": 1, "name": "default", "rules": []},
                {"id": 7, "name": "exports", "rules": [remote_rule(&["10.0.0.0/24"])]},
                {"id": 9, "name": "old", "rules": []}
            ]}),
        );

        Nfs.reconcile(&harness.ctx()).await.unwrap();

        let calls = harness.api.mutating_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].verb, "PATCH");
        assert_eq!(calls[0].path, paths::export_policy_item(7));
        assert_eq!(calls[0].body.as_ref().unwrap()["rules"].as_array().unwrap().len(), 2);
        assert_eq!(calls[1].verb, "DELETE");
        assert_eq!(calls[1].path, paths::export_policy_item(9));
    }

    #[tokio::test]
    async fn test_export_with_desired_name_wins_over_earlier_policy() {
        let harness = FeatureHarness::with(|spec| {
            let mut nfs = nfs_spec();
            nfs.export = Some(ExportSpec {
                name: "exports".into(),
                rules: vec![rule(&["10.0.0.0/24"])],
            });
            spec.nfs = Some(nfs);
        });
        harness.api.respond(
            &paths::nfs_service("svm-1"),
            json!({"enabled": true, "protocol": {"v3_enabled": true, "v4_enabled": false}}),
        );
        harness.api.respond(
            &paths::export_policies("svm-1"),
            json!({"records": [
                {"id": 1, "name": "default", "rules": []},
                {"id": 5, "name": "aaa-legacy", "rules": []},
                {"id": 7, "name": "exports", "rules": [remote_rule(&["10.0.0.0/24"])]}
            ]}),
        );

        Nfs.reconcile(&harness.ctx()).await.unwrap();

        let calls = harness.api.mutating_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].verb, "DELETE");
        assert_eq!(calls[0].path, paths::export_policy_item(5));
    }

    #[tokio::test]
    async fn test_only_policy_is_renamed() {
        let harness = FeatureHarness::with(|spec| {
            let mut nfs = nfs_spec();
            nfs.export = Some(ExportSpec {
                name: "exports".into(),
                rules: vec![],
            });
            spec.nfs = Some(nfs);
        });
        harness.api.respond(
            &paths::nfs_service("svm-1"),
            json!({"enabled": true, "protocol": {"v3_enabled": true, "v4_enabled": false}}),
        );
        harness.api.respond(
            &paths::export_policies("svm-1"),
            json!({"records": [{"id": 5, "name": "aaa-legacy", "rules": []}]}),
        );

        Nfs.reconcile(&harness.ctx()).await.unwrap();

        let calls = harness.api.mutating_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].verb, "PATCH");
        assert_eq!(calls[0].path, paths::export_policy_item(5));
        assert_eq!(calls[0].body, Some(json!({"name": "exports", "rules": []})));
    }

    #[tokio::test]
    async fn test_matching_export_is_left_alone() {
        let harness = FeatureHarness::with(|spec| {
            let mut nfs = nfs_spec();
            nfs.export = Some(ExportSpec {
                name: "exports".into(),
                rules: vec![rule(&["10.0.0.0/24"])],
            });
            spec.nfs = Some(nfs);
        });
        harness.api.respond(
            &paths::nfs_service("svm-1"),
            json!({"enabled": true, "protocol": {"v3_enabled": true, "v4_enabled": false}}),
        );
        harness.api.respond(
            &paths::export_policies("svm-1"),
            json!({"records": [{"id": 7, "name": "exports", "rules": [remote_rule(&["10.0.0.0/24"])]}]}),
        );

        Nfs.reconcile(&harness.ctx()).await.unwrap();
        assert!(harness.api.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_service_failure_is_recorded() {
        let harness = FeatureHarness::with(|spec| spec.nfs = Some(nfs_spec()));
        harness
            .api
            .respond_error(&paths::nfs_service("svm-1"), 500, None, "boom");

        assert!(Nfs.reconcile(&harness.ctx()).await.is_err());
        let conditions = harness.conditions();
        assert_eq!(conditions.last().unwrap().r#type, ConditionType::NfsService);
        assert_eq!(conditions.last().unwrap().status, ConditionStatus::False);
    }
}
