//! S3 object storage: server, service policy, interfaces, users and buckets
//!
//! Users and buckets are create-only. Access keys are returned once, when a
//! user is created, and are written to a local secret best-effort: a failed
//! write is logged and never retried, so keys are not regenerated on every
//! pass.

use super::interfaces::reconcile_interfaces;
use super::{FeatureContext, FeatureOutcome, FeatureReconciler};
use crate::crd::{ConditionType, S3Spec, StorageVirtualMachineSpec};
use crate::domain::interface::InterfaceScope;
use crate::domain::ports::{AccessKeyPair, ObjectKey};
use crate::error::Result;
use crate::remote::models::{S3BucketRecord, S3ServiceRecord, S3UserRecord, ServicePolicyRecord};
use crate::remote::paths;
use crate::remote::settings::{DEFAULT_S3_HTTPS_PORT, DEFAULT_S3_HTTP_PORT, S3_POLICY_SERVICES};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use tracing::{debug, info, warn};

pub struct ObjectStorage;

#[async_trait]
impl FeatureReconciler for ObjectStorage {
    fn name(&self) -> &'static str {
        "object-storage"
    }

    fn is_configured(&self, spec: &StorageVirtualMachineSpec) -> bool {
        spec.s3.is_some()
    }

    async fn reconcile(&self, ctx: &FeatureContext<'_>) -> Result<FeatureOutcome> {
        let Some(spec) = ctx.svm.spec.s3.as_ref() else {
            return Ok(FeatureOutcome::Converged);
        };

        let result = service(ctx, spec).await;
        let message = ctx.checked(ConditionType::S3Service, result).await?;
        ctx.audit.success(ConditionType::S3Service, "Reconciled", message).await;

        let result = interfaces(ctx, spec).await;
        let message = ctx.checked(ConditionType::S3Interfaces, result).await?;
        ctx.audit.success(ConditionType::S3Interfaces, "Reconciled", message).await;

        let result = users(ctx, spec).await;
        let message = ctx.checked(ConditionType::S3Users, result).await?;
        ctx.audit.success(ConditionType::S3Users, "Reconciled", message).await;

        let result = buckets(ctx, spec).await;
        let message = ctx.checked(ConditionType::S3Buckets, result).await?;
        ctx.audit.success(ConditionType::S3Buckets, "Reconciled", message).await;

        Ok(FeatureOutcome::Converged)
    }
}

// =============================================================================
// Server
// =============================================================================

fn desired_fields(spec: &S3Spec) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("enabled".into(), json!(spec.enabled));
    if let Some(name) = &spec.name {
        fields.insert("name".into(), json!(name));
    }
    if let Some(http) = spec.http_enabled {
        fields.insert("is_http_enabled".into(), json!(http));
    }
    if let Some(https) = spec.https_enabled {
        fields.insert("is_https_enabled".into(), json!(https));
    }
    if let Some(port) = spec.port {
        fields.insert("port".into(), json!(port));
    }
    if let Some(port) = spec.secure_port {
        fields.insert("secure_port".into(), json!(port));
    }
    if let Some(certificate) = &spec.certificate {
        fields.insert("certificate".into(), json!({ "name": certificate }));
    }
    fields
}

fn current_fields(record: &S3ServiceRecord) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("enabled".into(), json!(record.enabled));
    fields.insert("name".into(), json!(record.name));
    fields.insert("is_http_enabled".into(), json!(record.is_http_enabled));
    fields.insert("is_https_enabled".into(), json!(record.is_https_enabled));
    fields.insert("port".into(), json!(record.port));
    fields.insert("secure_port".into(), json!(record.secure_port));
    fields.insert(
        "certificate".into(),
        json!({ "name": record.certificate.as_ref().and_then(|c| c.name.clone()) }),
    );
    fields
}

async fn service(ctx: &FeatureContext<'_>, spec: &S3Spec) -> Result<String> {
    let current: Option<S3ServiceRecord> = ctx.remote.fetch_optional(&paths::s3_service(ctx.svm_uuid)).await?;
    let desired = desired_fields(spec);

    let Some(current) = current else {
        let mut body = desired;
        body.insert("svm".into(), json!({ "uuid": ctx.svm_uuid }));
        if spec.http_enabled == Some(true) && spec.port.is_none() {
            body.insert("port".into(), json!(DEFAULT_S3_HTTP_PORT));
        }
        if spec.https_enabled.unwrap_or(true) && spec.secure_port.is_none() {
            body.insert("secure_port".into(), json!(DEFAULT_S3_HTTPS_PORT));
        }
        info!(svm = %ctx.svm_uuid, "Creating S3 server");
        ctx.remote.create(paths::S3_SERVICES, &Value::Object(body)).await?;
        return Ok("S3 server created".to_string());
    };

    let actual = current_fields(&current);
    let changes: Map<String, Value> = desired
        .into_iter()
        .filter(|(field, value)| actual.get(field) != Some(value))
        .collect();

    if changes.is_empty() {
        debug!(svm = %ctx.svm_uuid, "S3 server in sync");
        return Ok("S3 server in sync".to_string());
    }

    let fields: Vec<String> = changes.keys().cloned().collect();
    info!(svm = %ctx.svm_uuid, ?fields, "Updating S3 server");
    ctx.remote
        .update(&paths::s3_service_item(ctx.svm_uuid), &Value::Object(changes))
        .await?;
    Ok(format!("S3 server updated ({})", fields.join(", ")))
}

// =============================================================================
// Interfaces
// =============================================================================

async fn interfaces(ctx: &FeatureContext<'_>, spec: &S3Spec) -> Result<String> {
    let policy = ctx.settings.s3_service_policy.as_str();
    let existing: Vec<ServicePolicyRecord> = ctx
        .remote
        .list(&paths::service_policy_by_name(ctx.svm_uuid, policy))
        .await?;

    if existing.is_empty() {
        let body = json!({
            "name": policy,
            "svm": { "uuid": ctx.svm_uuid },
            "services": S3_POLICY_SERVICES,
        });
        info!(svm = %ctx.svm_uuid, policy, "Creating S3 service policy");
        ctx.remote.create(paths::SERVICE_POLICIES, &body).await?;
    }

    let report = reconcile_interfaces(ctx.remote, &InterfaceScope::svm(ctx.svm_uuid), policy, &spec.interfaces).await?;
    Ok(report.summary())
}

// =============================================================================
// Users
// =============================================================================

fn access_keys(body: &Value) -> Option<AccessKeyPair> {
    let record = body.pointer("/records/0").unwrap_or(body);
    let user: S3UserRecord = serde_json::from_value(record.clone()).ok()?;
    Some(AccessKeyPair {
        access_key_id: user.access_key?,
        secret_access_key: user.secret_key?,
    })
}

async fn users(ctx: &FeatureContext<'_>, spec: &S3Spec) -> Result<String> {
    let existing: Vec<S3UserRecord> = ctx.remote.list(&paths::s3_users_list(ctx.svm_uuid)).await?;
    let existing: HashSet<&str> = existing.iter().map(|u| u.name.as_str()).collect();

    let owner = ObjectKey::of(ctx.svm);
    let default_namespace = ctx.svm.namespace_or_default();
    let mut created = Vec::new();

    for user in spec.users.iter().filter(|u| !existing.contains(u.name.as_str())) {
        info!(user = %user.name, "Creating S3 user");
        let mutation = ctx
            .remote
            .create(&paths::s3_users(ctx.svm_uuid), &json!({ "name": user.name }))
            .await?;
        created.push(user.name.clone());

        let secret_name = ctx.svm.s3_secret_name(&user.name);
        let namespace = user.namespace.as_deref().unwrap_or(&default_namespace);
        let Some(keys) = access_keys(&mutation.body) else {
            warn!(user = %user.name, "S3 user created without access keys in the response");
            continue;
        };
        if let Err(e) = ctx
            .secrets
            .create_access_keys(&secret_name, namespace, &keys, &owner)
            .await
        {
            warn!(user = %user.name, secret = %secret_name, error = %e, "Failed to store S3 access keys");
        }
    }

    if created.is_empty() {
        Ok(format!("{} S3 user(s) present", spec.users.len()))
    } else {
        Ok(format!("created S3 user(s): {}", created.join(", ")))
    }
}

// =============================================================================
// Buckets
// =============================================================================

async fn buckets(ctx: &FeatureContext<'_>, spec: &S3Spec) -> Result<String> {
    let existing: Vec<S3BucketRecord> = ctx.remote.list(&paths::s3_buckets_list(ctx.svm_uuid)).await?;
    let existing: HashSet<&str> = existing.iter().map(|b| b.name.as_str()).collect();
    let mut created = Vec::new();

    for bucket in spec.buckets.iter().filter(|b| !existing.contains(b.name.as_str())) {
        let mut body = json!({
            "name": bucket.name,
            "size": ctx.settings.bucket_size(bucket.size),
        });
        if let Some(comment) = &bucket.comment {
            body["comment"] = json!(comment);
        }
        info!(bucket = %bucket.name, "Creating S3 bucket");
        ctx.remote.create(&paths::s3_buckets(ctx.svm_uuid), &body).await?;
        created.push(bucket.name.clone());
    }

    if created.is_empty() {
        Ok(format!("{} S3 bucket(s) present", spec.buckets.len()))
    } else {
        Ok(format!("created S3 bucket(s): {}", created.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{S3BucketSpec, S3UserSpec};
    use crate::remote::settings::MIN_BUCKET_SIZE_BYTES;
    use crate::testing::FeatureHarness;

    fn s3_spec() -> S3Spec {
        S3Spec {
            enabled: true,
            name: Some("s3.example.com".into()),
            users: vec![
                S3UserSpec {
                    name: "alice".into(),
                    namespace: Some("tenants".into()),
                },
                S3UserSpec {
                    name: "bob".into(),
                    namespace: None,
                },
            ],
            buckets: vec![
                S3BucketSpec {
                    name: "logs".into(),
                    size: Some(1024),
                    comment: None,
                },
                S3BucketSpec {
                    name: "backups".into(),
                    size: None,
                    comment: Some("nightly".into()),
                },
            ],
            ..Default::default()
        }
    }

    fn converged_server(harness: &FeatureHarness) {
        harness.api.respond(
            &paths::s3_service("svm-1"),
            json!({"enabled": true, "name": "s3.example.com", "is_https_enabled": true, "secure_port": 443}),
        );
        harness.api.respond(
            &paths::service_policy_by_name("svm-1", "default-data-s3"),
            json!({"records": [{"uuid": "p1", "name": "default-data-s3"}]}),
        );
    }

    #[tokio::test]
    async fn test_new_users_get_secrets_and_buckets_get_size_floor() {
        let harness = FeatureHarness::with(|spec| spec.s3 = Some(s3_spec()));
        converged_server(&harness);
        harness.api.respond(
            &paths::s3_users_list("svm-1"),
            json!({"records": [{"name": "bob"}]}),
        );
        harness.api.respond_to(
            "POST",
            &paths::s3_users("svm-1"),
            json!({"records": [{"name": "alice", "access_key": "AK1", "secret_key": "SK1"}]}),
        );
        harness.api.respond(
            &paths::s3_buckets_list("svm-1"),
            json!({"records": [{"uuid": "b1", "name": "backups"}]}),
        );

        ObjectStorage.reconcile(&harness.ctx()).await.unwrap();

        let calls = harness.api.mutating_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].body, Some(json!({"name": "alice"})));
        assert_eq!(calls[1].path, paths::s3_buckets("svm-1"));
        assert_eq!(calls[1].body.as_ref().unwrap()["name"], "logs");
        assert_eq!(calls[1].body.as_ref().unwrap()["size"], MIN_BUCKET_SIZE_BYTES);

        let secrets = harness.secrets.created();
        assert_eq!(secrets.len(), 1);
        assert_eq!(secrets[0].name, "svm-a-s3-alice");
        assert_eq!(secrets[0].namespace, "tenants");
        assert_eq!(secrets[0].keys.access_key_id, "AK1");
    }

    #[tokio::test]
    async fn test_secret_failure_does_not_fail_the_step() {
        let harness = FeatureHarness::with(|spec| {
            let mut s3 = s3_spec();
            s3.buckets.clear();
            spec.s3 = Some(s3);
        });
        converged_server(&harness);
        harness.api.respond_to(
            "POST",
            &paths::s3_users("svm-1"),
            json!({"records": [{"name": "alice", "access_key": "AK1", "secret_key": "SK1"}]}),
        );
        harness.secrets.fail_writes();

        ObjectStorage.reconcile(&harness.ctx()).await.unwrap();
        assert!(harness.secrets.created().is_empty());
    }

    #[tokio::test]
    async fn test_missing_server_and_policy_are_created() {
        let harness = FeatureHarness::with(|spec| {
            spec.s3 = Some(S3Spec {
                enabled: true,
                http_enabled: Some(true),
                ..Default::default()
            })
        });

        ObjectStorage.reconcile(&harness.ctx()).await.unwrap();

        let calls = harness.api.mutating_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].path, paths::S3_SERVICES);
        assert_eq!(calls[0].body.as_ref().unwrap()["port"], 80);
        assert_eq!(calls[0].body.as_ref().unwrap()["secure_port"], 443);
        assert_eq!(calls[1].path, paths::SERVICE_POLICIES);
        assert_eq!(
            calls[1].body.as_ref().unwrap()["services"],
            json!(["data_core", "data_s3_server"])
        );
    }

    #[tokio::test]
    async fn test_server_patch_carries_only_differences() {
        let harness = FeatureHarness::with(|spec| {
            spec.s3 = Some(S3Spec {
                enabled: true,
                name: Some("new.example.com".into()),
                ..Default::default()
            })
        });
        converged_server(&harness);

        ObjectStorage.reconcile(&harness.ctx()).await.unwrap();

        let calls = harness.api.mutating_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].body, Some(json!({"name": "new.example.com"})));
    }
}
