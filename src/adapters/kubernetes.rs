//! Kubernetes adapters
//!
//! Desired state, credential secrets, access-key secrets and the status
//! condition trail, all backed by the API server.

use crate::controller::audit::{apply_record, is_repeat};
use crate::crd::{StorageVirtualMachine, SvmCondition, SVM_FINALIZER};
use crate::domain::ports::{
    AccessKeyPair, AuditSink, CredentialResolver, DesiredStateSource, HistoryMode, ObjectKey,
    SecretCredentials, SecretWriter,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Label marking secrets written by this operator
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Annotation naming the object an access-key secret belongs to
pub const OWNER_ANNOTATION: &str = "storage.billyronks.io/owner";
/// Secret key holding an S3 access key id
pub const ACCESS_KEY_ID: &str = "accessKeyID";
/// Secret key holding an S3 secret access key
pub const SECRET_ACCESS_KEY: &str = "secretAccessKey";

const USERNAME_KEY: &str = "username";
const PASSWORD_KEY: &str = "password";
const PASSPHRASE_KEY: &str = "passphrase";

fn is_api_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == code)
}

// =============================================================================
// Desired State
// =============================================================================

/// Reads StorageVirtualMachine objects and writes back uuid and finalizer
#[derive(Clone)]
pub struct KubeDesiredState {
    client: Client,
}

impl KubeDesiredState {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<StorageVirtualMachine> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn patch_finalizers(&self, key: &ObjectKey, finalizers: Vec<String>) -> Result<()> {
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        self.api(&key.namespace)
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DesiredStateSource for KubeDesiredState {
    async fn get(&self, key: &ObjectKey) -> Result<Option<StorageVirtualMachine>> {
        Ok(self.api(&key.namespace).get_opt(&key.name).await?)
    }

    async fn persist_svm_uuid(&self, key: &ObjectKey, uuid: &str) -> Result<()> {
        let patch = json!({ "spec": { "svmUuid": uuid } });
        self.api(&key.namespace)
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!(object = %key, uuid, "Persisted SVM uuid");
        Ok(())
    }

    async fn add_finalizer(&self, key: &ObjectKey) -> Result<()> {
        let svm = self
            .api(&key.namespace)
            .get_opt(&key.name)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "StorageVirtualMachine".to_string(),
                name: key.to_string(),
            })?;
        if svm.has_finalizer() {
            return Ok(());
        }
        let mut finalizers = svm.finalizers().to_vec();
        finalizers.push(SVM_FINALIZER.to_string());
        self.patch_finalizers(key, finalizers).await?;
        debug!(object = %key, "Finalizer added");
        Ok(())
    }

    async fn remove_finalizer(&self, key: &ObjectKey) -> Result<()> {
        let Some(svm) = self.api(&key.namespace).get_opt(&key.name).await? else {
            return Ok(());
        };
        if !svm.has_finalizer() {
            return Ok(());
        }
        let finalizers: Vec<String> = svm
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != SVM_FINALIZER)
            .cloned()
            .collect();
        match self.patch_finalizers(key, finalizers).await {
            Ok(()) => {
                debug!(object = %key, "Finalizer removed");
                Ok(())
            }
            Err(Error::Kube(e)) if is_api_status(&e, 404) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

// =============================================================================
// Secrets
// =============================================================================

/// Credential lookups and access-key secret writes
#[derive(Clone)]
pub struct KubeSecrets {
    client: Client,
}

impl KubeSecrets {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn fetch(&self, name: &str, namespace: &str) -> Result<Secret> {
        self.api(namespace)
            .get_opt(name)
            .await?
            .ok_or_else(|| Error::CredentialNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }
}

/// Non-empty UTF-8 value of one secret key
pub fn secret_field(secret: &Secret, field: &str) -> Result<String> {
    let malformed = || Error::CredentialMalformed {
        namespace: secret.namespace().unwrap_or_default(),
        name: secret.name_any(),
        field: field.to_string(),
    };

    let from_data = secret
        .data
        .as_ref()
        .and_then(|d| d.get(field))
        .map(|bytes| String::from_utf8(bytes.0.clone()).map_err(|_| malformed()))
        .transpose()?;
    let value = from_data.or_else(|| {
        secret
            .string_data
            .as_ref()
            .and_then(|d| d.get(field))
            .cloned()
    });

    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(malformed()),
    }
}

/// Opaque secret carrying one S3 user's access keys
pub fn access_key_secret(name: &str, namespace: &str, keys: &AccessKeyPair, owner: &ObjectKey) -> Secret {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), crate::NAME.to_string());
    let mut annotations = BTreeMap::new();
    annotations.insert(OWNER_ANNOTATION.to_string(), owner.to_string());
    let mut string_data = BTreeMap::new();
    string_data.insert(ACCESS_KEY_ID.to_string(), keys.access_key_id.clone());
    string_data.insert(SECRET_ACCESS_KEY.to_string(), keys.secret_access_key.clone());

    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        string_data: Some(string_data),
        ..Default::default()
    }
}

#[async_trait]
impl CredentialResolver for KubeSecrets {
    async fn resolve(&self, name: &str, namespace: &str) -> Result<SecretCredentials> {
        let secret = self.fetch(name, namespace).await?;
        Ok(SecretCredentials {
            username: secret_field(&secret, USERNAME_KEY)?,
            password: secret_field(&secret, PASSWORD_KEY)?,
        })
    }

    async fn resolve_passphrase(&self, name: &str, namespace: &str) -> Result<String> {
        let secret = self.fetch(name, namespace).await?;
        secret_field(&secret, PASSPHRASE_KEY)
    }
}

#[async_trait]
impl SecretWriter for KubeSecrets {
    async fn create_access_keys(
        &self,
        name: &str,
        namespace: &str,
        keys: &AccessKeyPair,
        owner: &ObjectKey,
    ) -> Result<()> {
        let secret = access_key_secret(name, namespace, keys, owner);
        let api = self.api(namespace);
        match api.create(&PostParams::default(), &secret).await {
            Ok(_) => {
                info!(secret = name, namespace, "Created access-key secret");
                Ok(())
            }
            Err(e) if is_api_status(&e, 409) => {
                let patch = json!({ "stringData": secret.string_data });
                api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
                info!(secret = name, namespace, "Updated existing access-key secret");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, name: &str, namespace: &str) -> Result<()> {
        match self.api(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                debug!(secret = name, namespace, "Deleted secret");
                Ok(())
            }
            Err(e) if is_api_status(&e, 404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Status Conditions
// =============================================================================

/// Writes condition records into the object's status subresource
#[derive(Clone)]
pub struct KubeAuditSink {
    client: Client,
}

impl KubeAuditSink {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AuditSink for KubeAuditSink {
    async fn append(
        &self,
        owner: &ObjectKey,
        record: SvmCondition,
        mode: HistoryMode,
        max_history: usize,
    ) -> Result<()> {
        let api: Api<StorageVirtualMachine> = Api::namespaced(self.client.clone(), &owner.namespace);
        let Some(svm) = api.get_opt(&owner.name).await? else {
            warn!(object = %owner, "Object gone, dropping condition record");
            return Ok(());
        };

        let mut conditions = svm.status.map(|s| s.conditions).unwrap_or_default();
        if is_repeat(&conditions, &record) {
            return Ok(());
        }
        apply_record(&mut conditions, record, mode, max_history);

        let patch = json!({
            "status": {
                "conditions": conditions,
                "lastReconcileTime": chrono::Utc::now(),
            }
        });
        match api
            .patch_status(&owner.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_api_status(&e, 404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
