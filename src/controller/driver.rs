//! Reconciliation Driver - The "Brain"
//!
//! Runs one pass for one StorageVirtualMachine and answers with a
//! [`Directive`]. A pass walks these phases, stopping at the first error:
//!
//! ```text
//! discover -> host -> cluster-admin credential -> connect
//!     -> (deleting?) teardown
//!     -> lookup -> create | update -> SVM-admin account -> feature pipeline
//! ```
//!
//! Every phase leaves a condition record. Errors become directives through
//! [`Error::action`]: configuration and ambiguity errors stop, transient
//! errors retry, teardown backlog retries after a fixed delay.

use crate::controller::audit::AuditRecorder;
use crate::controller::config::ReconcilerConfig;
use crate::controller::features::{self, FeatureContext, FeatureOutcome};
use crate::controller::metrics::Metrics;
use crate::controller::teardown::TeardownSequencer;
use crate::crd::{ConditionType, DeletionPolicy, StorageVirtualMachine};
use crate::domain::credentials::{resolve_cluster_admin, resolve_svm_admin};
use crate::domain::host::ManagementHost;
use crate::domain::interface::DesiredInterface;
use crate::domain::ports::{
    AuditSinkRef, CredentialResolverRef, DesiredStateSourceRef, ObjectKey, SecretWriterRef, SleeperRef,
    StorageApiConnectorRef,
};
use crate::error::{Error, ErrorAction, Result};
use crate::remote::jobs::JobTracker;
use crate::remote::models::{AccountRecord, SvmRecord};
use crate::remote::paths;
use crate::remote::resources::Remote;
use crate::remote::settings::{ClusterVersion, SVM_ADMIN_APPLICATIONS};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

// =============================================================================
// Directive
// =============================================================================

/// What the invoking framework should do after a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Converged; come back at the regular resync interval
    Done,
    /// Run another pass after the delay
    RetryAfter(Duration),
    /// Do not retry until the object or its secrets change
    Stop,
}

// =============================================================================
// Ports
// =============================================================================

/// Collaborators of the driver
#[derive(Clone)]
pub struct Ports {
    pub source: DesiredStateSourceRef,
    pub credentials: CredentialResolverRef,
    pub connector: StorageApiConnectorRef,
    pub audit: AuditSinkRef,
    pub secrets: SecretWriterRef,
    pub sleeper: SleeperRef,
}

/// Result of looking the remote SVM up
#[derive(Debug)]
enum Lookup {
    /// Found by the recorded identifier
    Found(SvmRecord),
    /// Found by name and adopted
    Adopted(SvmRecord),
    Missing,
}

// =============================================================================
// Reconciler
// =============================================================================

/// Drives reconciliation passes
pub struct Reconciler {
    ports: Ports,
    metrics: Arc<Metrics>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(ports: Ports, metrics: Arc<Metrics>, config: ReconcilerConfig) -> Self {
        Self {
            ports,
            metrics,
            config,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Run one pass for `key`
    #[instrument(skip(self), fields(object = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Directive {
        let started = Instant::now();
        let result = self.pass(key).await;

        let (outcome, directive) = match &result {
            Ok(Directive::Done) => ("success", Directive::Done),
            Ok(directive) => ("pending", *directive),
            Err(e) => {
                let directive = self.directive_for(e);
                if directive == Directive::Stop {
                    error!(error = %e, "Reconciliation stopped until the object changes");
                    ("stopped", directive)
                } else {
                    warn!(error = %e, ?directive, "Reconciliation failed, will retry");
                    ("retry", directive)
                }
            }
        };

        self.metrics.record_reconcile(outcome, started.elapsed());
        directive
    }

    /// Map an error onto a directive
    pub fn directive_for(&self, err: &Error) -> Directive {
        match err.action() {
            ErrorAction::RequeueWithBackoff => Directive::RetryAfter(self.config.retry_interval),
            ErrorAction::RequeueAfter(delay) => Directive::RetryAfter(delay),
            ErrorAction::NoRequeue => Directive::Stop,
        }
    }

    async fn pass(&self, key: &ObjectKey) -> Result<Directive> {
        let Some(svm) = self.ports.source.get(key).await? else {
            debug!("Object no longer exists");
            return Ok(Directive::Done);
        };
        let audit = AuditRecorder::new(self.ports.audit.clone(), key.clone(), self.config.audit.clone());

        // Management host
        let host = checked(&audit, ConditionType::ClusterManagementHost, ManagementHost::parse(&svm.spec.cluster_host)).await?;
        audit
            .success(ConditionType::ClusterManagementHost, "Valid", format!("management host {}", host))
            .await;

        // Cluster-admin credential
        let admin = checked(
            &audit,
            ConditionType::ClusterCredentials,
            resolve_cluster_admin(self.ports.credentials.as_ref(), &svm).await,
        )
        .await?;
        audit
            .success(
                ConditionType::ClusterCredentials,
                "Resolved",
                format!("cluster credentials {} resolved", svm.spec.cluster_credentials.name),
            )
            .await;

        // Remote client
        let api = checked(
            &audit,
            ConditionType::RemoteConnection,
            self.ports.connector.connect(&host, &admin).await,
        )
        .await?;
        let remote = Remote::new(
            api,
            JobTracker::new(self.config.poll.clone(), self.ports.sleeper.clone()),
            self.metrics.clone(),
        );
        let version = checked(&audit, ConditionType::RemoteConnection, remote.cluster_version().await).await?;
        audit
            .success(
                ConditionType::RemoteConnection,
                "Connected",
                format!("connected to {} (release {})", host, version),
            )
            .await;

        if svm.is_deleting() {
            return self.teardown(key, &svm, &remote, &audit).await;
        }

        // Existence
        let lookup = checked(&audit, ConditionType::SvmLookup, self.lookup(key, &svm, &remote).await).await?;
        match lookup {
            Lookup::Missing => {
                audit
                    .success(
                        ConditionType::SvmLookup,
                        "NotFound",
                        format!("SVM {} does not exist", svm.spec.svm_name),
                    )
                    .await;
                self.create(key, &svm, &remote, &audit).await
            }
            Lookup::Found(record) => {
                audit
                    .success(ConditionType::SvmLookup, "Found", format!("SVM {} found", svm.spec.svm_name))
                    .await;
                self.update(key, &svm, &remote, &audit, record, version).await
            }
            Lookup::Adopted(record) => {
                audit
                    .success(
                        ConditionType::SvmLookup,
                        "Adopted",
                        format!(
                            "existing SVM {} adopted ({})",
                            svm.spec.svm_name,
                            record.uuid.as_deref().unwrap_or_default()
                        ),
                    )
                    .await;
                self.update(key, &svm, &remote, &audit, record, version).await
            }
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    async fn lookup(&self, key: &ObjectKey, svm: &StorageVirtualMachine, remote: &Remote) -> Result<Lookup> {
        if let Some(uuid) = svm.svm_uuid() {
            let found: Option<SvmRecord> = remote.fetch_optional(&paths::svm(uuid)).await?;
            if let Some(mut record) = found {
                record.uuid.get_or_insert_with(|| uuid.to_string());
                return Ok(Lookup::Found(record));
            }
            warn!(uuid, "Recorded SVM no longer exists on the remote cluster");
        }

        let candidates: Vec<SvmRecord> = remote.list(&paths::svm_by_name(&svm.spec.svm_name)).await?;
        let Some(record) = candidates
            .into_iter()
            .find(|r| r.name == svm.spec.svm_name && r.uuid.is_some())
        else {
            return Ok(Lookup::Missing);
        };

        let uuid = record.uuid.clone().unwrap_or_default();
        info!(uuid = %uuid, "Adopting existing SVM");
        self.ports.source.persist_svm_uuid(key, &uuid).await?;
        Ok(Lookup::Adopted(record))
    }

    // =========================================================================
    // Create Path
    // =========================================================================

    #[instrument(skip_all, fields(svm = %svm.spec.svm_name))]
    async fn create(
        &self,
        key: &ObjectKey,
        svm: &StorageVirtualMachine,
        remote: &Remote,
        audit: &AuditRecorder,
    ) -> Result<Directive> {
        let body = checked(audit, ConditionType::SvmCreation, self.creation_payload(svm)).await?;

        info!("Creating SVM");
        let mutation = checked(audit, ConditionType::SvmCreation, remote.create(paths::SVMS, &body).await).await?;
        let uuid = mutation.created_id().ok_or_else(|| Error::UnexpectedResponse {
            path: paths::SVMS.to_string(),
            reason: "SVM creation did not report an identifier".to_string(),
        });
        let uuid = checked(audit, ConditionType::SvmCreation, uuid).await?;

        checked(
            audit,
            ConditionType::SvmCreation,
            self.ports.source.persist_svm_uuid(key, &uuid).await,
        )
        .await?;
        audit
            .success(ConditionType::SvmCreation, "Created", format!("SVM {} created ({})", svm.spec.svm_name, uuid))
            .await;
        info!(uuid = %uuid, "SVM created");

        checked(audit, ConditionType::Finalizer, self.ports.source.add_finalizer(key).await).await?;
        audit.success(ConditionType::Finalizer, "Added", "finalizer added").await;

        self.admin_account(svm, remote, audit, &uuid).await?;
        Ok(Directive::Done)
    }

    fn creation_payload(&self, svm: &StorageVirtualMachine) -> Result<Value> {
        let spec = &svm.spec;
        let mut body = json!({ "name": spec.svm_name });
        if let Some(comment) = &spec.svm_comment {
            body["comment"] = json!(comment);
        }
        if let Some(aggregates) = &spec.aggregates {
            let names: Vec<Value> = aggregates.iter().map(|a| json!({ "name": a.name })).collect();
            body["aggregates"] = Value::Array(names);
        }
        if let Some(management) = &spec.management {
            let desired = DesiredInterface::from_spec(management, &self.config.remote.management_service_policy)?;
            body["ip_interfaces"] = json!([desired.embedded_payload()]);
        }
        Ok(body)
    }

    // =========================================================================
    // Update Path
    // =========================================================================

    #[instrument(skip_all, fields(svm = %svm.spec.svm_name))]
    async fn update(
        &self,
        key: &ObjectKey,
        svm: &StorageVirtualMachine,
        remote: &Remote,
        audit: &AuditRecorder,
        record: SvmRecord,
        version: ClusterVersion,
    ) -> Result<Directive> {
        let uuid = record
            .uuid
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| Error::UnexpectedResponse {
                path: paths::SVMS.to_string(),
                reason: format!("SVM {} has no identifier", svm.spec.svm_name),
            });
        let uuid = checked(audit, ConditionType::SvmUpdate, uuid).await?;

        if !svm.has_finalizer() {
            checked(audit, ConditionType::Finalizer, self.ports.source.add_finalizer(key).await).await?;
            audit.success(ConditionType::Finalizer, "Added", "finalizer restored").await;
        }

        let result = self.update_svm(svm, remote, &record, &uuid).await;
        if let Some(message) = checked(audit, ConditionType::SvmUpdate, result).await? {
            audit.success(ConditionType::SvmUpdate, "Updated", message).await;
        }

        self.admin_account(svm, remote, audit, &uuid).await?;

        let ctx = FeatureContext {
            remote,
            audit,
            settings: &self.config.remote,
            version,
            svm,
            svm_uuid: &uuid,
            record: &record,
            credentials: self.ports.credentials.as_ref(),
            secrets: self.ports.secrets.as_ref(),
        };

        let mut pending = Vec::new();
        for feature in features::pipeline() {
            if !feature.is_configured(&svm.spec) {
                continue;
            }
            debug!(feature = feature.name(), "Reconciling feature");
            match feature.reconcile(&ctx).await? {
                FeatureOutcome::Converged => {}
                FeatureOutcome::Pending(message) => {
                    info!(feature = feature.name(), %message, "Feature waiting on the remote side");
                    pending.push(message);
                }
            }
        }

        if pending.is_empty() {
            Ok(Directive::Done)
        } else {
            Ok(Directive::RetryAfter(self.config.pending_interval))
        }
    }

    /// Patch SVM-level fields that drifted; `None` when nothing changed
    async fn update_svm(
        &self,
        svm: &StorageVirtualMachine,
        remote: &Remote,
        record: &SvmRecord,
        uuid: &str,
    ) -> Result<Option<String>> {
        let mut body = Map::new();
        if let Some(comment) = &svm.spec.svm_comment {
            if record.comment.as_deref().unwrap_or_default() != comment {
                body.insert("comment".into(), json!(comment));
            }
        }

        if body.is_empty() {
            debug!("SVM fields in sync");
            return Ok(None);
        }

        let fields: Vec<String> = body.keys().cloned().collect();
        info!(?fields, "Updating SVM");
        remote.update(&paths::svm_item(uuid), &Value::Object(body)).await?;
        Ok(Some(format!("SVM updated ({})", fields.join(", "))))
    }

    // =========================================================================
    // SVM-admin Account
    // =========================================================================

    async fn admin_account(
        &self,
        svm: &StorageVirtualMachine,
        remote: &Remote,
        audit: &AuditRecorder,
        uuid: &str,
    ) -> Result<()> {
        let result = self.converge_admin_account(svm, remote, uuid).await;
        if let Some(message) = checked(audit, ConditionType::SvmAdminAccount, result).await? {
            audit.success(ConditionType::SvmAdminAccount, "Reconciled", message).await;
        }
        Ok(())
    }

    async fn converge_admin_account(
        &self,
        svm: &StorageVirtualMachine,
        remote: &Remote,
        uuid: &str,
    ) -> Result<Option<String>> {
        let Some(credentials) = resolve_svm_admin(self.ports.credentials.as_ref(), svm).await? else {
            return Ok(None);
        };
        let role = &self.config.remote.svm_admin_role;
        let username = credentials.username();

        let accounts: Vec<AccountRecord> = remote.list(&paths::account(uuid, username)).await?;
        let Some(current) = accounts.into_iter().find(|a| a.name == username) else {
            let applications: Vec<Value> = SVM_ADMIN_APPLICATIONS
                .iter()
                .map(|app| json!({ "application": app, "authentication_methods": ["password"] }))
                .collect();
            let body = json!({
                "name": username,
                "password": credentials.password(),
                "owner": { "uuid": uuid },
                "role": { "name": role },
                "applications": applications,
                "locked": false,
            });
            info!(account = %username, "Creating SVM admin account");
            remote.create(paths::ACCOUNTS, &body).await?;
            return Ok(Some(format!("account {} created", username)));
        };

        let mut body = Map::new();
        if current.role.as_ref().and_then(|r| r.name.as_deref()) != Some(role.as_str()) {
            body.insert("role".into(), json!({ "name": role }));
        }
        if current.locked != Some(false) {
            body.insert("locked".into(), json!(false));
        }
        if body.is_empty() {
            debug!(account = %username, "SVM admin account in sync");
            return Ok(Some(format!("account {} in sync", username)));
        }

        let fields: Vec<String> = body.keys().cloned().collect();
        info!(account = %username, ?fields, "Updating SVM admin account");
        remote
            .update(&paths::account_item(uuid, username), &Value::Object(body))
            .await?;
        Ok(Some(format!("account {} updated ({})", username, fields.join(", "))))
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    #[instrument(skip_all, fields(svm = %svm.spec.svm_name, policy = %svm.spec.svm_deletion_policy))]
    async fn teardown(
        &self,
        key: &ObjectKey,
        svm: &StorageVirtualMachine,
        remote: &Remote,
        audit: &AuditRecorder,
    ) -> Result<Directive> {
        if !svm.has_finalizer() {
            debug!("Deleting without finalizer, nothing to release");
            return Ok(Directive::Done);
        }

        match svm.spec.svm_deletion_policy {
            DeletionPolicy::Retain => {
                info!("Retaining remote SVM");
                audit
                    .success(
                        ConditionType::Finalizer,
                        "Retained",
                        "deletion policy is retain, remote SVM left in place",
                    )
                    .await;
            }
            DeletionPolicy::Delete => {
                TeardownSequencer {
                    remote,
                    secrets: self.ports.secrets.as_ref(),
                    sleeper: self.ports.sleeper.as_ref(),
                    audit,
                    metrics: &self.metrics,
                    policy: &self.config.teardown,
                    settings: &self.config.remote,
                }
                .run(svm)
                .await?;
                audit
                    .success(ConditionType::Finalizer, "Released", "remote resources removed")
                    .await;
            }
        }

        self.ports.source.remove_finalizer(key).await?;
        info!("Finalizer removed");
        Ok(Directive::Done)
    }
}

/// Record a failure condition for `condition_type` when `result` is an error
async fn checked<T>(audit: &AuditRecorder, condition_type: ConditionType, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        audit.error(condition_type, e).await;
    }
    result
}
