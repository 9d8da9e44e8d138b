//! Teardown Sequencer
//!
//! Releases the remote resources that depend on an SVM, in a fixed order,
//! before the SVM itself is deleted:
//!
//! 1. SVM peers of this SVM
//! 2. cluster peers to the desired remote addresses
//! 3. inter-cluster interfaces with a desired peering address
//! 4. S3 buckets of the SVM
//! 5. local S3 access-key secrets
//! 6. the SVM
//!
//! Every step is a bounded loop: delete what is left, wait, look again.
//! A step that still sees resources after its last attempt fails with
//! [`Error::TooManyAttempts`], which requeues the object instead of marking
//! it failed.

use crate::controller::audit::AuditRecorder;
use crate::controller::config::TeardownPolicy;
use crate::controller::metrics::Metrics;
use crate::crd::{ConditionType, StorageVirtualMachine};
use crate::domain::interface::address_matches;
use crate::domain::ports::{SecretWriter, Sleeper};
use crate::error::{Error, Result};
use crate::remote::models::{ClusterPeerRecord, IpInterfaceRecord, S3BucketRecord, SvmPeerRecord};
use crate::remote::paths;
use crate::remote::resources::Remote;
use crate::remote::settings::RemoteSettings;
use tracing::{debug, info, instrument, warn};

/// Dependent resource classes, in teardown order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    SvmPeers,
    ClusterPeers,
    InterclusterInterfaces,
    Buckets,
    AccessKeySecrets,
    Svm,
}

impl TeardownStep {
    pub const ORDER: [TeardownStep; 6] = [
        TeardownStep::SvmPeers,
        TeardownStep::ClusterPeers,
        TeardownStep::InterclusterInterfaces,
        TeardownStep::Buckets,
        TeardownStep::AccessKeySecrets,
        TeardownStep::Svm,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            TeardownStep::SvmPeers => "svm-peers",
            TeardownStep::ClusterPeers => "cluster-peers",
            TeardownStep::InterclusterInterfaces => "intercluster-interfaces",
            TeardownStep::Buckets => "buckets",
            TeardownStep::AccessKeySecrets => "access-key-secrets",
            TeardownStep::Svm => "svm",
        }
    }
}

impl std::fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One remote object to delete
#[derive(Debug, Clone)]
struct Target {
    label: String,
    path: String,
}

/// Walks the dependents of one SVM in teardown order
pub struct TeardownSequencer<'a> {
    pub remote: &'a Remote,
    pub secrets: &'a dyn SecretWriter,
    pub sleeper: &'a dyn Sleeper,
    pub audit: &'a AuditRecorder,
    pub metrics: &'a Metrics,
    pub policy: &'a TeardownPolicy,
    pub settings: &'a RemoteSettings,
}

impl TeardownSequencer<'_> {
    /// Remove every dependent and then the SVM.
    ///
    /// Returns once the SVM is gone; the caller removes the finalizer.
    #[instrument(skip_all, fields(svm = %svm.spec.svm_name))]
    pub async fn run(&self, svm: &StorageVirtualMachine) -> Result<()> {
        for step in TeardownStep::ORDER {
            let result = self.step(step, svm).await;
            match &result {
                Ok(message) => {
                    self.metrics.record_teardown_step(step.label(), "completed");
                    let condition = condition_for(step);
                    self.audit.success(condition, "Removed", message.clone()).await;
                }
                Err(e @ Error::TooManyAttempts { .. }) => {
                    self.metrics.record_teardown_step(step.label(), "exhausted");
                    self.audit
                        .unknown(condition_for(step), e.reason(), e.to_string())
                        .await;
                }
                Err(e) => {
                    self.metrics.record_teardown_step(step.label(), "failed");
                    self.audit.error(condition_for(step), e).await;
                }
            }
            result?;
        }
        Ok(())
    }

    async fn step(&self, step: TeardownStep, svm: &StorageVirtualMachine) -> Result<String> {
        match step {
            TeardownStep::AccessKeySecrets => self.remove_secrets(svm).await,
            TeardownStep::Svm => self.remove_svm(svm).await,
            _ => self.drain(step, svm).await,
        }
    }

    // =========================================================================
    // Remote Dependents
    // =========================================================================

    async fn pending(&self, step: TeardownStep, svm: &StorageVirtualMachine) -> Result<Vec<Target>> {
        let peer = svm.spec.peer.as_ref();
        match step {
            TeardownStep::SvmPeers => {
                let peers: Vec<SvmPeerRecord> = self.remote.list(&paths::svm_peers(&svm.spec.svm_name)).await?;
                Ok(peers
                    .into_iter()
                    .filter_map(|p| {
                        let label = p.peer_svm_name().unwrap_or("unknown").to_string();
                        p.uuid.map(|uuid| Target {
                            label,
                            path: paths::svm_peer_item(&uuid),
                        })
                    })
                    .collect())
            }
            TeardownStep::ClusterPeers => {
                let Some(peer) = peer else { return Ok(Vec::new()) };
                let peers: Vec<ClusterPeerRecord> = self.remote.list(&paths::cluster_peers()).await?;
                Ok(peers
                    .into_iter()
                    .filter(|p| {
                        p.remote_addresses()
                            .iter()
                            .any(|a| peer.remote.ip_addresses.contains(a))
                    })
                    .filter_map(|p| {
                        let label = p.name.clone().unwrap_or_else(|| p.remote_addresses().join(","));
                        p.uuid.map(|uuid| Target {
                            label,
                            path: paths::cluster_peer_item(&uuid),
                        })
                    })
                    .collect())
            }
            TeardownStep::InterclusterInterfaces => {
                let Some(peer) = peer else { return Ok(Vec::new()) };
                let path = paths::cluster_interfaces(
                    &self.settings.ipspace,
                    Some(&self.settings.intercluster_service_policy),
                );
                let interfaces: Vec<IpInterfaceRecord> = self.remote.list(&path).await?;
                Ok(interfaces
                    .into_iter()
                    .filter(|i| {
                        let address = i.ip.as_ref().map(|ip| ip.address.as_str()).unwrap_or_default();
                        peer.interfaces
                            .iter()
                            .any(|wanted| address_matches(&wanted.ip_address, address))
                    })
                    .filter_map(|i| {
                        i.uuid.map(|uuid| Target {
                            label: i.name,
                            path: paths::interface_item(&uuid),
                        })
                    })
                    .collect())
            }
            TeardownStep::Buckets => {
                let Some(uuid) = svm.svm_uuid() else { return Ok(Vec::new()) };
                let buckets: Vec<S3BucketRecord> = self.remote.list(&paths::s3_buckets_list(uuid)).await?;
                Ok(buckets
                    .into_iter()
                    .filter_map(|b| {
                        b.uuid.map(|bucket| Target {
                            label: b.name,
                            path: paths::s3_bucket_item(uuid, &bucket),
                        })
                    })
                    .collect())
            }
            TeardownStep::AccessKeySecrets | TeardownStep::Svm => Ok(Vec::new()),
        }
    }

    async fn drain(&self, step: TeardownStep, svm: &StorageVirtualMachine) -> Result<String> {
        let attempts = self.policy.attempts.max(1);
        let mut removed = 0usize;

        for attempt in 1..=attempts {
            let targets = self.pending(step, svm).await?;
            if targets.is_empty() {
                debug!(%step, attempt, "Nothing left to remove");
                return Ok(format!("removed {} {}", removed, step));
            }

            for target in targets {
                match self.remote.remove(&target.path).await {
                    Ok(_) => {
                        info!(%step, target = %target.label, "Removed");
                        removed += 1;
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => {
                        warn!(%step, target = %target.label, attempt, error = %e, "Removal failed");
                    }
                }
            }
            self.sleeper.sleep(self.policy.interval).await;
        }

        if self.pending(step, svm).await?.is_empty() {
            Ok(format!("removed {} {}", removed, step))
        } else {
            Err(Error::TooManyAttempts {
                resource: step.to_string(),
                attempts,
            })
        }
    }

    // =========================================================================
    // Local Secrets
    // =========================================================================

    async fn remove_secrets(&self, svm: &StorageVirtualMachine) -> Result<String> {
        let Some(s3) = svm.spec.s3.as_ref() else {
            return Ok("no access-key secrets configured".to_string());
        };

        let namespace = svm.namespace_or_default();
        let mut remaining: Vec<(String, String)> = s3
            .users
            .iter()
            .map(|u| {
                (
                    svm.s3_secret_name(&u.name),
                    u.namespace.clone().unwrap_or_else(|| namespace.clone()),
                )
            })
            .collect();
        let total = remaining.len();
        let attempts = self.policy.attempts.max(1);

        for attempt in 1..=attempts {
            let mut failed = Vec::new();
            for (name, ns) in remaining {
                if let Err(e) = self.secrets.delete(&name, &ns).await {
                    warn!(secret = %name, namespace = %ns, attempt, error = %e, "Secret removal failed");
                    failed.push((name, ns));
                }
            }
            remaining = failed;
            if remaining.is_empty() {
                return Ok(format!("removed {} access-key secret(s)", total));
            }
            if attempt < attempts {
                self.sleeper.sleep(self.policy.interval).await;
            }
        }

        Err(Error::TooManyAttempts {
            resource: TeardownStep::AccessKeySecrets.to_string(),
            attempts,
        })
    }

    // =========================================================================
    // SVM
    // =========================================================================

    async fn remove_svm(&self, svm: &StorageVirtualMachine) -> Result<String> {
        let Some(uuid) = svm.svm_uuid() else {
            return Ok("no remote SVM recorded".to_string());
        };
        let attempts = self.policy.attempts.max(1);

        for attempt in 1..=attempts {
            match self.remote.remove(&paths::svm_item(uuid)).await {
                Ok(_) => {
                    info!(uuid, "SVM deleted");
                    return Ok(format!("SVM {} deleted", uuid));
                }
                Err(e) if e.is_not_found() => {
                    info!(uuid, "SVM already gone");
                    return Ok(format!("SVM {} already gone", uuid));
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!(uuid, attempt, error = %e, "SVM deletion failed");
                    if attempt < attempts {
                        self.sleeper.sleep(self.policy.interval).await;
                    }
                }
            }
        }

        Err(Error::TooManyAttempts {
            resource: format!("svm {}", uuid),
            attempts,
        })
    }
}

fn condition_for(step: TeardownStep) -> ConditionType {
    match step {
        TeardownStep::Svm => ConditionType::SvmDeletion,
        _ => ConditionType::Teardown,
    }
}
