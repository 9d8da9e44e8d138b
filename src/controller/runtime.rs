//! Kubernetes runtime wiring
//!
//! Feeds `StorageVirtualMachine` watch events into the [`Reconciler`] and
//! turns its directives into `kube::runtime` requeue actions. The controller
//! serializes passes per object.
//!
//! Only changes to the desired state wake the controller: a new
//! generation, a deletion request or a finalizer change. The condition
//! records a pass writes into the status subresource do not, so a stopped
//! object stays stopped and a converged one is revisited at the resync
//! interval.

use crate::controller::driver::{Directive, Reconciler};
use crate::crd::StorageVirtualMachine;
use crate::domain::ports::ObjectKey;
use crate::error::{Error, Result};
use futures::StreamExt;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Requeue action for a directive
pub fn to_action(directive: Directive, resync_interval: Duration) -> Action {
    match directive {
        Directive::Done => Action::requeue(resync_interval),
        Directive::RetryAfter(delay) => Action::requeue(delay),
        Directive::Stop => Action::await_change(),
    }
}

/// Fingerprint of the fields that warrant a new pass.
///
/// Status and `resourceVersion` are left out so the operator's own status
/// writes are filtered.
pub fn desired_state_key(svm: &StorageVirtualMachine) -> Option<u64> {
    let mut hasher = DefaultHasher::new();
    svm.metadata.generation.hash(&mut hasher);
    svm.is_deleting().hash(&mut hasher);
    svm.finalizers().hash(&mut hasher);
    Some(hasher.finish())
}

async fn reconcile(svm: Arc<StorageVirtualMachine>, reconciler: Arc<Reconciler>) -> Result<Action> {
    let key = ObjectKey::of(&svm);
    let directive = reconciler.reconcile(&key).await;
    debug!(object = %key, ?directive, "Pass finished");
    Ok(to_action(directive, reconciler.config().resync_interval))
}

fn error_policy(svm: Arc<StorageVirtualMachine>, err: &Error, reconciler: Arc<Reconciler>) -> Action {
    warn!(object = %ObjectKey::of(&svm), error = %err, "Reconcile error");
    to_action(reconciler.directive_for(err), reconciler.config().resync_interval)
}

/// Watch `StorageVirtualMachine` objects until `shutdown` fires.
///
/// With `namespace` set only that namespace is watched.
pub async fn run(client: Client, namespace: Option<String>, reconciler: Reconciler, shutdown: CancellationToken) {
    let api: Api<StorageVirtualMachine> = match &namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    info!(namespace = namespace.as_deref().unwrap_or("<all>"), "Starting StorageVirtualMachine controller");
    let (reader, writer) = reflector::store();
    let changes = watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .predicate_filter(desired_state_key);

    Controller::for_stream(changes, reader)
        .graceful_shutdown_on(shutdown.cancelled_owned())
        .run(reconcile, error_policy, Arc::new(reconciler))
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!(object = %object.name, "Reconciled"),
                Err(e) => warn!(error = %e, "Controller dispatch failed"),
            }
        })
        .await;
    info!("StorageVirtualMachine controller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ConditionStatus, ConditionType, StorageVirtualMachineStatus, SvmCondition};
    use crate::testing::test_svm;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn with_generation(generation: i64) -> StorageVirtualMachine {
        let mut svm = test_svm();
        svm.metadata.generation = Some(generation);
        svm.metadata.resource_version = Some("100".into());
        svm
    }

    #[test]
    fn test_status_writes_do_not_change_the_key() {
        let before = with_generation(3);
        let mut after = with_generation(3);
        after.metadata.resource_version = Some("101".into());
        after.status = Some(StorageVirtualMachineStatus {
            conditions: vec![SvmCondition {
                r#type: ConditionType::ClusterManagementHost,
                status: ConditionStatus::False,
                last_transition_time: Some(chrono::Utc::now()),
                reason: Some("InvalidHost".into()),
                message: Some("host must not carry a path or query".into()),
            }],
            last_reconcile_time: Some(chrono::Utc::now()),
        });

        assert_eq!(desired_state_key(&before), desired_state_key(&after));
    }

    #[test]
    fn test_desired_state_changes_change_the_key() {
        let base = desired_state_key(&with_generation(3));

        assert_ne!(desired_state_key(&with_generation(4)), base);

        let mut deleting = with_generation(3);
        deleting.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert_ne!(desired_state_key(&deleting), base);

        let mut finalized = with_generation(3);
        finalized.metadata.finalizers = Some(vec![crate::crd::SVM_FINALIZER.to_string()]);
        assert_ne!(desired_state_key(&finalized), base);
    }

    #[test]
    fn test_directive_mapping() {
        let resync = Duration::from_secs(300);
        assert_eq!(to_action(Directive::Done, resync), Action::requeue(resync));
        assert_eq!(
            to_action(Directive::RetryAfter(Duration::from_secs(15)), resync),
            Action::requeue(Duration::from_secs(15))
        );
        assert_eq!(to_action(Directive::Stop, resync), Action::await_change());
    }
}
