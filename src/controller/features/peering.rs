//! Inter-cluster peering
//!
//! Inter-cluster interfaces live at cluster scope. The cluster peer is
//! keyed by remote address and is only usable once the remote side has
//! answered and the relationship reports `available`; until then the
//! feature reports [`FeatureOutcome::Pending`] instead of failing. The SVM
//! peer is created once the cluster peer is available.

use super::interfaces::reconcile_interfaces;
use super::{FeatureContext, FeatureOutcome, FeatureReconciler};
use crate::crd::{ConditionType, PeerSpec, StorageVirtualMachineSpec};
use crate::domain::credentials::resolve_peer_passphrase;
use crate::domain::interface::InterfaceScope;
use crate::error::{Error, Result};
use crate::remote::models::{ClusterPeerRecord, SvmPeerRecord};
use crate::remote::paths;
use crate::remote::settings::{PEER_AVAILABLE_STATE, PEER_UNREACHABLE_CODES};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

pub struct Peering;

#[async_trait]
impl FeatureReconciler for Peering {
    fn name(&self) -> &'static str {
        "peering"
    }

    fn is_configured(&self, spec: &StorageVirtualMachineSpec) -> bool {
        spec.peer.is_some()
    }

    async fn reconcile(&self, ctx: &FeatureContext<'_>) -> Result<FeatureOutcome> {
        let Some(spec) = ctx.svm.spec.peer.as_ref() else {
            return Ok(FeatureOutcome::Converged);
        };

        // Inter-cluster interfaces
        let scope = InterfaceScope::Cluster {
            ipspace: ctx.settings.ipspace.clone(),
        };
        let result = reconcile_interfaces(ctx.remote, &scope, &ctx.settings.intercluster_service_policy, &spec.interfaces).await;
        let report = ctx.checked(ConditionType::PeerInterfaces, result).await?;
        let reason = if report.is_noop() { "InSync" } else { "Reconciled" };
        ctx.audit
            .success(ConditionType::PeerInterfaces, reason, report.summary())
            .await;

        // Cluster peer
        let result = cluster_peer(ctx, spec).await;
        let peer = match ctx.checked(ConditionType::ClusterPeer, result).await? {
            PeerState::Available(peer) => {
                ctx.audit
                    .success(
                        ConditionType::ClusterPeer,
                        "Available",
                        format!("cluster peer {} available", peer_label(&peer)),
                    )
                    .await;
                peer
            }
            PeerState::Waiting(message) => {
                ctx.audit
                    .unknown(ConditionType::ClusterPeer, "WaitingForRemote", message.clone())
                    .await;
                return Ok(FeatureOutcome::Pending(message));
            }
        };

        // SVM peer
        let result = svm_peer(ctx, spec, &peer).await;
        let message = ctx.checked(ConditionType::SvmPeer, result).await?;
        ctx.audit.success(ConditionType::SvmPeer, "Reconciled", message).await;

        Ok(FeatureOutcome::Converged)
    }
}

enum PeerState {
    Available(ClusterPeerRecord),
    Waiting(String),
}

fn peer_label(peer: &ClusterPeerRecord) -> String {
    peer.name
        .clone()
        .or_else(|| peer.uuid.clone())
        .unwrap_or_else(|| peer.remote_addresses().join(","))
}

/// Cluster peer whose remote addresses overlap the desired ones
pub fn find_cluster_peer<'a>(peers: &'a [ClusterPeerRecord], addresses: &[String]) -> Option<&'a ClusterPeerRecord> {
    peers
        .iter()
        .find(|p| p.remote_addresses().iter().any(|a| addresses.contains(a)))
}

async fn cluster_peer(ctx: &FeatureContext<'_>, spec: &PeerSpec) -> Result<PeerState> {
    let addresses = &spec.remote.ip_addresses;
    let peers: Vec<ClusterPeerRecord> = ctx.remote.list(&paths::cluster_peers()).await?;

    if let Some(peer) = find_cluster_peer(&peers, addresses) {
        return Ok(match peer.state() {
            Some(PEER_AVAILABLE_STATE) => PeerState::Available(peer.clone()),
            state => {
                debug!(peer = %peer_label(peer), ?state, "Cluster peer not yet available");
                PeerState::Waiting(format!(
                    "cluster peer {} is {}",
                    peer_label(peer),
                    state.unwrap_or("unknown")
                ))
            }
        });
    }

    let passphrase = resolve_peer_passphrase(ctx.credentials, &spec.passphrase, ctx.svm).await?;
    let body = json!({
        "remote": { "ip_addresses": addresses },
        "authentication": { "passphrase": passphrase.expose() },
        "encryption": { "proposed": spec.encryption.to_string() },
        "initial_allowed_svms": [{ "name": ctx.svm.spec.svm_name }],
    });

    info!(remote = ?addresses, "Creating cluster peer");
    match ctx.remote.create(paths::CLUSTER_PEERS, &body).await {
        Ok(_) => Ok(PeerState::Waiting(format!(
            "cluster peer to {} requested, waiting for the remote side",
            addresses.join(",")
        ))),
        Err(e) if remote_not_answering(&e) => {
            debug!(error = %e, "Cluster peer request not accepted yet");
            Ok(PeerState::Waiting(format!("cluster peer request pending: {}", e)))
        }
        Err(e) => Err(e),
    }
}

/// Whether a failed cluster-peer request only means the remote cluster has
/// not answered yet. Rejected passphrases, encryption mismatches and
/// authorization failures are real errors.
pub fn remote_not_answering(err: &Error) -> bool {
    match err {
        Error::RemoteApi { status, code, .. } => {
            matches!(status, 502..=504)
                || code.as_deref().map_or(false, |c| PEER_UNREACHABLE_CODES.contains(&c))
        }
        Error::JobFailed { code, .. } => PEER_UNREACHABLE_CODES.contains(&code.to_string().as_str()),
        Error::JobPending { .. } => true,
        _ => false,
    }
}

async fn svm_peer(ctx: &FeatureContext<'_>, spec: &PeerSpec, cluster_peer: &ClusterPeerRecord) -> Result<String> {
    let local = &ctx.svm.spec.svm_name;
    let remote_svm = &spec.remote.svm_name;

    let peers: Vec<SvmPeerRecord> = ctx.remote.list(&paths::svm_peers(local)).await?;
    if peers.iter().any(|p| p.peer_svm_name() == Some(remote_svm.as_str())) {
        debug!(svm = %local, peer = %remote_svm, "SVM peer present");
        return Ok(format!("SVM peer {} present", remote_svm));
    }

    let cluster_name = spec
        .remote
        .cluster_name
        .clone()
        .or_else(|| cluster_peer.name.clone())
        .or_else(|| cluster_peer.remote.as_ref().and_then(|r| r.name.clone()));

    let mut peer = json!({ "svm": { "name": remote_svm } });
    if let Some(cluster) = cluster_name {
        peer["cluster"] = json!({ "name": cluster });
    }
    let body = json!({
        "svm": { "uuid": ctx.svm_uuid },
        "peer": peer,
        "applications": spec.applications,
    });

    info!(svm = %local, peer = %remote_svm, "Creating SVM peer");
    ctx.remote.create(paths::SVM_PEERS, &body).await?;
    Ok(format!("SVM peer {} created", remote_svm))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ConditionStatus, CredentialRef, PeerEncryption, RemotePeerSpec};
    use crate::testing::FeatureHarness;
    use assert_matches::assert_matches;

    fn peer_spec() -> PeerSpec {
        PeerSpec {
            remote: RemotePeerSpec {
                ip_addresses: vec!["10.1.0.1".into(), "10.1.0.2".into()],
                svm_name: "vs1".into(),
                cluster_name: None,
            },
            passphrase: CredentialRef {
                name: "peer".into(),
                namespace: None,
            },
            encryption: PeerEncryption::TlsPsk,
            applications: vec!["snapmirror".into()],
            interfaces: vec![],
        }
    }

    #[tokio::test]
    async fn test_new_peer_request_is_pending() {
        let mut harness = FeatureHarness::with(|spec| spec.peer = Some(peer_spec()));
        harness.credentials = harness.credentials.clone().with_passphrase("storage", "peer", "s3cret!");

        let outcome = Peering.reconcile(&harness.ctx()).await.unwrap();

        assert_matches!(outcome, FeatureOutcome::Pending(_));
        let calls = harness.api.mutating_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].path, paths::CLUSTER_PEERS);
        let body = calls[0].body.as_ref().unwrap();
        assert_eq!(body["authentication"]["passphrase"], "s3cret!");
        assert_eq!(body["encryption"]["proposed"], "tls_psk");
        assert_eq!(harness.conditions().last().unwrap().status, ConditionStatus::Unknown);
    }

    #[tokio::test]
    async fn test_unreachable_remote_is_not_an_error() {
        let mut harness = FeatureHarness::with(|spec| spec.peer = Some(peer_spec()));
        harness.credentials = harness.credentials.clone().with_passphrase("storage", "peer", "pw");
        harness
            .api
            .respond_error_to("POST", paths::CLUSTER_PEERS, 400, Some("4653060"), "remote cluster not reachable");

        let outcome = Peering.reconcile(&harness.ctx()).await.unwrap();
        assert_matches!(outcome, FeatureOutcome::Pending(ref m) if m.contains("not reachable"));
    }

    #[tokio::test]
    async fn test_rejected_peer_request_is_an_error() {
        for (status, code, message) in [
            (400, None, "invalid passphrase"),
            (401, None, "not authorized"),
            (403, Some("6"), "permission denied"),
        ] {
            let mut harness = FeatureHarness::with(|spec| spec.peer = Some(peer_spec()));
            harness.credentials = harness.credentials.clone().with_passphrase("storage", "peer", "pw");
            harness
                .api
                .respond_error_to("POST", paths::CLUSTER_PEERS, status, code, message);

            let err = Peering.reconcile(&harness.ctx()).await.unwrap_err();
            assert_matches!(err, Error::RemoteApi { status: s, .. } if s == status);
            let last = harness.conditions().last().cloned().unwrap();
            assert_eq!(last.r#type, ConditionType::ClusterPeer);
            assert_eq!(last.status, ConditionStatus::False);
        }
    }

    #[test]
    fn test_unreachable_classification() {
        let gateway = Error::RemoteApi {
            status: 503,
            code: None,
            message: "busy".into(),
        };
        assert!(remote_not_answering(&gateway));
        let job = Error::JobFailed {
            code: 4653060,
            message: "no response".into(),
        };
        assert!(remote_not_answering(&job));
        let bad_encryption = Error::JobFailed {
            code: 4653100,
            message: "encryption mismatch".into(),
        };
        assert!(!remote_not_answering(&bad_encryption));
    }

    #[tokio::test]
    async fn test_missing_passphrase_is_an_error() {
        let harness = FeatureHarness::with(|spec| spec.peer = Some(peer_spec()));
        let err = Peering.reconcile(&harness.ctx()).await.unwrap_err();
        assert_matches!(err, Error::CredentialNotFound { .. });
        assert!(harness.api.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_available_peer_creates_svm_peer() {
        let harness = FeatureHarness::with(|spec| spec.peer = Some(peer_spec()));
        harness.api.respond(
            &paths::cluster_peers(),
            json!({"records": [{
                "uuid": "cp-1", "name": "cluster2",
                "remote": {"name": "cluster2", "ip_addresses": ["10.1.0.2"]},
                "status": {"state": "available"}
            }]}),
        );

        let outcome = Peering.reconcile(&harness.ctx()).await.unwrap();

        assert_eq!(outcome, FeatureOutcome::Converged);
        let calls = harness.api.mutating_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].path, paths::SVM_PEERS);
        let body = calls[0].body.as_ref().unwrap();
        assert_eq!(body["peer"]["svm"]["name"], "vs1");
        assert_eq!(body["peer"]["cluster"]["name"], "cluster2");
        assert_eq!(body["applications"], json!(["snapmirror"]));
    }

    #[tokio::test]
    async fn test_unavailable_peer_waits() {
        let harness = FeatureHarness::with(|spec| spec.peer = Some(peer_spec()));
        harness.api.respond(
            &paths::cluster_peers(),
            json!({"records": [{
                "uuid": "cp-1", "remote": {"ip_addresses": ["10.1.0.1"]},
                "status": {"state": "pending"}
            }]}),
        );

        let outcome = Peering.reconcile(&harness.ctx()).await.unwrap();
        assert_matches!(outcome, FeatureOutcome::Pending(ref m) if m.contains("pending"));
        assert!(harness.api.mutating_calls().is_empty());
    }
}
