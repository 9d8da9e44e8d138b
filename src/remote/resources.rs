//! Typed access to remote resources
//!
//! [`Remote`] wraps the raw [`StorageApi`] port: reads decode into the
//! lenient records of [`crate::remote::models`], and every mutating call is
//! driven through the [`JobTracker`] so callers only ever see settled
//! outcomes.

use crate::controller::metrics::Metrics;
use crate::domain::interface::{InterfaceScope, NetworkInterface};
use crate::domain::ports::StorageApiRef;
use crate::error::{Error, Result};
use crate::remote::jobs::{JobTracker, Mutation};
use crate::remote::models::{self, ClusterRecord, IpInterfaceRecord};
use crate::remote::paths;
use crate::remote::settings::ClusterVersion;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Mutating verbs, as reported in metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Post,
    Patch,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Post => "POST",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
        }
    }
}

/// Remote API client bound to one cluster for one pass
#[derive(Clone)]
pub struct Remote {
    api: StorageApiRef,
    jobs: JobTracker,
    metrics: Arc<Metrics>,
}

impl Remote {
    pub fn new(api: StorageApiRef, jobs: JobTracker, metrics: Arc<Metrics>) -> Self {
        Self { api, jobs, metrics }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetch and decode a single object
    pub async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let body = self.api.get(path).await?;
        models::record(path, body)
    }

    /// Fetch a single object; a 404 yields `None`
    pub async fn fetch_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        match self.api.get(path).await {
            Ok(body) => models::record(path, body).map(Some),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetch a collection; a 404 yields an empty list
    pub async fn list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        match self.api.get(path).await {
            Ok(body) => models::records(path, body),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Release of the cluster; also proves the connection works
    pub async fn cluster_version(&self) -> Result<ClusterVersion> {
        let cluster: ClusterRecord = self.fetch(paths::CLUSTER).await?;
        Ok(ClusterVersion::from_cluster(&cluster))
    }

    /// Interfaces in a scope, optionally restricted to one service policy
    pub async fn interfaces(
        &self,
        scope: &InterfaceScope,
        service_policy: Option<&str>,
    ) -> Result<Vec<NetworkInterface>> {
        let path = match scope {
            InterfaceScope::Svm(uuid) => paths::svm_interfaces(uuid, service_policy),
            InterfaceScope::Cluster { ipspace } => paths::cluster_interfaces(ipspace, service_policy),
        };
        let records: Vec<IpInterfaceRecord> = self.list(&path).await?;
        Ok(records.into_iter().map(NetworkInterface::from).collect())
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    pub async fn create(&self, path: &str, body: &Value) -> Result<Mutation> {
        let response = self.api.post(path, body).await;
        self.settle(Verb::Post, path, response).await
    }

    pub async fn update(&self, path: &str, body: &Value) -> Result<Mutation> {
        let response = self.api.patch(path, body).await;
        self.settle(Verb::Patch, path, response).await
    }

    pub async fn remove(&self, path: &str) -> Result<Mutation> {
        let response = self.api.delete(path).await;
        self.settle(Verb::Delete, path, response).await
    }

    async fn settle(&self, verb: Verb, path: &str, response: Result<Value>) -> Result<Mutation> {
        self.metrics.record_mutation(verb);
        debug!(verb = verb.as_str(), path, "Remote mutation");

        let mutation = self.jobs.complete(self.api.as_ref(), response?).await;
        match &mutation {
            Ok(m) if m.job.is_some() => self.metrics.record_job("success"),
            Ok(_) => {}
            Err(Error::JobFailed { .. }) => self.metrics.record_job("failure"),
            Err(Error::JobPending { .. }) => self.metrics.record_job("pending"),
            Err(_) => {}
        }
        mutation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::jobs::PollPolicy;
    use crate::remote::models::SvmRecord;
    use crate::testing::{FakeStorageApi, RecordingSleeper};
    use assert_matches::assert_matches;
    use serde_json::json;

    fn remote(api: Arc<FakeStorageApi>) -> (Remote, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new().unwrap());
        let jobs = JobTracker::new(PollPolicy::default(), Arc::new(RecordingSleeper::default()));
        (Remote::new(api, jobs, metrics.clone()), metrics)
    }

    #[tokio::test]
    async fn test_missing_objects_and_collections() {
        let api = Arc::new(FakeStorageApi::new());
        let (remote, _) = remote(api);

        let svm: Option<SvmRecord> = remote.fetch_optional(&paths::svm("gone")).await.unwrap();
        assert!(svm.is_none());

        let svms: Vec<SvmRecord> = remote.list(&paths::svm_by_name("vs0")).await.unwrap();
        assert!(svms.is_empty());

        let err = remote.fetch::<SvmRecord>(&paths::svm("gone")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_remote_errors_propagate() {
        let api = Arc::new(FakeStorageApi::new());
        api.respond_error(paths::SVMS, 500, Some("1"), "internal");
        let (remote, _) = remote(api);

        let err = remote.list::<SvmRecord>(paths::SVMS).await.unwrap_err();
        assert_matches!(err, Error::RemoteApi { status: 500, .. });
    }

    #[tokio::test]
    async fn test_mutations_are_counted_and_settled() {
        let api = Arc::new(FakeStorageApi::new());
        api.respond_job(
            "POST",
            paths::SVMS,
            "j1",
            json!({"uuid": "j1", "state": "success", "description": "POST /api/svm/svms/new-uuid"}),
        );
        let (remote, metrics) = remote(api);

        let mutation = remote.create(paths::SVMS, &json!({"name": "vs0"})).await.unwrap();
        assert_eq!(mutation.created_id().as_deref(), Some("new-uuid"));
        assert_eq!(metrics.mutations("POST"), 1);
        assert_eq!(metrics.jobs("success"), 1);
    }

    #[tokio::test]
    async fn test_cluster_version() {
        let api = Arc::new(FakeStorageApi::new());
        api.respond(
            paths::CLUSTER,
            json!({"name": "c1", "version": {"generation": 9, "major": 12, "minor": 1}}),
        );
        let (remote, _) = remote(api);
        assert_eq!(remote.cluster_version().await.unwrap(), ClusterVersion::new(9, 12, 1));
    }
}
