//! In-memory test doubles for the engine's ports
//!
//! The fakes script remote responses by verb and path, record every call,
//! and keep desired state, secrets and condition records in memory so the
//! reconcilers can be exercised end to end without a cluster.

use crate::controller::audit::{apply_record, AuditPolicy, AuditRecorder};
use crate::controller::features::FeatureContext;
use crate::controller::metrics::Metrics;
use crate::crd::{
    CredentialRef, StorageVirtualMachine, StorageVirtualMachineSpec, SvmCondition, SVM_FINALIZER,
};
use crate::domain::credentials::{ClusterAdmin, Credentials};
use crate::domain::host::ManagementHost;
use crate::domain::ports::{
    AccessKeyPair, AuditSink, CredentialResolver, DesiredStateSource, HistoryMode, ObjectKey, SecretCredentials,
    SecretWriter, Sleeper, StorageApi, StorageApiConnector,
};
use crate::error::{Error, Result};
use crate::remote::jobs::{JobTracker, PollPolicy};
use crate::remote::models::SvmRecord;
use crate::remote::resources::Remote;
use crate::remote::settings::{ClusterVersion, RemoteSettings};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Storage API
// =============================================================================

/// One call made against [`FakeStorageApi`]
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    pub verb: &'static str,
    pub path: String,
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
enum Reply {
    Body(Value),
    Failure {
        status: u16,
        code: Option<String>,
        message: String,
    },
}

#[derive(Debug, Default)]
struct Script {
    replies: Vec<Reply>,
    served: usize,
}

impl Script {
    /// Next scripted reply; the last one repeats
    fn next(&mut self) -> Option<Reply> {
        let index = self.served.min(self.replies.len().checked_sub(1)?);
        self.served += 1;
        self.replies.get(index).cloned()
    }
}

/// Scripted storage-management API.
///
/// Unscripted reads answer 404, unscripted mutations answer `{}`.
#[derive(Default)]
pub struct FakeStorageApi {
    scripts: Mutex<HashMap<(String, String), Script>>,
    calls: Mutex<Vec<ApiCall>>,
}

impl FakeStorageApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self, verb: &str, path: &str, replies: Vec<Reply>) {
        self.scripts.lock().insert(
            (verb.to_string(), path.to_string()),
            Script { replies, served: 0 },
        );
    }

    pub fn respond(&self, path: &str, body: Value) {
        self.script("GET", path, vec![Reply::Body(body)]);
    }

    pub fn respond_sequence(&self, path: &str, bodies: Vec<Value>) {
        self.script("GET", path, bodies.into_iter().map(Reply::Body).collect());
    }

    pub fn respond_to(&self, verb: &str, path: &str, body: Value) {
        self.script(verb, path, vec![Reply::Body(body)]);
    }

    pub fn respond_error(&self, path: &str, status: u16, code: Option<&str>, message: &str) {
        self.respond_error_to("GET", path, status, code, message);
    }

    pub fn respond_error_to(&self, verb: &str, path: &str, status: u16, code: Option<&str>, message: &str) {
        self.script(
            verb,
            path,
            vec![Reply::Failure {
                status,
                code: code.map(str::to_string),
                message: message.to_string(),
            }],
        );
    }

    /// Answer a mutation with a job and script the job's final state
    pub fn respond_job(&self, verb: &str, path: &str, job_uuid: &str, final_state: Value) {
        let job_path = format!("/api/cluster/jobs/{}", job_uuid);
        self.respond_to(
            verb,
            path,
            json!({
                "job": {
                    "uuid": job_uuid,
                    "_links": { "self": { "href": job_path } }
                }
            }),
        );
        self.respond(&job_path, final_state);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().clone()
    }

    pub fn mutating_calls(&self) -> Vec<ApiCall> {
        self.calls().into_iter().filter(|c| c.verb != "GET").collect()
    }

    fn serve(&self, verb: &'static str, path: &str, body: Option<&Value>) -> Result<Value> {
        self.calls.lock().push(ApiCall {
            verb,
            path: path.to_string(),
            body: body.cloned(),
        });

        let reply = {
            let mut scripts = self.scripts.lock();
            let bare = path.split('?').next().unwrap_or(path);
            let exact = (verb.to_string(), path.to_string());
            let key = if scripts.contains_key(&exact) {
                exact
            } else {
                (verb.to_string(), bare.to_string())
            };
            scripts.get_mut(&key).and_then(Script::next)
        };

        match reply {
            Some(Reply::Body(value)) => Ok(value),
            Some(Reply::Failure { status: 404, .. }) => Err(Error::RemoteNotFound { path: path.to_string() }),
            Some(Reply::Failure { status, code, message }) => Err(Error::RemoteApi { status, code, message }),
            None if verb == "GET" => Err(Error::RemoteNotFound { path: path.to_string() }),
            None => Ok(json!({})),
        }
    }
}

#[async_trait]
impl StorageApi for FakeStorageApi {
    async fn get(&self, path: &str) -> Result<Value> {
        self.serve("GET", path, None)
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.serve("POST", path, Some(body))
    }

    async fn patch(&self, path: &str, body: &Value) -> Result<Value> {
        self.serve("PATCH", path, Some(body))
    }

    async fn delete(&self, path: &str) -> Result<Value> {
        self.serve("DELETE", path, None)
    }
}

/// Connector handing out one shared [`FakeStorageApi`]
pub struct FakeConnector {
    api: Arc<FakeStorageApi>,
    connections: Mutex<Vec<(String, String)>>,
}

impl FakeConnector {
    pub fn new(api: Arc<FakeStorageApi>) -> Self {
        Self {
            api,
            connections: Mutex::new(Vec::new()),
        }
    }

    /// `(host, username)` of every connection made
    pub fn connections(&self) -> Vec<(String, String)> {
        self.connections.lock().clone()
    }
}

#[async_trait]
impl StorageApiConnector for FakeConnector {
    async fn connect(
        &self,
        host: &ManagementHost,
        credentials: &Credentials<ClusterAdmin>,
    ) -> Result<Arc<dyn StorageApi>> {
        self.connections
            .lock()
            .push((host.to_string(), credentials.username().to_string()));
        Ok(self.api.clone())
    }
}

/// Remote client over a fake API with instant job polling
pub fn fake_remote(api: Arc<FakeStorageApi>) -> Remote {
    fake_remote_with_metrics(api).0
}

pub fn fake_remote_with_metrics(api: Arc<FakeStorageApi>) -> (Remote, Arc<Metrics>) {
    let metrics = Arc::new(Metrics::new().expect("metrics"));
    let jobs = JobTracker::new(PollPolicy::default(), Arc::new(RecordingSleeper::default()));
    (Remote::new(api, jobs, metrics.clone()), metrics)
}

/// Interface record as the remote API returns it
pub fn interface_json(uuid: &str, name: &str, address: &str, netmask: &str, policy: &str) -> Value {
    json!({
        "uuid": uuid,
        "name": name,
        "ip": { "address": address, "netmask": netmask },
        "service_policy": { "name": policy },
        "enabled": true
    })
}

// =============================================================================
// Clock
// =============================================================================

/// Returns immediately, remembering every requested delay
#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
    }
}

// =============================================================================
// Credentials
// =============================================================================

#[derive(Debug, Clone)]
enum StoredSecret {
    Login { username: String, password: String },
    Passphrase(String),
    Missing(String),
}

/// Secrets keyed by namespace/name
#[derive(Debug, Clone, Default)]
pub struct FakeCredentials {
    secrets: HashMap<(String, String), StoredSecret>,
}

impl FakeCredentials {
    pub fn with(mut self, namespace: &str, name: &str, username: &str, password: &str) -> Self {
        self.secrets.insert(
            (namespace.into(), name.into()),
            StoredSecret::Login {
                username: username.into(),
                password: password.into(),
            },
        );
        self
    }

    /// A secret that exists but lacks `field`
    pub fn with_malformed(mut self, namespace: &str, name: &str, field: &str) -> Self {
        self.secrets
            .insert((namespace.into(), name.into()), StoredSecret::Missing(field.into()));
        self
    }

    pub fn with_passphrase(mut self, namespace: &str, name: &str, passphrase: &str) -> Self {
        self.secrets.insert(
            (namespace.into(), name.into()),
            StoredSecret::Passphrase(passphrase.into()),
        );
        self
    }

    fn lookup(&self, name: &str, namespace: &str) -> Result<&StoredSecret> {
        self.secrets
            .get(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| Error::CredentialNotFound {
                namespace: namespace.into(),
                name: name.into(),
            })
    }
}

fn malformed(name: &str, namespace: &str, field: &str) -> Error {
    Error::CredentialMalformed {
        namespace: namespace.into(),
        name: name.into(),
        field: field.into(),
    }
}

#[async_trait]
impl CredentialResolver for FakeCredentials {
    async fn resolve(&self, name: &str, namespace: &str) -> Result<SecretCredentials> {
        match self.lookup(name, namespace)? {
            StoredSecret::Login { username, password } => Ok(SecretCredentials {
                username: username.clone(),
                password: password.clone(),
            }),
            StoredSecret::Passphrase(_) => Err(malformed(name, namespace, "username")),
            StoredSecret::Missing(field) => Err(malformed(name, namespace, field)),
        }
    }

    async fn resolve_passphrase(&self, name: &str, namespace: &str) -> Result<String> {
        match self.lookup(name, namespace)? {
            StoredSecret::Passphrase(passphrase) => Ok(passphrase.clone()),
            StoredSecret::Login { .. } => Err(malformed(name, namespace, "passphrase")),
            StoredSecret::Missing(field) => Err(malformed(name, namespace, field)),
        }
    }
}

// =============================================================================
// Audit / Secrets / Desired State
// =============================================================================

/// Keeps condition lists per object, merged like the status writer does
#[derive(Default)]
pub struct RecordingAuditSink {
    conditions: Mutex<BTreeMap<ObjectKey, Vec<SvmCondition>>>,
}

impl RecordingAuditSink {
    pub fn conditions(&self, owner: &ObjectKey) -> Vec<SvmCondition> {
        self.conditions.lock().get(owner).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn append(
        &self,
        owner: &ObjectKey,
        record: SvmCondition,
        mode: HistoryMode,
        max_history: usize,
    ) -> Result<()> {
        let mut conditions = self.conditions.lock();
        apply_record(conditions.entry(owner.clone()).or_default(), record, mode, max_history);
        Ok(())
    }
}

/// A secret written through [`RecordingSecretWriter`]
#[derive(Debug, Clone)]
pub struct CreatedSecret {
    pub name: String,
    pub namespace: String,
    pub keys: AccessKeyPair,
    pub owner: ObjectKey,
}

#[derive(Default)]
pub struct RecordingSecretWriter {
    created: Mutex<Vec<CreatedSecret>>,
    deleted: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
}

impl RecordingSecretWriter {
    /// Make every later write fail
    pub fn fail_writes(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn created(&self) -> Vec<CreatedSecret> {
        self.created.lock().clone()
    }

    /// `(name, namespace)` of every deleted secret
    pub fn deleted(&self) -> Vec<(String, String)> {
        self.deleted.lock().clone()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Internal("secret store unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SecretWriter for RecordingSecretWriter {
    async fn create_access_keys(
        &self,
        name: &str,
        namespace: &str,
        keys: &AccessKeyPair,
        owner: &ObjectKey,
    ) -> Result<()> {
        self.check()?;
        self.created.lock().push(CreatedSecret {
            name: name.into(),
            namespace: namespace.into(),
            keys: keys.clone(),
            owner: owner.clone(),
        });
        Ok(())
    }

    async fn delete(&self, name: &str, namespace: &str) -> Result<()> {
        self.check()?;
        self.deleted.lock().push((name.into(), namespace.into()));
        Ok(())
    }
}

/// Desired-state store that drops an object once it is deleting and has
/// no finalizers left
#[derive(Default)]
pub struct InMemoryDesiredState {
    objects: Mutex<BTreeMap<ObjectKey, StorageVirtualMachine>>,
}

impl InMemoryDesiredState {
    pub fn insert(&self, svm: StorageVirtualMachine) {
        self.objects.lock().insert(ObjectKey::of(&svm), svm);
    }

    pub fn current(&self, key: &ObjectKey) -> Option<StorageVirtualMachine> {
        self.objects.lock().get(key).cloned()
    }

    fn modify(&self, key: &ObjectKey, change: impl FnOnce(&mut StorageVirtualMachine)) -> Result<()> {
        let mut objects = self.objects.lock();
        let svm = objects.get_mut(key).ok_or_else(|| Error::ResourceNotFound {
            kind: "StorageVirtualMachine".into(),
            name: key.to_string(),
        })?;
        change(svm);
        let released = svm.is_deleting() && svm.metadata.finalizers.as_ref().map_or(true, |f| f.is_empty());
        if released {
            objects.remove(key);
        }
        Ok(())
    }
}

#[async_trait]
impl DesiredStateSource for InMemoryDesiredState {
    async fn get(&self, key: &ObjectKey) -> Result<Option<StorageVirtualMachine>> {
        Ok(self.current(key))
    }

    async fn persist_svm_uuid(&self, key: &ObjectKey, uuid: &str) -> Result<()> {
        self.modify(key, |svm| svm.spec.svm_uuid = Some(uuid.to_string()))
    }

    async fn add_finalizer(&self, key: &ObjectKey) -> Result<()> {
        self.modify(key, |svm| {
            let finalizers = svm.metadata.finalizers.get_or_insert_with(Vec::new);
            if !finalizers.iter().any(|f| f == SVM_FINALIZER) {
                finalizers.push(SVM_FINALIZER.to_string());
            }
        })
    }

    async fn remove_finalizer(&self, key: &ObjectKey) -> Result<()> {
        self.modify(key, |svm| {
            if let Some(finalizers) = svm.metadata.finalizers.as_mut() {
                finalizers.retain(|f| f != SVM_FINALIZER);
            }
        })
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// `storage/svm-a`, managing remote SVM `vs0` with uuid `svm-1`
pub fn test_svm() -> StorageVirtualMachine {
    let mut svm = StorageVirtualMachine::new(
        "svm-a",
        StorageVirtualMachineSpec {
            svm_name: "vs0".into(),
            svm_uuid: Some("svm-1".into()),
            cluster_host: "10.0.0.10".into(),
            cluster_credentials: CredentialRef {
                name: "cluster-admin".into(),
                namespace: None,
            },
            ..Default::default()
        },
    );
    svm.metadata.namespace = Some("storage".into());
    svm
}

/// Everything a single feature reconciler needs, backed by fakes
pub struct FeatureHarness {
    pub api: Arc<FakeStorageApi>,
    pub remote: Remote,
    pub audit_sink: Arc<RecordingAuditSink>,
    pub audit: AuditRecorder,
    pub settings: RemoteSettings,
    pub version: ClusterVersion,
    pub svm: StorageVirtualMachine,
    pub record: SvmRecord,
    pub credentials: FakeCredentials,
    pub secrets: RecordingSecretWriter,
}

impl FeatureHarness {
    pub fn with(configure: impl FnOnce(&mut StorageVirtualMachineSpec)) -> Self {
        let mut svm = test_svm();
        configure(&mut svm.spec);

        let api = Arc::new(FakeStorageApi::new());
        let audit_sink = Arc::new(RecordingAuditSink::default());
        let audit = AuditRecorder::new(audit_sink.clone(), ObjectKey::of(&svm), AuditPolicy::default());

        Self {
            remote: fake_remote(api.clone()),
            api,
            audit_sink,
            audit,
            settings: RemoteSettings::default(),
            version: ClusterVersion::new(9, 13, 1),
            record: SvmRecord {
                uuid: Some("svm-1".into()),
                name: svm.spec.svm_name.clone(),
                ..Default::default()
            },
            svm,
            credentials: FakeCredentials::default(),
            secrets: RecordingSecretWriter::default(),
        }
    }

    pub fn ctx(&self) -> FeatureContext<'_> {
        FeatureContext {
            remote: &self.remote,
            audit: &self.audit,
            settings: &self.settings,
            version: self.version,
            svm: &self.svm,
            svm_uuid: "svm-1",
            record: &self.record,
            credentials: &self.credentials,
            secrets: &self.secrets,
        }
    }

    pub fn conditions(&self) -> Vec<SvmCondition> {
        self.audit_sink.conditions(&ObjectKey::of(&self.svm))
    }
}
