//! Domain Ports - Core trait definitions for the SVM operator
//!
//! These traits define the boundaries between the reconciliation engine and
//! the systems it talks to: the remote storage-management API, the
//! Kubernetes API (desired state, secrets, status) and the clock.
//! Adapters implement these traits to provide concrete functionality.

use crate::crd::{StorageVirtualMachine, SvmCondition};
use crate::domain::credentials::{ClusterAdmin, Credentials};
use crate::domain::host::ManagementHost;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Object Identity
// =============================================================================

/// Namespace/name of a StorageVirtualMachine object
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an existing object
    pub fn of(svm: &StorageVirtualMachine) -> Self {
        Self::new(svm.namespace_or_default(), svm.name())
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// =============================================================================
// Remote Storage API Port
// =============================================================================

/// Raw access to the remote storage-management REST API.
///
/// Paths are absolute API paths including any query string. A 404 surfaces
/// as [`crate::error::Error::RemoteNotFound`]; other non-success statuses as
/// [`crate::error::Error::RemoteApi`].
#[async_trait]
pub trait StorageApi: Send + Sync {
    async fn get(&self, path: &str) -> Result<Value>;

    async fn post(&self, path: &str, body: &Value) -> Result<Value>;

    async fn patch(&self, path: &str, body: &Value) -> Result<Value>;

    async fn delete(&self, path: &str) -> Result<Value>;
}

/// Builds a [`StorageApi`] bound to one host and cluster-admin credential
#[async_trait]
pub trait StorageApiConnector: Send + Sync {
    async fn connect(
        &self,
        host: &ManagementHost,
        credentials: &Credentials<ClusterAdmin>,
    ) -> Result<Arc<dyn StorageApi>>;
}

// =============================================================================
// Desired State Port
// =============================================================================

/// Source of the desired state and the few writes the engine makes back to it
#[async_trait]
pub trait DesiredStateSource: Send + Sync {
    /// Fetch the object; `None` when it no longer exists
    async fn get(&self, key: &ObjectKey) -> Result<Option<StorageVirtualMachine>>;

    /// Persist a newly assigned remote identifier
    async fn persist_svm_uuid(&self, key: &ObjectKey, uuid: &str) -> Result<()>;

    async fn add_finalizer(&self, key: &ObjectKey) -> Result<()>;

    async fn remove_finalizer(&self, key: &ObjectKey) -> Result<()>;
}

// =============================================================================
// Credential Port
// =============================================================================

/// Username/password pair as stored in a secret
#[derive(Clone, PartialEq, Eq)]
pub struct SecretCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for SecretCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Reads credential material from secrets.
///
/// Fails with `CredentialNotFound` when the secret is absent and
/// `CredentialMalformed` when a required key is missing or empty.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, name: &str, namespace: &str) -> Result<SecretCredentials>;

    async fn resolve_passphrase(&self, name: &str, namespace: &str) -> Result<String>;
}

// =============================================================================
// Audit Port
// =============================================================================

/// Whether a new record joins the history of its type or replaces it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMode {
    Append,
    Replace,
}

/// Destination of condition records
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Store one record; `max_history` bounds append-mode histories per type
    async fn append(
        &self,
        owner: &ObjectKey,
        record: SvmCondition,
        mode: HistoryMode,
        max_history: usize,
    ) -> Result<()>;
}

// =============================================================================
// Secret Materialization Port
// =============================================================================

/// S3 access keys returned once, at user creation
#[derive(Clone, PartialEq, Eq)]
pub struct AccessKeyPair {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for AccessKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessKeyPair")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Writes locally stored secrets
#[async_trait]
pub trait SecretWriter: Send + Sync {
    async fn create_access_keys(
        &self,
        name: &str,
        namespace: &str,
        keys: &AccessKeyPair,
        owner: &ObjectKey,
    ) -> Result<()>;

    /// Delete a secret; absent secrets are not an error
    async fn delete(&self, name: &str, namespace: &str) -> Result<()>;
}

// =============================================================================
// Clock Port
// =============================================================================

/// Waits between polls and retries
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real-time sleeper backed by tokio timers
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type StorageApiRef = Arc<dyn StorageApi>;
pub type StorageApiConnectorRef = Arc<dyn StorageApiConnector>;
pub type DesiredStateSourceRef = Arc<dyn DesiredStateSource>;
pub type CredentialResolverRef = Arc<dyn CredentialResolver>;
pub type AuditSinkRef = Arc<dyn AuditSink>;
pub type SecretWriterRef = Arc<dyn SecretWriter>;
pub type SleeperRef = Arc<dyn Sleeper>;
