//! Typed credential channels
//!
//! Cluster-admin and SVM-admin credentials are read from the same kind of
//! secret but must never be confused: the remote client only accepts
//! `Credentials<ClusterAdmin>` and the account reconciler only accepts
//! `Credentials<SvmAdmin>`. Each role is resolved through its own function.

use crate::crd::{CredentialRef, StorageVirtualMachine};
use crate::domain::ports::{CredentialResolver, SecretCredentials};
use crate::error::Result;
use std::marker::PhantomData;

/// Marker for the role a credential is used in
pub trait CredentialRole: Send + Sync + 'static {
    const LABEL: &'static str;
}

/// Cluster administrator, used to talk to the remote API
#[derive(Debug)]
pub enum ClusterAdmin {}

/// SVM administrator account provisioned on the SVM
#[derive(Debug)]
pub enum SvmAdmin {}

impl CredentialRole for ClusterAdmin {
    const LABEL: &'static str = "cluster-admin";
}

impl CredentialRole for SvmAdmin {
    const LABEL: &'static str = "svm-admin";
}

/// Username/password bound to a role
pub struct Credentials<R: CredentialRole> {
    username: String,
    password: String,
    _role: PhantomData<R>,
}

impl<R: CredentialRole> Credentials<R> {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            _role: PhantomData,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    fn from_secret(secret: SecretCredentials) -> Self {
        Self::new(secret.username, secret.password)
    }
}

impl<R: CredentialRole> Clone for Credentials<R> {
    fn clone(&self) -> Self {
        Self::new(self.username.clone(), self.password.clone())
    }
}

impl<R: CredentialRole> std::fmt::Debug for Credentials<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("role", &R::LABEL)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Shared passphrase for cluster peering
#[derive(Clone)]
pub struct PeerPassphrase(String);

impl PeerPassphrase {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for PeerPassphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PeerPassphrase(<redacted>)")
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Resolve the cluster-admin credential of an object
pub async fn resolve_cluster_admin(
    resolver: &dyn CredentialResolver,
    svm: &StorageVirtualMachine,
) -> Result<Credentials<ClusterAdmin>> {
    let secret = resolve_ref(resolver, &svm.spec.cluster_credentials, svm).await?;
    Ok(Credentials::from_secret(secret))
}

/// Resolve the SVM-admin credential, if one is configured
pub async fn resolve_svm_admin(
    resolver: &dyn CredentialResolver,
    svm: &StorageVirtualMachine,
) -> Result<Option<Credentials<SvmAdmin>>> {
    match &svm.spec.svm_admin_credentials {
        Some(reference) => {
            let secret = resolve_ref(resolver, reference, svm).await?;
            Ok(Some(Credentials::from_secret(secret)))
        }
        None => Ok(None),
    }
}

/// Resolve the cluster peering passphrase
pub async fn resolve_peer_passphrase(
    resolver: &dyn CredentialResolver,
    reference: &CredentialRef,
    svm: &StorageVirtualMachine,
) -> Result<PeerPassphrase> {
    let namespace = svm.namespace_or_default();
    let passphrase = resolver
        .resolve_passphrase(&reference.name, reference.namespace_or(&namespace))
        .await?;
    Ok(PeerPassphrase(passphrase))
}

async fn resolve_ref(
    resolver: &dyn CredentialResolver,
    reference: &CredentialRef,
    svm: &StorageVirtualMachine,
) -> Result<SecretCredentials> {
    let namespace = svm.namespace_or_default();
    resolver
        .resolve(&reference.name, reference.namespace_or(&namespace))
        .await
}
