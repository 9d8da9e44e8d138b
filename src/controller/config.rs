//! Reconciler configuration

use crate::controller::audit::AuditPolicy;
use crate::remote::jobs::PollPolicy;
use crate::remote::settings::RemoteSettings;
use std::time::Duration;

/// Bounded retry loop used by every teardown step
#[derive(Debug, Clone)]
pub struct TeardownPolicy {
    /// Attempts per step before giving up for this pass
    pub attempts: u32,
    /// Sleep between attempts
    pub interval: Duration,
}

impl Default for TeardownPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval: Duration::from_secs(2),
        }
    }
}

/// Configuration of the reconciliation engine
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Requeue after a converged pass
    pub resync_interval: Duration,
    /// Requeue after a transient failure
    pub retry_interval: Duration,
    /// Requeue while a feature waits on the remote side
    pub pending_interval: Duration,
    pub poll: PollPolicy,
    pub teardown: TeardownPolicy,
    pub audit: AuditPolicy,
    pub remote: RemoteSettings,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(300),
            retry_interval: Duration::from_secs(30),
            pending_interval: Duration::from_secs(15),
            poll: PollPolicy::default(),
            teardown: TeardownPolicy::default(),
            audit: AuditPolicy::default(),
            remote: RemoteSettings::default(),
        }
    }
}
