//! Audit Trail
//!
//! Every reconciliation step leaves a condition record on the object's
//! status. Most condition types keep their history (new records are
//! appended, capped at `max_history` per type); a few early-lifecycle types
//! replace their previous record. The mode is chosen per condition type by
//! [`AuditPolicy`].

use crate::crd::{ConditionStatus, ConditionType, SvmCondition};
use crate::domain::ports::{AuditSinkRef, HistoryMode, ObjectKey};
use crate::error::Error;
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::warn;

/// Default number of records kept per condition type
pub const DEFAULT_MAX_HISTORY: usize = 10;

// =============================================================================
// Policy
// =============================================================================

/// Per-condition-type history configuration
#[derive(Debug, Clone)]
pub struct AuditPolicy {
    /// Mode for types without an override
    pub default_mode: HistoryMode,
    /// Per-type modes
    pub overrides: BTreeMap<ConditionType, HistoryMode>,
    /// Records kept per type in append mode
    pub max_history: usize,
}

impl Default for AuditPolicy {
    fn default() -> Self {
        let overrides = [
            ConditionType::ClusterManagementHost,
            ConditionType::ClusterCredentials,
            ConditionType::RemoteConnection,
            ConditionType::SvmLookup,
            ConditionType::Finalizer,
        ]
        .into_iter()
        .map(|t| (t, HistoryMode::Replace))
        .collect();

        Self {
            default_mode: HistoryMode::Append,
            overrides,
            max_history: DEFAULT_MAX_HISTORY,
        }
    }
}

impl AuditPolicy {
    pub fn mode_for(&self, condition_type: ConditionType) -> HistoryMode {
        self.overrides
            .get(&condition_type)
            .copied()
            .unwrap_or(self.default_mode)
    }
}

/// Merge one record into a condition list.
///
/// `Replace` drops every earlier record of the same type. `Append` keeps
/// them, dropping the oldest once more than `max_history` exist.
pub fn apply_record(
    conditions: &mut Vec<SvmCondition>,
    record: SvmCondition,
    mode: HistoryMode,
    max_history: usize,
) {
    let condition_type = record.r#type;
    match mode {
        HistoryMode::Replace => {
            conditions.retain(|c| c.r#type != condition_type);
            conditions.push(record);
        }
        HistoryMode::Append => {
            conditions.push(record);
            let limit = max_history.max(1);
            let mut excess = conditions
                .iter()
                .filter(|c| c.r#type == condition_type)
                .count()
                .saturating_sub(limit);
            conditions.retain(|c| {
                if excess > 0 && c.r#type == condition_type {
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
        }
    }
}

/// Whether `record` repeats the newest record of its type.
///
/// Timestamps are ignored; a repeat carries no new information and need
/// not be written.
pub fn is_repeat(conditions: &[SvmCondition], record: &SvmCondition) -> bool {
    conditions
        .iter()
        .rev()
        .find(|c| c.r#type == record.r#type)
        .map_or(false, |last| {
            last.status == record.status && last.reason == record.reason && last.message == record.message
        })
}

// =============================================================================
// Recorder
// =============================================================================

/// Writes condition records for one object
#[derive(Clone)]
pub struct AuditRecorder {
    sink: AuditSinkRef,
    owner: ObjectKey,
    policy: AuditPolicy,
}

impl AuditRecorder {
    pub fn new(sink: AuditSinkRef, owner: ObjectKey, policy: AuditPolicy) -> Self {
        Self {
            sink,
            owner,
            policy,
        }
    }

    pub async fn success(&self, condition_type: ConditionType, reason: &str, message: impl Into<String>) {
        self.record(condition_type, ConditionStatus::True, reason, message.into())
            .await;
    }

    pub async fn unknown(&self, condition_type: ConditionType, reason: &str, message: impl Into<String>) {
        self.record(condition_type, ConditionStatus::Unknown, reason, message.into())
            .await;
    }

    /// Failure record carrying the error's reason and full message
    pub async fn error(&self, condition_type: ConditionType, err: &Error) {
        self.record(condition_type, ConditionStatus::False, err.reason(), err.to_string())
            .await;
    }

    async fn record(
        &self,
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: &str,
        message: String,
    ) {
        let record = SvmCondition {
            r#type: condition_type,
            status,
            last_transition_time: Some(Utc::now()),
            reason: Some(reason.to_string()),
            message: Some(message),
        };

        let mode = self.policy.mode_for(condition_type);
        if let Err(e) = self
            .sink
            .append(&self.owner, record, mode, self.policy.max_history)
            .await
        {
            warn!(owner = %self.owner, condition = %condition_type, error = %e, "Failed to record condition");
        }
    }
}
