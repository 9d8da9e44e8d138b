//! Job Tracker
//!
//! Mutating calls on job-backed endpoints answer `202 Accepted` with a job
//! reference. The tracker polls the job until it reaches `success` or
//! `failure`, with a bounded number of polls; a job that never settles is
//! reported as [`Error::JobPending`] so the pass is retried rather than
//! treated as an outcome.

use crate::domain::ports::{Sleeper, StorageApi};
use crate::error::{Error, Result};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Polling schedule for remote jobs
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Delay before the second poll
    pub initial_interval: Duration,
    /// Upper bound for the delay between polls
    pub max_interval: Duration,
    /// Growth factor applied after every poll
    pub multiplier: f64,
    /// Hard cap on the number of polls
    pub max_polls: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(2),
            multiplier: 1.5,
            max_polls: 300,
        }
    }
}

// =============================================================================
// Job Records
// =============================================================================

/// Job lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Paused,
    Success,
    Failure,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JobError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

/// `/api/cluster/jobs/{uuid}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobRecord {
    #[serde(default)]
    pub uuid: String,
    pub state: JobState,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub error: Option<JobError>,
}

impl JobRecord {
    /// Identifier of the object a job created.
    ///
    /// Jobs describe themselves as `"POST /api/svm/svms/<uuid>"`; the
    /// identifier is the segment after the last `/`.
    pub fn created_id(&self) -> Option<String> {
        let description = self.description.as_deref()?;
        let tail = description.rsplit('/').next()?;
        let tail = tail.split('?').next().unwrap_or(tail).trim();
        if tail.is_empty() || tail.contains(' ') {
            return None;
        }
        Some(tail.to_string())
    }

    fn failure(&self) -> Error {
        let nested = self.error.clone().unwrap_or_default();
        Error::JobFailed {
            code: self.code.or(nested.code).unwrap_or_default(),
            message: self
                .message
                .clone()
                .or(nested.message)
                .unwrap_or_default(),
        }
    }
}

/// Reference to a job returned by a mutating call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub uuid: String,
    pub path: String,
}

impl JobHandle {
    /// Extract the job reference from a mutating response, if any
    pub fn from_response(response: &Value) -> Option<Self> {
        let job = response.get("job")?;
        let uuid = job.get("uuid").and_then(Value::as_str)?.to_string();
        let path = job
            .pointer("/_links/self/href")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("/api/cluster/jobs/{}", uuid));
        Some(Self { uuid, path })
    }
}

/// Result of a mutating call after any job completed
#[derive(Debug, Clone)]
pub struct Mutation {
    pub body: Value,
    pub job: Option<JobRecord>,
}

impl Mutation {
    /// Identifier of a created object, from the job or the response body
    pub fn created_id(&self) -> Option<String> {
        if let Some(id) = self.job.as_ref().and_then(JobRecord::created_id) {
            return Some(id);
        }
        self.body
            .pointer("/records/0/uuid")
            .or_else(|| self.body.get("uuid"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

// =============================================================================
// Tracker
// =============================================================================

/// Polls remote jobs to a terminal state
#[derive(Clone)]
pub struct JobTracker {
    policy: PollPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl JobTracker {
    pub fn new(policy: PollPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { policy, sleeper }
    }

    /// Resolve a mutating response: wait for its job, if it has one
    pub async fn complete(&self, api: &dyn StorageApi, response: Value) -> Result<Mutation> {
        match JobHandle::from_response(&response) {
            Some(handle) => {
                let job = self.wait(api, &handle).await?;
                Ok(Mutation {
                    body: response,
                    job: Some(job),
                })
            }
            None => Ok(Mutation {
                body: response,
                job: None,
            }),
        }
    }

    /// Poll a job until it succeeds, fails or the poll budget runs out
    pub async fn wait(&self, api: &dyn StorageApi, handle: &JobHandle) -> Result<JobRecord> {
        let mut schedule = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.policy.initial_interval)
            .with_max_interval(self.policy.max_interval)
            .with_multiplier(self.policy.multiplier)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build();

        let max_polls = self.policy.max_polls.max(1);
        for poll in 1..=max_polls {
            let body = api.get(&handle.path).await?;
            let job: JobRecord = serde_json::from_value(body)?;

            match job.state {
                JobState::Success => {
                    debug!(job = %handle.uuid, polls = poll, "Job succeeded");
                    return Ok(job);
                }
                JobState::Failure => {
                    let err = job.failure();
                    warn!(job = %handle.uuid, error = %err, "Job failed");
                    return Err(err);
                }
                state => {
                    debug!(job = %handle.uuid, ?state, poll, "Job not finished");
                }
            }

            if poll < max_polls {
                let delay = schedule
                    .next_backoff()
                    .unwrap_or(self.policy.max_interval);
                self.sleeper.sleep(delay).await;
            }
        }

        Err(Error::JobPending {
            uuid: handle.uuid.clone(),
            polls: max_polls,
        })
    }
}
