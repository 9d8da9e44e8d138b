//! Remote storage-management API
//!
//! Record models, path builders, the job tracker and the typed resource
//! facade used by the reconcilers.

pub mod jobs;
pub mod models;
pub mod paths;
pub mod resources;
pub mod settings;

pub use jobs::{JobHandle, JobRecord, JobState, JobTracker, Mutation, PollPolicy};
pub use resources::{Remote, Verb};
pub use settings::{ClusterVersion, RemoteSettings};
