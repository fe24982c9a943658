pub mod job;
pub mod matcher;
pub mod registry;

pub use job::{Job, JobId, JobSpec, JobStatus, JobSummary, Resources};
pub use matcher::{MatchOutcome, ResourceMatcher};
pub use registry::JobRegistry;
