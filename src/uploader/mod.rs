//! Bounded-concurrency uploads with per-request lifecycle tracking.

mod error;
mod orchestrator;
pub mod planner;
pub mod progress;
mod request;
pub mod state;

pub use error::{StateError, SubmitError};
pub use orchestrator::{Uploader, UploaderBuilder};
pub use planner::Part;
pub use progress::{Progress, ProgressAggregator};
pub use request::{
    BatchCompletion, BatchSubmission, Completion, Settlement, Submission, UploadId, UploadRequest,
};
pub use state::{Event, Snapshot, UploadRecord, UploadState, UploadStatus};
