pub mod error;
pub mod info;
pub mod manager;
pub mod progress;
pub mod retry;
pub mod retry_coordinator;
pub mod source;
pub mod status;
pub mod task;
pub mod task_slot_pool;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{
    EncodeError, EngineError, EngineResult, ErrorKind, RestrictedContent, RestrictionScope,
    SourceError,
};
pub use info::{
    AccessCredential, ContentDescriptor, ContentType, DownloadInfo, DownloadOptions, Resolution,
    TimeRange,
};
pub use manager::DownloadManager;
pub use progress::ProgressState;
pub use retry::RetryPolicy;
pub use retry_coordinator::RetryCoordinator;
pub use source::{
    Acquisition, AcquisitionPlan, Chunk, EncodeJob, EncodeProgress, Encoder, MediaSource,
};
pub use status::{Phase, StatusState, TaskOutcome, TriState, WaitingInfo};
pub use task::{DownloadTask, TaskSnapshot};
pub use task_slot_pool::SlotPools;
