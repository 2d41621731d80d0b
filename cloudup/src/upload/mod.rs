pub mod backoff;
pub mod chunk;
pub mod collector;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod item;
pub mod negotiator;
pub mod path_lock;
pub mod paths;
pub mod queue;
mod resume;
pub mod sampler;

pub use collector::{CollectError, UploadCandidate, collect_candidates};
pub use conflict::{ConflictStrategy, DirectoryListing};
pub use engine::{GlobalCommand, UploadManager};
pub use error::UploadError;
pub use item::{FileHandle, ItemId, UploadItem, UploadStatus};
pub use queue::{QueueEvent, UploadSummary};
pub use sampler::SpeedMode;
