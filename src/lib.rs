pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod processor;
pub mod queue;
pub mod sidecar_api;

pub use config::{ResolvedConfig, RunConfig};
pub use error::AppError;
pub use processor::{BatchEvent, BatchProcessor, BatchState, EventSink, RunOutcome, RunSummary};
pub use queue::{ItemStatus, Queue, QueueItem, SharedQueue};
pub use sidecar_api::FilterPreviewParams;
