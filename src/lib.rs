#![forbid(unsafe_code)]

pub mod classify;
pub mod cli;
pub mod error;
pub mod fetch;
pub mod limiter;
pub mod logging;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod planner;
pub mod retry;
pub mod store;

pub use classify::{classify, FailureCategory};
pub use error::{SgError, SgResult};
pub use model::{CaptionedSpan, ItemId, JobStatus, RunSummary, Transcript};
pub use pipeline::{run_batch, PipelineConfig};
pub use store::JobStore;
