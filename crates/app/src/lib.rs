pub mod config;
pub mod correlator;
pub mod error;
pub mod orchestrator;
pub mod providers;

pub use config::{ConfigLoad, PipelineConfig, load_or_create};
pub use correlator::{CorrelationGroup, CorrelationSummary, correlate_range, correlation_groups};
pub use error::{AppError, PipelineError, Result};
pub use orchestrator::{
    Backoff, FileOutcome, FileTask, ManifestOutcome, Orchestrator, Stage, WorkQueue,
};
pub use providers::{ProviderAccessError, ProviderAccessor, ProviderService};
