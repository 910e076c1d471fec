pub mod config;
pub mod control;
pub mod errors;
pub mod media;
pub mod narration;
pub mod orchestrator;
pub mod qa;
pub mod slide;
pub mod speech;
pub mod store;
pub mod util;

pub use control::{Progress, RunControl, Stage};
pub use errors::{PipelineError, Result};
pub use orchestrator::{Collaborators, OpenAiPipeline, PipelineController, RunReport};
pub use qa::{QaChainConfig, QaOutcome};
