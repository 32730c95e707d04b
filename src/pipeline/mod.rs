pub mod context;
pub mod orchestrator;
pub mod phase_trait;
pub mod stages;

pub use context::PipelineContext;
pub use orchestrator::PipelineOrchestrator;
pub use phase_trait::PipelineStage;
