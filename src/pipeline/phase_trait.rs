use super::context::PipelineContext;
use crate::error::PipelineError;
use async_trait::async_trait;

#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, context: &mut PipelineContext) -> Result<(), PipelineError>;
}
