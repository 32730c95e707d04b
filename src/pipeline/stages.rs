use super::context::PipelineContext;
use super::phase_trait::PipelineStage;
use crate::error::PipelineError;
use crate::progress::ProgressEvent;
use crate::stage::builder::VENV_DIR;
use crate::stage::{BaseEnvironment, EnvironmentBuilder, ImagePromoter, PromotionError};
use async_trait::async_trait;
use tracing::debug;

pub struct BaseStage;

#[async_trait]
impl PipelineStage for BaseStage {
    fn name(&self) -> &'static str {
        "base"
    }

    async fn execute(&self, context: &mut PipelineContext) -> Result<(), PipelineError> {
        let base = BaseEnvironment::from_config(&context.config.base);
        debug!(image = %base.image, env = ?base.env(), "Base environment");
        context.base = Some(base);
        Ok(())
    }
}

pub struct BuilderStage;

#[async_trait]
impl PipelineStage for BuilderStage {
    fn name(&self) -> &'static str {
        crate::stage::builder::STAGE_NAME
    }

    async fn execute(&self, context: &mut PipelineContext) -> Result<(), PipelineError> {
        let base = context.base().clone();
        let builder = EnvironmentBuilder::new(&context.config, &base, context.runner.clone())
            .with_progress(context.progress.clone());
        let artifact = builder
            .build(&context.project_dir, &context.work_dir)
            .await?;
        context.artifact = Some(artifact);
        Ok(())
    }
}

pub struct FinalStage;

#[async_trait]
impl PipelineStage for FinalStage {
    fn name(&self) -> &'static str {
        crate::stage::final_stage::STAGE_NAME
    }

    async fn execute(&self, context: &mut PipelineContext) -> Result<(), PipelineError> {
        let artifact = context
            .artifact
            .take()
            .ok_or_else(|| PromotionError::MissingArtifact {
                path: context.work_dir.join(VENV_DIR),
            })?;
        let base = context.base().clone();
        let image = ImagePromoter::new(&context.config, &base)
            .promote(artifact, &context.output_dir)?;
        context.progress.on_progress(&ProgressEvent::ImagePromoted {
            path: image.root.display().to_string(),
        });
        context.image = Some(image);
        Ok(())
    }
}
