use super::context::PipelineContext;
use super::phase_trait::PipelineStage;
use super::stages::{BaseStage, BuilderStage, FinalStage};
use crate::error::PipelineError;
use crate::image::RuntimeImage;
use crate::progress::ProgressEvent;
use crate::stage::PromotionError;
use crate::util::fs as fsutil;
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct PipelineOrchestrator {
    keep_work: bool,
}

impl PipelineOrchestrator {
    pub fn new() -> Self {
        Self { keep_work: false }
    }

    /// Leave the builder's work directory in place after the run
    pub fn keep_work(mut self, keep: bool) -> Self {
        self.keep_work = keep;
        self
    }

    pub fn stages() -> Vec<Box<dyn PipelineStage>> {
        vec![Box::new(BaseStage), Box::new(BuilderStage), Box::new(FinalStage)]
    }

    /// Run base, builder and final in order
    pub async fn execute(&self, context: &mut PipelineContext) -> Result<RuntimeImage, PipelineError> {
        let start = Instant::now();
        info!(
            "Starting pipeline for: {}",
            context.project_dir.display()
        );
        context.progress.on_progress(&ProgressEvent::PipelineStarted {
            project: context.project_dir.display().to_string(),
        });

        let result = self.run_stages(context).await;

        if !self.keep_work {
            if let Err(e) = fsutil::remove_if_exists(&context.work_dir) {
                warn!(work_dir = %context.work_dir.display(), error = %e, "Failed to remove work directory");
            }
        }

        match result {
            Ok(()) => {
                let image = context.image.clone().ok_or_else(|| PromotionError::MissingArtifact {
                    path: context.output_dir.clone(),
                })?;
                info!("Pipeline complete: {}", image.root.display());
                context.progress.on_progress(&ProgressEvent::Completed {
                    total_time: start.elapsed(),
                });
                Ok(image)
            }
            Err(e) => {
                context.progress.on_progress(&ProgressEvent::Failed {
                    stage: e.stage().to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_stages(&self, context: &mut PipelineContext) -> Result<(), PipelineError> {
        for stage in Self::stages() {
            let name = stage.name();
            info!("Stage: {}", name);
            context.progress.on_progress(&ProgressEvent::StageStarted {
                stage: name.to_string(),
            });

            let stage_start = Instant::now();
            stage.execute(context).await?;

            context.progress.on_progress(&ProgressEvent::StageComplete {
                stage: name.to_string(),
                duration: stage_start.elapsed(),
            });
            debug!("Stage {} complete", name);
        }
        Ok(())
    }
}

impl Default for PipelineOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}
