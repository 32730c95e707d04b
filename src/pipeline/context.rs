//! State handed from stage to stage

use crate::artifact::EnvironmentArtifact;
use crate::config::PipelineConfig;
use crate::exec::CommandRunner;
use crate::image::RuntimeImage;
use crate::progress::{NoOpHandler, ProgressHandler};
use crate::stage::BaseEnvironment;
use std::path::PathBuf;
use std::sync::Arc;

/// Owns the configuration, the command runner and everything the stages
/// produce along the way
pub struct PipelineContext {
    pub config: PipelineConfig,

    /// Project containing the manifest, lock file and sources
    pub project_dir: PathBuf,

    /// Builder's scratch directory; removed after the run
    pub work_dir: PathBuf,

    /// Where the runtime image is written
    pub output_dir: PathBuf,

    pub runner: Arc<dyn CommandRunner>,
    pub progress: Arc<dyn ProgressHandler>,

    /// Set by the base stage
    pub base: Option<BaseEnvironment>,
    /// Set by the builder, taken by the final stage
    pub artifact: Option<EnvironmentArtifact>,
    /// Set by the final stage
    pub image: Option<RuntimeImage>,
}

impl PipelineContext {
    pub fn new(
        config: PipelineConfig,
        project_dir: PathBuf,
        work_dir: PathBuf,
        output_dir: PathBuf,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            config,
            project_dir,
            work_dir,
            output_dir,
            runner,
            progress: Arc::new(NoOpHandler),
            base: None,
            artifact: None,
            image: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    /// The base environment, deriving it from the configuration if the base
    /// stage has not run
    pub fn base(&mut self) -> &BaseEnvironment {
        let config = &self.config.base;
        self.base
            .get_or_insert_with(|| BaseEnvironment::from_config(config))
    }
}
