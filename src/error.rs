//! Top-level error taxonomy

use crate::config::ConfigError;
use crate::launch::RuntimeError;
use crate::stage::{BuildError, PromotionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Build failed: {0}")]
    Build(#[from] BuildError),

    #[error("Promotion failed: {0}")]
    Promotion(#[from] PromotionError),

    #[error("Runtime failed: {0}")]
    Runtime(#[from] RuntimeError),
}

impl PipelineError {
    /// Stage the error belongs to, for progress reporting
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "config",
            PipelineError::Build(_) => "builder",
            PipelineError::Promotion(_) => "final",
            PipelineError::Runtime(_) => "runtime",
        }
    }
}
