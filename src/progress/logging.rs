//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, error, info};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::PipelineStarted { project } => {
                info!(project = %project, "Starting build pipeline");
            }
            ProgressEvent::StageStarted { stage } => {
                info!(stage = %stage, "Stage started");
            }
            ProgressEvent::StepStarted { stage, step } => {
                debug!(stage = %stage, step = %step, "Step started");
            }
            ProgressEvent::StepComplete {
                stage,
                step,
                duration,
            } => {
                info!(
                    stage = %stage,
                    step = %step,
                    duration_ms = duration.as_millis() as u64,
                    "Step complete"
                );
            }
            ProgressEvent::StageComplete { stage, duration } => {
                info!(
                    stage = %stage,
                    duration_ms = duration.as_millis() as u64,
                    "Stage complete"
                );
            }
            ProgressEvent::ArtifactReady {
                build_id,
                packages,
                digest,
            } => {
                info!(
                    build_id = %build_id,
                    packages,
                    digest = %digest,
                    "Environment ready"
                );
            }
            ProgressEvent::ImagePromoted { path } => {
                info!(path = %path, "Runtime image written");
            }
            ProgressEvent::Completed { total_time } => {
                info!(
                    total_time_ms = total_time.as_millis() as u64,
                    "Pipeline complete"
                );
            }
            ProgressEvent::Failed { stage, error } => {
                error!(stage = %stage, error = %error, "Pipeline failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_logging_all_events() {
        let handler = LoggingHandler;

        let events = vec![
            ProgressEvent::PipelineStarted {
                project: "/test".to_string(),
            },
            ProgressEvent::StageStarted {
                stage: "base".to_string(),
            },
            ProgressEvent::StepStarted {
                stage: "builder".to_string(),
                step: "install".to_string(),
            },
            ProgressEvent::StepComplete {
                stage: "builder".to_string(),
                step: "install".to_string(),
                duration: Duration::from_millis(10),
            },
            ProgressEvent::StageComplete {
                stage: "builder".to_string(),
                duration: Duration::from_millis(20),
            },
            ProgressEvent::ArtifactReady {
                build_id: "b1".to_string(),
                packages: 6,
                digest: "sha256:00".to_string(),
            },
            ProgressEvent::ImagePromoted {
                path: "/out".to_string(),
            },
            ProgressEvent::Completed {
                total_time: Duration::from_secs(5),
            },
            ProgressEvent::Failed {
                stage: "builder".to_string(),
                error: "Test error".to_string(),
            },
        ];

        for event in events {
            handler.on_progress(&event);
        }
    }
}
