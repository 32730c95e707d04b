//! Progress handler trait and events

use std::time::Duration;

/// Events emitted while the pipeline runs
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Pipeline started for a project
    PipelineStarted { project: String },

    /// A stage (base, builder, final) started
    StageStarted { stage: String },

    /// A step inside a stage started
    StepStarted { stage: String, step: String },

    /// A step finished
    StepComplete {
        stage: String,
        step: String,
        duration: Duration,
    },

    /// A stage finished
    StageComplete { stage: String, duration: Duration },

    /// The builder produced its environment
    ArtifactReady {
        build_id: String,
        packages: usize,
        digest: String,
    },

    /// The runtime image is in place
    ImagePromoted { path: String },

    /// Pipeline completed successfully
    Completed { total_time: Duration },

    /// Pipeline failed
    Failed { stage: String, error: String },
}

/// Trait for handling progress events
pub trait ProgressHandler: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    impl ProgressHandler for CountingHandler {
        fn on_progress(&self, _event: &ProgressEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_progress_events() {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler {
            count: count.clone(),
        };

        handler.on_progress(&ProgressEvent::PipelineStarted {
            project: "/test".to_string(),
        });
        handler.on_progress(&ProgressEvent::StageStarted {
            stage: "builder".to_string(),
        });
        handler.on_progress(&ProgressEvent::Completed {
            total_time: Duration::from_secs(5),
        });

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_event_debug() {
        let event = ProgressEvent::StepStarted {
            stage: "builder".to_string(),
            step: "create venv".to_string(),
        };
        let debug_str = format!("{:?}", event);
        assert!(debug_str.contains("StepStarted"));
        assert!(debug_str.contains("create venv"));
    }
}
